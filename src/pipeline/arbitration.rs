//! Live-update arbitration
//!
//! Decides whether a heuristic guess may replace the active sequence. The
//! rules form an ordered table; the first rule that fires blocks the update.

use std::fmt;

use super::orchestrator::{SequenceOrigin, Status};

/// Why a live update was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveBlock {
    /// A saved trace is being replayed
    Replaying,
    /// A long oracle-sourced sequence is active for this target
    DeepSequenceActive,
    /// An oracle invocation is running for this target
    InvocationInFlight,
    /// The oracle result is Ready and the code has not changed since
    DeepResultCurrent,
}

impl fmt::Display for LiveBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LiveBlock::Replaying => "replay active",
            LiveBlock::DeepSequenceActive => "simulated trace active",
            LiveBlock::InvocationInFlight => "simulation in flight",
            LiveBlock::DeepResultCurrent => "simulated trace is current",
        };
        write!(f, "{s}")
    }
}

/// Everything the arbitration table looks at
#[derive(Debug, Clone, Copy)]
pub struct ArbitrationInput {
    pub replaying: bool,
    pub invoking: bool,
    pub status: Status,
    pub active_origin: Option<SequenceOrigin>,
    pub active_len: usize,
    /// Sequences longer than this are protected
    pub protect_threshold: usize,
    /// The edited code normalizes to the code the active deep result was made from
    pub code_unchanged: bool,
}

impl ArbitrationInput {
    fn deep_active(&self) -> bool {
        self.active_origin.is_some_and(SequenceOrigin::is_deep)
    }
}

type Rule = (LiveBlock, fn(&ArbitrationInput) -> bool);

/// Evaluated top to bottom; priority is replay > deep result > in-flight lock.
const RULES: &[Rule] = &[
    (LiveBlock::Replaying, |i: &ArbitrationInput| i.replaying),
    (LiveBlock::DeepSequenceActive, |i: &ArbitrationInput| {
        i.deep_active() && i.active_len > i.protect_threshold
    }),
    (LiveBlock::InvocationInFlight, |i: &ArbitrationInput| i.invoking),
    (LiveBlock::DeepResultCurrent, |i: &ArbitrationInput| {
        i.status == Status::Ready && i.deep_active() && i.code_unchanged
    }),
];

/// `Ok(())` when the heuristic result may be adopted.
pub fn arbitrate_live(input: &ArbitrationInput) -> Result<(), LiveBlock> {
    match RULES.iter().find(|(_, fires)| fires(input)) {
        Some((block, _)) => Err(*block),
        None => Ok(()),
    }
}
