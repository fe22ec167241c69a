//! Narration collaborator
//!
//! Speaks frame descriptions aloud. Completion is reported asynchronously
//! on an event channel, tagged with the utterance id it belongs to, so a
//! late completion from a cancelled utterance can be told apart from the
//! current one.

pub mod command;
pub mod mock;

use tokio::sync::mpsc;

pub use command::CommandNarrator;
pub use mock::RecordingNarrator;

/// Identifies one `speak` call
pub type UtteranceId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationEvent {
    Finished { utterance: UtteranceId },
    Failed { utterance: UtteranceId, message: String },
}

impl NarrationEvent {
    pub fn utterance(&self) -> UtteranceId {
        match self {
            NarrationEvent::Finished { utterance } | NarrationEvent::Failed { utterance, .. } => {
                *utterance
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("No speech engine available")]
    Unavailable,

    #[error("Failed to start speech engine: {0}")]
    Spawn(#[from] std::io::Error),
}

pub trait Narrator: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Start speaking `text`. Any utterance already in progress is cut off.
    ///
    /// Exactly one event for `utterance` is sent on `events` unless the
    /// utterance is cancelled first.
    fn speak(
        &self,
        utterance: UtteranceId,
        text: &str,
        events: mpsc::UnboundedSender<NarrationEvent>,
    ) -> Result<(), NarrationError>;

    /// Stop the current utterance, if any. No completion event follows.
    fn cancel(&self);
}

/// Narrator that never speaks; playback falls back to its frame timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNarrator;

impl Narrator for SilentNarrator {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn speak(
        &self,
        _utterance: UtteranceId,
        _text: &str,
        _events: mpsc::UnboundedSender<NarrationEvent>,
    ) -> Result<(), NarrationError> {
        Err(NarrationError::Unavailable)
    }

    fn cancel(&self) {}
}
