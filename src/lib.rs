pub mod config;
pub mod error;
pub mod narration;
pub mod oracle;
pub mod pipeline;
pub mod trace;
pub mod util;

pub use config::Config;
pub use error::TraceError;
pub use narration::{CommandNarrator, Narrator, SilentNarrator};
pub use oracle::{CommandOracle, HttpOracle, Oracle, OracleError};
pub use pipeline::{
    DeepRequest, DeepRequestOutcome, PlayState, Status, TraceOrchestrator, TraceSession,
};
pub use trace::{Decoder, LiveGuesser, ResultCache, SavedTrace, SourceId, TraceFrame};
