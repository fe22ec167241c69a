//! The per-view pipeline: arbitration, the orchestrator, playback and the
//! session that drives them.

pub mod arbitration;
pub mod debounce;
pub mod orchestrator;
pub mod playback;
pub mod review;
pub mod session;

pub use arbitration::{arbitrate_live, LiveBlock};
pub use debounce::Debouncer;
pub use orchestrator::{
    DeepRequest, DeepRequestOutcome, LiveUpdateOutcome, OrchestrationState, OrchestratorSettings,
    OrchestratorUpdate, SequenceOrigin, Status, TraceOrchestrator,
};
pub use playback::{PlayState, PlaybackController, PlaybackEffect};
pub use review::review_code;
pub use session::{SessionEvent, SessionSettings, TraceSession, ViewSnapshot};
