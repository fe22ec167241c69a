//! Trace data: frames, the live guesser, the streamed decoder, the result
//! cache and saved traces.

pub mod cache;
pub mod decoder;
pub mod frame;
pub mod guesser;
pub mod issues;
pub mod store;

pub use cache::{normalize_source, CacheKey, ResultCache, SourceId};
pub use decoder::{DecodeOptions, DecodeOutcome, DecodeTarget, Decoder};
pub use frame::{
    FrameAction, Highlight, MemoryValue, MovingElement, StructureKind, TraceFrame,
};
pub use guesser::LiveGuesser;
pub use issues::{CodeIssue, Severity};
pub use store::{SavedTrace, StoreError};
