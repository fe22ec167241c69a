//! Simulation oracle boundary
//!
//! An oracle accepts a prompt and streams back text chunks followed by
//! exactly one terminal event. Backends must support cancellation by drop:
//! once the [`OracleStream`] receiver is gone they stop producing output.

pub mod command;
pub mod http;
pub mod mock;
pub mod prompt;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;

use crate::config::{OracleBackend, OracleConfig};
use crate::trace::cache::SourceId;

pub use command::CommandOracle;
pub use http::HttpOracle;
pub use mock::{MockOracle, MockResponse};

/// What the oracle is being asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// Step-by-step execution trace
    #[default]
    Trace,
    /// List of code issues
    Review,
}

#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub source_id: SourceId,
    pub prompt: String,
    pub kind: RequestKind,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

impl OracleRequest {
    pub fn new(source_id: SourceId, prompt: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            source_id,
            prompt: prompt.into(),
            kind,
            model: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A terminal failure reported by the oracle mid-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleFailure {
    pub message: String,
    pub rate_limited: bool,
    /// Server-suggested wait, when one was given
    pub retry_after: Option<Duration>,
}

impl OracleFailure {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            rate_limited: looks_rate_limited(&message),
            message,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            message: message.into(),
            rate_limited: true,
            retry_after,
        }
    }
}

impl From<&OracleError> for OracleFailure {
    fn from(error: &OracleError) -> Self {
        Self {
            message: error.to_string(),
            rate_limited: error.is_rate_limited(),
            retry_after: error.retry_after(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleEvent {
    /// More response text
    Chunk(String),
    /// The response finished normally
    Complete,
    /// The response ended with an error
    Failed(OracleFailure),
}

impl OracleEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OracleEvent::Chunk(_))
    }
}

/// Handle to one in-progress invocation. Dropping it cancels the invocation.
pub struct OracleStream {
    pub events: mpsc::Receiver<OracleEvent>,
}

impl OracleStream {
    pub fn new(events: mpsc::Receiver<OracleEvent>) -> Self {
        Self { events }
    }

    /// Drain the stream into one buffer. Returns the text received before
    /// completion, or the failure that ended it.
    pub async fn collect_text(mut self) -> Result<String, OracleFailure> {
        let mut buffer = String::new();
        while let Some(event) = self.events.recv().await {
            match event {
                OracleEvent::Chunk(text) => buffer.push_str(&text),
                OracleEvent::Complete => return Ok(buffer),
                OracleEvent::Failed(failure) => return Err(failure),
            }
        }
        Err(OracleFailure::new("oracle stream closed without completing"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Failed to spawn oracle process")]
    ProcessSpawnFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Oracle channel closed")]
    ChannelClosed,
}

impl OracleError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OracleError::RateLimited { .. })
            || matches!(self, OracleError::Http(msg) if looks_rate_limited(msg))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OracleError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn rate_limit_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b429\b|rate[ _-]?limit|too many requests|\bquota\b[^.\n]*\b(?:exceeded|exhausted|reached)\b|\b(?:exceeded|exhausted|insufficient)[ _](?:\w+ ){0,2}quota\b|\boverloaded\b",
        )
        .expect("rate limit pattern is a valid regex")
    })
}

/// True when an error message reads like a quota or throttling rejection.
///
/// `429` only counts as a whole token, so line numbers and sizes don't match.
pub fn looks_rate_limited(message: &str) -> bool {
    rate_limit_pattern().is_match(message)
}

/// Trait for simulation oracles
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Start one invocation. Events arrive on the returned stream.
    async fn invoke(&self, request: OracleRequest) -> Result<OracleStream, OracleError>;

    /// Whether the backend can currently be reached at all
    fn is_available(&self) -> bool;
}

/// Build the oracle selected by configuration.
pub fn from_config(config: &OracleConfig) -> Result<Arc<dyn Oracle>, OracleError> {
    match config.backend {
        OracleBackend::Command => Ok(Arc::new(CommandOracle::new(&config.binary))),
        OracleBackend::Http => {
            let api_key = std::env::var(&config.api_key_env).ok();
            Ok(Arc::new(HttpOracle::new(&config.api_base_url, api_key)?))
        }
    }
}
