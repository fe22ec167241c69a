//! Mock oracle for deterministic testing
//!
//! Implements [`Oracle`] by replaying scripted responses instead of calling
//! a real model. Every invocation is captured so tests can assert how many
//! calls were made and with which prompts.
//!
//! # Example
//! ```no_run
//! use stepwise::oracle::mock::{MockOracle, MockResponse};
//!
//! let oracle = MockOracle::new()
//!     .with_response(MockResponse::text(r#"[{"action":"INIT"}]"#));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Oracle, OracleError, OracleEvent, OracleFailure, OracleRequest, OracleStream};

/// Type of error to simulate when an invocation cannot start
#[derive(Clone, Debug)]
pub enum MockStartError {
    BinaryNotFound(String),
    ProcessSpawnFailed,
    RateLimited(Option<Duration>),
    Http(String),
}

impl MockStartError {
    fn into_oracle_error(self) -> OracleError {
        match self {
            MockStartError::BinaryNotFound(msg) => OracleError::BinaryNotFound(msg),
            MockStartError::ProcessSpawnFailed => OracleError::ProcessSpawnFailed,
            MockStartError::RateLimited(retry_after) => OracleError::RateLimited { retry_after },
            MockStartError::Http(msg) => OracleError::Http(msg),
        }
    }
}

/// One scripted invocation outcome
#[derive(Clone, Debug, Default)]
pub struct MockResponse {
    /// Text chunks emitted in order
    pub chunks: Vec<String>,
    /// Delay before each chunk (simulates streaming)
    pub chunk_delay: Duration,
    /// Terminal failure sent instead of `Complete`
    pub failure: Option<OracleFailure>,
    /// Error returned from `invoke` itself
    pub start_error: Option<MockStartError>,
    /// Hold the stream open after the chunks instead of completing
    pub hang: bool,
}

impl MockResponse {
    /// Whole response in a single chunk
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            chunks: vec![text.into()],
            ..Self::default()
        }
    }

    /// Response split into the given chunks
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Stream fails after its chunks
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(OracleFailure::new(message)),
            ..Self::default()
        }
    }

    /// Stream fails with a rate-limit rejection
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            failure: Some(OracleFailure::rate_limited("429 Too Many Requests", retry_after)),
            ..Self::default()
        }
    }

    /// `invoke` itself fails
    pub fn start_error(error: MockStartError) -> Self {
        Self {
            start_error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Never send a terminal event; the stream stays open until dropped
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// Mock oracle for testing
pub struct MockOracle {
    /// Scripted responses consumed in order
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    /// Response reused once the script runs out
    fallback: Arc<Mutex<Option<MockResponse>>>,
    /// Captured requests for verification
    captured_requests: Arc<Mutex<Vec<OracleRequest>>>,
    available: Arc<AtomicBool>,
    /// Set when a stream's receiver was dropped before it finished
    cancelled: Arc<AtomicBool>,
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(None)),
            captured_requests: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a response for the next invocation
    pub fn with_response(self, response: MockResponse) -> Self {
        self.push_response(response);
        self
    }

    /// Response used whenever the queue is empty
    pub fn with_fallback(self, response: MockResponse) -> Self {
        *self.fallback.lock() = Some(response);
        self
    }

    pub fn push_response(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of times `invoke` was called
    pub fn invocation_count(&self) -> usize {
        self.captured_requests.lock().len()
    }

    pub fn captured_requests(&self) -> Vec<OracleRequest> {
        self.captured_requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<OracleRequest> {
        self.captured_requests.lock().last().cloned()
    }

    /// Whether any stream was abandoned by its consumer mid-flight
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        self.responses
            .lock()
            .pop_front()
            .or_else(|| self.fallback.lock().clone())
            .unwrap_or_else(|| MockResponse::failing("mock oracle has no scripted response"))
    }
}

#[async_trait]
impl Oracle for MockOracle {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn invoke(&self, request: OracleRequest) -> Result<OracleStream, OracleError> {
        self.captured_requests.lock().push(request);

        let response = self.next_response();
        if let Some(error) = response.start_error {
            return Err(error.into_oracle_error());
        }

        let (tx, rx) = mpsc::channel(32);
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            for chunk in response.chunks {
                if response.chunk_delay > Duration::ZERO {
                    tokio::time::sleep(response.chunk_delay).await;
                }
                if tx.send(OracleEvent::Chunk(chunk)).await.is_err() {
                    cancelled.store(true, Ordering::SeqCst);
                    return;
                }
            }

            if response.hang {
                tx.closed().await;
                cancelled.store(true, Ordering::SeqCst);
                return;
            }

            let terminal = match response.failure {
                Some(failure) => OracleEvent::Failed(failure),
                None => OracleEvent::Complete,
            };
            let _ = tx.send(terminal).await;
        });

        Ok(OracleStream::new(rx))
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
