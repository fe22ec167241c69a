//! Trace orchestrator
//!
//! Owns the arbitration between heuristic guesses, cached results and oracle
//! invocations for one target, plus the lifecycle of that target's single
//! in-flight invocation.
//!
//! Oracle events are forwarded into a mailbox tagged with the generation
//! that started them. Switching targets, resetting or closing bumps the
//! generation, so events from an abandoned invocation are recognised and
//! dropped when they arrive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::arbitration::{arbitrate_live, ArbitrationInput, LiveBlock};
use crate::config::Config;
use crate::error::TraceError;
use crate::oracle::prompt::trace_prompt;
use crate::oracle::{Oracle, OracleEvent, OracleFailure, OracleRequest, RequestKind};
use crate::trace::cache::{digest, normalize_source, CacheKey, ResultCache, SourceId};
use crate::trace::decoder::{DecodeOptions, DecodeOutcome, Decoder};
use crate::trace::frame::TraceFrame;
use crate::trace::guesser::LiveGuesser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Invoking,
    Ready,
    Error,
}

/// Where the active sequence came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOrigin {
    Heuristic,
    Deep,
    Cache,
    Replay,
}

impl SequenceOrigin {
    /// Oracle-sourced, whether fresh or from the cache
    pub fn is_deep(self) -> bool {
        matches!(self, SequenceOrigin::Deep | SequenceOrigin::Cache)
    }
}

/// The sequence currently handed to playback
#[derive(Debug, Clone)]
pub struct ActiveSequence {
    pub frames: Arc<[TraceFrame]>,
    pub origin: SequenceOrigin,
    /// Digest of the normalized code a deep result was produced from
    pub code_digest: Option<String>,
}

/// Label attached to a replayed trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayInfo {
    pub title: String,
    pub kind: String,
}

/// Per-target orchestration state
#[derive(Debug, Default)]
pub struct OrchestrationState {
    pub source_id: Option<SourceId>,
    pub status: Status,
    pub active: Option<ActiveSequence>,
    pub active_index: usize,
    pub last_error: Option<TraceError>,
    pub cooldown_until: Option<Instant>,
    pub replay: Option<ReplayInfo>,
}

impl OrchestrationState {
    pub fn active_frames(&self) -> &[TraceFrame] {
        self.active.as_ref().map(|a| &a.frames[..]).unwrap_or(&[])
    }
}

/// Inputs of a deep simulation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepRequest {
    pub source_id: SourceId,
    pub code: String,
    pub captured_output: Option<String>,
}

impl DeepRequest {
    pub fn new(source_id: SourceId, code: impl Into<String>) -> Self {
        Self {
            source_id,
            code: code.into(),
            captured_output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.captured_output = Some(output.into());
        self
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            self.source_id.clone(),
            &self.code,
            self.captured_output.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUpdateOutcome {
    /// The guess became the active sequence
    Applied,
    /// The guesser found nothing; not an error
    NoSignal,
    Blocked(LiveBlock),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepRequestOutcome {
    /// Exact cache hit adopted
    CacheHit,
    /// Same code cached under different captured output; adopted
    ReusedForOutput,
    /// An invocation for this target is already running
    AlreadyInFlight,
    /// Rate-limit cooldown still running
    CoolingDown { remaining: Duration },
    /// A new invocation started
    Started { generation: u64 },
}

impl DeepRequestOutcome {
    /// A sequence was adopted or cleared, so playback must be reset
    pub fn replaces_sequence(&self) -> bool {
        matches!(
            self,
            DeepRequestOutcome::CacheHit
                | DeepRequestOutcome::ReusedForOutput
                | DeepRequestOutcome::Started { .. }
        )
    }
}

/// One oracle event tagged with the generation of the invocation it belongs to
#[derive(Debug, Clone)]
pub struct InvocationMessage {
    pub generation: u64,
    pub event: OracleEvent,
}

/// What handling a mailbox message changed
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorUpdate {
    /// Message belonged to an abandoned invocation
    Ignored,
    /// More text arrived
    Progress { received_bytes: usize },
    /// A decoded sequence became active
    Ready { frames: Arc<[TraceFrame]> },
    Failed(TraceError),
}

/// Tunables taken from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub protect_threshold: usize,
    pub rate_limit_cooldown: Duration,
    pub decode: DecodeOptions,
    pub assumed_items: Vec<String>,
    pub model: Option<String>,
    pub max_tokens: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            protect_threshold: config.deep.protect_threshold,
            rate_limit_cooldown: config.deep.rate_limit_cooldown,
            decode: DecodeOptions {
                max_backtrack: config.max_backtrack,
            },
            assumed_items: config.live.assumed_items.clone(),
            model: config.oracle.model.clone(),
            max_tokens: config.oracle.max_tokens,
        }
    }
}

struct InFlight {
    generation: u64,
    key: CacheKey,
    buffer: String,
    task: JoinHandle<()>,
}

pub struct TraceOrchestrator {
    state: OrchestrationState,
    cache: Arc<ResultCache>,
    oracle: Arc<dyn Oracle>,
    guesser: LiveGuesser,
    decoder: Decoder,
    settings: OrchestratorSettings,
    generation: u64,
    inflight: Option<InFlight>,
    mailbox_tx: mpsc::UnboundedSender<InvocationMessage>,
    mailbox_rx: mpsc::UnboundedReceiver<InvocationMessage>,
    last_request: Option<DeepRequest>,
}

impl TraceOrchestrator {
    pub fn new(
        cache: Arc<ResultCache>,
        oracle: Arc<dyn Oracle>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        Self {
            state: OrchestrationState::default(),
            cache,
            oracle,
            guesser: LiveGuesser::new(settings.assumed_items.clone()),
            decoder: Decoder::new(settings.decode),
            settings,
            generation: 0,
            inflight: None,
            mailbox_tx,
            mailbox_rx,
            last_request: None,
        }
    }

    pub fn state(&self) -> &OrchestrationState {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.state.status
    }

    pub fn is_invoking(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn is_replaying(&self) -> bool {
        self.state.replay.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn oracle_available(&self) -> bool {
        self.oracle.is_available()
    }

    /// Mirror the playback position so the state reflects what is shown.
    pub fn set_active_index(&mut self, index: usize) {
        self.state.active_index = index;
    }

    /// Time left before a new invocation may start.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = self.state.cooldown_until?;
        let remaining = until.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Whether the manual retry action should be offered.
    pub fn can_retry(&self) -> bool {
        self.state.status == Status::Error
            && self.last_request.is_some()
            && self.cooldown_remaining().is_none()
    }

    /// Run the live guesser over `source_text` and adopt its frame if the
    /// arbitration table allows.
    pub fn request_live_update(&mut self, source_text: &str) -> LiveUpdateOutcome {
        let code_unchanged = match self.state.active.as_ref() {
            Some(ActiveSequence {
                code_digest: Some(d),
                ..
            }) => *d == digest(&normalize_source(source_text)),
            _ => false,
        };

        let input = ArbitrationInput {
            replaying: self.is_replaying(),
            invoking: self.is_invoking(),
            status: self.state.status,
            active_origin: self.state.active.as_ref().map(|a| a.origin),
            active_len: self.state.active_frames().len(),
            protect_threshold: self.settings.protect_threshold,
            code_unchanged,
        };

        if let Err(block) = arbitrate_live(&input) {
            tracing::trace!(reason = %block, "Live update blocked");
            return LiveUpdateOutcome::Blocked(block);
        }

        match self.guesser.guess(source_text) {
            Some(frame) => {
                self.state.active = Some(ActiveSequence {
                    frames: Arc::from(vec![frame]),
                    origin: SequenceOrigin::Heuristic,
                    code_digest: None,
                });
                self.state.active_index = 0;
                LiveUpdateOutcome::Applied
            }
            None => LiveUpdateOutcome::NoSignal,
        }
    }

    /// Serve `request` from the cache or start an oracle invocation for it.
    ///
    /// `force` skips the cache and overwrites its entry with the fresh result.
    pub fn request_deep_simulation(
        &mut self,
        request: DeepRequest,
        force: bool,
    ) -> DeepRequestOutcome {
        if self.state.source_id.as_ref() != Some(&request.source_id) {
            self.switch_target(request.source_id.clone());
        }
        self.state.replay = None;

        let key = request.cache_key();
        self.last_request = Some(request.clone());

        if !force {
            if let Some(frames) = self.cache.get(&key) {
                tracing::debug!(source = %key.source_id, "Deep request served from cache");
                self.adopt_cached(frames, key.code_digest.clone());
                return DeepRequestOutcome::CacheHit;
            }
            if let Some((stored, frames)) = self.cache.get_same_code(&key) {
                tracing::debug!(
                    source = %key.source_id,
                    "Deep request reused cache entry with different output"
                );
                self.adopt_cached(frames, stored.code_digest);
                return DeepRequestOutcome::ReusedForOutput;
            }
        }

        if self.inflight.is_some() {
            tracing::debug!(source = %key.source_id, "Deep request already in flight");
            return DeepRequestOutcome::AlreadyInFlight;
        }

        if let Some(remaining) = self.cooldown_remaining() {
            return DeepRequestOutcome::CoolingDown { remaining };
        }

        let generation = self.start_invocation(&request, key);
        DeepRequestOutcome::Started { generation }
    }

    /// Force a fresh invocation of the last deep request.
    pub fn retry(&mut self) -> Option<DeepRequestOutcome> {
        let request = self.last_request.clone()?;
        Some(self.request_deep_simulation(request, true))
    }

    fn adopt_cached(&mut self, frames: Arc<[TraceFrame]>, code_digest: String) {
        // An invocation for code the user has since changed must not land on top.
        if self.inflight.is_some() {
            self.abandon_inflight();
        }
        self.state.active = Some(ActiveSequence {
            frames,
            origin: SequenceOrigin::Cache,
            code_digest: Some(code_digest),
        });
        self.state.active_index = 0;
        self.state.status = Status::Ready;
        self.state.last_error = None;
    }

    fn start_invocation(&mut self, request: &DeepRequest, key: CacheKey) -> u64 {
        self.generation += 1;
        let generation = self.generation;

        let oracle_request = OracleRequest::new(
            request.source_id.clone(),
            trace_prompt(&request.code, request.captured_output.as_deref()),
            RequestKind::Trace,
        )
        .with_model(self.settings.model.clone())
        .with_max_tokens(self.settings.max_tokens);

        let oracle = self.oracle.clone();
        let mailbox = self.mailbox_tx.clone();
        let task = tokio::spawn(async move {
            let mut stream = match oracle.invoke(oracle_request).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = mailbox.send(InvocationMessage {
                        generation,
                        event: OracleEvent::Failed(OracleFailure::from(&e)),
                    });
                    return;
                }
            };

            while let Some(event) = stream.events.recv().await {
                let terminal = event.is_terminal();
                if mailbox.send(InvocationMessage { generation, event }).is_err() || terminal {
                    return;
                }
            }

            let _ = mailbox.send(InvocationMessage {
                generation,
                event: OracleEvent::Failed(OracleFailure::new(
                    "oracle stream closed without completing",
                )),
            });
        });

        tracing::info!(
            source = %request.source_id,
            generation,
            oracle = self.oracle.name(),
            "Started simulation"
        );

        self.inflight = Some(InFlight {
            generation,
            key,
            buffer: String::new(),
            task,
        });
        self.state.status = Status::Invoking;
        self.state.active = None;
        self.state.active_index = 0;
        self.state.last_error = None;

        generation
    }

    /// Wait for the next oracle event. Pending forever while nothing is in flight.
    pub async fn next_message(&mut self) -> InvocationMessage {
        // The orchestrator holds a sender, so the channel never closes.
        match self.mailbox_rx.recv().await {
            Some(message) => message,
            None => std::future::pending().await,
        }
    }

    /// Apply one mailbox message.
    pub fn handle_message(&mut self, message: InvocationMessage) -> OrchestratorUpdate {
        let current = matches!(&self.inflight, Some(f) if f.generation == message.generation);
        if !current {
            tracing::debug!(
                generation = message.generation,
                current = self.generation,
                "Ignoring stale oracle event"
            );
            return OrchestratorUpdate::Ignored;
        }

        match message.event {
            OracleEvent::Chunk(text) => {
                let Some(inflight) = self.inflight.as_mut() else {
                    return OrchestratorUpdate::Ignored;
                };
                inflight.buffer.push_str(&text);
                OrchestratorUpdate::Progress {
                    received_bytes: inflight.buffer.len(),
                }
            }
            OracleEvent::Complete => {
                let Some(inflight) = self.inflight.take() else {
                    return OrchestratorUpdate::Ignored;
                };
                self.finish_invocation(inflight)
            }
            OracleEvent::Failed(failure) => {
                self.inflight = None;
                self.fail_invocation(failure)
            }
        }
    }

    /// Process mailbox messages until the current invocation settles.
    pub async fn settle(&mut self) -> Option<OrchestratorUpdate> {
        while self.inflight.is_some() {
            let message = self.next_message().await;
            match self.handle_message(message) {
                update @ (OrchestratorUpdate::Ready { .. } | OrchestratorUpdate::Failed(_)) => {
                    return Some(update)
                }
                _ => {}
            }
        }
        None
    }

    fn finish_invocation(&mut self, inflight: InFlight) -> OrchestratorUpdate {
        let InFlight { key, buffer, .. } = inflight;

        let error = match self.decoder.decode_frames(&buffer) {
            DecodeOutcome::Decoded(frames) => {
                tracing::info!(
                    source = %key.source_id,
                    frames = frames.len(),
                    bytes = buffer.len(),
                    "Simulation decoded"
                );
                let code_digest = key.code_digest.clone();
                let frames = self.cache.insert(key, frames);
                self.state.active = Some(ActiveSequence {
                    frames: frames.clone(),
                    origin: SequenceOrigin::Deep,
                    code_digest: Some(code_digest),
                });
                self.state.active_index = 0;
                self.state.status = Status::Ready;
                self.state.last_error = None;
                return OrchestratorUpdate::Ready { frames };
            }
            DecodeOutcome::Empty => TraceError::Decode("oracle returned nothing to trace".into()),
            DecodeOutcome::Failed(reason) => TraceError::Decode(reason),
        };

        tracing::warn!(source = %key.source_id, error = %error, "Simulation could not be decoded");
        self.enter_error(error)
    }

    fn fail_invocation(&mut self, failure: OracleFailure) -> OrchestratorUpdate {
        let error = TraceError::from_failure(failure, self.settings.rate_limit_cooldown);
        if let TraceError::RateLimited { cooldown, .. } = &error {
            self.state.cooldown_until = Some(Instant::now() + *cooldown);
        }

        tracing::warn!(kind = error.kind(), error = %error, "Simulation failed");
        self.enter_error(error)
    }

    fn enter_error(&mut self, error: TraceError) -> OrchestratorUpdate {
        self.state.status = Status::Error;
        self.state.last_error = Some(error.clone());
        OrchestratorUpdate::Failed(error)
    }

    fn abandon_inflight(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            tracing::debug!(generation = inflight.generation, "Abandoning in-flight simulation");
            inflight.task.abort();
        }
        self.generation += 1;
    }

    /// Represent a different target. Any in-flight invocation is abandoned.
    pub fn switch_target(&mut self, source_id: SourceId) {
        self.reset();
        self.state.source_id = Some(source_id);
    }

    /// Back to Idle for the current target, keeping the cooldown.
    pub fn reset(&mut self) {
        self.abandon_inflight();
        let source_id = self.state.source_id.take();
        let cooldown_until = self.state.cooldown_until.take();
        self.state = OrchestrationState {
            source_id,
            cooldown_until,
            ..OrchestrationState::default()
        };
        self.last_request = None;
    }

    /// Tear down when the owning view closes.
    pub fn close(&mut self) {
        self.abandon_inflight();
        self.state = OrchestrationState::default();
        self.last_request = None;
    }

    /// Adopt an already-decoded saved sequence, bypassing decode and cache.
    pub fn adopt_replay(
        &mut self,
        frames: Vec<TraceFrame>,
        title: impl Into<String>,
        kind: impl Into<String>,
    ) -> Arc<[TraceFrame]> {
        self.abandon_inflight();
        let frames: Arc<[TraceFrame]> = frames.into();
        self.state.active = Some(ActiveSequence {
            frames: frames.clone(),
            origin: SequenceOrigin::Replay,
            code_digest: None,
        });
        self.state.active_index = 0;
        self.state.status = if frames.is_empty() {
            Status::Idle
        } else {
            Status::Ready
        };
        self.state.last_error = None;
        self.state.replay = Some(ReplayInfo {
            title: title.into(),
            kind: kind.into(),
        });
        frames
    }

    /// Leave replay mode and return to Idle.
    pub fn exit_replay(&mut self) {
        if self.state.replay.is_some() {
            self.reset();
        }
    }
}

impl Drop for TraceOrchestrator {
    fn drop(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            inflight.task.abort();
        }
    }
}
