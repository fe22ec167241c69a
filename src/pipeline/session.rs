//! Trace session
//!
//! One session per open view. It owns the orchestrator for that view's
//! target, the playback controller, the narrator handle and every timer the
//! pipeline needs (live and deep debouncers, the frame auto-advance timer).
//! All of it is driven from a single task through [`TraceSession::step`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::debounce::Debouncer;
use super::orchestrator::{
    DeepRequest, DeepRequestOutcome, InvocationMessage, LiveUpdateOutcome, OrchestratorSettings,
    OrchestratorUpdate, ReplayInfo, Status, TraceOrchestrator,
};
use super::playback::{PlayState, PlaybackController, PlaybackEffect, TimerId};
use crate::config::Config;
use crate::narration::{NarrationEvent, Narrator};
use crate::oracle::Oracle;
use crate::trace::cache::{ResultCache, SourceId};
use crate::trace::frame::TraceFrame;
use crate::trace::store::SavedTrace;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub live_debounce: Duration,
    pub deep_debounce: Duration,
    /// Queue a deep simulation after every edit
    pub auto_deep: bool,
    pub frame_duration: Duration,
    pub narration: bool,
    pub orchestrator: OrchestratorSettings,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            live_debounce: config.live.debounce,
            deep_debounce: config.deep.debounce,
            auto_deep: config.deep.auto,
            frame_duration: config.playback.frame_duration,
            narration: config.playback.narration,
            orchestrator: OrchestratorSettings::from_config(config),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What one call to [`TraceSession::step`] did
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Live(LiveUpdateOutcome),
    Deep(DeepRequestOutcome),
    Oracle(OrchestratorUpdate),
    /// Playback moved or stopped
    Playback { index: usize, state: PlayState },
}

/// Everything a renderer needs to draw the view
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub source_id: Option<SourceId>,
    pub status: Status,
    pub frames: Arc<[TraceFrame]>,
    pub index: usize,
    pub play_state: PlayState,
    pub replay: Option<ReplayInfo>,
    pub error: Option<String>,
    pub cooldown_remaining: Option<Duration>,
    pub can_retry: bool,
}

impl ViewSnapshot {
    pub fn current_frame(&self) -> Option<&TraceFrame> {
        self.frames.get(self.index)
    }
}

enum Wake {
    Oracle(InvocationMessage),
    Narration(NarrationEvent),
    Timer,
    Live,
    Deep,
}

pub struct TraceSession {
    source_id: SourceId,
    code: String,
    captured_output: Option<String>,
    orchestrator: TraceOrchestrator,
    playback: PlaybackController,
    narrator: Arc<dyn Narrator>,
    narration_tx: mpsc::UnboundedSender<NarrationEvent>,
    narration_rx: mpsc::UnboundedReceiver<NarrationEvent>,
    narration_wanted: bool,
    timer: Option<(TimerId, Instant)>,
    live: Debouncer<String>,
    deep: Debouncer<DeepRequest>,
    auto_deep: bool,
}

impl TraceSession {
    pub fn new(
        source_id: SourceId,
        cache: Arc<ResultCache>,
        oracle: Arc<dyn Oracle>,
        narrator: Arc<dyn Narrator>,
        settings: SessionSettings,
    ) -> Self {
        let (narration_tx, narration_rx) = mpsc::unbounded_channel();
        let narration_enabled = settings.narration && narrator.is_available();
        if settings.narration && !narration_enabled {
            tracing::info!(
                narrator = narrator.name(),
                "Narration unavailable, playback will use the frame timer"
            );
        }

        let mut orchestrator = TraceOrchestrator::new(cache, oracle, settings.orchestrator);
        orchestrator.switch_target(source_id.clone());

        Self {
            source_id,
            code: String::new(),
            captured_output: None,
            orchestrator,
            playback: PlaybackController::new(settings.frame_duration, narration_enabled),
            narrator,
            narration_tx,
            narration_rx,
            narration_wanted: settings.narration,
            timer: None,
            live: Debouncer::new(settings.live_debounce),
            deep: Debouncer::new(settings.deep_debounce),
            auto_deep: settings.auto_deep,
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn orchestrator(&self) -> &TraceOrchestrator {
        &self.orchestrator
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let state = self.orchestrator.state();
        ViewSnapshot {
            source_id: state.source_id.clone(),
            status: state.status,
            frames: self.playback.frames().clone(),
            index: self.playback.index(),
            play_state: self.playback.state(),
            replay: state.replay.clone(),
            error: state.last_error.as_ref().map(ToString::to_string),
            cooldown_remaining: self.orchestrator.cooldown_remaining(),
            can_retry: self.orchestrator.can_retry(),
        }
    }

    /// True when no invocation, playback, timer or debounce is pending, so
    /// `step` would wait forever.
    pub fn is_idle(&self) -> bool {
        !self.orchestrator.is_invoking()
            && self.playback.state() != PlayState::Playing
            && self.timer.is_none()
            && !self.live.is_pending()
            && !self.deep.is_pending()
    }

    /// Record an edit. The live guess and, when enabled, the deep simulation
    /// run once input goes idle.
    pub fn edit(&mut self, code: impl Into<String>) {
        self.code = code.into();
        self.live.push(self.code.clone());
        if self.auto_deep {
            self.deep.push(self.deep_request());
        }
    }

    /// Replace the code without scheduling a live guess or deep simulation.
    pub fn load_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
    }

    pub fn set_captured_output(&mut self, output: Option<String>) {
        self.captured_output = output;
    }

    /// Run the live guesser over `text` now.
    pub fn live_update(&mut self, text: &str) -> LiveUpdateOutcome {
        let outcome = self.orchestrator.request_live_update(text);
        if outcome == LiveUpdateOutcome::Applied {
            self.sync_playback(true);
        }
        outcome
    }

    /// Request a deep simulation of the current code now.
    pub fn run_deep(&mut self, force: bool) -> DeepRequestOutcome {
        self.deep.cancel();
        let request = self.deep_request();
        self.submit_deep(request, force)
    }

    pub fn retry(&mut self) -> Option<DeepRequestOutcome> {
        let outcome = self.orchestrator.retry()?;
        self.sync_playback(outcome.replaces_sequence());
        Some(outcome)
    }

    fn deep_request(&self) -> DeepRequest {
        DeepRequest {
            source_id: self.source_id.clone(),
            code: self.code.clone(),
            captured_output: self.captured_output.clone(),
        }
    }

    fn submit_deep(&mut self, request: DeepRequest, force: bool) -> DeepRequestOutcome {
        let outcome = self.orchestrator.request_deep_simulation(request, force);
        self.sync_playback(outcome.replaces_sequence());
        outcome
    }

    pub fn toggle_play(&mut self) -> PlayState {
        let effects = self.playback.toggle_play();
        self.apply(effects);
        self.playback.state()
    }

    pub fn set_frame_index(&mut self, index: usize) -> usize {
        let effects = self.playback.set_frame_index(index);
        self.apply(effects);
        self.playback.index()
    }

    /// Turn narration on or off. It stays off while no narrator is available.
    pub fn set_narration_enabled(&mut self, enabled: bool) {
        self.narration_wanted = enabled;
        let effects = self
            .playback
            .set_narration_enabled(enabled && self.narrator.is_available());
        self.apply(effects);
    }

    pub fn narration_wanted(&self) -> bool {
        self.narration_wanted
    }

    /// Represent a different target. Playback stops before anything else.
    pub fn switch_target(&mut self, source_id: SourceId, code: impl Into<String>) {
        let effects = self.playback.clear();
        self.apply(effects);
        self.live.cancel();
        self.deep.cancel();
        self.orchestrator.switch_target(source_id.clone());
        self.source_id = source_id;
        self.code = code.into();
        self.captured_output = None;
    }

    /// Play back a saved trace without touching the oracle or the cache.
    pub fn replay(&mut self, saved: SavedTrace) {
        let effects = self.playback.clear();
        self.apply(effects);
        self.live.cancel();
        self.deep.cancel();
        self.orchestrator.adopt_replay(saved.frames, saved.title, saved.kind);
        self.sync_playback(true);
    }

    pub fn exit_replay(&mut self) {
        self.orchestrator.exit_replay();
        self.sync_playback(false);
    }

    /// Tear everything down when the view closes.
    pub fn close(&mut self) {
        let effects = self.playback.clear();
        self.apply(effects);
        self.narrator.cancel();
        self.live.cancel();
        self.deep.cancel();
        self.orchestrator.close();
    }

    /// Wait for the next thing that happens and apply it.
    pub async fn step(&mut self) -> SessionEvent {
        loop {
            let wake = self.wait().await;
            if let Some(event) = self.handle(wake) {
                return event;
            }
        }
    }

    /// Step until the current invocation settles and return its result.
    pub async fn settle(&mut self) -> Option<OrchestratorUpdate> {
        while self.orchestrator.is_invoking() {
            if let SessionEvent::Oracle(
                update @ (OrchestratorUpdate::Ready { .. } | OrchestratorUpdate::Failed(_)),
            ) = self.step().await
            {
                return Some(update);
            }
        }
        None
    }

    async fn wait(&mut self) -> Wake {
        let timer = self.timer.map(|(_, at)| at);
        let live = self.live.deadline();
        let deep = self.deep.deadline();

        tokio::select! {
            message = self.orchestrator.next_message() => Wake::Oracle(message),
            Some(event) = self.narration_rx.recv() => Wake::Narration(event),
            _ = sleep_until(timer) => Wake::Timer,
            _ = sleep_until(live) => Wake::Live,
            _ = sleep_until(deep) => Wake::Deep,
        }
    }

    fn handle(&mut self, wake: Wake) -> Option<SessionEvent> {
        match wake {
            Wake::Oracle(message) => {
                let update = self.orchestrator.handle_message(message);
                match update {
                    OrchestratorUpdate::Ignored => None,
                    OrchestratorUpdate::Progress { .. } => Some(SessionEvent::Oracle(update)),
                    _ => {
                        self.sync_playback(true);
                        Some(SessionEvent::Oracle(update))
                    }
                }
            }
            Wake::Narration(event) => {
                let effects = match &event {
                    NarrationEvent::Finished { utterance } => {
                        self.playback.on_narration_finished(*utterance)
                    }
                    NarrationEvent::Failed { utterance, message } => {
                        tracing::warn!(utterance, error = %message, "Narration failed");
                        self.playback.on_narration_failed(*utterance)
                    }
                };
                Some(self.apply_playback(effects))
            }
            Wake::Timer => {
                let (id, _) = self.timer.take()?;
                let effects = self.playback.on_timer(id);
                Some(self.apply_playback(effects))
            }
            Wake::Live => {
                let text = self.live.take_due()?;
                Some(SessionEvent::Live(self.live_update(&text)))
            }
            Wake::Deep => {
                let request = self.deep.take_due()?;
                Some(SessionEvent::Deep(self.submit_deep(request, false)))
            }
        }
    }

    fn apply_playback(&mut self, effects: Vec<PlaybackEffect>) -> SessionEvent {
        self.apply(effects);
        SessionEvent::Playback {
            index: self.playback.index(),
            state: self.playback.state(),
        }
    }

    /// Hand the orchestrator's active sequence to playback when it changed.
    fn sync_playback(&mut self, force: bool) {
        let active = self
            .orchestrator
            .state()
            .active
            .as_ref()
            .map(|a| a.frames.clone());

        let effects = match active {
            Some(frames) if force || !Arc::ptr_eq(&frames, self.playback.frames()) => {
                let replaying = self.orchestrator.is_replaying();
                self.playback.load(frames, replaying)
            }
            Some(_) => return,
            None if self.playback.state() != PlayState::Empty => self.playback.clear(),
            None => return,
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<PlaybackEffect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                PlaybackEffect::Speak { utterance, text } => {
                    if let Err(e) = self
                        .narrator
                        .speak(utterance, &text, self.narration_tx.clone())
                    {
                        tracing::warn!(utterance, error = %e, "Could not start narration");
                        queue.extend(self.playback.on_narration_failed(utterance));
                    }
                }
                PlaybackEffect::CancelNarration => self.narrator.cancel(),
                PlaybackEffect::ScheduleAdvance { timer, after } => {
                    self.timer = Some((timer, Instant::now() + after));
                }
                PlaybackEffect::CancelTimer => self.timer = None,
            }
        }
        self.orchestrator.set_active_index(self.playback.index());
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        self.narrator.cancel();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
