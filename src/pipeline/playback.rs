//! Playback controller
//!
//! A reducer over the active frame sequence. Every operation returns the
//! side effects to run (speak, cancel narration, schedule or cancel the
//! advance timer). Narration completions and timer expiries come back in
//! tagged with the id they were issued under; anything not matching the
//! pending id is stale and ignored.

use std::sync::Arc;
use std::time::Duration;

use crate::narration::UtteranceId;
use crate::trace::frame::TraceFrame;

pub type TimerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Empty,
    Paused,
    Playing,
}

/// Side effects that should be executed outside the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEffect {
    Speak { utterance: UtteranceId, text: String },
    CancelNarration,
    ScheduleAdvance { timer: TimerId, after: Duration },
    CancelTimer,
}

#[derive(Debug)]
pub struct PlaybackController {
    frames: Arc<[TraceFrame]>,
    index: usize,
    state: PlayState,
    replaying: bool,
    narration_enabled: bool,
    frame_duration: Duration,
    next_id: u64,
    pending_utterance: Option<UtteranceId>,
    pending_timer: Option<TimerId>,
}

impl PlaybackController {
    pub fn new(frame_duration: Duration, narration_enabled: bool) -> Self {
        Self {
            frames: Arc::from(Vec::new()),
            index: 0,
            state: PlayState::Empty,
            replaying: false,
            narration_enabled,
            frame_duration,
            next_id: 0,
            pending_utterance: None,
            pending_timer: None,
        }
    }

    pub fn frames(&self) -> &Arc<[TraceFrame]> {
        &self.frames
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_frame(&self) -> Option<&TraceFrame> {
        self.frames.get(self.index)
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn narration_enabled(&self) -> bool {
        self.narration_enabled
    }

    /// Replace the sequence. Playback stops and starts over at frame 0.
    pub fn load(&mut self, frames: Arc<[TraceFrame]>, replaying: bool) -> Vec<PlaybackEffect> {
        let effects = self.stop();
        self.state = if frames.is_empty() {
            PlayState::Empty
        } else {
            PlayState::Paused
        };
        self.frames = frames;
        self.index = 0;
        self.replaying = replaying;
        effects
    }

    pub fn clear(&mut self) -> Vec<PlaybackEffect> {
        self.load(Arc::from(Vec::new()), false)
    }

    /// Jump to `index`, clamped to the sequence. While playing, the new frame
    /// is presented immediately.
    pub fn set_frame_index(&mut self, index: usize) -> Vec<PlaybackEffect> {
        if self.frames.is_empty() {
            return Vec::new();
        }
        let clamped = index.min(self.frames.len() - 1);
        if self.state != PlayState::Playing {
            self.index = clamped;
            return Vec::new();
        }

        let mut effects = self.cancel_pending();
        self.index = clamped;
        effects.extend(self.present());
        effects
    }

    pub fn toggle_play(&mut self) -> Vec<PlaybackEffect> {
        match self.state {
            PlayState::Empty => Vec::new(),
            PlayState::Paused => {
                self.state = PlayState::Playing;
                self.present()
            }
            PlayState::Playing => self.stop(),
        }
    }

    pub fn set_narration_enabled(&mut self, enabled: bool) -> Vec<PlaybackEffect> {
        if self.narration_enabled == enabled {
            return Vec::new();
        }
        self.narration_enabled = enabled;
        if self.state != PlayState::Playing {
            return Vec::new();
        }
        let mut effects = self.cancel_pending();
        effects.extend(self.present());
        effects
    }

    pub fn on_narration_finished(&mut self, utterance: UtteranceId) -> Vec<PlaybackEffect> {
        if !self.is_pending_utterance(utterance) {
            return Vec::new();
        }
        self.pending_utterance = None;
        self.advance()
    }

    /// Narration broke for this frame; keep it up for the fixed duration instead.
    pub fn on_narration_failed(&mut self, utterance: UtteranceId) -> Vec<PlaybackEffect> {
        if !self.is_pending_utterance(utterance) {
            return Vec::new();
        }
        self.pending_utterance = None;
        vec![self.schedule_timer()]
    }

    pub fn on_timer(&mut self, timer: TimerId) -> Vec<PlaybackEffect> {
        if self.state != PlayState::Playing || self.pending_timer != Some(timer) {
            return Vec::new();
        }
        self.pending_timer = None;
        self.advance()
    }

    fn is_pending_utterance(&self, utterance: UtteranceId) -> bool {
        self.state == PlayState::Playing && self.pending_utterance == Some(utterance)
    }

    fn advance(&mut self) -> Vec<PlaybackEffect> {
        if self.index + 1 < self.frames.len() {
            self.index += 1;
            self.present()
        } else {
            self.state = PlayState::Paused;
            Vec::new()
        }
    }

    fn present(&mut self) -> Vec<PlaybackEffect> {
        let text = self
            .current_frame()
            .map(|f| f.description.trim().to_string())
            .unwrap_or_default();

        if self.narration_enabled && !text.is_empty() {
            self.next_id += 1;
            self.pending_utterance = Some(self.next_id);
            vec![PlaybackEffect::Speak {
                utterance: self.next_id,
                text,
            }]
        } else {
            vec![self.schedule_timer()]
        }
    }

    fn schedule_timer(&mut self) -> PlaybackEffect {
        self.next_id += 1;
        self.pending_timer = Some(self.next_id);
        PlaybackEffect::ScheduleAdvance {
            timer: self.next_id,
            after: self.frame_duration,
        }
    }

    fn cancel_pending(&mut self) -> Vec<PlaybackEffect> {
        let mut effects = Vec::new();
        if self.pending_utterance.take().is_some() {
            effects.push(PlaybackEffect::CancelNarration);
        }
        if self.pending_timer.take().is_some() {
            effects.push(PlaybackEffect::CancelTimer);
        }
        effects
    }

    fn stop(&mut self) -> Vec<PlaybackEffect> {
        if self.state == PlayState::Playing {
            self.state = PlayState::Paused;
        }
        self.cancel_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::frame::FrameAction;
    use proptest::prelude::*;

    fn frames(n: usize) -> Arc<[TraceFrame]> {
        (0..n)
            .map(|i| TraceFrame::new(i, FrameAction::Read, format!("step {i}")))
            .collect::<Vec<_>>()
            .into()
    }

    fn speak_id(effects: &[PlaybackEffect]) -> UtteranceId {
        effects
            .iter()
            .find_map(|e| match e {
                PlaybackEffect::Speak { utterance, .. } => Some(*utterance),
                _ => None,
            })
            .unwrap_or_else(|| panic!("Expected Speak effect, got {:?}", effects))
    }

    fn timer_id(effects: &[PlaybackEffect]) -> TimerId {
        effects
            .iter()
            .find_map(|e| match e {
                PlaybackEffect::ScheduleAdvance { timer, .. } => Some(*timer),
                _ => None,
            })
            .unwrap_or_else(|| panic!("Expected ScheduleAdvance effect, got {:?}", effects))
    }

    fn controller(n: usize, narration: bool) -> PlaybackController {
        let mut c = PlaybackController::new(Duration::from_secs(3), narration);
        c.load(frames(n), false);
        c
    }

    #[test]
    fn test_empty_ignores_everything() {
        let mut c = PlaybackController::new(Duration::from_secs(3), true);
        assert_eq!(c.state(), PlayState::Empty);
        assert!(c.toggle_play().is_empty());
        assert!(c.set_frame_index(4).is_empty());
        assert_eq!(c.state(), PlayState::Empty);
    }

    #[test]
    fn test_play_narrates_current_frame() {
        let mut c = controller(3, true);
        let effects = c.toggle_play();
        assert_eq!(c.state(), PlayState::Playing);
        assert_eq!(
            effects,
            vec![PlaybackEffect::Speak {
                utterance: speak_id(&effects),
                text: "step 0".into()
            }]
        );
    }

    #[test]
    fn test_narration_drives_advance_to_end_then_pauses() {
        let mut c = controller(3, true);
        let mut id = speak_id(&c.toggle_play());

        id = speak_id(&c.on_narration_finished(id));
        assert_eq!(c.index(), 1);
        id = speak_id(&c.on_narration_finished(id));
        assert_eq!(c.index(), 2);

        assert!(c.on_narration_finished(id).is_empty());
        assert_eq!(c.state(), PlayState::Paused);
        assert_eq!(c.index(), 2);
    }

    #[test]
    fn test_pause_cancels_narration_and_stale_completion_is_ignored() {
        let mut c = controller(3, true);
        let id = speak_id(&c.toggle_play());

        assert_eq!(c.toggle_play(), vec![PlaybackEffect::CancelNarration]);
        assert_eq!(c.state(), PlayState::Paused);

        assert!(c.on_narration_finished(id).is_empty());
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn test_timer_fallback_without_narration() {
        let mut c = controller(2, false);
        let timer = timer_id(&c.toggle_play());
        let timer = timer_id(&c.on_timer(timer));
        assert_eq!(c.index(), 1);
        assert!(c.on_timer(timer).is_empty());
        assert_eq!(c.state(), PlayState::Paused);
    }

    #[test]
    fn test_narration_failure_falls_back_to_timer() {
        let mut c = controller(2, true);
        let id = speak_id(&c.toggle_play());
        let timer = timer_id(&c.on_narration_failed(id));
        assert_eq!(c.index(), 0);
        speak_id(&c.on_timer(timer));
        assert_eq!(c.index(), 1);
    }

    #[test]
    fn test_seek_while_playing_cancels_and_presents() {
        let mut c = controller(5, true);
        let old = speak_id(&c.toggle_play());

        let effects = c.set_frame_index(3);
        assert_eq!(effects[0], PlaybackEffect::CancelNarration);
        let new = speak_id(&effects);
        assert_ne!(old, new);
        assert_eq!(c.index(), 3);

        assert!(c.on_narration_finished(old).is_empty());
        assert_eq!(c.index(), 3);
    }

    #[test]
    fn test_load_stops_playback() {
        let mut c = controller(3, false);
        c.toggle_play();
        let effects = c.load(frames(2), true);
        assert_eq!(effects, vec![PlaybackEffect::CancelTimer]);
        assert_eq!(c.state(), PlayState::Paused);
        assert_eq!(c.index(), 0);
        assert!(c.is_replaying());
    }

    #[test]
    fn test_blank_description_uses_timer() {
        let mut c = PlaybackController::new(Duration::from_secs(3), true);
        c.load(vec![TraceFrame::new(0, FrameAction::Init, "  ")].into(), false);
        timer_id(&c.toggle_play());
    }

    proptest! {
        #[test]
        fn prop_set_frame_index_clamps(n in 1usize..20, i in 0usize..100) {
            let mut c = controller(n, true);
            c.set_frame_index(i);
            prop_assert_eq!(c.index(), i.min(n - 1));
        }

        #[test]
        fn prop_playing_to_last_frame_ends_paused(n in 1usize..15, start in 0usize..15) {
            let mut c = controller(n, false);
            c.set_frame_index(start);
            let mut timer = timer_id(&c.toggle_play());
            loop {
                let effects = c.on_timer(timer);
                if effects.is_empty() {
                    break;
                }
                timer = timer_id(&effects);
            }
            prop_assert_eq!(c.index(), n - 1);
            prop_assert_eq!(c.state(), PlayState::Paused);
        }
    }
}
