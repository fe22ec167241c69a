//! Recording narrator for tests
//!
//! Captures every utterance instead of speaking. Completion is either sent
//! immediately (`auto_finish`) or driven by the test through
//! [`RecordingNarrator::finish`] and [`RecordingNarrator::fail`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{NarrationError, NarrationEvent, Narrator, UtteranceId};

#[derive(Default)]
struct Recorded {
    spoken: Vec<(UtteranceId, String)>,
    cancel_count: usize,
    events: Option<mpsc::UnboundedSender<NarrationEvent>>,
}

#[derive(Clone, Default)]
pub struct RecordingNarrator {
    inner: Arc<Mutex<Recorded>>,
    auto_finish: bool,
    refuse_speak: bool,
}

impl RecordingNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every utterance as finished as soon as it starts
    pub fn auto_finishing() -> Self {
        Self {
            auto_finish: true,
            ..Self::default()
        }
    }

    /// Every `speak` call errors, as a broken speech engine would
    pub fn refusing() -> Self {
        Self {
            refuse_speak: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<(UtteranceId, String)> {
        self.inner.lock().spoken.clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.inner.lock().spoken.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn last_utterance(&self) -> Option<UtteranceId> {
        self.inner.lock().spoken.last().map(|(id, _)| *id)
    }

    pub fn cancel_count(&self) -> usize {
        self.inner.lock().cancel_count
    }

    /// Report `utterance` as finished
    pub fn finish(&self, utterance: UtteranceId) {
        self.send(NarrationEvent::Finished { utterance });
    }

    /// Report `utterance` as failed
    pub fn fail(&self, utterance: UtteranceId, message: &str) {
        self.send(NarrationEvent::Failed {
            utterance,
            message: message.to_string(),
        });
    }

    fn send(&self, event: NarrationEvent) {
        if let Some(tx) = &self.inner.lock().events {
            let _ = tx.send(event);
        }
    }
}

impl Narrator for RecordingNarrator {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn is_available(&self) -> bool {
        !self.refuse_speak
    }

    fn speak(
        &self,
        utterance: UtteranceId,
        text: &str,
        events: mpsc::UnboundedSender<NarrationEvent>,
    ) -> Result<(), NarrationError> {
        if self.refuse_speak {
            return Err(NarrationError::Unavailable);
        }

        let mut inner = self.inner.lock();
        inner.spoken.push((utterance, text.to_string()));
        if self.auto_finish {
            let _ = events.send(NarrationEvent::Finished { utterance });
        }
        inner.events = Some(events);
        Ok(())
    }

    fn cancel(&self) {
        self.inner.lock().cancel_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_finishes_on_demand() {
        let narrator = RecordingNarrator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        narrator.speak(3, "Compare 4 and 10", tx).unwrap();

        assert_eq!(narrator.spoken(), vec![(3, "Compare 4 and 10".to_string())]);
        assert!(rx.try_recv().is_err());

        narrator.finish(3);
        assert_eq!(rx.recv().await, Some(NarrationEvent::Finished { utterance: 3 }));
    }

    #[tokio::test]
    async fn test_auto_finish() {
        let narrator = RecordingNarrator::auto_finishing();
        let (tx, mut rx) = mpsc::unbounded_channel();
        narrator.speak(1, "hi", tx).unwrap();
        assert_eq!(rx.recv().await.map(|e| e.utterance()), Some(1));
    }

    #[test]
    fn test_refusing_narrator_errors() {
        let narrator = RecordingNarrator::refusing();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(narrator.speak(1, "hi", tx).is_err());
        assert!(narrator.spoken().is_empty());
    }
}
