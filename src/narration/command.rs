use std::path::PathBuf;
use std::process::Stdio;

use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{NarrationError, NarrationEvent, Narrator, UtteranceId};

/// Speech engines tried in order
const ENGINES: &[&str] = &["say", "espeak-ng", "espeak", "spd-say"];

/// Narrator that runs a local text-to-speech command per utterance.
pub struct CommandNarrator {
    binary_path: Option<PathBuf>,
    current: Mutex<Option<CancellationToken>>,
}

impl Default for CommandNarrator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandNarrator {
    /// Use the first speech engine found on PATH.
    pub fn new() -> Self {
        Self::with_binary(Self::find_binary())
    }

    pub fn with_binary(binary_path: Option<PathBuf>) -> Self {
        Self {
            binary_path,
            current: Mutex::new(None),
        }
    }

    fn find_binary() -> Option<PathBuf> {
        ENGINES.iter().find_map(|engine| which::which(engine).ok())
    }

    fn build_command(path: &PathBuf, text: &str) -> Command {
        let mut cmd = Command::new(path);
        // spd-say returns immediately unless told to wait
        if path.file_name().and_then(|n| n.to_str()) == Some("spd-say") {
            cmd.arg("--wait");
        }
        cmd.arg(text);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }
}

impl Narrator for CommandNarrator {
    fn name(&self) -> &'static str {
        "command"
    }

    fn is_available(&self) -> bool {
        self.binary_path.is_some()
    }

    fn speak(
        &self,
        utterance: UtteranceId,
        text: &str,
        events: mpsc::UnboundedSender<NarrationEvent>,
    ) -> Result<(), NarrationError> {
        let path = self.binary_path.as_ref().ok_or(NarrationError::Unavailable)?;

        self.cancel();
        let mut child = Self::build_command(path, text).spawn()?;
        let token = CancellationToken::new();
        *self.current.lock() = Some(token.clone());

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let event = match status {
                        Ok(status) if status.success() => NarrationEvent::Finished { utterance },
                        Ok(status) => NarrationEvent::Failed {
                            utterance,
                            message: format!("speech engine exited with {status}"),
                        },
                        Err(e) => NarrationEvent::Failed {
                            utterance,
                            message: e.to_string(),
                        },
                    };
                    let _ = events.send(event);
                }
                _ = token.cancelled() => {
                    tracing::debug!(utterance, "Narration cancelled");
                    // Dropping the child kills it.
                }
            }
        });

        Ok(())
    }

    fn cancel(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }
}
