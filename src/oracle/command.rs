use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use super::{Oracle, OracleError, OracleEvent, OracleFailure, OracleRequest, OracleStream};

/// Oracle backed by an assistant CLI run in headless print mode.
///
/// Stdout is forwarded as text chunks while the process runs. A non-zero
/// exit becomes a failure carrying stderr.
pub struct CommandOracle {
    binary: String,
    binary_path: PathBuf,
    /// Arguments placed before the prompt; `None` means the headless defaults
    args: Option<Vec<String>>,
}

impl CommandOracle {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            binary_path: Self::find_binary(binary).unwrap_or_else(|| PathBuf::from(binary)),
            args: None,
        }
    }

    /// Replace the default headless flags. The prompt is still appended last.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    fn find_binary(binary: &str) -> Option<PathBuf> {
        which::which(binary).ok()
    }

    fn build_command(&self, request: &OracleRequest) -> Command {
        let mut cmd = Command::new(&self.binary_path);

        match &self.args {
            Some(args) => {
                cmd.args(args);
            }
            None => {
                cmd.args(["-p", "--output-format", "text"]);
                if let Some(model) = &request.model {
                    cmd.arg("--model").arg(model);
                }
                cmd.arg("--");
            }
        }
        cmd.arg(&request.prompt);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd
    }
}

#[async_trait]
impl Oracle for CommandOracle {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn invoke(&self, request: OracleRequest) -> Result<OracleStream, OracleError> {
        if !self.is_available() {
            return Err(OracleError::BinaryNotFound(self.binary.clone()));
        }

        let mut cmd = self.build_command(&request);
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().ok_or(OracleError::ProcessSpawnFailed)?;
        let mut stderr = child.stderr.take().ok_or(OracleError::ProcessSpawnFailed)?;

        tracing::info!(
            binary = %self.binary_path.display(),
            source = %request.source_id,
            pid = child.id().unwrap_or_default(),
            "Spawned oracle process"
        );

        let (tx, rx) = mpsc::channel::<OracleEvent>(256);

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        tokio::spawn(async move {
            let mut stream = ReaderStream::new(stdout);
            let mut carry = Utf8Carry::default();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        let text = carry.push(&bytes);
                        if !text.is_empty() && tx.send(OracleEvent::Chunk(text)).await.is_err() {
                            // Receiver gone: dropping `child` kills the process.
                            tracing::debug!("Oracle stream abandoned");
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(OracleEvent::Failed(OracleFailure::new(format!(
                                "failed reading oracle output: {e}"
                            ))))
                            .await;
                        return;
                    }
                }
            }

            let tail = carry.finish();
            if !tail.is_empty() && tx.send(OracleEvent::Chunk(tail)).await.is_err() {
                return;
            }

            let status = child.wait().await;
            let stderr_text = stderr_task.await.unwrap_or_default();

            let terminal = match status {
                Ok(status) if status.success() => OracleEvent::Complete,
                Ok(status) => {
                    let detail = stderr_text.trim();
                    let message = if detail.is_empty() {
                        format!("oracle process exited with {status}")
                    } else {
                        format!("oracle process exited with {status}: {detail}")
                    };
                    OracleEvent::Failed(OracleFailure::new(message))
                }
                Err(e) => OracleEvent::Failed(OracleFailure::new(format!(
                    "failed waiting for oracle process: {e}"
                ))),
            };
            let _ = tx.send(terminal).await;
        });

        Ok(OracleStream::new(rx))
    }

    fn is_available(&self) -> bool {
        self.binary_path.exists() || Self::find_binary(&self.binary).is_some()
    }
}

/// Decodes UTF-8 across chunk boundaries, holding back an incomplete
/// trailing sequence until the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end; keep it for the next chunk.
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }

    /// Flush whatever is left, replacing invalid bytes.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
