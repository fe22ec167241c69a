use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use reqwest_eventsource::{Error as SseError, Event, RequestBuilderExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{Oracle, OracleError, OracleEvent, OracleFailure, OracleRequest, OracleStream};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Oracle backed by an OpenAI-compatible streaming chat endpoint.
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OracleError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request_body(request: &OracleRequest) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": true,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    fn is_local(&self) -> bool {
        ["http://localhost", "http://127.0.0.1", "http://[::1]"]
            .iter()
            .any(|prefix| self.base_url.starts_with(prefix))
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn invoke(&self, request: OracleRequest) -> Result<OracleStream, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&Self::request_body(&request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let mut events = builder
            .eventsource()
            .map_err(|e| OracleError::Http(e.to_string()))?;

        tracing::info!(url = %url, source = %request.source_id, "Opened oracle event stream");

        let (tx, rx) = mpsc::channel::<OracleEvent>(256);

        tokio::spawn(async move {
            let terminal = loop {
                let Some(event) = events.next().await else {
                    break OracleEvent::Complete;
                };
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        if msg.data.trim() == "[DONE]" {
                            break OracleEvent::Complete;
                        }
                        match parse_delta(&msg.data) {
                            Ok(Some(text)) => {
                                if tx.send(OracleEvent::Chunk(text)).await.is_err() {
                                    tracing::debug!("Oracle stream abandoned");
                                    events.close();
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(message) => break OracleEvent::Failed(OracleFailure::new(message)),
                        }
                    }
                    Err(SseError::StreamEnded) => break OracleEvent::Complete,
                    Err(SseError::InvalidStatusCode(status, response)) => {
                        let retry_after = retry_after(response.headers().get(RETRY_AFTER));
                        let body = response.text().await.unwrap_or_default();
                        break OracleEvent::Failed(status_failure(status, &body, retry_after));
                    }
                    Err(e) => {
                        break OracleEvent::Failed(OracleFailure::new(format!(
                            "oracle stream error: {e}"
                        )))
                    }
                }
            };
            events.close();
            let _ = tx.send(terminal).await;
        });

        Ok(OracleStream::new(rx))
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some() || self.is_local()
    }
}

/// Extract the text delta from one streamed chat-completion chunk.
///
/// An `error` object in the chunk is reported as `Err`.
fn parse_delta(data: &str) -> Result<Option<String>, String> {
    let value: Value =
        serde_json::from_str(data).map_err(|e| format!("invalid oracle chunk: {e}"))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(message);
    }

    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from))
}

fn retry_after(header: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    header
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn status_failure(status: StatusCode, body: &str, retry_after: Option<Duration>) -> OracleFailure {
    let message = format!("oracle returned HTTP {status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        OracleFailure::rate_limited(message, retry_after)
    } else {
        OracleFailure::new(message)
    }
}
