use async_trait::async_trait;
use futures_util::StreamExt;
use log::{ debug, info, warn };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ndjson::NdjsonDecoder;
use super::{ create_streaming_response, ChatRequest, ChatTransport, FragmentStream };
use crate::config::normalize_api_url;
use crate::error::ChatError;
use crate::llm::directory::{ parse_model_names, ModelDirectory };
use crate::models::params::OllamaOptions;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a single Ollama daemon.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize, Debug)]
struct ChatPayload {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Deserialize, Debug)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Debug)]
struct StreamResponse {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// What one NDJSON line of a `/api/chat` stream means.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChatLine {
    Fragment(String),
    /// Final line; it normally has empty content but may carry a last piece.
    Done(Option<String>),
    Empty,
}

pub(crate) fn parse_chat_line(line: impl AsRef<[u8]>) -> Result<ChatLine, ChatError> {
    let line = line.as_ref();
    let resp: StreamResponse = serde_json
        ::from_slice(line)
        .map_err(|e|
            ChatError::Stream(format!("malformed chunk ({}): {}", e, String::from_utf8_lossy(line)))
        )?;

    if let Some(err) = resp.error {
        return Err(ChatError::Stream(err));
    }
    let text = resp.message.map(|m| m.content).unwrap_or_default();
    if resp.done {
        return Ok(ChatLine::Done(Some(text).filter(|t| !t.is_empty())));
    }
    if text.is_empty() {
        Ok(ChatLine::Empty)
    } else {
        Ok(ChatLine::Fragment(text))
    }
}

enum LineOutcome {
    Continue,
    Finished,
    Stop,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        let base_url = normalize_api_url(base_url)?;
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ChatError::config("failed to build HTTP client", e))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn get_json(&self, route: &str) -> Result<Value, ChatError> {
        let url = self.endpoint(route);
        let resp = self.http
            .get(&url)
            .send().await
            .map_err(|e| ChatError::from_reqwest(&self.base_url, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        resp.json::<Value>().await.map_err(|e|
            ChatError::Stream(format!("invalid response from {}: {}", url, e))
        )
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ChatError {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(b) => b.error,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    ChatError::Status { status: status.as_u16(), message }
}

async fn forward_line(
    line: &[u8],
    tx: &mpsc::Sender<Result<String, ChatError>>,
    fragments: &mut usize
) -> LineOutcome {
    let (text, outcome) = match parse_chat_line(line) {
        Ok(ChatLine::Fragment(text)) => (text, LineOutcome::Continue),
        Ok(ChatLine::Done(Some(text))) => (text, LineOutcome::Finished),
        Ok(ChatLine::Done(None)) => {
            return LineOutcome::Finished;
        }
        Ok(ChatLine::Empty) => {
            return LineOutcome::Continue;
        }
        Err(e) => {
            warn!("Chat stream error after {} fragments: {}", fragments, e);
            let _ = tx.send(Err(e)).await;
            return LineOutcome::Stop;
        }
    };
    if tx.send(Ok(text)).await.is_err() {
        debug!("Fragment receiver dropped; closing chat stream");
        return LineOutcome::Stop;
    }
    *fragments += 1;
    outcome
}

async fn run_chat_stream(
    http: HttpClient,
    base_url: String,
    payload: ChatPayload,
    tx: mpsc::Sender<Result<String, ChatError>>,
    cancel: CancellationToken
) {
    let url = format!("{}/api/chat", base_url);
    let model = payload.model.clone();

    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Chat request to {} cancelled before a response arrived", model);
            return;
        }
        res = http.post(&url).json(&payload).send() => res,
    };

    let response = match sent {
        Ok(r) => r,
        Err(e) => {
            warn!("Error communicating with Ollama: {}", e);
            let _ = tx.send(Err(ChatError::from_reqwest(&base_url, &e))).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let err = status_error(status, &body);
        warn!("Chat request rejected: {}", err);
        let _ = tx.send(Err(err)).await;
        return;
    }

    let mut bytes = response.bytes_stream();
    let mut decoder = NdjsonDecoder::new();
    let mut fragments = 0usize;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Chat stream from {} cancelled after {} fragments", model, fragments);
                return;
            }
            chunk = bytes.next() => chunk,
        };

        match chunk {
            Some(Ok(buf)) => {
                for line in decoder.push(&buf) {
                    if cancel.is_cancelled() {
                        info!("Chat stream from {} cancelled after {} fragments", model, fragments);
                        return;
                    }
                    match forward_line(&line, &tx, &mut fragments).await {
                        LineOutcome::Continue => {}
                        LineOutcome::Finished => {
                            info!("Chat stream from {} finished with {} fragments", model, fragments);
                            return;
                        }
                        LineOutcome::Stop => {
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Chat stream from {} broke after {} fragments: {}", model, fragments, e);
                let _ = tx.send(Err(ChatError::Stream(e.to_string()))).await;
                return;
            }
            None => {
                if let Some(line) = decoder.finish() {
                    match forward_line(&line, &tx, &mut fragments).await {
                        LineOutcome::Finished => {
                            info!("Chat stream from {} finished with {} fragments", model, fragments);
                            return;
                        }
                        LineOutcome::Stop => {
                            return;
                        }
                        LineOutcome::Continue => {}
                    }
                }
                warn!("Chat stream from {} ended without a done marker", model);
                let _ = tx.send(
                    Err(ChatError::Stream("connection closed before the response was complete".into()))
                ).await;
                return;
            }
        }
    }
}

#[async_trait]
impl ChatTransport for OllamaClient {
    async fn send(
        &self,
        request: ChatRequest,
        cancel: CancellationToken
    ) -> Result<FragmentStream, ChatError> {
        request.validate()?;

        let payload = ChatPayload {
            model: request.model.clone(),
            messages: request
                .wire_messages()
                .into_iter()
                .map(|(role, content)| WireMessage { role: role.as_str().to_string(), content })
                .collect(),
            stream: true,
            options: request.parameters.to_options(),
        };
        info!(
            "Sending {} messages to {} at {}",
            payload.messages.len(),
            payload.model,
            self.base_url
        );

        let http = self.http.clone();
        let base_url = self.base_url.clone();
        Ok(
            create_streaming_response(move |tx| async move {
                run_chat_stream(http, base_url, payload, tx, cancel).await;
            })
        )
    }

    fn describe(&self) -> String {
        format!("Ollama at {}", self.base_url)
    }
}

#[async_trait]
impl ModelDirectory for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let json = self.get_json("/api/tags").await?;
        let names = parse_model_names(&json);
        info!("Found {} installed models at {}", names.len(), self.base_url);
        Ok(names)
    }

    async fn check_connection(&self) -> Result<String, ChatError> {
        let json = self.get_json("/api/version").await?;
        let version: VersionResponse = serde_json
            ::from_value(json)
            .map_err(|e| ChatError::Stream(format!("unexpected /api/version response: {}", e)))?;
        Ok(version.version)
    }
}
