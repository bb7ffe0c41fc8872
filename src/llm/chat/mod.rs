pub mod ndjson;
pub mod ollama;

use async_trait::async_trait;
use futures::{ Future, Stream };
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::models::{ ChatMessage, Parameters, Role };

pub use self::ollama::OllamaClient;

const FRAGMENT_BUFFER: usize = 32;

/// Fragments of one response, in arrival order. The stream ends after the
/// last fragment, after cancellation, or right after yielding an error.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub parameters: Parameters,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.model.trim().is_empty() {
            return Err(ChatError::Validation("no model selected".into()));
        }
        if !self.messages.iter().any(|m| m.role == Role::User) {
            return Err(ChatError::Validation("conversation has no user message".into()));
        }
        self.parameters.validate()
    }

    /// Messages as they go on the wire: the system prompt first (when set),
    /// then the history minus assistant replies that never produced text.
    pub fn wire_messages(&self) -> Vec<(Role, String)> {
        let system = self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (Role::System, s.to_string()));

        system
            .into_iter()
            .chain(
                self.messages
                    .iter()
                    .filter(|m| !(m.role == Role::Assistant && m.content.is_empty()))
                    .map(|m| (m.role, m.content.clone()))
            )
            .collect()
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Starts one streamed response for `request`. Cancelling `cancel` closes
    /// the connection and ends the returned stream.
    async fn send(
        &self,
        request: ChatRequest,
        cancel: CancellationToken
    ) -> Result<FragmentStream, ChatError>;

    fn describe(&self) -> String;
}

/// Runs `producer` on its own task and exposes whatever it sends as a
/// [`FragmentStream`]. Dropping the stream makes the producer's sends fail,
/// which is its signal to stop.
pub fn create_streaming_response<F, Fut>(producer: F) -> FragmentStream
    where
        F: FnOnce(mpsc::Sender<Result<String, ChatError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);

    tokio::spawn(async move {
        producer(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}
