use futures::StreamExt;
use log::{ debug, info, warn };
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::ChatError;
use crate::llm::{ ChatRequest, ChatTransport, FragmentStream };
use crate::models::{ ChatMessage, Conversation, Parameters, Role };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the shell gets to render while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Fragment(String),
    Completed,
    Cancelled,
    Failed(ChatError),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::Fragment(_))
    }
}

struct ActiveTurn {
    stream: FragmentStream,
    cancel: CancellationToken,
    cancel_requested: bool,
    fragments: usize,
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        // Abandoning a turn must not leave the connection open.
        self.cancel.cancel();
    }
}

/// One conversation and the turn, if any, currently streaming into it.
///
/// Messages are only ever appended. While a turn streams, the trailing
/// assistant message is the one entry that still changes; it is frozen when
/// the turn completes, is cancelled or fails.
pub struct ConversationSession {
    transport: Arc<dyn ChatTransport>,
    conversation: Conversation,
    model: String,
    system_prompt: String,
    parameters: Parameters,
    state: SessionState,
    active: Option<ActiveTurn>,
    last_error: Option<ChatError>,
}

impl ConversationSession {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        model: impl Into<String>,
        parameters: Parameters
    ) -> Self {
        Self {
            transport,
            conversation: Conversation::new(),
            model: model.into(),
            system_prompt: String::new(),
            parameters,
            state: SessionState::Idle,
            active: None,
            last_error: None,
        }
    }

    pub fn from_settings(transport: Arc<dyn ChatTransport>, settings: &Settings) -> Self {
        let mut session = Self::new(transport, settings.last_model.clone(), settings.parameters.clone());
        session.system_prompt = settings.system_prompt.clone();
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }

    /// Model, parameter and prompt changes apply from the next turn on.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn set_parameters(&mut self, parameters: Parameters) -> Result<(), ChatError> {
        parameters.validate()?;
        self.parameters = parameters;
        Ok(())
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn set_transport(&mut self, transport: Arc<dyn ChatTransport>) -> Result<(), ChatError> {
        self.ensure_not_streaming()?;
        self.transport = transport;
        Ok(())
    }

    /// Starts a new chat. History of the old one is dropped from the session.
    pub fn clear(&mut self) -> Result<(), ChatError> {
        self.ensure_not_streaming()?;
        self.conversation = Conversation::new();
        self.state = SessionState::Idle;
        self.last_error = None;
        Ok(())
    }

    pub fn replace_conversation(&mut self, conversation: Conversation) -> Result<(), ChatError> {
        self.ensure_not_streaming()?;
        self.conversation = conversation;
        self.state = SessionState::Idle;
        self.last_error = None;
        Ok(())
    }

    /// Names the conversation after the history entry it was saved under.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.conversation.name = Some(name.into());
    }

    fn ensure_not_streaming(&self) -> Result<(), ChatError> {
        if self.is_streaming() { Err(ChatError::TurnInProgress) } else { Ok(()) }
    }

    /// Appends `text` as a user message and starts streaming the reply.
    ///
    /// Rejected without side effects while another turn is streaming, when
    /// `text` is blank, or when the transport refuses the request.
    pub async fn send_message(&mut self, text: &str) -> Result<(), ChatError> {
        self.ensure_not_streaming()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Validation("message is empty".into()));
        }

        let user_message = ChatMessage::user(text);
        let mut messages = self.conversation.messages.clone();
        messages.push(user_message.clone());
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            system_prompt: Some(self.system_prompt.clone()).filter(|s| !s.trim().is_empty()),
            parameters: self.parameters.clone(),
        };

        let cancel = CancellationToken::new();
        let stream = self.transport.send(request, cancel.clone()).await?;

        self.conversation.messages.push(user_message);
        self.conversation.messages.push(ChatMessage::assistant(""));
        self.active = Some(ActiveTurn {
            stream,
            cancel,
            cancel_requested: false,
            fragments: 0,
        });
        self.state = SessionState::Streaming;
        self.last_error = None;
        info!("Turn {} started with {}", self.conversation.turns(), self.model);
        Ok(())
    }

    /// Asks the running turn to stop. Returns false when nothing is
    /// streaming or cancellation was already requested.
    ///
    /// The session stays `Streaming` until [`next_event`](Self::next_event)
    /// observes the end of the stream, but fragments arriving after this
    /// call are no longer appended.
    pub fn cancel(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if !active.cancel_requested => {
                active.cancel_requested = true;
                active.cancel.cancel();
                info!("Cancellation requested after {} fragments", active.fragments);
                true
            }
            _ => false,
        }
    }

    /// Waits for the next thing that happens to the running turn and applies
    /// it. Returns `None` when no turn is streaming.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let active = self.active.as_mut()?;
            let item = active.stream.next().await;
            let cancel_requested = active.cancel_requested;

            match item {
                Some(Ok(_)) if cancel_requested => {
                    debug!("Dropping fragment received after cancellation");
                }
                Some(Ok(fragment)) => {
                    active.fragments += 1;
                    if let Some(tail) = self.conversation.messages.last_mut() {
                        tail.content.push_str(&fragment);
                    }
                    return Some(SessionEvent::Fragment(fragment));
                }
                Some(Err(e)) if cancel_requested => {
                    debug!("Ignoring error after cancellation: {}", e);
                    return Some(self.finish(SessionEvent::Cancelled));
                }
                Some(Err(e)) => {
                    return Some(self.finish(SessionEvent::Failed(e)));
                }
                None if cancel_requested => {
                    return Some(self.finish(SessionEvent::Cancelled));
                }
                None => {
                    return Some(self.finish(SessionEvent::Completed));
                }
            }
        }
    }

    /// Drives the running turn to its end and returns the terminal state.
    pub async fn finish_turn(&mut self) -> SessionState {
        while let Some(event) = self.next_event().await {
            if event.is_terminal() {
                break;
            }
        }
        self.state
    }

    fn finish(&mut self, event: SessionEvent) -> SessionEvent {
        let fragments = self.active
            .take()
            .map(|a| a.fragments)
            .unwrap_or(0);
        let tail = self.conversation.messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant);

        match &event {
            SessionEvent::Completed => {
                self.state = SessionState::Completed;
                info!("Turn completed with {} fragments", fragments);
            }
            SessionEvent::Cancelled => {
                if let Some(tail) = tail {
                    tail.cancelled = true;
                }
                self.state = SessionState::Cancelled;
                info!("Turn cancelled after {} fragments", fragments);
            }
            SessionEvent::Failed(e) => {
                if let Some(tail) = tail {
                    tail.error = Some(e.to_string());
                }
                self.state = SessionState::Failed;
                self.last_error = Some(e.clone());
                warn!("Turn failed after {} fragments: {}", fragments, e);
            }
            SessionEvent::Fragment(_) => {}
        }
        event
    }
}

impl fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("transport", &self.transport.describe())
            .field("model", &self.model)
            .field("state", &self.state)
            .field("messages", &self.conversation.len())
            .finish()
    }
}
