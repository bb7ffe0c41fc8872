use thiserror::Error;

/// Everything that can go wrong between the shell and the Ollama daemon.
///
/// Variants carry their detail as text so a failed turn can keep a copy of
/// the error on its message while the same error is reported to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("cannot reach Ollama at {url}: {message}")]
    Connectivity { url: String, message: String },

    #[error("Ollama returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("response stream failed: {0}")]
    Stream(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("a response is still streaming; cancel it or wait for it to finish")]
    TurnInProgress,
}

impl ChatError {
    pub fn config(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        ChatError::Config(format!("{}: {}", context, err))
    }

    /// Maps a reqwest failure onto the taxonomy. Anything that happened before
    /// a response arrived counts as connectivity.
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ChatError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_builder() {
            return ChatError::Connectivity {
                url: url.to_string(),
                message: err.to_string(),
            };
        }
        ChatError::Stream(err.to_string())
    }

    /// True for failures the user fixes by checking the daemon, not their input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::Connectivity { .. } | ChatError::Status { .. } | ChatError::Stream(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
