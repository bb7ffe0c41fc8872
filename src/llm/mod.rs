pub mod chat;
pub mod directory;

use std::sync::Arc;

use crate::error::ChatError;

pub use chat::{ create_streaming_response, ChatRequest, ChatTransport, FragmentStream, OllamaClient };
pub use directory::ModelDirectory;

/// The two faces of one model server: where chats go and where models are listed.
#[derive(Clone)]
pub struct Backend {
    pub transport: Arc<dyn ChatTransport>,
    pub directory: Arc<dyn ModelDirectory>,
}

impl Backend {
    pub fn ollama(base_url: &str) -> Result<Self, ChatError> {
        let client = Arc::new(OllamaClient::new(base_url)?);
        Ok(Self {
            transport: client.clone(),
            directory: client,
        })
    }
}

/// Builds a [`Backend`] for a base URL; swapped out in tests.
pub type Connector = fn(&str) -> Result<Backend, ChatError>;
