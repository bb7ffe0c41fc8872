mod json;

use async_trait::async_trait;
use chrono::{ Local, Utc };
use serde::{ Deserialize, Serialize };
use std::path::PathBuf;

use crate::error::ChatError;
use crate::models::{ ChatMessage, Conversation, Parameters, Role };

pub use json::JsonHistoryStore;

/// A saved conversation together with the settings it was held under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub chat_name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl HistoryEntry {
    pub fn new(
        chat_name: impl Into<String>,
        conversation: &Conversation,
        model: &str,
        system_prompt: &str,
        parameters: &Parameters
    ) -> Self {
        Self {
            chat_name: chat_name.into(),
            model: model.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            system_prompt: system_prompt.to_string(),
            parameters: parameters.clone(),
            messages: conversation.messages.clone(),
        }
    }

    pub fn conversation(&self) -> Conversation {
        Conversation {
            name: Some(self.chat_name.clone()),
            messages: self.messages.clone(),
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_entry(&self, entry: &HistoryEntry, id: &str) -> Result<PathBuf, ChatError>;

    async fn load_entry(&self, id: &str) -> Result<HistoryEntry, ChatError>;

    /// Saved entry ids, sorted.
    async fn list_conversations(&self) -> Result<Vec<String>, ChatError>;

    async fn rename_conversation(&self, old_id: &str, new_id: &str) -> Result<PathBuf, ChatError>;

    async fn save_conversation(&self, conversation: &Conversation, id: &str) -> Result<PathBuf, ChatError> {
        let entry = HistoryEntry::new(id, conversation, "", "", &Parameters::default());
        self.save_entry(&entry, id).await
    }

    async fn load_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        Ok(self.load_entry(id).await?.conversation())
    }
}

/// `chat_YYYYmmdd_HHMMSS` in local time.
pub fn default_chat_name() -> String {
    format!("chat_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// History ids become file names, so they may not walk out of the history
/// directory or carry an extension of their own.
pub fn validate_id(id: &str) -> Result<String, ChatError> {
    let trimmed = id.trim();
    let trimmed = trimmed.strip_suffix(".json").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(ChatError::Validation("chat name cannot be empty".into()));
    }
    if trimmed.starts_with('.') || trimmed.contains(['/', '\\', '\0']) {
        return Err(ChatError::Validation(format!("invalid chat name '{}'", id)));
    }
    Ok(trimmed.to_string())
}

/// Human-readable transcript written next to each saved entry.
pub fn format_transcript(entry: &HistoryEntry) -> String {
    let mut result = format!("Chat with Ollama ({}) - {}\n\n", entry.model, entry.timestamp);
    if !entry.system_prompt.trim().is_empty() {
        result.push_str(&format!("System prompt: {}\n\n", entry.system_prompt));
    }

    let mut turn = 0;
    for msg in &entry.messages {
        if msg.role == Role::User {
            turn += 1;
        }
        let mut suffix = String::new();
        if msg.cancelled {
            suffix.push_str(" [cancelled]");
        }
        if let Some(err) = &msg.error {
            suffix.push_str(&format!(" [error: {}]", err));
        }
        result.push_str(
            &format!("[{}] {}: {}{}\n\n", turn.max(1), msg.role.display_name(), msg.content, suffix)
        );
        if msg.role == Role::Assistant {
            result.push_str(&"-".repeat(80));
            result.push_str("\n\n");
        }
    }

    result
}
