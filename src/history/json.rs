use async_trait::async_trait;
use log::{ info, warn };
use serde::Deserialize;
use std::path::{ Path, PathBuf };
use tokio::fs;

use super::{ format_transcript, validate_id, HistoryEntry, HistoryStore };
use crate::error::ChatError;
use crate::models::{ ChatMessage, Parameters };

/// Stores each conversation as `<id>.json` plus a `<id>.txt` transcript in
/// one directory.
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    dir: PathBuf,
}

/// Older saves kept `{"user": .., "assistant": ..}` pairs under
/// `conversation` instead of a message list.
#[derive(Deserialize)]
struct StoredEntry {
    #[serde(default)]
    chat_name: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    conversation: Vec<LegacyExchange>,
}

#[derive(Deserialize)]
struct LegacyExchange {
    user: String,
    #[serde(default)]
    assistant: String,
}

impl StoredEntry {
    fn into_entry(self, id: &str) -> HistoryEntry {
        let mut messages = self.messages;
        if messages.is_empty() {
            for exchange in self.conversation {
                messages.push(ChatMessage::user(exchange.user));
                messages.push(ChatMessage::assistant(exchange.assistant));
            }
        }
        HistoryEntry {
            chat_name: self.chat_name.unwrap_or_else(|| id.to_string()),
            model: self.model,
            timestamp: self.timestamp,
            system_prompt: self.system_prompt,
            parameters: self.parameters,
            messages,
        }
    }
}

impl JsonHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn json_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn text_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", id))
    }

    async fn ensure_dir(&self) -> Result<(), ChatError> {
        fs::create_dir_all(&self.dir).await.map_err(|e|
            ChatError::config(format!("failed to create '{}'", self.dir.display()), e)
        )
    }

    async fn write_entry(&self, entry: &HistoryEntry, id: &str) -> Result<PathBuf, ChatError> {
        let path = self.json_path(id);
        let json = serde_json
            ::to_string_pretty(entry)
            .map_err(|e| ChatError::config("failed to serialize conversation", e))?;
        fs::write(&path, json).await.map_err(|e|
            ChatError::config(format!("failed to write '{}'", path.display()), e)
        )?;

        let text_path = self.text_path(id);
        if let Err(e) = fs::write(&text_path, format_transcript(entry)).await {
            warn!("Could not write transcript {}: {}", text_path.display(), e);
        }
        Ok(path)
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn save_entry(&self, entry: &HistoryEntry, id: &str) -> Result<PathBuf, ChatError> {
        let id = validate_id(id)?;
        self.ensure_dir().await?;
        let path = self.write_entry(entry, &id).await?;
        info!("Conversation saved to {}", path.display());
        Ok(path)
    }

    async fn load_entry(&self, id: &str) -> Result<HistoryEntry, ChatError> {
        let id = validate_id(id)?;
        let path = self.json_path(&id);
        let content = fs
            ::read_to_string(&path).await
            .map_err(|e| ChatError::config(format!("failed to read '{}'", path.display()), e))?;
        let stored: StoredEntry = serde_json
            ::from_str(&content)
            .map_err(|e| ChatError::config(format!("failed to parse '{}'", path.display()), e))?;
        let entry = stored.into_entry(&id);
        info!("Loaded {} messages from {}", entry.messages.len(), path.display());
        Ok(entry)
    }

    async fn list_conversations(&self) -> Result<Vec<String>, ChatError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(ChatError::config(format!("failed to read '{}'", self.dir.display()), e));
            }
        };

        let mut ids = Vec::new();
        while
            let Some(item) = dir
                .next_entry().await
                .map_err(|e| ChatError::config(format!("failed to read '{}'", self.dir.display()), e))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn rename_conversation(&self, old_id: &str, new_id: &str) -> Result<PathBuf, ChatError> {
        let old_id = validate_id(old_id)?;
        let new_id = validate_id(new_id)?;
        let new_path = self.json_path(&new_id);
        if fs::try_exists(&new_path).await.unwrap_or(false) {
            return Err(ChatError::Validation(format!("a chat named '{}' already exists", new_id)));
        }

        let mut entry = self.load_entry(&old_id).await?;
        entry.chat_name = new_id.clone();
        self.write_entry(&entry, &new_id).await?;

        let old_path = self.json_path(&old_id);
        if let Err(e) = fs::remove_file(&old_path).await {
            warn!("Could not remove {}: {}", old_path.display(), e);
        }
        let old_text = self.text_path(&old_id);
        if fs::try_exists(&old_text).await.unwrap_or(false) {
            if let Err(e) = fs::remove_file(&old_text).await {
                warn!("Could not remove {}: {}", old_text.display(), e);
            }
        }
        info!("Renamed conversation {} to {}", old_id, new_id);
        Ok(new_path)
    }
}
