use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use std::collections::BTreeMap;
use std::fs;
use std::path::{ Path, PathBuf };
use url::Url;

use crate::error::ChatError;
use crate::models::Parameters;

pub const DEFAULT_API_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
const APP_DIR: &str = "ollama-chat";
const CONFIG_FILE: &str = "config.toml";
const HISTORY_DIR: &str = "chat_history";

/// Process-wide preferences, loaded once at startup and handed to whoever
/// needs them. Changes are persisted by calling [`SettingsStore::save`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub last_model: String,
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,
    pub parameters: Parameters,
    pub saved_system_prompts: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            last_model: DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            history_dir: None,
            parameters: Parameters::default(),
            saved_system_prompts: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn set_api_url(&mut self, raw: &str) -> Result<(), ChatError> {
        self.api_url = normalize_api_url(raw)?;
        Ok(())
    }

    pub fn save_system_prompt(&mut self, name: &str, text: &str) -> Result<(), ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::Validation("system prompt name cannot be empty".into()));
        }
        self.saved_system_prompts.insert(name.to_string(), text.to_string());
        Ok(())
    }

    /// Makes a saved prompt the active one and returns its text.
    pub fn use_system_prompt(&mut self, name: &str) -> Result<&str, ChatError> {
        let text = self.saved_system_prompts
            .get(name.trim())
            .ok_or_else(|| ChatError::Validation(format!("no saved system prompt named '{}'", name)))?
            .clone();
        self.system_prompt = text;
        Ok(&self.system_prompt)
    }

    pub fn remove_system_prompt(&mut self, name: &str) -> Result<(), ChatError> {
        self.saved_system_prompts
            .remove(name.trim())
            .map(|_| ())
            .ok_or_else(|| ChatError::Validation(format!("no saved system prompt named '{}'", name)))
    }

    /// Settings that came from an old or hand-edited file may hold values
    /// outside the accepted ranges. Those fall back to defaults.
    fn sanitize(mut self) -> Self {
        if let Err(e) = self.parameters.validate() {
            warn!("Ignoring stored parameters ({}); using defaults", e);
            self.parameters = Parameters::default();
        }
        match normalize_api_url(&self.api_url) {
            Ok(url) => {
                self.api_url = url;
            }
            Err(e) => {
                warn!("Ignoring stored api_url ({}); using {}", e, DEFAULT_API_URL);
                self.api_url = DEFAULT_API_URL.to_string();
            }
        }
        if self.last_model.trim().is_empty() {
            self.last_model = DEFAULT_MODEL.to_string();
        }
        self
    }
}

pub fn normalize_api_url(raw: &str) -> Result<String, ChatError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|e|
        ChatError::Validation(format!("invalid API URL '{}': {}", trimmed, e))
    )?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ChatError::Validation(format!("API URL must use http or https: '{}'", trimmed)));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Reads and writes [`Settings`] as a TOML file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/ollama-chat/config.toml`, or `./config.toml` when the
    /// platform has no config directory.
    pub fn default_location() -> Self {
        let path = dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where history lands when the settings don't name a directory.
    pub fn default_history_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(|dir| dir.join(HISTORY_DIR))
            .unwrap_or_else(|| PathBuf::from(HISTORY_DIR))
    }

    pub fn try_load(&self) -> Result<Settings, ChatError> {
        let content = fs
            ::read_to_string(&self.path)
            .map_err(|e| ChatError::config(format!("failed to read '{}'", self.path.display()), e))?;
        let settings: Settings = toml
            ::from_str(&content)
            .map_err(|e| ChatError::config(format!("failed to parse '{}'", self.path.display()), e))?;
        Ok(settings.sanitize())
    }

    /// Never fails: a missing file yields defaults silently, an unreadable
    /// or corrupt one yields defaults with a warning.
    pub fn load(&self) -> Settings {
        if !self.path.exists() {
            info!("No settings file at {}; using defaults", self.path.display());
            return Settings::default();
        }
        match self.try_load() {
            Ok(settings) => {
                info!("Loaded settings from {}", self.path.display());
                settings
            }
            Err(e) => {
                warn!("{}; falling back to default settings", e);
                Settings::default()
            }
        }
    }

    /// Writes `settings` as TOML, creating parent directories. Uses
    /// `tokio::fs` so the shell's event loop keeps running.
    pub async fn save(&self, settings: &Settings) -> Result<(), ChatError> {
        if let Some(parent) = self.parent_dir() {
            tokio::fs
                ::create_dir_all(parent).await
                .map_err(|e| ChatError::config(format!("failed to create '{}'", parent.display()), e))?;
        }
        let content = render(settings)?;
        tokio::fs
            ::write(&self.path, content).await
            .map_err(|e| ChatError::config(format!("failed to write '{}'", self.path.display()), e))?;
        info!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

fn render(settings: &Settings) -> Result<String, ChatError> {
    toml::to_string_pretty(settings).map_err(|e| ChatError::config("failed to serialize settings", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("config.toml"));
        assert_eq!(store.load(), Settings::default());
        assert!(matches!(store.try_load(), Err(ChatError::Config(_))));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("config.toml"));

        let mut settings = Settings::default();
        settings.last_model = "mistral:7b".into();
        settings.set_api_url("http://10.0.0.5:11434/").unwrap();
        settings.parameters.set("top_k", "12").unwrap();
        settings.save_system_prompt("pirate", "Talk like a pirate.").unwrap();
        settings.use_system_prompt("pirate").unwrap();
        store.save(&settings).await.unwrap();

        let loaded = store.try_load().unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.api_url, "http://10.0.0.5:11434");
        assert_eq!(loaded.system_prompt, "Talk like a pirate.");
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "api_url = [this is not toml").unwrap();
        let store = SettingsStore::new(&path);
        assert!(store.try_load().is_err());
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "last_model = \"phi3\"\n[parameters]\ntemperature = 1.5\n").unwrap();
        let settings = SettingsStore::new(&path).try_load().unwrap();
        assert_eq!(settings.last_model, "phi3");
        assert_eq!(settings.parameters.temperature, 1.5);
        assert_eq!(settings.parameters.top_k, 40);
        assert_eq!(settings.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn out_of_range_stored_parameters_are_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "api_url = \"ftp://nope\"\n[parameters]\ntop_p = 7.0\n").unwrap();
        let settings = SettingsStore::new(&path).try_load().unwrap();
        assert_eq!(settings.parameters, Parameters::default());
        assert_eq!(settings.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn unknown_prompt_names_are_rejected() {
        let mut settings = Settings::default();
        assert!(settings.use_system_prompt("missing").is_err());
        assert!(settings.remove_system_prompt("missing").is_err());
        assert!(settings.save_system_prompt("  ", "text").is_err());
    }
}
