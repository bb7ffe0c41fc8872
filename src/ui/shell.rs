use log::{ info, warn };
use std::io::{ BufRead, Write };
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

use super::command::{ parse_command, Command, PromptAction, HELP };
use super::render::Renderer;
use crate::config::{ Settings, SettingsStore };
use crate::error::ChatError;
use crate::history::{ default_chat_name, validate_id, HistoryEntry, HistoryStore };
use crate::llm::{ Backend, Connector, ModelDirectory };
use crate::session::ConversationSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Line-oriented front end. Owns the session and the settings value and is
/// the only place user actions turn into component calls.
pub struct Shell<W: Write> {
    session: ConversationSession,
    settings: Settings,
    settings_store: SettingsStore,
    history: Arc<dyn HistoryStore>,
    directory: Arc<dyn ModelDirectory>,
    connector: Connector,
    models: Vec<String>,
    out: Renderer<W>,
}

impl<W: Write> Shell<W> {
    pub fn new(
        settings: Settings,
        settings_store: SettingsStore,
        history: Arc<dyn HistoryStore>,
        backend: Backend,
        connector: Connector,
        out: W
    ) -> Self {
        let session = ConversationSession::from_settings(backend.transport, &settings);
        Self {
            session,
            settings,
            settings_store,
            history,
            directory: backend.directory,
            connector,
            models: Vec::new(),
            out: Renderer::new(out),
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn output(&self) -> &W {
        self.out.get_ref()
    }

    /// Uses `model` for this run only; settings keep their last saved model.
    pub fn override_model(&mut self, model: &str) {
        self.session.set_model(model.trim());
    }

    /// Greets the user and reports whether the server and model are usable.
    pub async fn start(&mut self) {
        self.out.line("Welcome to Ollama Chat. Type /help for commands.");
        self.out.notice(&format!("Current model: {}", self.session.model()));
        self.report_status().await;
        self.refresh_models(false).await;
    }

    /// Reads lines from `lines` until the user quits or input ends, while
    /// rendering fragments of the running turn as they arrive.
    pub async fn run(&mut self, mut lines: mpsc::Receiver<String>) {
        self.out.prompt();
        loop {
            tokio::select! {
                event = self.session.next_event(), if self.session.is_streaming() => {
                    if let Some(event) = event {
                        self.out.event(&event);
                        if event.is_terminal() {
                            self.out.prompt();
                        }
                    }
                }
                line = lines.recv() => {
                    let Some(line) = line else {
                        break;
                    };
                    if self.handle_line(&line).await == Flow::Quit {
                        break;
                    }
                    if !self.session.is_streaming() {
                        self.out.prompt();
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    if !self.session.cancel() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Renders the running turn until it ends.
    pub async fn drain_turn(&mut self) {
        while let Some(event) = self.session.next_event().await {
            self.out.event(&event);
            if event.is_terminal() {
                break;
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.session.cancel() {
            self.drain_turn().await;
        }
        self.out.line("");
        info!("Shell exiting");
    }

    pub async fn handle_line(&mut self, line: &str) -> Flow {
        match parse_command(line) {
            Ok(Some(command)) => {
                match self.handle_command(command).await {
                    Ok(flow) => flow,
                    Err(e) => {
                        self.out.error(&e);
                        Flow::Continue
                    }
                }
            }
            Ok(None) => Flow::Continue,
            Err(e) => {
                self.out.error(&e);
                Flow::Continue
            }
        }
    }

    pub async fn handle_command(&mut self, command: Command) -> Result<Flow, ChatError> {
        match command {
            Command::Send(text) => {
                self.session.send_message(&text).await?;
                self.out.assistant_header(self.session.model());
            }
            Command::Help => self.out.line(HELP),
            Command::Quit => {
                return Ok(Flow::Quit);
            }
            Command::New => {
                self.session.clear()?;
                self.out.notice("Started a new chat");
            }
            Command::Cancel => {
                if self.session.cancel() {
                    self.out.notice("Cancelling...");
                } else {
                    self.out.notice("Nothing to cancel");
                }
            }
            Command::Models => self.refresh_models(true).await,
            Command::Model(name) => self.switch_model(&name).await?,
            Command::Params => {
                let params = self.session.parameters().to_string();
                self.out.notice(&params);
            }
            Command::Set { name, value } => {
                let mut params = self.session.parameters().clone();
                params.set(&name, &value)?;
                self.session.set_parameters(params.clone())?;
                self.settings.parameters = params;
                self.persist_settings().await;
                let params = self.session.parameters().to_string();
                self.out.notice(&params);
            }
            Command::System(None) => {
                if self.session.system_prompt().trim().is_empty() {
                    self.out.notice("No system prompt set");
                } else {
                    let text = format!("System prompt: {}", self.session.system_prompt());
                    self.out.notice(&text);
                }
            }
            Command::System(Some(text)) => {
                self.set_system_prompt(text).await;
                self.out.notice("System prompt updated");
            }
            Command::Prompt(action) => self.handle_prompt(action).await?,
            Command::Save(name) => self.save_chat(name).await?,
            Command::Load(name) => self.load_chat(&name).await?,
            Command::History => {
                let ids = self.history.list_conversations().await?;
                if ids.is_empty() {
                    self.out.notice("No saved chats");
                } else {
                    let current = self.session.conversation().name.clone();
                    self.out.list("Saved chats:", &ids, current.as_deref());
                }
            }
            Command::Rename(new_name) => self.rename_chat(&new_name).await?,
            Command::Url(url) => self.change_url(&url).await?,
            Command::Status => {
                let summary = format!(
                    "Model: {} | {} messages | last turn: {}",
                    self.session.model(),
                    self.session.conversation().len(),
                    self.session.state()
                );
                self.out.notice(&summary);
                self.report_status().await;
            }
        }
        Ok(Flow::Continue)
    }

    async fn persist_settings(&mut self) {
        if let Err(e) = self.settings_store.save(&self.settings).await {
            warn!("{}", e);
            self.out.error(&e);
        }
    }

    async fn set_system_prompt(&mut self, text: String) {
        self.session.set_system_prompt(text.clone());
        self.settings.system_prompt = text;
        self.persist_settings().await;
    }

    async fn switch_model(&mut self, name: &str) -> Result<(), ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::Validation("model name cannot be empty".into()));
        }
        if !self.models.is_empty() && !self.models.iter().any(|m| m == name) {
            self.out.notice(&format!("'{}' is not in the installed model list; using it anyway", name));
        }
        self.session.set_model(name);
        self.settings.last_model = name.to_string();
        self.persist_settings().await;
        self.out.notice(&format!("Model changed to {}", name));
        Ok(())
    }

    async fn refresh_models(&mut self, verbose: bool) {
        match self.directory.list_models().await {
            Ok(models) if models.is_empty() => {
                self.models.clear();
                self.out.notice("The server has no models installed (try `ollama pull llama3.2`)");
            }
            Ok(models) => {
                self.models = models;
                if verbose {
                    let current = self.session.model().to_string();
                    self.out.list("Installed models:", &self.models, Some(&current));
                } else {
                    self.out.notice(&format!("{} models available; /models to list", self.models.len()));
                }
            }
            Err(e) => {
                warn!("Error getting models: {}", e);
                self.out.error(&e);
            }
        }
    }

    async fn report_status(&mut self) {
        match self.directory.check_connection().await {
            Ok(version) => {
                let target = self.session.transport().describe();
                self.out.notice(&format!("Connected to {} (version {})", target, version))
            }
            Err(e) => {
                self.out.notice("Disconnected");
                self.out.error(&e);
            }
        }
    }

    async fn handle_prompt(&mut self, action: PromptAction) -> Result<(), ChatError> {
        match action {
            PromptAction::List => {
                let names: Vec<String> = self.settings.saved_system_prompts.keys().cloned().collect();
                if names.is_empty() {
                    self.out.notice("No saved system prompts");
                } else {
                    let current = self.settings.saved_system_prompts
                        .iter()
                        .find(|(_, text)| text.as_str() == self.session.system_prompt())
                        .map(|(name, _)| name.clone());
                    self.out.list("Saved system prompts:", &names, current.as_deref());
                }
            }
            PromptAction::Save(name) => {
                let text = self.session.system_prompt().to_string();
                if text.trim().is_empty() {
                    return Err(ChatError::Validation("set a system prompt with /system first".into()));
                }
                self.settings.save_system_prompt(&name, &text)?;
                self.persist_settings().await;
                self.out.notice(&format!("Saved system prompt '{}'", name.trim()));
            }
            PromptAction::Use(name) => {
                let text = self.settings.use_system_prompt(&name)?.to_string();
                self.session.set_system_prompt(text);
                self.persist_settings().await;
                self.out.notice(&format!("Using system prompt '{}'", name.trim()));
            }
            PromptAction::Delete(name) => {
                self.settings.remove_system_prompt(&name)?;
                self.persist_settings().await;
                self.out.notice(&format!("Deleted system prompt '{}'", name.trim()));
            }
            PromptAction::Clear => {
                self.set_system_prompt(String::new()).await;
                self.out.notice("System prompt cleared");
            }
        }
        Ok(())
    }

    async fn save_chat(&mut self, name: Option<String>) -> Result<(), ChatError> {
        if self.session.is_streaming() {
            return Err(ChatError::TurnInProgress);
        }
        if self.session.conversation().is_empty() {
            self.out.notice("No conversation to save");
            return Ok(());
        }
        let id = name
            .or_else(|| self.session.conversation().name.clone())
            .unwrap_or_else(default_chat_name);
        let id = validate_id(&id)?;
        let entry = HistoryEntry::new(
            id.as_str(),
            self.session.conversation(),
            self.session.model(),
            self.session.system_prompt(),
            self.session.parameters()
        );
        let path = self.history.save_entry(&entry, &id).await?;
        self.session.set_name(entry.chat_name);
        self.out.notice(&format!("Conversation saved to {}", path.display()));
        Ok(())
    }

    async fn load_chat(&mut self, name: &str) -> Result<(), ChatError> {
        if self.session.is_streaming() {
            return Err(ChatError::TurnInProgress);
        }
        let entry = self.history.load_entry(name).await?;
        self.session.replace_conversation(entry.conversation())?;
        if !entry.model.trim().is_empty() {
            self.session.set_model(entry.model.clone());
        }
        self.session.set_system_prompt(entry.system_prompt.clone());
        if let Err(e) = self.session.set_parameters(entry.parameters.clone()) {
            warn!("Saved chat '{}' has unusable parameters: {}", name, e);
            self.out.error(&e);
        }

        self.out.notice(&format!("Loaded chat '{}' ({})", entry.chat_name, self.session.model()));
        self.out.conversation(self.session.conversation());
        Ok(())
    }

    async fn rename_chat(&mut self, new_name: &str) -> Result<(), ChatError> {
        let Some(old) = self.session.conversation().name.clone() else {
            return Err(ChatError::Validation("save the chat before renaming it".into()));
        };
        let path = self.history.rename_conversation(&old, new_name).await?;
        let new_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
            .unwrap_or_else(|| new_name.trim().to_string());
        self.session.set_name(new_id.clone());
        self.out.notice(&format!("Renamed '{}' to '{}'", old, new_id));
        Ok(())
    }

    async fn change_url(&mut self, url: &str) -> Result<(), ChatError> {
        if self.session.is_streaming() {
            return Err(ChatError::TurnInProgress);
        }
        let mut settings = self.settings.clone();
        settings.set_api_url(url)?;
        let backend = (self.connector)(&settings.api_url)?;
        self.session.set_transport(backend.transport)?;
        self.directory = backend.directory;
        self.settings = settings;
        self.persist_settings().await;
        self.report_status().await;
        Ok(())
    }
}

/// Feeds stdin lines into a channel from a plain thread, so a pending read
/// never holds the runtime open at exit.
pub fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
