use log::debug;
use std::io::Write;

use crate::error::ChatError;
use crate::models::{ ChatMessage, Conversation, Role };
use crate::session::SessionEvent;

/// Writes everything the user sees. Output failures are logged and
/// otherwise ignored; a closed terminal is not worth crashing over.
pub struct Renderer<W: Write> {
    out: W,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            debug!("Failed to write to terminal: {}", e);
        }
    }

    pub fn line(&mut self, text: &str) {
        self.emit(&format!("{}\n", text));
    }

    pub fn notice(&mut self, text: &str) {
        self.line(&format!("* {}", text));
    }

    pub fn error(&mut self, err: &ChatError) {
        self.line(&format!("! {}", err));
    }

    pub fn prompt(&mut self) {
        self.emit("> ");
    }

    pub fn assistant_header(&mut self, model: &str) {
        self.emit(&format!("{} > ", model));
    }

    pub fn event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Fragment(text) => self.emit(text),
            SessionEvent::Completed => self.emit("\n"),
            SessionEvent::Cancelled => self.emit("\n* response cancelled\n"),
            SessionEvent::Failed(e) => {
                self.emit("\n");
                self.error(e);
                if e.is_transport() {
                    self.notice("Is Ollama running? /status checks the connection");
                }
            }
        }
    }

    pub fn message(&mut self, message: &ChatMessage) {
        let mut text = format!("{}: {}", message.role.display_name(), message.content);
        if message.cancelled {
            text.push_str(" [cancelled]");
        }
        if let Some(err) = &message.error {
            text.push_str(&format!(" [error: {}]", err));
        }
        self.line(&text);
    }

    pub fn conversation(&mut self, conversation: &Conversation) {
        for message in &conversation.messages {
            self.message(message);
            if message.role == Role::Assistant {
                self.emit("\n");
            }
        }
    }

    pub fn list(&mut self, title: &str, items: &[String], current: Option<&str>) {
        self.line(title);
        for item in items {
            let marker = if Some(item.as_str()) == current { "*" } else { " " };
            self.line(&format!(" {} {}", marker, item));
        }
    }
}
