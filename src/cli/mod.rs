use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Chat with models served by a local Ollama daemon", long_about = None)]
pub struct Args {
    /// Settings file (TOML). Defaults to <config dir>/ollama-chat/config.toml
    #[arg(long, env = "OLLAMA_CHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for saved conversations. Overrides `history_dir` from the settings file.
    #[arg(long, env = "OLLAMA_CHAT_HISTORY_DIR")]
    pub history_dir: Option<PathBuf>,

    /// Ollama base URL for this run (e.g., http://localhost:11434). Not written back to settings.
    #[arg(long, env = "OLLAMA_CHAT_URL")]
    pub url: Option<String>,

    /// Model to start with (e.g., llama3.2, mistral:7b). Not written back to settings.
    #[arg(short, long, env = "OLLAMA_CHAT_MODEL")]
    pub model: Option<String>,

    /// Log file. Defaults to ollama_chat.log next to the settings file.
    #[arg(long, env = "OLLAMA_CHAT_LOG")]
    pub log_file: Option<PathBuf>,

    /// Log to stderr at debug level instead of the log file.
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
