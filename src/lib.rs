pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod session;
pub mod ui;

use cli::Args;
use config::{ normalize_api_url, SettingsStore };
use history::JsonHistoryStore;
use llm::Backend;
use log::info;
use std::error::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use ui::{ spawn_line_reader, Shell };

pub use error::ChatError;

const LOG_FILE: &str = "ollama_chat.log";

pub fn settings_store(args: &Args) -> SettingsStore {
    match &args.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::default_location(),
    }
}

fn log_path(args: &Args, store: &SettingsStore) -> PathBuf {
    args.log_file.clone().unwrap_or_else(|| {
        store
            .path()
            .parent()
            .map(|dir| dir.join(LOG_FILE))
            .unwrap_or_else(|| PathBuf::from(LOG_FILE))
    })
}

/// Logs go to a file so they don't interleave with the conversation, or to
/// stderr at debug level with `--debug`. `RUST_LOG` overrides either filter.
pub fn init_logging(args: &Args) {
    let default_filter = if args.debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter)
    );

    if !args.debug {
        let path = log_path(args, &settings_store(args));
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Cannot open log file {}: {}; logging to stderr", path.display(), e);
            }
        }
    }
    builder.init();
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = settings_store(&args);
    let settings = store.load();

    let api_url = match &args.url {
        Some(url) => normalize_api_url(url)?,
        None => settings.api_url.clone(),
    };
    let history_dir = args.history_dir
        .clone()
        .or_else(|| settings.history_dir.clone())
        .unwrap_or_else(|| store.default_history_dir());

    info!("--- Core Configuration ---");
    info!("Settings File: {}", store.path().display());
    info!("Ollama URL: {}", api_url);
    info!("Model: {}", args.model.as_deref().unwrap_or(&settings.last_model));
    info!("History Directory: {}", history_dir.display());
    info!("Parameters: {}", settings.parameters);
    info!("Saved System Prompts: {}", settings.saved_system_prompts.len());
    info!("-------------------------");

    let backend = Backend::ollama(&api_url)?;
    let history = Arc::new(JsonHistoryStore::new(history_dir));
    let mut shell = Shell::new(settings, store, history, backend, Backend::ollama, std::io::stdout());
    if let Some(model) = &args.model {
        shell.override_model(model);
    }

    shell.start().await;
    shell.run(spawn_line_reader()).await;
    Ok(())
}
