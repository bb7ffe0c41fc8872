pub mod settings;

pub use settings::{ normalize_api_url, Settings, SettingsStore, DEFAULT_API_URL, DEFAULT_MODEL };
