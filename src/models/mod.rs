pub mod chat;
pub mod params;

pub use chat::{ ChatMessage, Conversation, Role };
pub use params::Parameters;
