pub mod command;
pub mod render;
pub mod shell;

pub use command::{ parse_command, Command, PromptAction };
pub use render::Renderer;
pub use shell::{ spawn_line_reader, Flow, Shell };
