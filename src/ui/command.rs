use crate::error::ChatError;

pub const HELP: &str =
    "\
Type a message and press Enter to send it. Commands:
  /help                    show this help
  /quit                    leave (also Ctrl-D)
  /new                     start a new chat
  /cancel                  stop the response being streamed (also Ctrl-C)
  /models                  list installed models
  /model <name>            switch model
  /params                  show generation parameters
  /set <param> <value>     change temperature, top_p, top_k or max_tokens
  /system [text]           show or set the system prompt
  /prompt list             list saved system prompts
  /prompt save <name>      save the current system prompt under a name
  /prompt use <name>       make a saved system prompt the current one
  /prompt delete <name>    forget a saved system prompt
  /prompt clear            send no system prompt
  /save [name]             save this chat (default: chat_<timestamp>)
  /load <name>             load a saved chat
  /history                 list saved chats
  /rename <name>           rename the saved copy of this chat
  /url <base-url>          point at another Ollama server
  /status                  check the connection";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptAction {
    List,
    Save(String),
    Use(String),
    Delete(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Help,
    Quit,
    New,
    Cancel,
    Models,
    Model(String),
    Params,
    Set {
        name: String,
        value: String,
    },
    System(Option<String>),
    Prompt(PromptAction),
    Save(Option<String>),
    Load(String),
    History,
    Rename(String),
    Url(String),
    Status,
}

/// Parses one input line. Blank lines parse to `None`; anything not starting
/// with `/` is a message.
pub fn parse_command(line: &str) -> Result<Option<Command>, ChatError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let Some(body) = trimmed.strip_prefix('/') else {
        return Ok(Some(Command::Send(trimmed.to_string())));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    let arg = || -> Option<String> {
        if rest.is_empty() { None } else { Some(rest.to_string()) }
    };
    let required = |usage: &str| -> Result<String, ChatError> {
        arg().ok_or_else(|| ChatError::Validation(format!("usage: {}", usage)))
    };

    let command = match name.to_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        "new" | "clear" => Command::New,
        "cancel" | "stop" => Command::Cancel,
        "models" => Command::Models,
        "model" => Command::Model(required("/model <name>")?),
        "params" | "parameters" => Command::Params,
        "set" => {
            let usage = "/set <param> <value>";
            let (param, value) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| ChatError::Validation(format!("usage: {}", usage)))?;
            Command::Set {
                name: param.to_string(),
                value: value.trim().to_string(),
            }
        }
        "system" => Command::System(arg()),
        "prompt" | "prompts" => Command::Prompt(parse_prompt_action(rest)?),
        "save" => Command::Save(arg()),
        "load" | "open" => Command::Load(required("/load <name>")?),
        "history" => Command::History,
        "rename" => Command::Rename(required("/rename <name>")?),
        "url" => Command::Url(required("/url <base-url>")?),
        "status" => Command::Status,
        other => {
            return Err(ChatError::Validation(format!("unknown command '/{}'; try /help", other)));
        }
    };
    Ok(Some(command))
}

fn parse_prompt_action(rest: &str) -> Result<PromptAction, ChatError> {
    let (action, name) = match rest.split_once(char::is_whitespace) {
        Some((action, name)) => (action, name.trim()),
        None => (rest, ""),
    };
    let named = |usage: &str| -> Result<String, ChatError> {
        if name.is_empty() {
            Err(ChatError::Validation(format!("usage: {}", usage)))
        } else {
            Ok(name.to_string())
        }
    };
    match action.to_lowercase().as_str() {
        "" | "list" => Ok(PromptAction::List),
        "save" => Ok(PromptAction::Save(named("/prompt save <name>")?)),
        "use" => Ok(PromptAction::Use(named("/prompt use <name>")?)),
        "delete" | "remove" => Ok(PromptAction::Delete(named("/prompt delete <name>")?)),
        "clear" => Ok(PromptAction::Clear),
        other => Err(ChatError::Validation(format!("unknown /prompt action '{}'", other))),
    }
}
