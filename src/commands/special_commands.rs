//! Special commands parser for interactive chat mode
//!
//! Special commands manage the session instead of being sent to the model:
//! - Start a new conversation or delete the current one
//! - List sessions and show the current transcript
//! - Switch provider or model for subsequent turns
//! - Display help information
//! - Exit the session
//!
//! Commands are prefixed with `/` and are case-insensitive; `exit` and
//! `quit` also work without the slash.

use colored::Colorize;
use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a fresh conversation on the next message
    New,

    /// List stored sessions
    Sessions,

    /// Show the current conversation's transcript
    History,

    /// Delete the current conversation
    Delete,

    /// Use a different provider for subsequent turns
    SwitchProvider(String),

    /// Use a different model for subsequent turns
    SwitchModel(String),

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the input to the model
    None,
}

/// Parse a line of chat input
///
/// # Errors
///
/// Returns `CommandError` for an unknown `/command` or a missing argument
///
/// # Examples
///
/// ```
/// use parley::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/new").unwrap(), SpecialCommand::New);
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    // Arguments keep their original case (model names)
    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => {
            let rest = rest.trim();
            (command.to_lowercase(), (!rest.is_empty()).then_some(rest))
        }
        None => (lower.clone(), None),
    };

    match (command.as_str(), arg) {
        ("/new" | "/clear", _) => Ok(SpecialCommand::New),
        ("/sessions", _) => Ok(SpecialCommand::Sessions),
        ("/history", _) => Ok(SpecialCommand::History),
        ("/delete", _) => Ok(SpecialCommand::Delete),
        ("/help" | "/?", _) => Ok(SpecialCommand::Help),
        ("/exit" | "/quit" | "exit" | "quit", _) => Ok(SpecialCommand::Exit),

        ("/provider", Some(name)) => Ok(SpecialCommand::SwitchProvider(name.to_string())),
        ("/provider", None) => Err(CommandError::MissingArgument {
            command: "/provider".to_string(),
            usage: "/provider <google|openai|anthropic|groq|openrouter>".to_string(),
        }),

        ("/model", Some(name)) => Ok(SpecialCommand::SwitchModel(name.to_string())),
        ("/model", None) => Err(CommandError::MissingArgument {
            command: "/model".to_string(),
            usage: "/model <name>".to_string(),
        }),

        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Display help for the special commands
pub fn print_help() {
    println!(
        r#"
{}
===========================================

CONVERSATION:
  /new            - Start a new conversation
  /sessions       - List stored conversations
  /history        - Show the current conversation
  /delete         - Delete the current conversation

PROVIDER:
  /provider <name> - Switch provider (google, openai, anthropic, groq, openrouter)
  /model <name>    - Switch model

OTHER:
  /help           - Show this help
  exit, quit      - Leave the chat

Anything else is sent to the model.
"#,
        "Special Commands for Interactive Chat".bold()
    );
}
