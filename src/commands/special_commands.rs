//! Special commands parser for interactive chat mode
//!
//! This module parses the commands that can be entered during an
//! interactive chat session instead of a question. Special commands allow
//! users to:
//! - Start a new conversation or switch to a stored one
//! - List stored conversations
//! - See who is present in the room and post to it
//! - Display help information
//! - Exit the session
//!
//! Commands are prefixed with `/` and are case-insensitive. Arguments keep
//! their original case.

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

    /// Command takes no argument but one was given
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new conversation, optionally titled
    New(Option<String>),

    /// Switch to a stored conversation by id or id prefix
    Switch(String),

    /// List stored conversations
    History,

    /// Show the participants present in the room
    Who,

    /// Post a message to the room
    Say(String),

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command
    ///
    /// The input should be submitted as a question.
    None,
}

fn split_command(input: &str) -> (String, &str) {
    match input.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_lowercase(), rest.trim()),
        None => (input.to_lowercase(), ""),
    }
}

fn no_argument(command: &str, arg: &str, cmd: SpecialCommand) -> Result<SpecialCommand, CommandError> {
    if arg.is_empty() {
        Ok(cmd)
    } else {
        Err(CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: arg.to_string(),
        })
    }
}

/// Parse user input into a special command
///
/// # Arguments
///
/// * `input` - The raw line entered by the user
///
/// # Returns
///
/// Returns `SpecialCommand::None` if the input should be sent as a question
///
/// # Errors
///
/// Returns `CommandError` for unknown commands or bad arguments
///
/// # Examples
///
/// ```
/// use notestream::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/help").unwrap(), SpecialCommand::Help);
/// assert_eq!(
///     parse_special_command("/switch 1a2b3c4d").unwrap(),
///     SpecialCommand::Switch("1a2b3c4d".to_string())
/// );
/// assert_eq!(
///     parse_special_command("What is osmosis?").unwrap(),
///     SpecialCommand::None
/// );
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') {
        return Ok(match lower.as_str() {
            "exit" | "quit" => SpecialCommand::Exit,
            _ => SpecialCommand::None,
        });
    }

    let (command, arg) = split_command(trimmed);
    match command.as_str() {
        "/new" => Ok(SpecialCommand::New(
            (!arg.is_empty()).then(|| arg.to_string()),
        )),
        "/switch" | "/resume" => {
            if arg.is_empty() {
                Err(CommandError::MissingArgument {
                    command,
                    usage: "/switch <conversation_id>".to_string(),
                })
            } else {
                Ok(SpecialCommand::Switch(arg.to_string()))
            }
        }
        "/say" => {
            if arg.is_empty() {
                Err(CommandError::MissingArgument {
                    command,
                    usage: "/say <message>".to_string(),
                })
            } else {
                Ok(SpecialCommand::Say(arg.to_string()))
            }
        }
        "/history" => no_argument(&command, arg, SpecialCommand::History),
        "/who" => no_argument(&command, arg, SpecialCommand::Who),
        "/help" | "/?" => no_argument(&command, arg, SpecialCommand::Help),
        "/exit" | "/quit" => no_argument(&command, arg, SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Help text for the special commands
pub const HELP_TEXT: &str = r#"
Special Commands for Interactive Chat Mode
===========================================

CONVERSATIONS:
  /new [title]    - Start a new conversation
  /switch <id>    - Switch to a stored conversation (full id or prefix)
  /resume <id>    - Same as /switch
  /history        - List stored conversations

ROOM (in-process only; other notestream processes do not share it):
  /who            - Show who is present in the room
  /say <message>  - Post a message to the room

SESSION:
  /help, /?       - Show this help
  /exit, /quit    - Leave the chat (also: exit, quit, Ctrl-D)

While an answer is streaming, Ctrl-C cancels it and keeps the partial text.
"#;

/// Print help for the special commands
pub fn print_help() {
    println!("{}", HELP_TEXT);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_says_room_is_local() {
        assert!(HELP_TEXT.contains("/who"));
        assert!(HELP_TEXT.contains("in-process only"));
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(
            parse_special_command("summarize chapter 3").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_bare_exit_words() {
        assert_eq!(parse_special_command("exit").unwrap(), SpecialCommand::Exit);
        assert_eq!(parse_special_command("QUIT").unwrap(), SpecialCommand::Exit);
        assert_eq!(parse_special_command("/exit").unwrap(), SpecialCommand::Exit);
    }

    #[test]
    fn test_new_with_and_without_title() {
        assert_eq!(
            parse_special_command("/new").unwrap(),
            SpecialCommand::New(None)
        );
        assert_eq!(
            parse_special_command("/NEW Biology Notes").unwrap(),
            SpecialCommand::New(Some("Biology Notes".to_string()))
        );
    }

    #[test]
    fn test_switch_keeps_argument_case() {
        assert_eq!(
            parse_special_command("/Switch AbCd1234").unwrap(),
            SpecialCommand::Switch("AbCd1234".to_string())
        );
        assert_eq!(
            parse_special_command("/resume abcd").unwrap(),
            SpecialCommand::Switch("abcd".to_string())
        );
    }

    #[test]
    fn test_switch_requires_argument() {
        let err = parse_special_command("/switch").unwrap_err();
        assert!(matches!(err, CommandError::MissingArgument { .. }));
    }

    #[test]
    fn test_say_requires_argument() {
        assert!(matches!(
            parse_special_command("/say   ").unwrap_err(),
            CommandError::MissingArgument { .. }
        ));
        assert_eq!(
            parse_special_command("/say hello room").unwrap(),
            SpecialCommand::Say("hello room".to_string())
        );
    }

    #[test]
    fn test_history_rejects_argument() {
        assert_eq!(
            parse_special_command("/history extra").unwrap_err(),
            CommandError::UnsupportedArgument {
                command: "/history".to_string(),
                arg: "extra".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_special_command("/models").unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("/models".to_string()));
        assert!(err.to_string().contains("/help"));
    }
}
