//! Interactive chat input parsing

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

/// One line of chat input
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Plain text sent as a message
    Message(String),
    /// `/action <id> [json]`
    Action { action_id: String, data: Option<Value> },
    /// `/meta <json>`
    Metadata(Value),
    /// `/transcript`
    Transcript,
    /// `/id`
    ShowId,
    /// `/help`
    Help,
    /// `/quit` or `/exit`
    Quit,
    /// Blank line
    Empty,
}

pub const HELP: &str = "\
Commands:
  /action <id> [json]  send a custom action
  /meta <json>         set conversation metadata
  /transcript          print the transcript
  /id                  print the conversation id
  /help                show this help
  /quit                leave the chat
Anything else is sent as a message.";

/// Parse one input line
pub fn parse_line(line: &str) -> Result<ChatCommand> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ChatCommand::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ChatCommand::Message(line.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "action" => {
            let (action_id, data) = match args.split_once(char::is_whitespace) {
                Some((id, json)) => (id, Some(parse_json(json)?)),
                None => (args, None),
            };
            if action_id.is_empty() {
                bail!("usage: /action <id> [json]");
            }
            Ok(ChatCommand::Action {
                action_id: action_id.to_string(),
                data,
            })
        }
        "meta" => {
            if args.is_empty() {
                bail!("usage: /meta <json>");
            }
            Ok(ChatCommand::Metadata(parse_json(args)?))
        }
        "transcript" => Ok(ChatCommand::Transcript),
        "id" => Ok(ChatCommand::ShowId),
        "help" => Ok(ChatCommand::Help),
        "quit" | "exit" => Ok(ChatCommand::Quit),
        other => bail!("unknown command /{} (try /help)", other),
    }
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw.trim()).map_err(|e| anyhow!("invalid JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_message() {
        assert_eq!(
            parse_line("  hello there ").unwrap(),
            ChatCommand::Message("hello there".to_string())
        );
        assert_eq!(parse_line("   ").unwrap(), ChatCommand::Empty);
    }

    #[test]
    fn test_action_with_and_without_data() {
        assert_eq!(
            parse_line("/action open_ticket {\"priority\": 2}").unwrap(),
            ChatCommand::Action {
                action_id: "open_ticket".to_string(),
                data: Some(json!({"priority": 2})),
            }
        );
        assert_eq!(
            parse_line("/action ping").unwrap(),
            ChatCommand::Action {
                action_id: "ping".to_string(),
                data: None,
            }
        );
        assert!(parse_line("/action").is_err());
        assert!(parse_line("/action ping {broken").is_err());
    }

    #[test]
    fn test_meta_requires_json() {
        assert_eq!(
            parse_line("/meta {\"locale\":\"en\"}").unwrap(),
            ChatCommand::Metadata(json!({"locale": "en"}))
        );
        assert!(parse_line("/meta").is_err());
        assert!(parse_line("/meta locale=en").is_err());
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_line("/transcript").unwrap(), ChatCommand::Transcript);
        assert_eq!(parse_line("/id").unwrap(), ChatCommand::ShowId);
        assert_eq!(parse_line("/help").unwrap(), ChatCommand::Help);
        assert_eq!(parse_line("/quit").unwrap(), ChatCommand::Quit);
        assert_eq!(parse_line("/exit").unwrap(), ChatCommand::Quit);
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_line("/dance").unwrap_err();
        assert!(err.to_string().contains("unknown command /dance"));
    }
}
