use thiserror::Error;

use crewdesk_core::domain::application::ApplicationId;

/// Everything an actor can ask the bot to do, decoded at the transport
/// boundary. Action buttons round-trip these as `verb:id` strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    StartIntake,
    CancelIntake,
    ShowHelp,
    ListPending,
    Accept(ApplicationId),
    Release(ApplicationId),
    Close(ApplicationId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unknown action verb: {0}")]
    UnknownVerb(String),
    #[error("malformed action data: {0}")]
    Malformed(String),
}

/// Encodes the action payload carried by an inline button.
pub fn encode_action(command: ChatCommand) -> Option<String> {
    match command {
        ChatCommand::Accept(id) => Some(format!("accept:{id}")),
        ChatCommand::Release(id) => Some(format!("release:{id}")),
        ChatCommand::Close(id) => Some(format!("close:{id}")),
        _ => None,
    }
}

/// Decodes button callback data. Malformed payloads never reach the
/// service layer.
pub fn parse_action(data: &str) -> Result<ChatCommand, CommandParseError> {
    let Some((verb, id_raw)) = data.split_once(':') else {
        return Err(CommandParseError::Malformed(data.to_string()));
    };

    let id = id_raw
        .parse::<i64>()
        .map_err(|_| CommandParseError::Malformed(data.to_string()))
        .map(ApplicationId)?;

    match verb {
        "accept" => Ok(ChatCommand::Accept(id)),
        "release" => Ok(ChatCommand::Release(id)),
        "close" => Ok(ChatCommand::Close(id)),
        other => Err(CommandParseError::UnknownVerb(other.to_string())),
    }
}

/// Recognizes the slash-style text commands an actor may type in a private
/// chat. Returns `None` for ordinary text, which belongs to the intake form.
pub fn parse_text_command(text: &str) -> Option<ChatCommand> {
    let trimmed = text.trim();
    let verb = trimmed.split_whitespace().next()?.to_ascii_lowercase();
    match verb.as_str() {
        "/new" | "/apply" => Some(ChatCommand::StartIntake),
        "/cancel" => Some(ChatCommand::CancelIntake),
        "/help" | "/start" => Some(ChatCommand::ShowHelp),
        "/pending" => Some(ChatCommand::ListPending),
        _ => None,
    }
}

/// `/start <token>` deep-link payload, if present.
pub fn parse_deep_link_token(text: &str) -> Option<&str> {
    let mut parts = text.trim().split_whitespace();
    if parts.next()? != "/start" {
        return None;
    }
    parts.next().filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use crewdesk_core::domain::application::ApplicationId;

    use super::{
        encode_action, parse_action, parse_deep_link_token, parse_text_command, ChatCommand,
        CommandParseError,
    };

    #[test]
    fn action_data_round_trips() {
        for command in [
            ChatCommand::Accept(ApplicationId(7)),
            ChatCommand::Release(ApplicationId(7)),
            ChatCommand::Close(ApplicationId(7)),
        ] {
            let encoded = encode_action(command).expect("encodable");
            assert_eq!(parse_action(&encoded), Ok(command));
        }
    }

    #[test]
    fn malformed_action_data_is_rejected() {
        assert_eq!(
            parse_action("accept"),
            Err(CommandParseError::Malformed("accept".to_string()))
        );
        assert_eq!(
            parse_action("accept:seven"),
            Err(CommandParseError::Malformed("accept:seven".to_string()))
        );
        assert_eq!(
            parse_action("promote:7"),
            Err(CommandParseError::UnknownVerb("promote".to_string()))
        );
    }

    #[test]
    fn text_commands_are_recognized_case_insensitively() {
        assert_eq!(parse_text_command("/new"), Some(ChatCommand::StartIntake));
        assert_eq!(parse_text_command("  /CANCEL  "), Some(ChatCommand::CancelIntake));
        assert_eq!(parse_text_command("/help"), Some(ChatCommand::ShowHelp));
        assert_eq!(parse_text_command("12 Elm St"), None);
    }

    #[test]
    fn deep_link_token_is_extracted_from_start() {
        assert_eq!(parse_deep_link_token("/start abc123"), Some("abc123"));
        assert_eq!(parse_deep_link_token("/start"), None);
        assert_eq!(parse_deep_link_token("/help abc123"), None);
    }
}
