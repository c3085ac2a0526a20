use economy::{
    casino::ChatKind,
    user::UserId,
};
use serde::{
    Deserialize,
    Serialize,
};

const CAPTCHA_CALLBACK_PREFIX: &str = "captcha:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl Sender {
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.first_name.clone().filter(|name| !name.is_empty()))
            .unwrap_or_else(|| format!("User ID: {}", self.id))
    }
}

/// One inbound chat update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    Roll {
        chat: Chat,
        from: Sender,
        message_id: i64,
        value: u8,
        #[serde(default)]
        forwarded: bool,
    },
    Command {
        chat: Chat,
        from: Sender,
        message_id: i64,
        text: String,
    },
    Callback {
        chat: Chat,
        from: Sender,
        message_id: i64,
        data: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Balance,
    Top { full: bool },
    Codegen,
    Redeem { code: Option<String> },
    Unknown(String),
}

impl Command {
    /// Parse `/name[@bot] args..`. Returns `None` for plain text.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let head = words.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        let command = match name {
            "start" | "help" => Command::Help,
            "balance" => Command::Balance,
            "top" => Command::Top {
                full: words.next() == Some("full"),
            },
            "codegen" => Command::Codegen,
            "redeem" => Command::Redeem {
                code: words.next().map(str::to_string),
            },
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}

pub fn captcha_callback(index: usize) -> String {
    format!("{CAPTCHA_CALLBACK_PREFIX}{index}")
}

pub fn parse_captcha_callback(data: &str) -> Option<usize> {
    data.strip_prefix(CAPTCHA_CALLBACK_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn parse__recognizes_commands_with_arguments() {
        assert_eq!(Command::parse("/balance"), Some(Command::Balance));
        assert_eq!(
            Command::parse("/top full"),
            Some(Command::Top { full: true })
        );
        assert_eq!(Command::parse("/top"), Some(Command::Top { full: false }));
        assert_eq!(
            Command::parse("/redeem  abc "),
            Some(Command::Redeem {
                code: Some("abc".to_string())
            })
        );
    }

    #[test]
    fn parse__strips_the_bot_mention() {
        assert_eq!(
            Command::parse("/redeem@dice_bot"),
            Some(Command::Redeem { code: None })
        );
    }

    #[test]
    fn parse__plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn captcha_callback__parses_back_to_the_index() {
        assert_eq!(parse_captcha_callback(&captcha_callback(4)), Some(4));
        assert_eq!(parse_captcha_callback("vote:1"), None);
    }

    #[test]
    fn display_name__falls_back_to_the_user_id() {
        let sender = Sender {
            id: UserId(12),
            username: None,
            first_name: Some(String::new()),
        };
        assert_eq!(sender.display_name(), "User ID: 12");
    }

    #[test]
    fn intent__deserializes_from_a_json_line() {
        // given
        let line = r#"{"kind":"roll","chat":{"id":-5,"kind":"group"},"from":{"id":7,"username":"eve"},"message_id":3,"value":64}"#;

        // when
        let intent: Intent = serde_json::from_str(line).unwrap();

        // then
        let Intent::Roll {
            chat,
            value,
            forwarded,
            ..
        } = intent
        else {
            panic!("expected a roll");
        };
        assert_eq!(chat.kind, ChatKind::Group);
        assert_eq!(value, 64);
        assert!(!forwarded);
    }
}
