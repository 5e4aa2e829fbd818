//! Classification of inbound chat text into commands, links, or noise.

/// Where a message was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

/// Commands answered with a text reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Ping,
    About,
    Terms,
    /// Payment info, or redemption of a payment token
    Vip(Option<String>),
}

impl BotCommand {
    fn parse(name: &str, args: &str) -> Option<Self> {
        let command = match name.to_ascii_lowercase().as_str() {
            "start" => BotCommand::Start,
            "help" => BotCommand::Help,
            "ping" => BotCommand::Ping,
            "about" => BotCommand::About,
            "terms" => BotCommand::Terms,
            "vip" => BotCommand::Vip(Some(args.trim()).filter(|t| !t.is_empty()).map(String::from)),
            _ => return None,
        };
        Some(command)
    }
}

/// What an inbound message asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Command(BotCommand),
    /// A link sent without the invocation prefix (private chats only)
    BareUrl(String),
    /// A link following the invocation prefix
    PrefixedUrl(String),
    /// An explicit attempt to use the bot without a usable link
    InvalidInput(String),
    /// Chatter not addressed to the bot
    Ignore,
}

pub struct RequestValidator {
    prefix: String,
}

impl RequestValidator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn classify(&self, raw_text: &str, chat_kind: ChatKind) -> Classification {
        let text = raw_text.trim();

        if let Some(command) = parse_command(text) {
            return Classification::Command(command);
        }

        let (payload, prefixed) = match self.strip_prefix(text) {
            Some(rest) => (rest.trim(), true),
            None if chat_kind == ChatKind::Group => return Classification::Ignore,
            None => (text, false),
        };

        if !is_http_url(payload) {
            return Classification::InvalidInput(payload.to_string());
        }

        if prefixed {
            Classification::PrefixedUrl(payload.to_string())
        } else {
            Classification::BareUrl(payload.to_string())
        }
    }

    fn strip_prefix<'a>(&self, text: &'a str) -> Option<&'a str> {
        let head = text.get(..self.prefix.len())?;
        if head.eq_ignore_ascii_case(&self.prefix) {
            Some(&text[self.prefix.len()..])
        } else {
            None
        }
    }
}

/// `/name[@bot] [args]` for one of the known commands
fn parse_command(text: &str) -> Option<BotCommand> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    BotCommand::parse(name, args)
}

fn is_http_url(text: &str) -> bool {
    let lowered = text.get(..8).unwrap_or(text).to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> RequestValidator {
        RequestValidator::new("/ytdl")
    }

    #[test]
    fn test_group_chatter_is_ignored() {
        assert_eq!(validator().classify("hello", ChatKind::Group), Classification::Ignore);
        assert_eq!(
            validator().classify("https://example.com/v", ChatKind::Group),
            Classification::Ignore
        );
    }

    #[test]
    fn test_prefixed_non_url_is_invalid() {
        assert_eq!(
            validator().classify("/ytdl hello", ChatKind::Group),
            Classification::InvalidInput("hello".into())
        );
    }

    #[test]
    fn test_prefixed_url() {
        for kind in [ChatKind::Group, ChatKind::Private] {
            assert_eq!(
                validator().classify("/ytdl http://x.com/a", kind),
                Classification::PrefixedUrl("http://x.com/a".into())
            );
        }
        assert_eq!(
            validator().classify("  /YTDL   HTTPS://x.com/b  ", ChatKind::Group),
            Classification::PrefixedUrl("HTTPS://x.com/b".into())
        );
        assert_eq!(
            validator().classify("/ytdlhttps://x.com/c", ChatKind::Private),
            Classification::PrefixedUrl("https://x.com/c".into())
        );
    }

    #[test]
    fn test_private_prefix_is_optional() {
        assert_eq!(
            validator().classify("https://youtu.be/abc", ChatKind::Private),
            Classification::BareUrl("https://youtu.be/abc".into())
        );
        assert_eq!(
            validator().classify("just words", ChatKind::Private),
            Classification::InvalidInput("just words".into())
        );
    }

    #[test]
    fn test_non_http_schemes_are_invalid() {
        assert!(matches!(
            validator().classify("ftp://x.com/a", ChatKind::Private),
            Classification::InvalidInput(_)
        ));
        assert!(matches!(
            validator().classify("/ytdl", ChatKind::Group),
            Classification::InvalidInput(_)
        ));
    }

    #[test]
    fn test_commands() {
        let v = validator();
        assert_eq!(v.classify("/start", ChatKind::Group), Classification::Command(BotCommand::Start));
        assert_eq!(v.classify("/help@ytdl_bot", ChatKind::Group), Classification::Command(BotCommand::Help));
        assert_eq!(v.classify("/ping", ChatKind::Private), Classification::Command(BotCommand::Ping));
        assert_eq!(v.classify("/vip", ChatKind::Private), Classification::Command(BotCommand::Vip(None)));
        assert_eq!(
            v.classify("/vip  order-42 ", ChatKind::Private),
            Classification::Command(BotCommand::Vip(Some("order-42".into())))
        );
    }

    #[test]
    fn test_unknown_command_is_not_a_command() {
        assert_eq!(validator().classify("/unknown", ChatKind::Group), Classification::Ignore);
        assert!(matches!(
            validator().classify("/unknown", ChatKind::Private),
            Classification::InvalidInput(_)
        ));
    }
}
