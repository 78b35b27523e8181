//! Classifies inbound chat text into commands, freeform chat, or nothing.
//!
//! Command spelling follows the Telegram convention (`/name args`, optionally
//! `/name@botname args`).

use crate::types::BackendKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAction {
    /// Optional model profile name (text backend only).
    Start(Option<String>),
    Stop,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileAction {
    Set(String),
    Show,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// Direct chat invocation; also starts or resets listen mode.
    Chat(String),
    ListenReset,
    ListenStop,
    ClearHistory,
    Generate(String),
    SetResolution(String),
    Backend {
        kind: BackendKind,
        action: BackendAction,
    },
    Profile(ProfileAction),
    Stats,
    Say(String),
    Caption,
    Search(String),
    Summarize(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    /// A bare mention or a reply to the bot. Answered only while listen mode is on.
    Mention(String),
    /// A known command with missing or bad arguments; carries the command name.
    Usage(&'static str),
    Ignored,
}

pub struct InboundContext<'a> {
    pub bot_username: &'a str,
    pub reply_to_bot: bool,
    pub has_image: bool,
}

/// Splits `/cmd@bot rest` into (`cmd`, `rest`). `None` for text that is not a
/// command, or is addressed to a different bot.
fn split_command<'a>(text: &'a str, bot_username: &str) -> Option<(String, &'a str)> {
    let body = text.strip_prefix('/')?;
    let (head, rest) = match body.find(char::is_whitespace) {
        Some(idx) => (&body[..idx], body[idx..].trim()),
        None => (body, ""),
    };
    let name = match head.split_once('@') {
        Some((name, target)) => {
            if !bot_username.is_empty() && !target.eq_ignore_ascii_case(bot_username) {
                return None;
            }
            name
        }
        None => head,
    };
    if name.is_empty() {
        return None;
    }
    Some((name.to_ascii_lowercase(), rest))
}

fn non_empty(rest: &str, usage: &'static str, build: impl FnOnce(String) -> Command) -> Inbound {
    if rest.is_empty() {
        Inbound::Usage(usage)
    } else {
        Inbound::Command(build(rest.to_string()))
    }
}

fn backend(kind: BackendKind, rest: &str, usage: &'static str) -> Inbound {
    let mut words = rest.split_whitespace();
    let action = match words.next().map(str::to_ascii_lowercase).as_deref() {
        Some("start") => {
            let profile = words.next().map(str::to_string);
            if profile.is_some() && kind == BackendKind::Image {
                return Inbound::Usage(usage);
            }
            BackendAction::Start(profile)
        }
        Some("stop") => BackendAction::Stop,
        Some("status") | None => BackendAction::Status,
        Some(_) => return Inbound::Usage(usage),
    };
    Inbound::Command(Command::Backend { kind, action })
}

fn profile(rest: &str) -> Inbound {
    let (verb, tail) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };
    let action = match verb.to_ascii_lowercase().as_str() {
        "set" if !tail.is_empty() => ProfileAction::Set(tail.to_string()),
        "show" | "" => ProfileAction::Show,
        "delete" | "clear" => ProfileAction::Delete,
        _ => return Inbound::Usage("profile"),
    };
    Inbound::Command(Command::Profile(action))
}

fn strip_mention(text: &str, bot_username: &str) -> Option<String> {
    if bot_username.is_empty() {
        return None;
    }
    let needle = format!("@{}", bot_username.to_ascii_lowercase());
    let lower = text.to_ascii_lowercase();
    let at = lower.find(&needle)?;
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..at]);
    out.push_str(&text[at + needle.len()..]);
    Some(out.split_whitespace().collect::<Vec<_>>().join(" "))
}

pub fn classify(text: &str, ctx: &InboundContext<'_>) -> Inbound {
    let text = text.trim();
    if text.starts_with('/') {
        let Some((name, rest)) = split_command(text, ctx.bot_username) else {
            return Inbound::Ignored;
        };
        return match name.as_str() {
            "start" => Inbound::Command(Command::Start),
            "help" => Inbound::Command(Command::Help),
            "chat" => non_empty(rest, "chat", Command::Chat),
            "listen" => match rest.to_ascii_lowercase().as_str() {
                "reset" => Inbound::Command(Command::ListenReset),
                "stop" | "off" => Inbound::Command(Command::ListenStop),
                _ => Inbound::Usage("listen"),
            },
            "reset" => Inbound::Command(Command::ListenReset),
            "stop" => Inbound::Command(Command::ListenStop),
            "clear" => Inbound::Command(Command::ClearHistory),
            "imagine" | "generate" => non_empty(rest, "imagine", Command::Generate),
            "res" => non_empty(rest, "res", Command::SetResolution),
            "forge" => backend(BackendKind::Image, rest, "forge"),
            "kobold" => backend(BackendKind::Text, rest, "kobold"),
            "profile" => profile(rest),
            "stats" => Inbound::Command(Command::Stats),
            "say" => non_empty(rest, "say", Command::Say),
            "caption" => {
                if ctx.has_image {
                    Inbound::Command(Command::Caption)
                } else {
                    Inbound::Usage("caption")
                }
            }
            "search" => non_empty(rest, "search", Command::Search),
            "summarize" => match rest.split_whitespace().next() {
                Some(url) => Inbound::Command(Command::Summarize(url.to_string())),
                None => Inbound::Usage("summarize"),
            },
            _ => Inbound::Ignored,
        };
    }

    if let Some(stripped) = strip_mention(text, ctx.bot_username) {
        if stripped.is_empty() {
            return Inbound::Ignored;
        }
        return Inbound::Mention(stripped);
    }
    if ctx.reply_to_bot && !text.is_empty() {
        return Inbound::Mention(text.to_string());
    }
    Inbound::Ignored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> InboundContext<'static> {
        InboundContext {
            bot_username: "AtelierBot",
            reply_to_bot: false,
            has_image: false,
        }
    }

    #[test]
    fn chat_command_with_and_without_bot_suffix() {
        assert_eq!(
            classify("/chat hello there", &ctx()),
            Inbound::Command(Command::Chat("hello there".to_string()))
        );
        assert_eq!(
            classify("/chat@atelierbot  hi", &ctx()),
            Inbound::Command(Command::Chat("hi".to_string()))
        );
        assert_eq!(classify("/chat@OtherBot hi", &ctx()), Inbound::Ignored);
        assert_eq!(classify("/chat", &ctx()), Inbound::Usage("chat"));
    }

    #[test]
    fn listen_directives() {
        assert_eq!(classify("/reset", &ctx()), Inbound::Command(Command::ListenReset));
        assert_eq!(classify("/listen reset", &ctx()), Inbound::Command(Command::ListenReset));
        assert_eq!(classify("/listen off", &ctx()), Inbound::Command(Command::ListenStop));
        assert_eq!(classify("/stop", &ctx()), Inbound::Command(Command::ListenStop));
        assert_eq!(classify("/clear", &ctx()), Inbound::Command(Command::ClearHistory));
        assert_eq!(classify("/listen", &ctx()), Inbound::Usage("listen"));
    }

    #[test]
    fn backend_control() {
        assert_eq!(
            classify("/kobold start mistral", &ctx()),
            Inbound::Command(Command::Backend {
                kind: BackendKind::Text,
                action: BackendAction::Start(Some("mistral".to_string())),
            })
        );
        assert_eq!(
            classify("/forge", &ctx()),
            Inbound::Command(Command::Backend {
                kind: BackendKind::Image,
                action: BackendAction::Status,
            })
        );
        assert_eq!(classify("/forge start sdxl", &ctx()), Inbound::Usage("forge"));
        assert_eq!(classify("/kobold restart", &ctx()), Inbound::Usage("kobold"));
    }

    #[test]
    fn profile_subcommands() {
        assert_eq!(
            classify("/profile set I paint  landscapes", &ctx()),
            Inbound::Command(Command::Profile(ProfileAction::Set("I paint  landscapes".to_string())))
        );
        assert_eq!(classify("/profile", &ctx()), Inbound::Command(Command::Profile(ProfileAction::Show)));
        assert_eq!(
            classify("/profile delete", &ctx()),
            Inbound::Command(Command::Profile(ProfileAction::Delete))
        );
        assert_eq!(classify("/profile set", &ctx()), Inbound::Usage("profile"));
    }

    #[test]
    fn mentions_and_replies() {
        assert_eq!(
            classify("hey @atelierbot what's up", &ctx()),
            Inbound::Mention("hey what's up".to_string())
        );
        assert_eq!(classify("just chatting", &ctx()), Inbound::Ignored);
        assert_eq!(classify("@AtelierBot", &ctx()), Inbound::Ignored);

        let reply = InboundContext {
            reply_to_bot: true,
            ..ctx()
        };
        assert_eq!(classify("and then?", &reply), Inbound::Mention("and then?".to_string()));
    }

    #[test]
    fn caption_needs_an_image() {
        assert_eq!(classify("/caption", &ctx()), Inbound::Usage("caption"));
        let with_image = InboundContext {
            has_image: true,
            ..ctx()
        };
        assert_eq!(classify("/caption", &with_image), Inbound::Command(Command::Caption));
    }

    #[test]
    fn unknown_commands_are_ignored() {
        assert_eq!(classify("/dance", &ctx()), Inbound::Ignored);
        assert_eq!(classify("/", &ctx()), Inbound::Ignored);
    }
}
