//! Minimal IRC message parsing.
//!
//! Parsing is a pure function of one wire line. A line that does not have
//! the shape `[@tags] [:prefix] COMMAND [params...]` yields `None`, which
//! the reader treats as a protocol violation.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Commands the client reacts to. Anything else is [`Command::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Join,
    Part,
    Quit,
    Nick,
    Kick,
    Mode,
    Topic,
    /// RPL_WELCOME (001): registration succeeded.
    Welcome,
    /// RPL_TOPIC (332)
    TopicReply,
    /// RPL_NAMREPLY (353)
    NamesReply,
    /// RPL_ENDOFNAMES (366)
    EndOfNames,
    /// ERR_NICKNAMEINUSE (433)
    NicknameInUse,
    Other,
}

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse one line. Trailing CR/LF is ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw, tail) = stripped.split_once(' ')?;
            tags = parse_tags(raw);
            rest = tail.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (raw, tail) = stripped.split_once(' ')?;
            if raw.is_empty() {
                return None;
            }
            prefix = Some(raw.to_string());
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((cmd, tail)) => (cmd, tail),
            None => (rest, ""),
        };
        if !is_command(command) {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_string());
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick part of the prefix (`nick!user@host` → `nick`).
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|p| p.split(['!', '@']).next())
            .filter(|n| !n.is_empty())
    }

    pub fn last_param(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or("")
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn kind(&self) -> Command {
        match self.command.as_str() {
            "PING" => Command::Ping,
            "JOIN" => Command::Join,
            "PART" => Command::Part,
            "QUIT" => Command::Quit,
            "NICK" => Command::Nick,
            "KICK" => Command::Kick,
            "MODE" => Command::Mode,
            "TOPIC" => Command::Topic,
            "001" => Command::Welcome,
            "332" => Command::TopicReply,
            "353" => Command::NamesReply,
            "366" => Command::EndOfNames,
            "433" => Command::NicknameInUse,
            _ => Command::Other,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<_> = self.tags.keys().collect();
            keys.sort();
            f.write_str("@")?;
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                let value = &self.tags[key];
                if value.is_empty() {
                    write!(f, "{key}")?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        if let Some((last, init)) = self.params.split_last() {
            for param in init {
                write!(f, " {param}")?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{last}")?;
            } else {
                write!(f, " {last}")?;
            }
        }
        Ok(())
    }
}

fn is_command(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    let bytes = token.as_bytes();
    bytes.iter().all(u8::is_ascii_alphabetic)
        || (bytes.len() == 3 && bytes.iter().all(u8::is_ascii_digit))
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|t| !t.is_empty())
        .map(|tag| match tag.split_once('=') {
            Some((key, value)) => (key.to_string(), unescape_tag_value(value)),
            None => (tag.to_string(), String::new()),
        })
        .collect()
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_command_and_trailing() {
        let msg = Message::parse(":nick!user@host PRIVMSG #chan :hello there\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.nick(), Some("nick"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "hello there"]);
        assert_eq!(msg.last_param(), "hello there");
    }

    #[test]
    fn parses_tags() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z;msgid=a\\sb;+typing :srv NOTICE * :hi").unwrap();
        assert_eq!(msg.tags["time"], "2024-01-01T00:00:00Z");
        assert_eq!(msg.tags["msgid"], "a b");
        assert_eq!(msg.tags["+typing"], "");
        assert_eq!(msg.command, "NOTICE");
    }

    #[test]
    fn numeric_and_known_commands() {
        assert_eq!(Message::parse(":srv 001 bob :Welcome").unwrap().kind(), Command::Welcome);
        assert_eq!(Message::parse("PING :token").unwrap().kind(), Command::Ping);
        assert_eq!(Message::parse("ping token").unwrap().kind(), Command::Ping);
        assert_eq!(Message::parse(":srv 433 * bob :in use").unwrap().kind(), Command::NicknameInUse);
        assert_eq!(Message::parse(":a!b@c PRIVMSG x :y").unwrap().kind(), Command::Other);
    }

    #[test]
    fn server_prefix_has_nick_but_empty_prefix_is_invalid() {
        let msg = Message::parse(":irc.example.net NOTICE * :x").unwrap();
        assert_eq!(msg.nick(), Some("irc.example.net"));
        assert!(Message::parse(": NOTICE * :x").is_none());
    }

    #[test]
    fn rejects_non_irc_lines() {
        assert!(Message::parse("HTTP/1.1 400 Bad Request\r\n").is_none());
        assert!(Message::parse("SSH-2.0-OpenSSH_9.0").is_none());
        assert!(Message::parse(":prefix-without-command").is_none());
        assert!(Message::parse("@tags-only").is_none());
        assert!(Message::parse("\r\n").is_none());
        assert!(Message::parse("0001 too many digits").is_none());
    }

    #[test]
    fn middle_params_without_trailing() {
        let msg = Message::parse(":op!u@h MODE #chan +ov alice bob").unwrap();
        assert_eq!(msg.params, vec!["#chan", "+ov", "alice", "bob"]);
    }

    #[test]
    fn display_reserializes() {
        let msg = Message::parse(":nick!u@h PRIVMSG #chan :hello world").unwrap();
        assert_eq!(msg.to_string(), ":nick!u@h PRIVMSG #chan :hello world");
        let msg = Message::parse("JOIN #chan").unwrap();
        assert_eq!(msg.to_string(), "JOIN #chan");
    }
}
