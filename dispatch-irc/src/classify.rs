//! Decides what an inbound message means for the client.
//!
//! [`classify`] is a pure function: the reader applies the returned
//! [`Action`] to the roster and the connection before publishing the
//! message. Messages missing the parameters an action needs fall through to
//! [`Action::Passthrough`].

use crate::irc::{Command, Message};
use crate::roster::is_membership_mode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Answer a PING with this token.
    Pong(String),
    /// Registration succeeded under `nick`.
    Welcome { nick: String },
    /// The server rejected `nick` as already in use.
    NickInUse { nick: String },
    Joined { channel: String, nick: String, own: bool },
    /// PART, or the target of a KICK.
    Parted { channel: String, nick: String },
    Quit { nick: String },
    NickChanged { old: String, new: String, own: bool },
    Modes { channel: String, changes: Vec<ModeChange> },
    /// One chunk of a NAMES reply.
    Names { channel: String, nicks: Vec<String> },
    NamesEnd { channel: String },
    Topic { channel: String, topic: String },
    Passthrough,
}

/// Membership modes gained and lost by one user in one MODE line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeChange {
    pub nick: String,
    pub add: String,
    pub remove: String,
}

pub fn classify(msg: &Message, own_nick: &str) -> Action {
    let actor = msg.nick().unwrap_or("");
    match msg.kind() {
        Command::Ping => Action::Pong(msg.last_param().to_string()),

        Command::Welcome => match msg.param(0) {
            Some(nick) => Action::Welcome { nick: nick.to_string() },
            None => Action::Passthrough,
        },

        Command::NicknameInUse => match msg.param(1) {
            Some(nick) => Action::NickInUse { nick: nick.to_string() },
            None => Action::Passthrough,
        },

        Command::Join => match msg.param(0) {
            Some(channel) if !actor.is_empty() => Action::Joined {
                channel: channel.to_string(),
                nick: actor.to_string(),
                own: actor == own_nick,
            },
            _ => Action::Passthrough,
        },

        Command::Part => match msg.param(0) {
            Some(channel) if !actor.is_empty() => Action::Parted {
                channel: channel.to_string(),
                nick: actor.to_string(),
            },
            _ => Action::Passthrough,
        },

        Command::Kick => match (msg.param(0), msg.param(1)) {
            (Some(channel), Some(nick)) => Action::Parted {
                channel: channel.to_string(),
                nick: nick.to_string(),
            },
            _ => Action::Passthrough,
        },

        Command::Quit if !actor.is_empty() => Action::Quit {
            nick: actor.to_string(),
        },

        Command::Nick => {
            let new = msg.last_param();
            if actor.is_empty() || new.is_empty() {
                return Action::Passthrough;
            }
            Action::NickChanged {
                old: actor.to_string(),
                new: new.to_string(),
                own: actor == own_nick,
            }
        }

        Command::Mode => match (msg.param(0), msg.param(1)) {
            (Some(target), Some(modes)) if is_channel(target) => {
                let changes = parse_membership_modes(modes, &msg.params[2..]);
                if changes.is_empty() {
                    Action::Passthrough
                } else {
                    Action::Modes {
                        channel: target.to_string(),
                        changes,
                    }
                }
            }
            _ => Action::Passthrough,
        },

        // :srv 353 me = #chan :@alice +bob carol
        // Some servers omit the channel-type symbol.
        Command::NamesReply if msg.params.len() >= 3 => {
            let channel = &msg.params[msg.params.len() - 2];
            let nicks = msg
                .last_param()
                .split_whitespace()
                .map(|n| n.split('!').next().unwrap_or(n).to_string())
                .collect();
            Action::Names {
                channel: channel.clone(),
                nicks,
            }
        }

        Command::EndOfNames => match msg.param(1) {
            Some(channel) => Action::NamesEnd {
                channel: channel.to_string(),
            },
            None => Action::Passthrough,
        },

        Command::TopicReply => match (msg.param(1), msg.param(2)) {
            (Some(channel), Some(topic)) => Action::Topic {
                channel: channel.to_string(),
                topic: topic.to_string(),
            },
            _ => Action::Passthrough,
        },

        Command::Topic => match msg.param(0) {
            Some(channel) => Action::Topic {
                channel: channel.to_string(),
                topic: if msg.params.len() > 1 {
                    msg.last_param().to_string()
                } else {
                    String::new()
                },
            },
            None => Action::Passthrough,
        },

        _ => Action::Passthrough,
    }
}

fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}

/// Whether a channel mode letter consumes an argument.
fn takes_arg(mode: char, adding: bool) -> bool {
    match mode {
        m if is_membership_mode(m) => true,
        'b' | 'e' | 'I' | 'k' => true,
        'l' => adding,
        _ => false,
    }
}

/// Pull the membership mode changes out of a MODE string such as `+o-v a b`.
fn parse_membership_modes(modes: &str, args: &[String]) -> Vec<ModeChange> {
    let mut changes: Vec<ModeChange> = Vec::new();
    let mut args = args.iter();
    let mut adding = true;

    for mode in modes.chars() {
        match mode {
            '+' => adding = true,
            '-' => adding = false,
            m => {
                if !takes_arg(m, adding) {
                    continue;
                }
                let Some(arg) = args.next() else { break };
                if !is_membership_mode(m) {
                    continue;
                }
                let idx = match changes.iter().position(|c| &c.nick == arg) {
                    Some(i) => i,
                    None => {
                        changes.push(ModeChange {
                            nick: arg.clone(),
                            ..Default::default()
                        });
                        changes.len() - 1
                    }
                };
                let change = &mut changes[idx];
                if adding {
                    change.remove.retain(|c| c != m);
                    change.add.push(m);
                } else {
                    change.add.retain(|c| c != m);
                    change.remove.push(m);
                }
            }
        }
    }

    changes
}
