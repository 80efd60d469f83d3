//! Per-server channel rosters.
//!
//! The store maps (server, channel) to the ordered list of users present in
//! the channel, each carrying the membership modes the client has seen. It
//! has its own lock, separate from the socket, so roster reads never wait on
//! network I/O.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

/// Membership modes, highest privilege first, with their display glyph.
const MODE_TABLE: &[(char, char)] = &[('q', '~'), ('a', '&'), ('o', '@'), ('h', '%'), ('v', '+')];

fn priority(mode: char) -> Option<usize> {
    MODE_TABLE.iter().position(|&(m, _)| m == mode)
}

fn mode_for_glyph(glyph: char) -> Option<char> {
    MODE_TABLE.iter().find(|&&(_, g)| g == glyph).map(|&(m, _)| m)
}

/// Whether `mode` is a channel membership mode such as `o` or `v`.
pub fn is_membership_mode(mode: char) -> bool {
    priority(mode).is_some()
}

/// Strip leading mode glyphs from a nick (`@+alice` → `alice`).
pub fn strip_glyphs(nick: &str) -> &str {
    nick.trim_start_matches(|c: char| mode_for_glyph(c).is_some())
}

/// A user in one channel: base nick plus priority-ordered modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    modes: Vec<char>,
}

impl User {
    /// Build a user from a possibly prefixed nick as found in NAMES replies.
    pub fn new(prefixed: &str) -> Self {
        let nick = strip_glyphs(prefixed);
        let glyphs = &prefixed[..prefixed.len() - nick.len()];
        let mut user = Self {
            nick: nick.to_string(),
            modes: Vec::new(),
        };
        user.add_modes(glyphs.chars().filter_map(mode_for_glyph));
        user
    }

    pub fn modes(&self) -> &[char] {
        &self.modes
    }

    pub fn add_modes(&mut self, modes: impl IntoIterator<Item = char>) {
        for mode in modes {
            if is_membership_mode(mode) && !self.modes.contains(&mode) {
                self.modes.push(mode);
            }
        }
        self.modes.sort_by_key(|&m| priority(m));
    }

    pub fn remove_modes(&mut self, modes: impl IntoIterator<Item = char>) {
        for mode in modes {
            self.modes.retain(|&m| m != mode);
        }
    }

    /// Glyph of the highest-priority mode held, if any.
    pub fn glyph(&self) -> Option<char> {
        let mode = self.modes.first()?;
        MODE_TABLE.iter().find(|&&(m, _)| m == *mode).map(|&(_, g)| g)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(glyph) = self.glyph() {
            write!(f, "{glyph}")?;
        }
        f.write_str(&self.nick)
    }
}

#[derive(Debug, Default)]
struct Channel {
    users: Vec<User>,
    topic: String,
}

impl Channel {
    fn position(&self, nick: &str) -> Option<usize> {
        self.users.iter().position(|u| u.nick == nick)
    }
}

/// Concurrent roster store keyed by server, then channel.
#[derive(Debug, Default)]
pub struct ChannelStore {
    servers: RwLock<HashMap<String, HashMap<String, Channel>>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a channel's roster. Prefixed nicks are split into modes.
    pub fn set_users<S: AsRef<str>>(&self, server: &str, channel: &str, users: &[S]) {
        let users = users.iter().map(|u| User::new(u.as_ref())).collect();
        let mut servers = self.servers.write();
        channel_mut(&mut servers, server, channel).users = users;
    }

    /// Add a user unless a user with the same base nick is already there.
    pub fn add_user(&self, server: &str, channel: &str, user: &str) {
        let user = User::new(user);
        let mut servers = self.servers.write();
        let chan = channel_mut(&mut servers, server, channel);
        if chan.position(&user.nick).is_none() {
            chan.users.push(user);
        }
    }

    pub fn remove_user(&self, server: &str, channel: &str, nick: &str) {
        let nick = strip_glyphs(nick);
        let mut servers = self.servers.write();
        if let Some(chan) = servers.get_mut(server).and_then(|s| s.get_mut(channel)) {
            chan.users.retain(|u| u.nick != nick);
        }
    }

    /// Remove a user from every channel of one server.
    pub fn remove_user_all(&self, server: &str, nick: &str) {
        let nick = strip_glyphs(nick);
        let mut servers = self.servers.write();
        if let Some(channels) = servers.get_mut(server) {
            for chan in channels.values_mut() {
                chan.users.retain(|u| u.nick != nick);
            }
        }
    }

    /// Rename a user in every channel of one server, keeping its modes.
    ///
    /// Both names are matched by base nick: glyphs on either input are
    /// stripped first.
    pub fn rename_user(&self, server: &str, old: &str, new: &str) {
        let old = strip_glyphs(old);
        let new = strip_glyphs(new);
        let mut servers = self.servers.write();
        if let Some(channels) = servers.get_mut(server) {
            for chan in channels.values_mut() {
                if let Some(i) = chan.position(old) {
                    chan.users[i].nick = new.to_string();
                }
            }
        }
    }

    /// Add `add` and remove `remove` in one step for one user in one channel.
    pub fn set_mode(&self, server: &str, channel: &str, nick: &str, add: &str, remove: &str) {
        let nick = strip_glyphs(nick);
        let mut servers = self.servers.write();
        if let Some(chan) = servers.get_mut(server).and_then(|s| s.get_mut(channel))
            && let Some(i) = chan.position(nick)
        {
            let user = &mut chan.users[i];
            user.add_modes(add.chars());
            user.remove_modes(remove.chars());
        }
    }

    /// Display-formatted nicks in roster order.
    pub fn get_users(&self, server: &str, channel: &str) -> Vec<String> {
        self.servers
            .read()
            .get(server)
            .and_then(|s| s.get(channel))
            .map(|chan| chan.users.iter().map(User::to_string).collect())
            .unwrap_or_default()
    }

    pub fn get_user(&self, server: &str, channel: &str, nick: &str) -> Option<User> {
        let servers = self.servers.read();
        let chan = servers.get(server)?.get(channel)?;
        chan.users.iter().find(|u| u.nick == strip_glyphs(nick)).cloned()
    }

    pub fn get_topic(&self, server: &str, channel: &str) -> String {
        self.servers
            .read()
            .get(server)
            .and_then(|s| s.get(channel))
            .map(|chan| chan.topic.clone())
            .unwrap_or_default()
    }

    pub fn set_topic(&self, server: &str, channel: &str, topic: &str) {
        let mut servers = self.servers.write();
        channel_mut(&mut servers, server, channel).topic = topic.to_string();
    }

    /// Sorted names of the channels of `server` that currently have users.
    pub fn channels(&self, server: &str) -> Vec<String> {
        let servers = self.servers.read();
        let mut names: Vec<String> = servers
            .get(server)
            .map(|channels| {
                channels
                    .iter()
                    .filter(|(_, chan)| !chan.users.is_empty())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Drop every channel of one server.
    pub fn clear_server(&self, server: &str) {
        self.servers.write().remove(server);
    }
}

fn channel_mut<'a>(
    servers: &'a mut HashMap<String, HashMap<String, Channel>>,
    server: &str,
    channel: &str,
) -> &'a mut Channel {
    servers
        .entry(server.to_string())
        .or_default()
        .entry(channel.to_string())
        .or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_users_is_idempotent_and_ordered() {
        let store = ChannelStore::new();
        let users = ["a", "b"];
        store.set_users("srv", "#chan", &users);
        assert_eq!(store.get_users("srv", "#chan"), users);
        store.set_users("srv", "#chan", &users);
        assert_eq!(store.get_users("srv", "#chan"), users);
    }

    #[test]
    fn set_users_normalizes_prefixes() {
        let store = ChannelStore::new();
        store.set_users("srv", "#chan", &["@op", "+voice", "~@owner", "plain"]);
        assert_eq!(store.get_users("srv", "#chan"), ["@op", "+voice", "~owner", "plain"]);
        let owner = store.get_user("srv", "#chan", "owner").unwrap();
        assert_eq!(owner.modes(), ['q', 'o']);
    }

    #[test]
    fn add_user_is_idempotent() {
        let store = ChannelStore::new();
        store.add_user("srv", "#chan", "user");
        store.add_user("srv", "#chan", "user");
        store.add_user("srv", "#chan", "@user");
        assert_eq!(store.get_users("srv", "#chan").len(), 1);
        store.add_user("srv", "#chan", "user2");
        assert_eq!(store.get_users("srv", "#chan"), ["user", "user2"]);
        store.remove_user("srv", "#chan", "user");
        assert_eq!(store.get_users("srv", "#chan"), ["user2"]);
    }

    #[test]
    fn remove_user_all_is_scoped_to_one_server() {
        let store = ChannelStore::new();
        store.add_user("srv", "#chan1", "user");
        store.add_user("srv", "#chan2", "user");
        store.add_user("other", "#chan1", "user");
        store.remove_user_all("srv", "user");
        assert!(store.get_users("srv", "#chan1").is_empty());
        assert!(store.get_users("srv", "#chan2").is_empty());
        assert_eq!(store.get_users("other", "#chan1"), ["user"]);
    }

    #[test]
    fn rename_user_keeps_modes() {
        let store = ChannelStore::new();
        store.add_user("srv", "#chan1", "user");
        store.add_user("srv", "#chan2", "user");
        store.rename_user("srv", "user", "new");
        assert_eq!(store.get_users("srv", "#chan1"), ["new"]);
        assert_eq!(store.get_users("srv", "#chan2"), ["new"]);

        store.add_user("srv", "#chan3", "~gotop");
        store.rename_user("srv", "gotop", "stillgotit");
        assert_eq!(store.get_users("srv", "#chan3"), ["~stillgotit"]);

        // Matching is by base nick even if the caller passes the glyph.
        store.rename_user("srv", "~stillgotit", "again");
        assert_eq!(store.get_users("srv", "#chan3"), ["~again"]);
    }

    #[test]
    fn set_mode_renders_highest_priority() {
        let store = ChannelStore::new();
        store.add_user("srv", "#chan", "+user");
        store.set_mode("srv", "#chan", "user", "o", "v");
        assert_eq!(store.get_users("srv", "#chan"), ["@user"]);
        store.set_mode("srv", "#chan", "user", "v", "");
        assert_eq!(store.get_users("srv", "#chan"), ["@user"]);
        store.set_mode("srv", "#chan", "user", "", "o");
        assert_eq!(store.get_users("srv", "#chan"), ["+user"]);
        store.set_mode("srv", "#chan", "user", "q", "");
        assert_eq!(store.get_users("srv", "#chan"), ["~user"]);
        store.set_mode("srv", "#chan", "user", "", "qv");
        assert_eq!(store.get_users("srv", "#chan"), ["user"]);
    }

    #[test]
    fn set_mode_on_unknown_user_is_ignored() {
        let store = ChannelStore::new();
        store.set_mode("srv", "#chan", "ghost", "o", "");
        assert!(store.get_users("srv", "#chan").is_empty());
    }

    #[test]
    fn topic_defaults_to_empty() {
        let store = ChannelStore::new();
        assert_eq!(store.get_topic("srv", "#chan"), "");
        store.set_topic("srv", "#chan", "the topic");
        assert_eq!(store.get_topic("srv", "#chan"), "the topic");
    }

    #[test]
    fn channels_and_clear_server() {
        let store = ChannelStore::new();
        store.add_user("srv", "#b", "me");
        store.add_user("srv", "#a", "me");
        store.set_topic("srv", "#empty", "nobody here");
        assert_eq!(store.channels("srv"), ["#a", "#b"]);
        store.clear_server("srv");
        assert!(store.channels("srv").is_empty());
        assert_eq!(store.get_topic("srv", "#empty"), "");
    }

    #[test]
    fn user_mode_flags() {
        let mut user = User::new("&test");
        assert_eq!(user.nick, "test");
        assert_eq!(user.modes(), ['a']);
        assert_eq!(user.to_string(), "&test");

        user.remove_modes("a".chars());
        assert_eq!(user.to_string(), "test");
        user.add_modes("o".chars());
        assert_eq!(user.to_string(), "@test");
        user.add_modes("q".chars());
        assert_eq!(user.to_string(), "~test");
        user.add_modes("v".chars());
        assert_eq!(user.to_string(), "~test");
        user.remove_modes("qo".chars());
        assert_eq!(user.to_string(), "+test");
        user.remove_modes("v".chars());
        assert_eq!(user.to_string(), "test");
    }

    #[test]
    fn unknown_modes_are_not_recorded() {
        let mut user = User::new("x");
        user.add_modes("bk".chars());
        assert!(user.modes().is_empty());
    }
}
