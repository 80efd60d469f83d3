//! The client aggregate and its caller-facing API.
//!
//! A [`Client`] is a cheap, cloneable handle. Build one with
//! [`Client::builder`], call [`Client::connect`], then read the returned
//! [`Streams`]. Outbound lines are queued and only reach the wire once the
//! server has accepted the registration.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_rustls::rustls;

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::conn::Link;
use crate::event::ConnectionState;
use crate::irc::Message;
use crate::roster::ChannelStore;
use crate::signal::Signal;
use crate::transport::{self, Dialer, NetDialer};

/// Capacity of the inbound message stream.
const MESSAGE_BUFFER: usize = 4096;
/// Capacity of the connection-state stream.
const STATE_BUFFER: usize = 64;

/// Picks a replacement when the server rejects a nickname as in use.
pub type NickInUseHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Identity and transport settings for a client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub username: String,
    /// Real name.
    pub realname: String,
    /// Server password sent as PASS before NICK/USER.
    pub password: Option<String>,
    /// Use TLS. Also picks the default port: 6697 with TLS, 6667 without.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
    /// Custom TLS settings; overrides `tls_insecure` when set.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    /// Limit on each TCP connect and TLS handshake.
    pub dial_timeout: Duration,
    pub nick_in_use: Option<NickInUseHandler>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nick: "dispatch".to_string(),
            username: "dispatch".to_string(),
            realname: "Dispatch IRC Client".to_string(),
            password: None,
            tls: false,
            tls_insecure: false,
            tls_config: None,
            dial_timeout: Duration::from_secs(10),
            nick_in_use: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("nick", &self.nick)
            .field("username", &self.username)
            .field("realname", &self.realname)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("tls_insecure", &self.tls_insecure)
            .field("tls_config", &self.tls_config.is_some())
            .field("dial_timeout", &self.dial_timeout)
            .field("nick_in_use", &self.nick_in_use.is_some())
            .finish()
    }
}

/// The two streams a caller observes a client through.
pub struct Streams {
    /// Every parsed inbound message, in wire order. Closed once, at shutdown.
    pub messages: mpsc::Receiver<Message>,
    pub states: mpsc::Receiver<ConnectionState>,
}

/// Assembles a [`Client`] with optional custom collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    dialer: Option<Arc<dyn Dialer>>,
    backoff: Option<Box<dyn Backoff>>,
    roster: Option<Arc<ChannelStore>>,
}

impl ClientBuilder {
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    /// Share a roster store, e.g. one owned by the application.
    pub fn roster(mut self, roster: Arc<ChannelStore>) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn build(self) -> (Client, Streams) {
        let config = self.config;
        let dialer = self.dialer.unwrap_or_else(|| Arc::new(net_dialer(&config)));
        let backoff = self
            .backoff
            .unwrap_or_else(|| Box::new(ExponentialBackoff::default()));

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (state_tx, state_rx) = mpsc::channel(STATE_BUFFER);

        let inner = Inner {
            nick: Mutex::new(config.nick.clone()),
            config,
            target: RwLock::new(Target::default()),
            channels: Mutex::new(Vec::new()),
            link: tokio::sync::Mutex::new(Link::default()),
            backoff: Mutex::new(backoff),
            out_tx,
            out_rx: tokio::sync::Mutex::new(out_rx),
            quit: Signal::new(),
            messages: Mutex::new(Some(msg_tx)),
            states: state_tx,
            dialer,
            roster: self.roster.unwrap_or_default(),
            started: AtomicBool::new(false),
        };

        let client = Client {
            inner: Arc::new(inner),
        };
        let streams = Streams {
            messages: msg_rx,
            states: state_rx,
        };
        (client, streams)
    }
}

fn net_dialer(config: &ClientConfig) -> NetDialer {
    if !config.tls {
        return NetDialer::plain(config.dial_timeout);
    }
    let tls = match &config.tls_config {
        Some(tls) => tls.clone(),
        None => {
            if config.tls_insecure {
                tracing::debug!("TLS: insecure mode (skipping cert verification)");
            }
            Arc::new(transport::tls_config(!config.tls_insecure))
        }
    };
    NetDialer::tls(config.dial_timeout, tls)
}

/// Host part and full `host:port` address of the server.
#[derive(Debug, Clone, Default)]
pub(crate) struct Target {
    pub host: String,
    pub server: String,
}

pub(crate) struct Inner {
    pub config: ClientConfig,
    pub target: RwLock<Target>,
    pub nick: Mutex<String>,
    /// Channels joined during the current generation, rejoined after a redial.
    pub channels: Mutex<Vec<String>>,
    pub link: tokio::sync::Mutex<Link>,
    pub backoff: Mutex<Box<dyn Backoff>>,
    pub out_tx: mpsc::UnboundedSender<String>,
    /// Drained by the writer of the current generation only.
    pub out_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    pub quit: Signal,
    /// Dropped at final shutdown to close the message stream.
    pub messages: Mutex<Option<mpsc::Sender<Message>>>,
    pub states: mpsc::Sender<ConnectionState>,
    pub dialer: Arc<dyn Dialer>,
    pub roster: Arc<ChannelStore>,
    pub started: AtomicBool,
}

impl Inner {
    pub fn enqueue(&self, line: String) {
        // The receiver lives as long as `self`.
        let _ = self.out_tx.send(line);
    }

    pub fn get_nick(&self) -> String {
        self.nick.lock().clone()
    }

    pub fn set_nick(&self, nick: &str) {
        *self.nick.lock() = nick.to_string();
    }

    pub fn host(&self) -> String {
        self.target.read().host.clone()
    }

    pub fn add_channel(&self, channel: &str) {
        let mut channels = self.channels.lock();
        if !channels.iter().any(|c| c == channel) {
            channels.push(channel.to_string());
        }
    }

    pub fn remove_channel(&self, channel: &str) {
        self.channels.lock().retain(|c| c != channel);
    }

    /// Queue a JOIN for every channel of the previous generation.
    pub fn flush_channels(&self) {
        let channels = std::mem::take(&mut *self.channels.lock());
        if !channels.is_empty() {
            tracing::debug!(channels = ?channels, "Rejoining channels");
            self.enqueue(format!("JOIN {}\r\n", channels.join(",")));
        }
    }
}

/// Handle to one logical IRC connection.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            dialer: None,
            backoff: None,
            roster: None,
        }
    }

    /// Build a client with the default dialer, backoff and a fresh roster.
    pub fn new(config: ClientConfig) -> (Self, Streams) {
        Self::builder(config).build()
    }

    /// Queue a raw line. The line terminator is appended here.
    pub fn write(&self, line: &str) {
        self.inner.enqueue(format!("{line}\r\n"));
    }

    /// Queue a formatted line: `client.writef(format_args!("PRIVMSG {} :{}", to, text))`.
    pub fn writef(&self, args: fmt::Arguments<'_>) {
        self.inner.enqueue(format!("{args}\r\n"));
    }

    /// Current nickname as confirmed by the server.
    pub fn get_nick(&self) -> String {
        self.inner.get_nick()
    }

    /// Bare hostname of the server, set by [`Client::connect`].
    pub fn host(&self) -> String {
        self.inner.host()
    }

    /// `host:port` the client dials.
    pub fn server(&self) -> String {
        self.inner.target.read().server.clone()
    }

    pub async fn connected(&self) -> bool {
        self.inner.connected().await
    }

    /// The roster kept in sync with this connection, keyed by [`Client::host`].
    pub fn roster(&self) -> &Arc<ChannelStore> {
        &self.inner.roster
    }

    /// Whether the client has shut down for good.
    pub fn is_closed(&self) -> bool {
        self.inner.quit.is_fired()
    }

    // ── Commands ──

    pub fn nick(&self, nick: &str) {
        self.writef(format_args!("NICK {nick}"));
    }

    pub fn join(&self, channels: &[&str]) {
        if channels.is_empty() {
            return;
        }
        self.writef(format_args!("JOIN {}", channels.join(",")));
    }

    pub fn part(&self, channels: &[&str]) {
        if channels.is_empty() {
            return;
        }
        self.writef(format_args!("PART {}", channels.join(",")));
    }

    pub fn privmsg(&self, target: &str, text: &str) {
        self.writef(format_args!("PRIVMSG {target} :{text}"));
    }

    pub fn notice(&self, target: &str, text: &str) {
        self.writef(format_args!("NOTICE {target} :{text}"));
    }

    pub fn topic(&self, channel: &str, topic: &str) {
        self.writef(format_args!("TOPIC {channel} :{topic}"));
    }

    pub fn invite(&self, nick: &str, channel: &str) {
        self.writef(format_args!("INVITE {nick} {channel}"));
    }

    pub fn kick(&self, channel: &str, nick: &str, reason: Option<&str>) {
        match reason {
            Some(r) => self.writef(format_args!("KICK {channel} {nick} :{r}")),
            None => self.writef(format_args!("KICK {channel} {nick}")),
        }
    }

    pub fn whois(&self, nick: &str) {
        self.writef(format_args!("WHOIS {nick}"));
    }

    pub fn away(&self, message: &str) {
        self.writef(format_args!("AWAY :{message}"));
    }

    pub fn back(&self) {
        self.write("AWAY");
    }

    pub fn list(&self) {
        self.write("LIST");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(client: &Client) -> Vec<String> {
        let mut rx = client.inner.out_rx.try_lock().unwrap();
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn commands_are_queued_with_terminator() {
        let (client, _streams) = Client::new(ClientConfig::default());
        client.write("PING :x");
        client.writef(format_args!("PRIVMSG {} :{}", "#a", "hi"));
        client.join(&["#a", "#b"]);
        client.join(&[]);
        client.kick("#a", "bob", Some("bye"));
        client.back();
        assert_eq!(
            drain(&client),
            [
                "PING :x\r\n",
                "PRIVMSG #a :hi\r\n",
                "JOIN #a,#b\r\n",
                "KICK #a bob :bye\r\n",
                "AWAY\r\n",
            ]
        );
    }

    #[test]
    fn flush_channels_rejoins_once() {
        let (client, _streams) = Client::new(ClientConfig::default());
        client.inner.add_channel("#a");
        client.inner.add_channel("#b");
        client.inner.add_channel("#a");
        client.inner.remove_channel("#b");
        client.inner.add_channel("#c");
        client.inner.flush_channels();
        client.inner.flush_channels();
        assert_eq!(drain(&client), ["JOIN #a,#c\r\n"]);
    }

    #[test]
    fn debug_redacts_password() {
        let config = ClientConfig {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
