//! Connection lifecycle: dial, register, read/write tasks, reconnect.
//!
//! One socket lifetime is a *generation*. Each generation has its own
//! reconnect signal, so a stale reader can never trigger a second redial,
//! and the supervisor joins every task of a generation before dialing the
//! next one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::classify::{Action, classify};
use crate::client::{Client, Inner, Target};
use crate::error::Error;
use crate::event::ConnectionState;
use crate::irc::Message;
use crate::signal::Signal;
use crate::transport::BoxSocket;

const PLAIN_PORT: u16 = 6667;
const TLS_PORT: u16 = 6697;
/// Longest inbound line accepted: 8191 bytes of tags plus a 512 byte message.
const MAX_LINE: usize = 8191 + 512;

/// Write side of the socket plus the connected flag, behind one lock.
#[derive(Default)]
pub(crate) struct Link {
    writer: Option<WriteHalf<BoxSocket>>,
    pub connected: bool,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("open", &self.writer.is_some())
            .field("connected", &self.connected)
            .finish()
    }
}

struct Generation {
    id: u64,
    reconnect: Signal,
    registered: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Generation {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            reconnect: Signal::new(),
            registered: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Wait for every task of this generation, including ones spawned
    /// while waiting.
    async fn join(&self) {
        loop {
            let handles = std::mem::take(&mut *self.tasks.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}

/// Split `address` into the bare host and a `host:port` dial target.
fn split_address(address: &str, tls: bool) -> Target {
    let default_port = if tls { TLS_PORT } else { PLAIN_PORT };

    if let Some(rest) = address.strip_prefix('[')
        && let Some((host, tail)) = rest.split_once(']')
    {
        let server = match tail.strip_prefix(':') {
            Some(port) if is_port(port) => format!("[{host}]:{port}"),
            _ => format!("[{host}]:{default_port}"),
        };
        return Target {
            host: host.to_string(),
            server,
        };
    }

    match address.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => Target {
            host: host.to_string(),
            server: address.to_string(),
        },
        // A bare IPv6 literal has more than one colon and no port.
        Some(_) => Target {
            host: address.to_string(),
            server: format!("[{address}]:{default_port}"),
        },
        None => Target {
            host: address.to_string(),
            server: format!("{address}:{default_port}"),
        },
    }
}

fn is_port(s: &str) -> bool {
    s.parse::<u16>().is_ok()
}

impl Client {
    /// Start connecting to `address` (`host` or `host:port`).
    ///
    /// Returns immediately; progress is reported on the state stream.
    /// Must be called from within a tokio runtime. Later calls are ignored.
    pub fn connect(&self, address: &str) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(address, "connect called twice, ignoring");
            return;
        }

        let target = split_address(address, self.inner.config.tls);
        tracing::info!(server = %target.server, tls = self.inner.config.tls, "Connecting");
        *self.inner.target.write() = target;

        tokio::spawn(run(self.inner.clone()));
    }

    /// Send QUIT if connected, then shut the client down for good.
    pub fn quit(&self) {
        self.quit_with(None);
    }

    pub fn quit_with(&self, reason: Option<&str>) {
        let line = match reason {
            Some(r) => format!("QUIT :{r}\r\n"),
            None => "QUIT\r\n".to_string(),
        };
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.shutdown(&line).await });
    }
}

enum Wake {
    Quit,
    Reconnect,
}

impl Inner {
    /// Publish a state change. Nothing is published once the client quits,
    /// and a caller that stops reading cannot stall shutdown.
    async fn emit(&self, state: ConnectionState) {
        tokio::select! {
            biased;
            _ = self.quit.wait() => {}
            // Nobody listening is fine.
            _ = self.states.send(state) => {}
        }
    }

    pub(crate) async fn connected(&self) -> bool {
        self.link.lock().await.connected
    }

    /// Write straight to the socket, bypassing the outbound queue.
    async fn write_direct(&self, line: &str) -> Result<(), Error> {
        let mut link = self.link.lock().await;
        let writer = link.writer.as_mut().ok_or(Error::NotConnected)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Say goodbye on the open socket, if any, and fire the quit signal
    /// before anyone else can touch the socket.
    async fn shutdown(&self, quit_line: &str) {
        let mut link = self.link.lock().await;
        if self.quit.is_fired() {
            return;
        }
        if link.connected
            && let Some(writer) = link.writer.as_mut()
        {
            let _ = writer.write_all(quit_line.as_bytes()).await;
            let _ = writer.flush().await;
        }
        self.quit.fire();
        drop(link);

        if !self.started.load(Ordering::SeqCst) {
            // No supervisor will ever run to close the stream.
            self.close_messages();
        }
    }

    async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        link.connected = false;
        if let Some(mut writer) = link.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Dial until a connection sticks or the client quits.
    async fn try_connect(self: &Arc<Self>, next_id: &mut u64) -> Option<Arc<Generation>> {
        let mut attempt = 0u32;
        loop {
            if self.quit.is_fired() {
                return None;
            }

            attempt += 1;
            match self.dial(*next_id).await {
                Ok(generation) => {
                    *next_id += 1;
                    self.backoff.lock().reset();
                    return Some(generation);
                }
                Err(e) => {
                    let delay = self.backoff.lock().duration();
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Connection failed, retrying"
                    );
                    self.emit(ConnectionState::failed(e)).await;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.quit.wait() => return None,
                    }
                }
            }
        }
    }

    async fn dial(self: &Arc<Self>, id: u64) -> Result<Arc<Generation>, Error> {
        let Target { host, server } = self.target.read().clone();

        let mut link = self.link.lock().await;
        let socket = self.dialer.dial(&server, &host).await?;
        let (reader, writer) = tokio::io::split(socket);
        link.writer = Some(writer);
        link.connected = true;
        tracing::info!(server = %server, generation = id, "Connected");

        if let Some(writer) = link.writer.as_mut()
            && let Err(e) = self.register(writer).await
        {
            // The reader will see the broken socket and ask for a redial.
            tracing::warn!(error = %e, "Failed to send registration");
        }
        drop(link);
        self.emit(ConnectionState::connected()).await;

        // Queued now, written once the new registration completes.
        self.flush_channels();

        let generation = Generation::new(id);
        let messages = self.messages.lock().clone();
        let handle = tokio::spawn(recv(
            self.clone(),
            generation.clone(),
            BufReader::new(reader),
            messages,
        ));
        generation.track(handle);
        Ok(generation)
    }

    async fn register(&self, writer: &mut WriteHalf<BoxSocket>) -> std::io::Result<()> {
        let config = &self.config;
        let mut lines = String::new();
        if let Some(pass) = &config.password {
            lines.push_str(&format!("PASS {pass}\r\n"));
        }
        lines.push_str(&format!("NICK {}\r\n", self.get_nick()));
        lines.push_str(&format!("USER {} 0 * :{}\r\n", config.username, config.realname));
        writer.write_all(lines.as_bytes()).await?;
        writer.flush().await
    }

    /// Report a fatal error, then shut down for good.
    async fn fail(&self, error: Error) {
        self.emit(ConnectionState::failed(error)).await;
        self.quit.fire();
    }

    fn close_messages(&self) {
        self.messages.lock().take();
    }
}

/// Supervisor: owns the lifecycle from the first dial to final shutdown.
async fn run(inner: Arc<Inner>) {
    inner.emit(ConnectionState::disconnected()).await;

    let mut next_id = 0;
    let Some(mut generation) = inner.try_connect(&mut next_id).await else {
        inner.close_messages();
        return;
    };

    loop {
        let wake = tokio::select! {
            biased;
            _ = inner.quit.wait() => Wake::Quit,
            _ = generation.reconnect.wait() => Wake::Reconnect,
        };

        match wake {
            Wake::Quit => {
                if inner.connected().await {
                    inner.disconnect().await;
                }
                generation.join().await;
                inner.close_messages();
                tracing::info!("Client shut down");
                return;
            }
            Wake::Reconnect => {
                tracing::info!(generation = generation.id, "Connection lost, reconnecting");
                inner.disconnect().await;
                inner.emit(ConnectionState::disconnected()).await;
                generation.join().await;

                match inner.try_connect(&mut next_id).await {
                    Some(next) => generation = next,
                    None => {
                        inner.close_messages();
                        return;
                    }
                }
            }
        }
    }
}

/// Reader task for one generation.
async fn recv(
    inner: Arc<Inner>,
    generation: Arc<Generation>,
    mut reader: BufReader<ReadHalf<BoxSocket>>,
    messages: Option<mpsc::Sender<Message>>,
) {
    let mut buf = Vec::with_capacity(512);
    let mut names: HashMap<String, Vec<String>> = HashMap::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE as u64);
        let read = tokio::select! {
            biased;
            _ = inner.quit.wait() => return,
            read = limited.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(n) if n > 0 => {}
            result => {
                if inner.quit.is_fired() {
                    return;
                }
                match result {
                    Err(e) => tracing::debug!(error = %e, "Read failed"),
                    Ok(_) => tracing::debug!("Server closed the connection"),
                }
                generation.reconnect.fire();
                return;
            }
        }

        if buf.len() >= MAX_LINE && !buf.ends_with(b"\n") {
            tracing::error!(limit = MAX_LINE, "Server sent an overlong line, giving up");
            inner.fail(Error::BadProtocol).await;
            return;
        }

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        tracing::trace!(line = %line.trim_end(), "<-");

        let Some(msg) = Message::parse(&line) else {
            tracing::error!(line = %line.trim_end(), "Server sent a non-IRC line, giving up");
            inner.fail(Error::BadProtocol).await;
            return;
        };

        handle(&inner, &generation, &msg, &mut names);

        if let Some(tx) = &messages {
            tokio::select! {
                biased;
                _ = inner.quit.wait() => return,
                _ = tx.send(msg) => {}
            }
        }
    }
}

/// Apply the side effects of one message before it is published.
fn handle(
    inner: &Arc<Inner>,
    generation: &Arc<Generation>,
    msg: &Message,
    names: &mut HashMap<String, Vec<String>>,
) {
    let own_nick = inner.get_nick();
    let server = inner.host();
    let roster = &inner.roster;

    match classify(msg, &own_nick) {
        Action::Pong(token) => {
            let inner = inner.clone();
            generation.track(tokio::spawn(async move {
                let _ = inner.write_direct(&format!("PONG :{token}\r\n")).await;
            }));
        }

        Action::Welcome { nick } => {
            inner.set_nick(&nick);
            if !generation.registered.swap(true, Ordering::SeqCst) {
                tracing::info!(nick = %nick, "Registered");
                generation.track(tokio::spawn(send(inner.clone(), generation.clone())));
            }
        }

        Action::NickInUse { nick } => {
            if let Some(handler) = &inner.config.nick_in_use {
                let replacement = handler(&nick);
                tracing::debug!(rejected = %nick, replacement = %replacement, "Nickname in use");
                let inner = inner.clone();
                generation.track(tokio::spawn(async move {
                    let _ = inner.write_direct(&format!("NICK {replacement}\r\n")).await;
                }));
            }
        }

        Action::Joined { channel, nick, own } => {
            if own {
                inner.add_channel(&channel);
            }
            roster.add_user(&server, &channel, &nick);
        }

        Action::Parted { channel, nick } => {
            if nick == own_nick {
                inner.remove_channel(&channel);
            }
            roster.remove_user(&server, &channel, &nick);
        }

        Action::Quit { nick } => roster.remove_user_all(&server, &nick),

        Action::NickChanged { old, new, own } => {
            if own {
                inner.set_nick(&new);
            }
            roster.rename_user(&server, &old, &new);
        }

        Action::Modes { channel, changes } => {
            for change in changes {
                roster.set_mode(&server, &channel, &change.nick, &change.add, &change.remove);
            }
        }

        Action::Names { channel, nicks } => {
            names.entry(channel).or_default().extend(nicks);
        }

        Action::NamesEnd { channel } => {
            let users = names.remove(&channel).unwrap_or_default();
            roster.set_users(&server, &channel, &users);
        }

        Action::Topic { channel, topic } => roster.set_topic(&server, &channel, &topic),

        Action::Passthrough => {}
    }
}

/// Writer task for one generation. Started once registration succeeds.
async fn send(inner: Arc<Inner>, generation: Arc<Generation>) {
    let mut queue = tokio::select! {
        biased;
        _ = inner.quit.wait() => return,
        _ = generation.reconnect.wait() => return,
        guard = inner.out_rx.lock() => guard,
    };

    loop {
        let line = tokio::select! {
            biased;
            _ = inner.quit.wait() => return,
            _ = generation.reconnect.wait() => return,
            line = queue.recv() => line,
        };
        let Some(line) = line else { return };

        tracing::trace!(line = %line.trim_end(), "->");
        if let Err(e) = inner.write_direct(&line).await {
            tracing::debug!(error = %e, generation = generation.id, "Write failed, writer exiting");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(address: &str, tls: bool) -> (String, String) {
        let t = split_address(address, tls);
        (t.host, t.server)
    }

    #[test]
    fn default_ports() {
        assert_eq!(target("irc.example.net", false), ("irc.example.net".into(), "irc.example.net:6667".into()));
        assert_eq!(target("irc.example.net", true), ("irc.example.net".into(), "irc.example.net:6697".into()));
    }

    #[test]
    fn explicit_port_is_kept() {
        assert_eq!(target("irc.example.net:7000", true), ("irc.example.net".into(), "irc.example.net:7000".into()));
    }

    #[test]
    fn ipv6_literals() {
        assert_eq!(target("[::1]:7000", false), ("::1".into(), "[::1]:7000".into()));
        assert_eq!(target("[::1]", true), ("::1".into(), "[::1]:6697".into()));
        assert_eq!(target("2001:db8::1", false), ("2001:db8::1".into(), "[2001:db8::1]:6667".into()));
    }

    #[tokio::test]
    async fn disconnect_twice_is_harmless() {
        let (client, _streams) = Client::new(crate::ClientConfig::default());
        let inner = &client.inner;
        inner.disconnect().await;

        let (socket, mut peer) = tokio::io::duplex(64);
        let (_reader, writer) = tokio::io::split(Box::new(socket) as BoxSocket);
        {
            let mut link = inner.link.lock().await;
            link.writer = Some(writer);
            link.connected = true;
        }

        inner.disconnect().await;
        inner.disconnect().await;
        {
            let link = inner.link.lock().await;
            assert!(!link.connected);
            assert!(link.writer.is_none());
        }
        assert!(matches!(inner.write_direct("PING :x\r\n").await, Err(Error::NotConnected)));

        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }
}
