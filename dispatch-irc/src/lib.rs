//! Client-side IRC connection core.
//!
//! A [`Client`] keeps one live connection to one server. It dials (plain
//! or TLS), registers, splits the socket into a reader task and a writer
//! task, reconnects with backoff when the socket drops, and keeps a
//! [`ChannelStore`] roster in sync with the traffic it reads.
//!
//! Callers observe the client through two streams returned by
//! [`ClientBuilder::build`]: every parsed [`Message`] in wire order, and a
//! [`ConnectionState`] for every connection transition.
//!
//! ```rust,no_run
//! use dispatch_irc::{Client, ClientConfig};
//!
//! # async fn example() {
//! let config = ClientConfig {
//!     nick: "alice".into(),
//!     tls: true,
//!     ..Default::default()
//! };
//! let (client, mut streams) = Client::builder(config).build();
//! client.connect("irc.libera.chat");
//! client.join(&["#rust"]);
//!
//! while let Some(msg) = streams.messages.recv().await {
//!     println!("{msg}");
//! }
//! # }
//! ```

pub mod backoff;
pub mod classify;
pub mod client;
mod conn;
pub mod error;
pub mod event;
pub mod irc;
pub mod roster;
pub mod signal;
pub mod transport;

pub use backoff::{Backoff, ExponentialBackoff};
pub use client::{Client, ClientBuilder, ClientConfig, NickInUseHandler, Streams};
pub use error::Error;
pub use event::ConnectionState;
pub use irc::{Command, Message};
pub use roster::{ChannelStore, User};
pub use transport::{BoxSocket, Dialer, NetDialer, Socket};
