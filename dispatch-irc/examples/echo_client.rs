//! Echo client: joins a channel and repeats back anything addressed to it.
//!
//! Usage:
//!   cargo run --example echo_client -- --server irc.libera.chat --tls \
//!     --nick echo-bot --channel "#dispatch-test"
//!
//! Set `DISPATCH_LOG_JSON=1` for JSON logs; `RUST_LOG` controls the filter.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dispatch_irc::{Client, ClientConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "echo-client", about = "Dispatch IRC echo example")]
struct Args {
    /// `host` or `host:port`
    #[arg(long, default_value = "irc.libera.chat")]
    server: String,
    #[arg(long, default_value = "dispatch-echo")]
    nick: String,
    #[arg(long, default_value = "#dispatch-test")]
    channel: String,
    #[arg(long)]
    tls: bool,
    /// Accept self-signed certificates.
    #[arg(long)]
    insecure: bool,
    #[arg(long, env = "IRC_PASSWORD")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dispatch_irc=debug"));
    if std::env::var("DISPATCH_LOG_JSON").unwrap_or_default() == "1" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    let config = ClientConfig {
        nick: args.nick.clone(),
        password: args.password,
        tls: args.tls,
        tls_insecure: args.insecure,
        nick_in_use: Some(Arc::new(|nick: &str| format!("{nick}_"))),
        ..Default::default()
    };

    let (client, mut streams) = Client::new(config);
    client.connect(&args.server);
    client.join(&[args.channel.as_str()]);

    let mut states = streams.states;
    tokio::spawn(async move {
        while let Some(state) = states.recv().await {
            match &state.error {
                Some(e) => tracing::warn!(connected = state.connected, error = %e, "State"),
                None => tracing::info!(connected = state.connected, "State"),
            }
        }
    });

    let quitter = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, quitting");
            quitter.quit_with(Some("echo client shutting down"));
        }
    });

    while let Some(msg) = streams.messages.recv().await {
        tracing::debug!(%msg, "<-");
        if msg.command != "PRIVMSG" {
            continue;
        }
        let (Some(from), Some(target)) = (msg.nick(), msg.param(0)) else {
            continue;
        };
        let text = msg.last_param();
        let me = client.get_nick();

        if target == me {
            client.privmsg(from, text);
        } else if let Some(rest) = text.strip_prefix(&format!("{me}:")) {
            client.privmsg(target, &format!("{from}:{rest}"));
        }
    }

    for channel in client.roster().channels(&client.host()) {
        let users = client.roster().get_users(&client.host(), &channel);
        tracing::info!(channel = %channel, users = users.len(), "Final roster");
    }
    Ok(())
}
