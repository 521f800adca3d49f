//! A bridge whose "game server" is this terminal.
//!
//! Lines received from the bus are printed. Lines typed on stdin are sent
//! as chat from `console`, except `!!grunichat ...` control commands:
//!
//! ```text
//! !!grunichat status
//! !!grunichat rename <id>
//! !!grunichat connect <url>
//! !!grunichat reconnect [url]
//! !!grunichat disconnect
//! ```
//!
//! Usage: `console-bridge [config.json]`. Set `RUST_LOG` to change
//! verbosity (default `info`).

use grunichat::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONTROL_PREFIX: &str = "!!grunichat";
const CONSOLE_SENDER: &str = "console";

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Prints everything the bus asks the "server" to do.
struct StdoutHost;

impl Host for StdoutHost {
    fn broadcast_line(&self, line: &str) {
        println!("{line}");
    }

    fn execute_command(&self, command: &str) {
        println!("[host console] {command}");
    }

    fn execute_server_command(&self, command: &str) {
        println!("[server] /{command}");
    }
}

// ---------------------------------------------------------------------------
// Control commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Control<'a> {
    Status,
    Rename(&'a str),
    Connect(&'a str),
    Reconnect(Option<&'a str>),
    Disconnect,
    Help,
}

/// Parses a control line. Returns `None` for ordinary chat.
fn parse_control(line: &str) -> Option<Control<'_>> {
    let rest = line.strip_prefix(CONTROL_PREFIX)?;
    if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    let mut words = rest.split_whitespace();
    let control = match (words.next(), words.next()) {
        (Some("status"), None) => Control::Status,
        (Some("rename"), Some(id)) => Control::Rename(id),
        (Some("connect"), Some(url)) => Control::Connect(url),
        (Some("reconnect"), url) => Control::Reconnect(url),
        (Some("disconnect"), None) => Control::Disconnect,
        _ => Control::Help,
    };
    Some(control)
}

async fn run_control(bridge: &BridgeService<StdoutHost>, control: Control<'_>) {
    let result = match control {
        Control::Status => {
            println!("{}", bridge.status_summary());
            return;
        }
        Control::Rename(id) => bridge.rename(id).await,
        Control::Connect(url) => bridge.connect(url).await,
        Control::Reconnect(url) => bridge.reconnect(url).await,
        Control::Disconnect => {
            bridge.disconnect().await;
            Ok(())
        }
        Control::Help => {
            println!(
                "usage: {CONTROL_PREFIX} status | rename <id> | connect <url> | reconnect [url] | disconnect"
            );
            return;
        }
    };
    match result {
        Ok(()) => println!("ok"),
        Err(e) => println!("failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(&path)?,
        None => BridgeConfig::default(),
    };
    tracing::info!(url = %config.ws_url, plugin_id = %config.plugin_id, "starting console bridge");

    let bridge = BridgeServiceBuilder::new().config(config).build(StdoutHost)?;
    bridge.start().await;
    bridge.on_server_startup().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_control(line) {
                    Some(control) => run_control(&bridge, control).await,
                    None => {
                        if !bridge.on_server_line(line, true, Some(CONSOLE_SENDER)).await {
                            println!("(not sent: {})", bridge.connection_state());
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    bridge.shutdown().await;
    Ok(())
}
