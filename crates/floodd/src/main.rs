//! Flood Daemon (floodd)
//!
//! One peer of a collaborative editing mesh. Edits typed on stdin are
//! broadcast to every peer and delivered in causal order.
//!
//! # Usage
//!
//! ```bash
//! # Start a new document on 127.0.0.1:7420
//! floodd --alias alice --title "shopping list"
//!
//! # Join it from another terminal
//! floodd --port 7421 --alias bob --join 127.0.0.1:7420
//!
//! # With configuration file
//! floodd --config /etc/flood/floodd.toml
//! ```

mod config;
mod console;
mod model;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flood_core::{Session, SiteId};
use flood_protocol::EngineConfig;
use flood_transport::{Node, NodeConfig, TransportError};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use config::{Config, Settings};
use model::ListDocument;

/// Flood Daemon - causally ordered collaborative editing peer
#[derive(Parser, Debug)]
#[command(name = "floodd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address [default: 127.0.0.1]
    #[arg(long, env = "FLOOD_BIND")]
    bind: Option<String>,

    /// Port to listen on, 0 for any free port [default: 7420]
    #[arg(short, long, env = "FLOOD_PORT")]
    port: Option<u16>,

    /// Site id announced to peers [default: the listen address]
    #[arg(long, env = "FLOOD_SITE")]
    site: Option<String>,

    /// Display name [default: random]
    #[arg(short, long, env = "FLOOD_ALIAS")]
    alias: Option<String>,

    /// Document title, replaced by the host's title on join
    #[arg(long, env = "FLOOD_TITLE")]
    title: Option<String>,

    /// Join the document of the peer at this address
    #[arg(short, long, env = "FLOOD_JOIN")]
    join: Option<String>,

    /// Seconds a joining peer may take to become ready [default: 120]
    #[arg(long, env = "FLOOD_RELAY_TIMEOUT")]
    relay_timeout: Option<u64>,

    /// Configuration file path
    #[arg(short, long, env = "FLOOD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, env = "FLOOD_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// The command line as the topmost configuration layer
    fn overrides(&self) -> Config {
        Config {
            bind: self.bind.clone(),
            port: self.port,
            site: self.site.clone(),
            alias: self.alias.clone(),
            title: self.title.clone(),
            join: self.join.clone(),
            relay_timeout: self.relay_timeout,
            relay_sweep: None,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    let settings = Settings::resolve(file.merge_with(args.overrides()))?;

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(settings.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner();

    let listener = TcpListener::bind((settings.bind.as_str(), settings.port))
        .await
        .with_context(|| format!("binding {}:{}", settings.bind, settings.port))?;
    let site = match settings.site.clone() {
        Some(site) => site,
        None => SiteId::new(listener.local_addr()?.to_string())?,
    };

    let session = Arc::new(Session::new(settings.alias.clone(), settings.title.clone()));
    let document = Arc::new(Mutex::new(ListDocument::new()));

    let node_config = NodeConfig {
        engine: EngineConfig {
            relay_timeout: settings.relay_timeout,
        },
        relay_sweep: settings.relay_sweep,
    };
    let mut node = Node::new(site.clone(), session.clone(), node_config);
    model::track(&mut node, document.clone(), session.clone());
    let handle = node.spawn(listener);

    info!(
        site = %site,
        alias = %settings.alias,
        relay_timeout = ?settings.relay_timeout,
        "Starting Flood daemon"
    );

    if let Some(peer) = &settings.join {
        let host = handle
            .join(peer)
            .await
            .with_context(|| format!("joining {}", peer))?;
        info!(host = %host, "Join request sent");
    }

    let console = tokio::spawn(console::run(handle.clone(), document, session));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted");
        }
        result = console => {
            if let Err(e) = result? {
                warn!(error = %e, "Console stopped");
            }
        }
    }

    info!("Shutting down...");
    match tokio::time::timeout(Duration::from_secs(5), handle.shutdown()).await {
        Ok(Ok(())) | Ok(Err(TransportError::NodeClosed)) => {}
        Ok(Err(e)) => warn!(error = %e, "Unclean shutdown"),
        Err(_) => warn!("Timed out announcing disconnect"),
    }
    // writer tasks flush queued frames after the node closes their queues
    tokio::time::sleep(Duration::from_millis(100)).await;

    // a pending stdin read would otherwise hold up runtime shutdown
    std::process::exit(0)
}

fn print_banner() {
    println!(
        r#"
  ╔═╗╦  ╔═╗╔═╗╔╦╗
  ╠╣ ║  ║ ║║ ║ ║║
  ╚  ╩═╝╚═╝╚═╝═╩╝
  Causal broadcast for collaborative editing
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
