//! swim-daemon: Runs one cluster member over WebSocket.
//!
//! Joins through the configured contact points (or seeds a new cluster when
//! there are none), logs membership changes, and leaves gracefully on Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swim_core::MembershipChange;
use swim_daemon::{DaemonConfig, NodeRuntime, Overrides, WebSocketTransport};

#[derive(Parser, Debug)]
#[command(name = "swim-daemon")]
#[command(about = "SWIM cluster membership daemon")]
struct Args {
    /// Path to a YAML config file
    #[arg(short, long, env = "SWIM_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on for protocol traffic
    #[arg(short, long)]
    listen: Option<String>,

    /// Address other members should use to reach us
    #[arg(long)]
    advertise: Option<String>,

    /// Member ID, 16 hex chars or a decimal node number (random if not provided)
    #[arg(long)]
    member_id: Option<String>,

    /// Contact point to join through (repeatable)
    #[arg(long = "contact")]
    contacts: Vec<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,swim_daemon=debug,swim_core=debug"
    } else {
        "info,swim_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = DaemonConfig::load(args.config.as_deref())?.apply(Overrides {
        listen: args.listen,
        advertise: args.advertise,
        member_id: args.member_id,
        contacts: args.contacts,
    });
    let member_id = config.resolve_member_id()?;

    info!("Starting swim-daemon");
    info!("Member ID: {}", member_id);
    info!("Listen address: {}", config.listen);

    let transport = WebSocketTransport::bind(&config.listen, config.advertise.clone())
        .await
        .context("failed to start transport")?;
    let node = NodeRuntime::spawn(
        member_id,
        Arc::new(transport),
        config.swim.clone(),
        config.poll_limit,
    );

    let _changes = node.subscribe(|change| match change {
        MembershipChange::MemberAdded(m) => {
            info!("Member joined: {} at {}", m.id(), m.info.address)
        }
        MembershipChange::MemberRemoved(m) => info!("Member gone: {} ({:?})", m.id(), m.status),
        MembershipChange::ReachabilityChanged(m) => info!("Member {} is {:?}", m.id(), m.status),
        MembershipChange::MetadataChanged(m) => {
            info!("Member {} properties: {:?}", m.id(), m.properties)
        }
    });

    // Without contact points we seed a new cluster by joining ourselves
    let contacts = if config.contacts.is_empty() {
        vec![node.address().to_string()]
    } else {
        config.contacts.clone()
    };

    tokio::select! {
        result = node.join(contacts) => {
            result.context("failed to join cluster")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received before joining");
            node.shutdown().await;
            return Ok(());
        }
    }

    info!("Daemon running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = node.leave().await {
        error!("Failed to leave cleanly: {}", e);
    }
    node.shutdown().await;

    info!("Shutting down");
    Ok(())
}
