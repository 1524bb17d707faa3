//! Announce Client - example of a device joining a sync peer.
//!
//! This example demonstrates:
//! - Building a session from flags or a TOML config file
//! - Connecting and authenticating in one chained task with `start()`
//! - Announcing a clipboard item and serving it on request
//! - Listing the peer's items and pulling one with `request_sync()`
//! - Observing announcements and disconnects
//!
//! # Running
//!
//! ```text
//! RUST_LOG=clipwire=debug cargo run --example announce -- \
//!     --host 127.0.0.1 --port 6000 --account alice --device laptop \
//!     --secret s3cret --text "hello from the laptop"
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clipwire::{Credentials, Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "announce", about = "Announce a clipboard item to a sync peer")]
struct Args {
    /// TOML session config; flags override its endpoint
    #[arg(long, env = "CLIPWIRE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, env = "CLIPWIRE_ACCOUNT")]
    account: String,

    #[arg(long, env = "CLIPWIRE_DEVICE")]
    device: String,

    #[arg(long, env = "CLIPWIRE_SECRET")]
    secret: String,

    /// Text to announce
    #[arg(long, default_value = "hello")]
    text: String,

    /// Content id to announce under
    #[arg(long, default_value_t = 1)]
    content_id: i64,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clipwire=info,announce=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let session = Session::builder().config(config).build()?;

    session.on_content_available(|item| {
        info!(
            "Peer announced {} ({}): {}",
            item.content_id,
            item.content_types.join(", "),
            item.description
        );
    });
    session.on_disconnect(|d| {
        if d.local {
            info!("Disconnected");
        } else {
            warn!("Connection lost: {}", d.reason);
        }
    });

    let credentials = Credentials::from_phrases(&args.account, &args.device, &args.secret);
    if !session.start(credentials).get().await? {
        warn!("Could not connect and authenticate to {}", session.endpoint());
        return Ok(());
    }
    session.wake();

    let sent = session
        .notify_available(args.content_id, vec!["text/plain".into()], args.text)
        .get()
        .await?;
    info!("Announced {}: {}", args.content_id, sent);

    let index = session.refresh_index().get().await?;
    info!("Peer lists {} items", index.len());
    if let Some(first) = index.first() {
        match session.request_sync(first.content_id).get().await? {
            Some(bytes) => info!(
                "Pulled {}: {}",
                first.content_id,
                String::from_utf8_lossy(&bytes)
            ),
            None => info!("Peer no longer has {}", first.content_id),
        }
    }

    info!("Serving until Ctrl-C");
    tokio::signal::ctrl_c().await?;
    session.dispose();
    Ok(())
}
