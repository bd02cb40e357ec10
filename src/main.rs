//! klyra - headless state-sync client
//!
//! Joins a Klyra server, keeps remote entities interpolated at the render
//! rate, and flushes batched intents until interrupted or kicked.

mod config;

use anyhow::Result;
use clap::Parser;
use config::{ClientConfig, DEFAULT_CONFIG_PATH};
use klyra_client::{SessionNotice, SyncClient};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless Klyra state-sync client", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Server address, overriding the config file
    #[arg(long)]
    server: Option<SocketAddr>,
    /// Display name, overriding the config file
    #[arg(long)]
    username: Option<String>,
    /// Stop after this many render frames instead of running until Ctrl-C
    #[arg(long)]
    frames: Option<u64>,
    /// Write the effective configuration to this path and exit
    #[arg(long)]
    save_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins, then the config file, then WARN.
    let fallback = ClientConfig::read(&args.config)
        .ok()
        .and_then(|cfg| cfg.log_filter)
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .init();

    info!("Starting klyra v{}", env!("CARGO_PKG_VERSION"));

    // Read again now that logging is up, so a bad file is reported.
    let mut cfg = ClientConfig::load_from_path(&args.config);
    if let Some(server) = args.server {
        cfg.network.server_addr = server;
    }
    if let Some(username) = args.username {
        cfg.network.username = username;
    }

    if let Some(path) = args.save_config {
        cfg.save_to_path(&path)?;
        info!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    run(cfg, args.frames).await
}

async fn run(cfg: ClientConfig, frame_limit: Option<u64>) -> Result<()> {
    let mut client = SyncClient::new(cfg.sync_config());
    let welcome = client.connect(&cfg.network).await?;
    info!(
        "Joined {} as {} (room {:?})",
        cfg.network.server_addr, welcome.player_id, welcome.room_id
    );

    if let Some(kind) = cfg.pet.as_deref() {
        if client.equip_pet(kind) {
            info!("Equipped {}", kind);
        }
    }

    let render_hz = cfg.render_hz.max(1);
    let mut render = interval(Duration::from_secs(1) / render_hz);
    render.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame = Instant::now();
    let mut frames: u64 = 0;

    loop {
        tokio::select! {
            _ = render.tick() => {
                if let Some(notice) = client.pump() {
                    report(notice);
                    break;
                }
                let now = Instant::now();
                let collected = client.frame(now - last_frame, &[]);
                last_frame = now;
                frames += 1;

                if !collected.is_empty() {
                    debug!("Companion collected {:?}", collected);
                }
                if frames % u64::from(render_hz) == 0 {
                    debug!(
                        avatars = client.avatars().len(),
                        creatures = client.creatures().len(),
                        pets = client.pets().len(),
                        queued = client.batcher().len(),
                        "frame {}",
                        frames
                    );
                }
                if frame_limit.is_some_and(|limit| frames >= limit) {
                    info!("Frame limit reached");
                    break;
                }
            }
            notice = client.step() => {
                if let Some(notice) = notice {
                    report(notice);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Log the lifecycle notice that ended the run.
fn report(notice: SessionNotice) {
    match notice {
        SessionNotice::Kicked(reason) => warn!("Kicked: {}", reason),
        SessionNotice::Shutdown(message) => warn!("Server shutting down: {}", message),
        SessionNotice::ServerDisconnect(reason) => info!("Server closed the session: {}", reason),
        SessionNotice::Disconnected(reason) => warn!("Connection lost: {}", reason),
    }
}
