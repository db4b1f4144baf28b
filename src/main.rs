//! palaverd - Palaver Chat Daemon
//!
//! A real-time messaging engine: WebSocket gateway, per-room actors, a
//! moderated message pipeline, and an auxiliary HTTP surface for history
//! and statistics.

mod auth;
mod authz;
mod config;
mod db;
mod error;
mod http;
mod limits;
mod metrics;
mod moderation;
mod network;
mod presence;
mod router;
mod state;

use crate::config::Config;
use crate::db::{CacheStore, Database};
use crate::network::Gateway;
use crate::state::{Hub, HubParams, RoomCommand};
use palaver_proto::ErrorCode;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format)
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    // Initialize tracing based on config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        crate::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        crate::config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    // Validate configuration
    if let Err(errors) = crate::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(server = %config.server.name, "Starting palaverd");

    // Refuse to run with a placeholder signing key: tokens signed with a
    // guessable key let anyone mint a principal.
    if config.auth.signing_key.to_lowercase().contains("changeme")
        || config.auth.signing_key.chars().all(|c| c == '0')
    {
        error!("FATAL: Placeholder auth.signing_key detected!");
        error!("  Generate a secret with: openssl rand -hex 32");
        error!("  and set it in config.toml under [auth], or via PALAVERD_SIGNING_KEY.");
        return Err(anyhow::anyhow!("Refusing to start with a placeholder signing key"));
    }

    // Initialize database (primary + optional replica)
    let db = Database::new(
        &config.database.url,
        config.database.replica_url.as_deref(),
        config.database.pool_size,
    )
    .await?;

    // Cache tier: its own store when configured, the primary otherwise.
    let cache = match &config.cache.url {
        Some(url) => {
            let cache_db = Database::new(url, None, config.database.pool_size).await?;
            CacheStore::new(cache_db.pool().clone())
        }
        None => CacheStore::new(db.pool().clone()),
    };

    // Create the Hub (shared state)
    let hub = Hub::new(HubParams {
        config: &config,
        db: db.clone(),
        cache,
    })?;
    info!("Hub initialized");

    // Restore rate-limit quotas from the last snapshot (best-effort).
    match hub.cache.load_recent_quota(60_000).await {
        Ok(rows) if !rows.is_empty() => {
            hub.limits.restore(&rows);
            info!(principals = rows.len(), "Rate-limit quotas restored from snapshot");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load rate-limit snapshot");
        }
    }

    // Prime the revocation cache before accepting connections.
    hub.verifier.refresh_revocations().await;

    // Spawn signal handler for graceful shutdown
    {
        let shutdown_tx = hub.lifecycle.shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT - initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM - initiating graceful shutdown"),
            }

            let _ = shutdown_tx.send(());
        });
    }

    // Typing-indicator expiry sweep (every second; indicators live 5s).
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1));
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for (room_id, principal_id) in hub.presence.sweep_typing() {
                            let display_name = hub
                                .connections
                                .of_principal(principal_id)
                                .first()
                                .map(|h| h.principal.display_name.clone())
                                .unwrap_or_default();
                            let event = Arc::new(palaver_proto::ServerEvent::Typing(
                                palaver_proto::TypingData {
                                    room_id,
                                    principal_id,
                                    display_name,
                                    typing: false,
                                },
                            ));
                            hub.rooms.notify_resident(
                                room_id,
                                RoomCommand::Broadcast { event, staff_only: false, exclude: None },
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Mute expiry sweep (every 15 seconds).
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(15));
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match hub.db.memberships().expire_mutes().await {
                            Ok(expired) => {
                                for (room_id, principal_id) in expired {
                                    hub.rooms.notify_resident(
                                        room_id,
                                        RoomCommand::MuteExpired { principal_id },
                                    );
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Mute expiry sweep failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Invitation expiry sweep (every minute).
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match hub.db.invitations().expire_stale().await {
                            Ok(expired) if expired > 0 => {
                                info!(expired = expired, "Stale invitations expired");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "Invitation expiry sweep failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Room inactivity sweep (hourly): no messages for N days flips a room
    // to inactive; the first message flips it back.
    {
        let hub = Arc::clone(&hub);
        let inactive_after_days = config.rooms.inactive_after_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match hub.db.rooms().sweep_inactive(inactive_after_days).await {
                            Ok(flipped) if flipped > 0 => {
                                info!(rooms = flipped, "Idle rooms marked inactive");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "Inactivity sweep failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Cache snapshots: rate-limit windows and presence (best-effort).
    {
        let hub = Arc::clone(&hub);
        let snapshot_secs = config.cache.snapshot_secs.max(5);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(snapshot_secs));
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let window = hub.limits.take_window();
                        if !window.is_empty() {
                            hub.cache.save_quota_window(&window).await;
                        }
                        hub.cache.save_presence(&hub.presence.all_online()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        // One final snapshot so a clean restart keeps quotas.
                        let window = hub.limits.take_window();
                        hub.cache.save_quota_window(&window).await;
                        break;
                    }
                }
            }
        });
    }

    // Revocation cache refresh + principal status sweep: suspended or
    // banned principals lose their open connections.
    {
        let hub = Arc::clone(&hub);
        let refresh_secs = config.auth.revocation_refresh_secs.max(5);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(refresh_secs));
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        hub.verifier.refresh_revocations().await;

                        let connected = hub.connections.connected_principals();
                        if connected.is_empty() {
                            continue;
                        }
                        match hub.db.principals().inactive_among(&connected).await {
                            Ok(inactive) => {
                                for principal_id in inactive {
                                    hub.verifier.invalidate(principal_id);
                                    hub.connections.close_principal(
                                        principal_id,
                                        ErrorCode::Unauthenticated,
                                        "account is no longer in good standing",
                                    );
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Principal status sweep failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Readiness prober: the primary being unreachable flips /readyz.
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
            let mut consecutive_failures = 0u32;
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if hub.db.ping().await {
                            consecutive_failures = 0;
                            hub.set_ready(true);
                        } else {
                            consecutive_failures += 1;
                            if consecutive_failures >= 3 {
                                error!("Persistence primary unreachable - failing readiness");
                                hub.set_ready(false);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Moderation filter housekeeping + rate limiter pruning (every 5 min).
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            let mut shutdown_rx = hub.shutdown_signal();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        hub.moderation.maintain();
                        hub.limits.cleanup();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Metrics + auxiliary API on the HTTP listener.
    metrics::init();
    let http_listener = tokio::net::TcpListener::bind(config.server.http_listen).await?;
    info!(addr = %http_listener.local_addr()?, "HTTP surface listening");
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            if let Err(e) = http::run_http_server(http_listener, hub).await {
                error!(error = %e, "HTTP server error");
            }
        });
    }

    // Start the Gateway
    let gateway = Gateway::bind(config.server.listen, Arc::clone(&hub)).await?;
    gateway.run().await?;

    info!("Gateway stopped, waiting for tasks to finish...");
    // Give tasks a moment to flush buffers and close connections
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    Ok(())
}
