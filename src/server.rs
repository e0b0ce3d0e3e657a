//! Entry point: configuration, store handles, background tasks, serving.
//!
//! Lifecycle: connect both stores at startup, serve until the shutdown
//! signal, then stop the reaper and drain the database pool. All state a
//! request can reach is built here and injected; nothing module-level.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::oneshot;

use crate::config::{Cli, Config, REAP_INTERVAL_SECS};
use crate::db::Db;
use crate::ephemeral::Ephemeral;
use crate::fabric::Fabric;
use crate::router::build_router;
use crate::state::AppState;
use crate::ulog;

/// Parse configuration, connect the stores, and serve.
pub async fn run() {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);
    crate::logging::init(&config.log_level);

    ulog!("umbra starting");

    let db = Db::connect(&config.db_url)
        .await
        .expect("failed to connect to database");
    db.init_schema()
        .await
        .expect("failed to initialize database schema");
    let ephemeral = Ephemeral::connect(&config.redis_url)
        .await
        .expect("failed to connect to ephemeral store");

    let token_secret = match &config.token_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            ulog!("no token secret configured; generated one for this process only");
            let mut secret = vec![0u8; 32];
            OsRng.fill_bytes(&mut secret);
            secret
        }
    };

    let port = config.port;
    let production_cors = config.domain.is_some();

    let state = AppState {
        db: db.clone(),
        ephemeral,
        fabric: Arc::new(Fabric::new()),
        token_secret: Arc::new(token_secret),
        config: Arc::new(config),
    };

    let (reaper_shutdown_tx, reaper_shutdown_rx) = oneshot::channel();
    start_reaper_task(
        db.clone(),
        Duration::from_secs(REAP_INTERVAL_SECS),
        reaper_shutdown_rx,
    );

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|error| panic!("failed to bind port {port}: {error}"));
    ulog!(
        "umbra listening on port {port} ({} CORS)",
        if production_cors { "single-origin" } else { "permissive" }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = reaper_shutdown_tx.send(());
    db.close().await;
    ulog!("umbra stopped");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Periodically delete expired queue rows and revocation records. The sweep
/// is idempotent, so the schedule only affects how long tombstones linger.
pub fn start_reaper_task(db: Db, interval: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match db.reap().await {
                        Ok((0, 0)) => {}
                        Ok((messages, tokens)) => ulog!(
                            "reaper: removed {messages} expired message(s), {tokens} expired revocation record(s)"
                        ),
                        Err(e) => ulog!("reaper: sweep failed: {e}"),
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });
}
