// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet daemon for ZKTeco fingerprint terminals: health probing, device
//! metadata sync, attendance ingestion, interactive enrollment, and
//! per-tenant real-time fan-out.

pub mod cache;
pub mod classify;
pub mod config;
pub mod device;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod hub;
pub mod info;
pub mod loops;
pub mod pipeline;
pub mod repo;
pub mod seal;
pub mod state;
pub mod sync;
pub mod transport;


use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the daemon until shutdown.
pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let simulation = config.simulation_mode;
    let state = Arc::new(AppState::with_postgres(config, db, shutdown.clone()));

    loops::spawn_all(&state);

    // First Ctrl-C cancels the loops and drains the server.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    if simulation {
        tracing::warn!("simulation mode: device I/O is stubbed, no sockets will be opened");
    }
    tracing::info!("fleetd listening on {addr}");

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    state.pool.close_all().await;
    Ok(())
}
