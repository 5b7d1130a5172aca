mod config;
mod metrics;
mod scheduler;
mod shutdown;
mod transport;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::shutdown::{shutdown_signal, Shutdown};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use swarm_core::Simulation;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    tracing::info!(config = ?config, "Loaded configuration");

    let sim = Simulation::new(config.sim_config()).context("Invalid simulation configuration")?;
    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);
    let shutdown = Shutdown::new();

    // OS signals flip the same flag a dropped operator does.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received.");
            shutdown.trigger();
        });
    }

    let metrics_handle = config.metrics_listen_addr.map(|addr| {
        let router = metrics.router();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
            tracing::info!(addr = %addr, "Metrics server started");
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await?;
            Ok::<(), anyhow::Error>(())
        })
    });

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind operator listener on {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Waiting for operator connection");

    let Some((stream, peer)) = transport::accept_operator(&listener, &shutdown).await? else {
        tracing::info!("Shut down before an operator connected");
        return Ok(());
    };

    let (sim_queues, operator_queues) = scheduler::queues();
    let scheduler_handle = tokio::spawn(scheduler::run(
        sim,
        sim_queues,
        metrics.clone(),
        shutdown.clone(),
    ));
    let session_handle = tokio::spawn(transport::run_session(
        listener,
        stream,
        peer,
        operator_queues,
        metrics.clone(),
        shutdown.clone(),
        config.write_timeout(),
    ));

    let (scheduler_res, session_res) = tokio::join!(scheduler_handle, session_handle);
    if let Err(e) = scheduler_res {
        tracing::error!(error = %e, "Scheduler task failed.");
    }
    if let Err(e) = session_res {
        tracing::error!(error = %e, "Operator session task failed.");
    }

    // Sessions end on their own; make sure everything else follows.
    shutdown.trigger();
    if let Some(handle) = metrics_handle {
        match handle.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Metrics server task failed."),
            Err(e) => tracing::error!(error = %e, "Metrics server task panicked."),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Simulator shut down gracefully.");
    Ok(())
}
