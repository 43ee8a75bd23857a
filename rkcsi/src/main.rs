//! rkcsi: node plugin daemon for local ephemeral volumes.
//!
//! Serves the Identity, Controller and Node services of
//! [`libephemeral::EphemeralDriver`] over QUIC and announces itself through a
//! registration file until it receives SIGINT or SIGTERM.

mod cli;
mod registration;
mod tls;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libephemeral::fs::Executor;
use libephemeral::{CsiServer, EphemeralDriver};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, LogFormat};
use crate::registration::Registration;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("rkcsi failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.driver_config();
    let tls_config = tls::server_config(&cli.tls_cert, &cli.tls_key)?;

    let driver = EphemeralDriver::new(config, Executor::host())
        .await
        .context("Failed to start driver")?;
    info!(
        driver = %driver.config().driver_name,
        node_id = %driver.config().node_id,
        base_dir = %driver.config().base_dir.display(),
        volumes = driver.manager().volume_count(),
        "driver ready"
    );

    let server = Arc::new(
        CsiServer::new(cli.endpoint, tls_config, Arc::new(driver))
            .with_context(|| format!("Failed to listen on {}", cli.endpoint))?,
    );
    let bound = server
        .endpoint()
        .local_addr()
        .context("Failed to read listener address")?;
    let endpoint = registration::advertised_endpoint(cli.advertise_addr, bound);
    if endpoint.ip().is_unspecified() {
        warn!(%endpoint, "registering a wildcard address, set --advertise-addr to a routable one");
    }

    let registration = Registration {
        driver_name: cli.driver_name.clone(),
        endpoint,
        node_id: cli.node_id.clone(),
    }
    .write(&cli.registration_dir)?;
    info!(path = %registration.display(), %endpoint, "plugin registered");

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve().await })
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    server.close();
    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "server stopped with error"),
        Err(e) => warn!(error = %e, "server task failed"),
    }
    server.endpoint().wait_idle().await;

    registration::remove(&registration)?;
    info!("rkcsi stopped");
    Ok(())
}
