//! schedsim - run an ephemeral control plane until interrupted.
//!
//! Starts etcd, the API server and the scheduler from the binary assets
//! directory, writes a kubeconfig for external tools, and keeps everything
//! up until SIGINT or SIGTERM. A second signal exits immediately.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use schedsim_core::Shutdown;
use schedsim_plane::{ControlPlane, LocalSubsystems, PlaneConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ephemeral Kubernetes control plane for scheduling simulations.
#[derive(Parser, Debug)]
#[command(name = "schedsim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the etcd, kube-apiserver and kube-scheduler binaries.
    #[arg(long, env = "BINARY_ASSETS_DIR")]
    binary_assets_dir: Option<PathBuf>,

    /// Where to write the kubeconfig.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Record API server requests to an audit log.
    #[arg(long, default_value = "false")]
    audit_logs: bool,

    /// Scheduler configuration file.
    #[arg(long, env = "SCHEDSIM_SCHEDULER_CONFIG")]
    scheduler_config: Option<PathBuf>,

    /// Scheduler binary, if not the one in the assets directory.
    #[arg(long, env = "SCHEDSIM_SCHEDULER_BINARY")]
    scheduler_binary: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> PlaneConfig {
        let mut config = PlaneConfig::from_env();
        if let Some(dir) = self.binary_assets_dir {
            config.binary_assets_dir = dir;
        }
        if let Some(path) = self.kubeconfig {
            config.kubeconfig_path = path;
        }
        config.audit_logs |= self.audit_logs;
        if self.scheduler_config.is_some() {
            config.scheduler_config_path = self.scheduler_config;
        }
        if self.scheduler_binary.is_some() {
            config.scheduler_binary = self.scheduler_binary;
        }
        config
    }
}

/// Trigger `shutdown` on the first signal and exit on the second.
fn spawn_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received, stopping control plane");
        shutdown.trigger();

        wait_for_signal().await;
        tracing::warn!("Second signal received, exiting immediately");
        std::process::exit(1);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, only SIGINT stops the plane");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,schedsim=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config();
    tracing::info!(
        binary_assets_dir = %config.binary_assets_dir.display(),
        kubeconfig = %config.kubeconfig_path.display(),
        audit_logs = config.audit_logs,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let subsystems = LocalSubsystems::new().context("creating working directory")?;
    let mut plane = ControlPlane::new(config, subsystems, shutdown.clone());

    if let Err(e) = plane.start().await {
        tracing::error!(error = %e, "Control plane failed to start");
        plane.stop().await;
        std::process::exit(1);
    }

    tracing::info!("Control plane running, press Ctrl-C to stop");
    shutdown.signal().triggered().await;

    plane.stop().await;
    tracing::info!("schedsim stopped");
    Ok(())
}
