//! Operator CLI for the development environment daemon.
//!
//! Drives one environment's cluster lifecycle and prints the environment
//! snapshot as JSON. Long-lived commands honor Ctrl-C by cancelling the
//! in-flight lifecycle command instead of leaking the child process.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use devenvd::{EnvConfig, EnvironmentOrchestrator, ObservedClusterStatus};

/// Local Konflux development environment daemon
#[derive(Parser)]
#[command(name = "devenvd")]
#[command(about = "Provision and supervise a local Konflux development cluster")]
#[command(version)]
struct Cli {
    /// Name of the managed cluster
    #[arg(long, default_value = "konflux", global = true)]
    cluster: String,

    /// Base directory for lifecycle tool config files
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Cluster bring-up config passed to the create command
    #[arg(long, global = true)]
    bringup_config: Option<PathBuf>,

    /// Where the lifecycle tool writes the cluster kubeconfig
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Readiness probe timeout in seconds
    #[arg(long, default_value = "5", global = true)]
    probe_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the environment snapshot and observed cluster status as JSON
    Status,
    /// Create the development cluster
    Create {
        /// Block until the control plane reports ready
        #[arg(long)]
        wait: bool,

        /// Seconds to wait for readiness before giving up
        #[arg(long, default_value = "300")]
        wait_timeout: u64,
    },
    /// Destroy the development cluster
    Destroy,
    /// Poll the observed cluster status until it reports running
    Watch {
        /// Poll interval in seconds
        #[arg(long, default_value = "1")]
        interval: u64,

        /// Seconds to poll before giving up
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
}

fn build_config(cli: &Cli) -> EnvConfig {
    let mut config = EnvConfig::new(cli.cluster.clone())
        .with_probe_timeout(Duration::from_secs(cli.probe_timeout));
    if let Some(base_dir) = &cli.base_dir {
        config = config.with_base_dir(base_dir.clone());
    }
    if let Some(bringup) = &cli.bringup_config {
        config = config.with_bringup_config(bringup.clone());
    }
    if let Some(kubeconfig) = &cli.kubeconfig {
        config = config.with_kubeconfig_path(kubeconfig.clone());
    }
    config
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let orchestrator = EnvironmentOrchestrator::new(build_config(&cli));
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Status => {
            let snapshot = orchestrator.status();
            let observed = orchestrator.cluster_status(&cancel).await;
            let report = serde_json::json!({
                "environment": snapshot,
                "observed_cluster_status": observed,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing status report")?
            );
        }
        Commands::Create { wait, wait_timeout } => {
            orchestrator.create_environment(&cancel).await?;
            if wait {
                orchestrator
                    .wait_until_running(
                        Duration::from_secs(1),
                        Duration::from_secs(wait_timeout),
                        &cancel,
                    )
                    .await?;
                info!("cluster is running");
            }
        }
        Commands::Destroy => {
            orchestrator.destroy_environment(&cancel).await?;
            info!("cluster destroyed");
        }
        Commands::Watch { interval, timeout } => {
            watch(&orchestrator, interval, timeout, &cancel).await?;
        }
    }

    Ok(())
}

/// Poll the observed status, printing each transition, until running.
async fn watch(
    orchestrator: &EnvironmentOrchestrator,
    interval: u64,
    timeout: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
    let mut previous: Option<ObservedClusterStatus> = None;

    loop {
        let observed = orchestrator.cluster_status(cancel).await;
        if previous != Some(observed) {
            println!("{observed}");
            previous = Some(observed);
        }
        if observed == ObservedClusterStatus::Running {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("cluster not running after {timeout}s (last observed: {observed})");
        }

        tokio::select! {
            () = cancel.cancelled() => anyhow::bail!("canceled"),
            () = tokio::time::sleep(Duration::from_secs(interval)) => {}
        }
    }
}
