//! Classification of the cluster's observed state.
//!
//! Two independent signals feed the classification: membership in the
//! lifecycle tool's cluster registry, and a readiness probe against the
//! control plane. Registry absence must short-circuit before any probe runs;
//! probing a nonexistent cluster fails in a way indistinguishable from a
//! cluster that is still coming up.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::ObservedClusterStatus;
use crate::config::EnvConfig;
use crate::errors::ProcessError;
use crate::process::{CommandRunner, CommandSpec};

/// Resolve the cluster's observed state.
///
/// Never hangs: every external call is bounded by the configured probe
/// timeout, and tooling breakage degrades to `Error` instead of an error
/// return so status paths always complete.
pub(crate) async fn resolve(
    runner: &dyn CommandRunner,
    config: &EnvConfig,
    cancel: &CancellationToken,
) -> ObservedClusterStatus {
    let listing = CommandSpec::new(&config.kind_program, ["get", "clusters"])
        .with_timeout(config.probe_timeout);

    let output = match runner.run(listing, cancel).await {
        Ok(output) => output,
        Err(err) => {
            warn!("cluster registry query failed: {err}");
            return ObservedClusterStatus::Error;
        }
    };
    if !output.success() {
        warn!("cluster registry query exited non-zero: {}", output.combined());
        return ObservedClusterStatus::Error;
    }

    let registered = output
        .stdout
        .lines()
        .any(|line| line.trim() == config.cluster_name);
    if !registered {
        debug!("cluster {} not in registry", config.cluster_name);
        return ObservedClusterStatus::NotRunning;
    }

    probe_control_plane(runner, config, cancel).await
}

/// Readiness probe against the API server of a registered cluster.
async fn probe_control_plane(
    runner: &dyn CommandRunner,
    config: &EnvConfig,
    cancel: &CancellationToken,
) -> ObservedClusterStatus {
    let kubeconfig = config.kubeconfig_path.to_string_lossy().into_owned();
    let request_timeout = format!("{}s", config.probe_timeout_secs());
    let probe = CommandSpec::new(
        &config.kubectl_program,
        [
            "--kubeconfig",
            kubeconfig.as_str(),
            "get",
            "--raw",
            "/readyz",
            "--request-timeout",
            request_timeout.as_str(),
        ],
    )
    .with_timeout(config.probe_timeout);

    match runner.run(probe, cancel).await {
        Ok(output) if output.success() => ObservedClusterStatus::Running,
        Ok(output) => {
            // Registered but not serving: the expected transient state
            // during the minutes-long bring-up window.
            debug!(
                "control plane not ready for {}: {}",
                config.cluster_name,
                output.combined()
            );
            ObservedClusterStatus::Initializing
        }
        Err(ProcessError::TimedOut { after }) => {
            debug!(
                "readiness probe timed out after {after:?} for {}",
                config.cluster_name
            );
            ObservedClusterStatus::Initializing
        }
        Err(err) => {
            warn!("readiness probe could not run: {err}");
            ObservedClusterStatus::Error
        }
    }
}
