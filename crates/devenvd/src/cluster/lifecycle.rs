//! Cluster create, destroy, and status against one injected identity.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::{resolver, ObservedClusterStatus};
use crate::config::EnvConfig;
use crate::errors::ClusterError;
use crate::process::{CommandRunner, CommandSpec};

/// Diagnostic phrasings the lifecycle tool emits when asked to delete a
/// cluster it does not know. These make destroy idempotent; anything else
/// fails closed so a real failure is never masked as "already gone".
pub const NOT_FOUND_PHRASES: &[&str] = &[
    "unknown cluster",
    "could not find cluster",
    "no kind clusters found",
];

/// Lifecycle operations for a single named cluster.
///
/// Owns no state beyond its configuration; every status query re-evaluates
/// from the tool's registry and a live probe.
pub struct ClusterLifecycle {
    config: EnvConfig,
    runner: Arc<dyn CommandRunner>,
}

impl ClusterLifecycle {
    pub fn new(config: EnvConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Name of the managed cluster.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.config.cluster_name
    }

    /// Create the cluster.
    ///
    /// Returns once the lifecycle tool accepts the cluster; readiness is a
    /// separate concern, observed by polling [`Self::status`]. Must not run
    /// concurrently with [`Self::destroy`]; callers serialize through the
    /// operation tracker.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::CreateFailed`] with the tool's full output on
    /// a non-zero exit, or [`ClusterError::Tool`] when the tool could not be
    /// invoked at all.
    pub async fn create(&self, cancel: &CancellationToken) -> Result<(), ClusterError> {
        let mut args = vec![
            "create".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            self.config.cluster_name.clone(),
            "--kubeconfig".to_string(),
            self.config.kubeconfig_path.to_string_lossy().into_owned(),
        ];
        if let Some(bringup) = &self.config.bringup_config {
            args.push("--config".to_string());
            args.push(bringup.to_string_lossy().into_owned());
        }

        info!("creating cluster {}", self.config.cluster_name);
        let spec = CommandSpec::new(&self.config.kind_program, args);
        let output = self.runner.run(spec, cancel).await?;

        if !output.success() {
            return Err(ClusterError::CreateFailed {
                output: output.combined(),
            });
        }

        info!("cluster {} create accepted", self.config.cluster_name);
        Ok(())
    }

    /// Destroy the cluster. Destroying a cluster that does not exist is a
    /// success, detected via [`NOT_FOUND_PHRASES`].
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::DestroyFailed`] with the tool's full output
    /// on any other non-zero exit, or [`ClusterError::Tool`] when the tool
    /// could not be invoked at all.
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<(), ClusterError> {
        info!("destroying cluster {}", self.config.cluster_name);
        let spec = CommandSpec::new(
            &self.config.kind_program,
            [
                "delete",
                "cluster",
                "--name",
                self.config.cluster_name.as_str(),
            ],
        );
        let output = self.runner.run(spec, cancel).await?;

        if output.success() {
            info!("cluster {} destroyed", self.config.cluster_name);
            return Ok(());
        }

        let stderr = output.stderr.to_lowercase();
        if NOT_FOUND_PHRASES
            .iter()
            .any(|phrase| stderr.contains(phrase))
        {
            info!("cluster {} already absent", self.config.cluster_name);
            return Ok(());
        }

        Err(ClusterError::DestroyFailed {
            output: output.combined(),
        })
    }

    /// Observed state of the cluster.
    ///
    /// Completes even when the tooling is broken or the network is down;
    /// those conditions surface as [`ObservedClusterStatus::Error`]. Every
    /// external call is bounded by the configured probe timeout.
    pub async fn status(&self, cancel: &CancellationToken) -> ObservedClusterStatus {
        let status = resolver::resolve(self.runner.as_ref(), &self.config, cancel).await;
        debug!("cluster {} observed {status}", self.config.cluster_name);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProcessError;
    use crate::process::{CommandOutput, MockCommandRunner};

    fn lifecycle(mock: MockCommandRunner) -> ClusterLifecycle {
        ClusterLifecycle::new(EnvConfig::new("konflux"), Arc::new(mock))
    }

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
        }
    }

    #[tokio::test]
    async fn test_create_passes_name_and_kubeconfig() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|spec, _| {
                spec.program == "kind"
                    && spec.args.contains(&"konflux".to_string())
                    && spec.args.contains(&"--kubeconfig".to_string())
                    && !spec.args.contains(&"--config".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(output(0, "", "")));

        lifecycle(mock)
            .create(&CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_passes_bringup_config_when_set() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|spec, _| {
                spec.args.contains(&"--config".to_string())
                    && spec.args.contains(&"/etc/devenvd/kind.yaml".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(output(0, "", "")));

        let config =
            EnvConfig::new("konflux").with_bringup_config("/etc/devenvd/kind.yaml");
        ClusterLifecycle::new(config, Arc::new(mock))
            .create(&CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_failure_carries_full_output() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().times(1).returning(|_, _| {
            Ok(output(
                1,
                "Creating cluster \"konflux\" ...",
                "ERROR: node(s) already exist for a cluster with the name \"konflux\"",
            ))
        });

        let err = lifecycle(mock)
            .create(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ClusterError::CreateFailed { output } => {
                assert!(output.contains("Creating cluster"));
                assert!(output.contains("node(s) already exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_destroy_succeeds_on_zero_exit() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|spec, _| spec.args.first().map(String::as_str) == Some("delete"))
            .times(1)
            .returning(|_, _| Ok(output(0, "", "Deleting cluster \"konflux\" ...")));

        lifecycle(mock)
            .destroy(&CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_for_each_known_phrasing() {
        for phrase in NOT_FOUND_PHRASES {
            let stderr = format!("ERROR: {phrase} \"konflux\"");
            let mut mock = MockCommandRunner::new();
            mock.expect_run()
                .times(1)
                .returning(move |_, _| Ok(output(1, "", &stderr)));

            lifecycle(mock)
                .destroy(&CancellationToken::new())
                .await
                .unwrap_or_else(|err| panic!("phrase {phrase:?} not treated as absent: {err}"));
        }
    }

    #[tokio::test]
    async fn test_destroy_fails_closed_on_unrecognized_output() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().times(1).returning(|_, _| {
            Ok(output(1, "", "ERROR: failed to delete nodes: docker not running"))
        });

        let err = lifecycle(mock)
            .destroy(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ClusterError::DestroyFailed { output } => {
                assert!(output.contains("docker not running"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_destroy_surfaces_tool_unavailable() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().times(1).returning(|spec, _| {
            Err(ProcessError::Spawn {
                program: spec.program,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });

        let err = lifecycle(mock)
            .destroy(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Tool(_)));
    }
}
