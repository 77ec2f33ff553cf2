//! The environment aggregate and its orchestrator.
//!
//! One daemon instance owns exactly one [`DevEnvironment`] for the lifetime
//! of a session. The orchestrator binds the cluster lifecycle and the
//! operation tracker behind a single cloneable handle that request handlers
//! and detached operation tasks share.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cluster::{ClusterLifecycle, ObservedClusterStatus};
use crate::config::EnvConfig;
use crate::errors::{EnvError, TrackerError};
use crate::operation::{Operation, OperationStatus, OperationTracker};
use crate::process::{CommandRunner, ProcessRunner};

/// Declared deployment posture of the cluster, distinct from the observed
/// status the resolver reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterDeclaredStatus {
    Running,
    Paused,
    Stopped,
}

/// Identity and posture of the managed cluster.
///
/// Exactly one exists per environment. Absent until create succeeds,
/// discarded on successful destroy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub status: ClusterDeclaredStatus,
    /// Written by the cluster tooling; read-only here.
    pub kubeconfig_path: PathBuf,
    pub konflux_deployed: bool,
}

/// Branch and sync info for one tracked repository. Owned by the Git
/// integration; the daemon only stores and forwards it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryState {
    pub name: String,
    pub branch: String,
    pub last_synced: Option<DateTime<Utc>>,
    pub dirty: bool,
}

/// Record of the monitored application's deployment into the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpcDeployment {
    pub deployed_at: DateTime<Utc>,
    pub image: Option<String>,
}

/// Optional feature toggles selected at environment setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureState {
    pub metrics_dashboard: bool,
    pub providers: Vec<String>,
}

/// The aggregate served to clients.
///
/// `operation_status` and `last_operation_error` are owned by the operation
/// tracker; snapshots compose them in at read time so a poll can never see
/// a torn pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevEnvironment {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub cluster: Option<ClusterState>,
    pub repositories: BTreeMap<String, RepositoryState>,
    pub mpc_deployment: Option<MpcDeployment>,
    pub features: FeatureState,
    pub operation_status: OperationStatus,
    pub last_operation_error: Option<String>,
}

impl DevEnvironment {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: now,
            last_active: now,
            cluster: None,
            repositories: BTreeMap::new(),
            mpc_deployment: None,
            features: FeatureState::default(),
            operation_status: OperationStatus::Idle,
            last_operation_error: None,
        }
    }
}

struct Inner {
    lifecycle: ClusterLifecycle,
    tracker: OperationTracker,
    env: RwLock<DevEnvironment>,
    kubeconfig_path: PathBuf,
}

/// Composition root: one per-session handle over the cluster lifecycle, the
/// operation tracker, and the environment record.
///
/// Cloning is cheap; detached operation tasks hold a clone so they can
/// report completion and mutate the record.
#[derive(Clone)]
pub struct EnvironmentOrchestrator {
    inner: Arc<Inner>,
}

impl EnvironmentOrchestrator {
    /// Create an orchestrator backed by the real process runner.
    #[must_use]
    pub fn new(config: EnvConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner::new()))
    }

    /// Create an orchestrator with an injected command runner.
    #[must_use]
    pub fn with_runner(config: EnvConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let kubeconfig_path = config.kubeconfig_path.clone();
        let inner = Inner {
            lifecycle: ClusterLifecycle::new(config, runner),
            tracker: OperationTracker::new(),
            env: RwLock::new(DevEnvironment::new()),
            kubeconfig_path,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Snapshot of the environment.
    ///
    /// Always succeeds and never touches external tooling; reads compose
    /// the stored record with the tracker's current slot. Bumps
    /// `last_active`.
    pub fn status(&self) -> DevEnvironment {
        let (operation_status, last_operation_error) = self.inner.tracker.current();
        let mut env = self
            .inner
            .env
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        env.last_active = Utc::now();
        let mut snapshot = env.clone();
        drop(env);
        snapshot.operation_status = operation_status;
        snapshot.last_operation_error = last_operation_error;
        snapshot
    }

    /// Observed cluster state, bounded by the configured probe timeout.
    pub async fn cluster_status(&self, cancel: &CancellationToken) -> ObservedClusterStatus {
        self.inner.lifecycle.status(cancel).await
    }

    /// Start a named long-running operation.
    ///
    /// Claims the tracker slot and, if granted, runs `work` on a detached
    /// task. The slot is released exactly once whether the work succeeds,
    /// fails, panics, or is aborted with the runtime; a failure message
    /// lands in `last_operation_error` and is never propagated out of the
    /// supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::AlreadyRunning`] (as [`EnvError::Tracker`])
    /// when another operation holds the slot.
    pub fn start_operation<F>(&self, op: Operation, work: F) -> Result<(), EnvError>
    where
        F: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.inner.tracker.begin(op)?;
        self.touch();

        let this = self.clone();
        let handle = tokio::spawn(work);
        tokio::spawn(async move {
            let outcome = match handle.await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(join_err) if join_err.is_panic() => {
                    error!("{op} worker panicked");
                    Some(format!("{op} worker panicked"))
                }
                Err(_) => Some(format!("{op} worker aborted")),
            };
            this.inner.tracker.complete(op, outcome);
        });

        Ok(())
    }

    /// Create the environment's cluster, tracked as an operation.
    ///
    /// Returns once the lifecycle tool accepts the cluster and the record
    /// is stored; readiness is observed by polling
    /// [`Self::cluster_status`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::OperationInProgress`] when any operation is in
    /// flight, or the underlying [`crate::errors::ClusterError`].
    pub async fn create_environment(&self, cancel: &CancellationToken) -> Result<(), EnvError> {
        self.begin_cluster_mutation(Operation::CreatingCluster)?;

        let result = self.inner.lifecycle.create(cancel).await;
        if result.is_ok() {
            let mut env = self
                .inner
                .env
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            env.cluster = Some(ClusterState {
                name: self.inner.lifecycle.cluster_name().to_string(),
                created_at: Utc::now(),
                status: ClusterDeclaredStatus::Running,
                kubeconfig_path: self.inner.kubeconfig_path.clone(),
                konflux_deployed: false,
            });
            env.last_active = Utc::now();
        }

        self.inner.tracker.complete(
            Operation::CreatingCluster,
            result.as_ref().err().map(ToString::to_string),
        );
        result.map_err(EnvError::from)
    }

    /// Destroy the environment's cluster, tracked as an operation.
    ///
    /// Idempotent: destroying an absent cluster succeeds. A successful
    /// destroy discards the cluster record and the MPC deployment.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::OperationInProgress`] when any operation is in
    /// flight, or the underlying [`crate::errors::ClusterError`].
    pub async fn destroy_environment(&self, cancel: &CancellationToken) -> Result<(), EnvError> {
        self.begin_cluster_mutation(Operation::DestroyingCluster)?;

        let result = self.inner.lifecycle.destroy(cancel).await;
        if result.is_ok() {
            let mut env = self
                .inner
                .env
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            env.cluster = None;
            env.mpc_deployment = None;
            env.last_active = Utc::now();
            info!("environment cluster discarded");
        }

        self.inner.tracker.complete(
            Operation::DestroyingCluster,
            result.as_ref().err().map(ToString::to_string),
        );
        result.map_err(EnvError::from)
    }

    /// Wait until the cluster reports running.
    ///
    /// Polls [`Self::cluster_status`] at `interval`. Observed `Error`
    /// states are retried like any other non-running state; the resolver
    /// trusts no cached result.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::NotReady`] when `timeout` elapses first, or
    /// [`EnvError::Canceled`] when the caller cancels the wait.
    pub async fn wait_until_running(
        &self,
        interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), EnvError> {
        let started = tokio::time::Instant::now();
        let mut last;

        loop {
            if cancel.is_cancelled() {
                return Err(EnvError::Canceled);
            }

            last = self.cluster_status(cancel).await;
            if last == ObservedClusterStatus::Running {
                return Ok(());
            }
            if started.elapsed() > timeout {
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(EnvError::Canceled),
                () = tokio::time::sleep(interval) => {}
            }
        }

        warn!("cluster did not reach running, last observed {last}");
        Err(EnvError::NotReady {
            waited: started.elapsed(),
            last,
        })
    }

    /// Record a successful MPC deployment.
    pub fn record_mpc_deployment(&self, deployment: MpcDeployment) {
        let mut env = self
            .inner
            .env
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        env.mpc_deployment = Some(deployment);
        env.last_active = Utc::now();
    }

    /// Mark the metrics dashboard feature enabled.
    pub fn enable_metrics_dashboard(&self) {
        let mut env = self
            .inner
            .env
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        env.features.metrics_dashboard = true;
        env.last_active = Utc::now();
    }

    /// Store forwarded repository state, keyed by repository name.
    pub fn update_repository(&self, repository: RepositoryState) {
        let mut env = self
            .inner
            .env
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        env.repositories
            .insert(repository.name.clone(), repository);
        env.last_active = Utc::now();
    }

    /// Mark Konflux as deployed into the cluster, if one exists.
    pub fn mark_konflux_deployed(&self) {
        let mut env = self
            .inner
            .env
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cluster) = env.cluster.as_mut() {
            cluster.konflux_deployed = true;
        }
        env.last_active = Utc::now();
    }

    fn begin_cluster_mutation(&self, op: Operation) -> Result<(), EnvError> {
        self.inner.tracker.begin(op).map_err(
            |TrackerError::AlreadyRunning { current }| EnvError::OperationInProgress { current },
        )?;
        self.touch();
        Ok(())
    }

    fn touch(&self) {
        let mut env = self
            .inner
            .env
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        env.last_active = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClusterError;
    use crate::process::{CommandOutput, MockCommandRunner};
    use anyhow::anyhow;
    use std::sync::Arc;

    fn orchestrator(mock: MockCommandRunner) -> EnvironmentOrchestrator {
        EnvironmentOrchestrator::with_runner(EnvConfig::new("konflux"), Arc::new(mock))
    }

    fn ok_exit() -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        }
    }

    async fn wait_until_idle(orchestrator: &EnvironmentOrchestrator) -> DevEnvironment {
        for _ in 0..200 {
            let snapshot = orchestrator.status();
            if snapshot.operation_status.is_idle() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("operation never settled");
    }

    #[tokio::test]
    async fn test_fresh_environment_snapshot() {
        let snapshot = orchestrator(MockCommandRunner::new()).status();
        assert!(!snapshot.session_id.is_empty());
        assert!(snapshot.cluster.is_none());
        assert!(snapshot.repositories.is_empty());
        assert!(snapshot.mpc_deployment.is_none());
        assert_eq!(snapshot.operation_status, OperationStatus::Idle);
        assert!(snapshot.last_operation_error.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_serializes_with_contract_field_names() {
        let snapshot = orchestrator(MockCommandRunner::new()).status();
        let value = serde_json::to_value(&snapshot).unwrap();
        for field in [
            "session_id",
            "created_at",
            "last_active",
            "cluster",
            "repositories",
            "mpc_deployment",
            "features",
            "operation_status",
            "last_operation_error",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value["operation_status"], "idle");
    }

    #[tokio::test]
    async fn test_failing_operation_records_error_then_next_begin_clears_it() {
        let orchestrator = orchestrator(MockCommandRunner::new());

        orchestrator
            .start_operation(Operation::Rebuilding, async {
                Err(anyhow!("image build failed"))
            })
            .unwrap();

        let settled = wait_until_idle(&orchestrator).await;
        assert_eq!(
            settled.last_operation_error.as_deref(),
            Some("image build failed")
        );

        orchestrator
            .start_operation(Operation::SmokeTesting, async { Ok(()) })
            .unwrap();
        let snapshot = orchestrator.status();
        assert!(snapshot.last_operation_error.is_none());
        wait_until_idle(&orchestrator).await;
    }

    #[tokio::test]
    async fn test_second_operation_rejected_while_first_runs() {
        let orchestrator = orchestrator(MockCommandRunner::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let release = gate.clone();

        orchestrator
            .start_operation(Operation::Rebuilding, async move {
                release.notified().await;
                Ok(())
            })
            .unwrap();

        let err = orchestrator
            .start_operation(Operation::SmokeTesting, async { Ok(()) })
            .unwrap_err();
        assert!(matches!(
            err,
            EnvError::Tracker(TrackerError::AlreadyRunning {
                current: Operation::Rebuilding
            })
        ));

        gate.notify_one();
        wait_until_idle(&orchestrator).await;
    }

    #[tokio::test]
    async fn test_panicking_worker_still_releases_slot() {
        let orchestrator = orchestrator(MockCommandRunner::new());

        orchestrator
            .start_operation(Operation::DeployingMetrics, async {
                panic!("unexpected");
            })
            .unwrap();

        let settled = wait_until_idle(&orchestrator).await;
        assert_eq!(
            settled.last_operation_error.as_deref(),
            Some("deploying_metrics worker panicked")
        );
    }

    #[tokio::test]
    async fn test_create_stores_cluster_record() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|spec, _| spec.args.first().map(String::as_str) == Some("create"))
            .times(1)
            .returning(|_, _| Ok(ok_exit()));

        let orchestrator = orchestrator(mock);
        orchestrator
            .create_environment(&CancellationToken::new())
            .await
            .unwrap();

        let snapshot = orchestrator.status();
        let cluster = snapshot.cluster.expect("cluster record stored");
        assert_eq!(cluster.name, "konflux");
        assert_eq!(cluster.status, ClusterDeclaredStatus::Running);
        assert!(!cluster.konflux_deployed);
        assert_eq!(snapshot.operation_status, OperationStatus::Idle);

        orchestrator.mark_konflux_deployed();
        let cluster = orchestrator.status().cluster.unwrap();
        assert!(cluster.konflux_deployed);
    }

    #[tokio::test]
    async fn test_create_failure_returns_error_and_records_it() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().times(1).returning(|_, _| {
            Ok(CommandOutput {
                stderr: "ERROR: docker not running".to_string(),
                exit_code: Some(1),
                ..CommandOutput::default()
            })
        });

        let orchestrator = orchestrator(mock);
        let err = orchestrator
            .create_environment(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnvError::Cluster(ClusterError::CreateFailed { .. })
        ));

        let snapshot = orchestrator.status();
        assert!(snapshot.cluster.is_none());
        assert_eq!(snapshot.operation_status, OperationStatus::Idle);
        assert!(snapshot
            .last_operation_error
            .as_deref()
            .unwrap()
            .contains("docker not running"));
    }

    #[tokio::test]
    async fn test_destroy_rejected_while_operation_in_flight_then_succeeds() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|spec, _| spec.args.first().map(String::as_str) == Some("delete"))
            .times(1)
            .returning(|_, _| Ok(ok_exit()));

        let orchestrator = orchestrator(mock);
        let gate = Arc::new(tokio::sync::Notify::new());
        let release = gate.clone();

        orchestrator
            .start_operation(Operation::Rebuilding, async move {
                release.notified().await;
                Ok(())
            })
            .unwrap();

        let err = orchestrator
            .destroy_environment(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnvError::OperationInProgress {
                current: Operation::Rebuilding
            }
        ));

        gate.notify_one();
        wait_until_idle(&orchestrator).await;

        orchestrator.record_mpc_deployment(MpcDeployment {
            deployed_at: Utc::now(),
            image: None,
        });
        orchestrator
            .destroy_environment(&CancellationToken::new())
            .await
            .unwrap();

        let snapshot = orchestrator.status();
        assert!(snapshot.cluster.is_none());
        assert!(snapshot.mpc_deployment.is_none());
    }

    #[tokio::test]
    async fn test_mutators_update_record() {
        let orchestrator = orchestrator(MockCommandRunner::new());

        orchestrator.update_repository(RepositoryState {
            name: "application-service".to_string(),
            branch: "main".to_string(),
            last_synced: None,
            dirty: false,
        });
        orchestrator.enable_metrics_dashboard();

        let snapshot = orchestrator.status();
        assert!(snapshot.repositories.contains_key("application-service"));
        assert!(snapshot.features.metrics_dashboard);
    }

    #[tokio::test]
    async fn test_status_bumps_last_active() {
        let orchestrator = orchestrator(MockCommandRunner::new());
        let first = orchestrator.status().last_active;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = orchestrator.status().last_active;
        assert!(second > first);
    }
}
