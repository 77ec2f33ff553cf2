//! Daemon configuration.
//!
//! One daemon instance manages exactly one cluster identity. The identity and
//! every tool location are injected here at construction rather than baked
//! into call sites.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for readiness probes and registry queries.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a managed development environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Name of the managed cluster (e.g., "konflux").
    pub cluster_name: String,
    /// Lifecycle tool binary (kind or a compatible drop-in).
    pub kind_program: String,
    /// kubectl binary used for readiness probes.
    pub kubectl_program: String,
    /// Base directory holding lifecycle-tool config files.
    pub base_dir: PathBuf,
    /// Optional cluster bring-up config passed to the create command.
    /// Parsing the file is the lifecycle tool's job.
    pub bringup_config: Option<PathBuf>,
    /// Where the lifecycle tool writes the cluster kubeconfig.
    pub kubeconfig_path: PathBuf,
    /// Upper bound on any single status/readiness query.
    pub probe_timeout: Duration,
}

impl EnvConfig {
    /// Create a configuration for the given cluster name with default
    /// tool locations.
    #[must_use]
    pub fn new(cluster_name: impl Into<String>) -> Self {
        let cluster_name = cluster_name.into();
        let base_dir = PathBuf::from("/tmp/devenvd");
        let kubeconfig_path = base_dir.join(format!("{cluster_name}-kubeconfig"));
        Self {
            cluster_name,
            kind_program: "kind".to_string(),
            kubectl_program: "kubectl".to_string(),
            base_dir,
            bringup_config: None,
            kubeconfig_path,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Set the base directory for lifecycle-tool config files.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Set the cluster bring-up config file.
    #[must_use]
    pub fn with_bringup_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.bringup_config = Some(path.into());
        self
    }

    /// Set the kubeconfig path.
    #[must_use]
    pub fn with_kubeconfig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig_path = path.into();
        self
    }

    /// Set the probe timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Probe timeout in whole seconds, as kubectl's `--request-timeout`
    /// expects. Sub-second configurations round up to one second.
    #[must_use]
    pub fn probe_timeout_secs(&self) -> u64 {
        self.probe_timeout.as_secs().max(1)
    }
}
