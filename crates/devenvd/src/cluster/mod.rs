//! Cluster lifecycle management and state resolution.
//!
//! The managed cluster is owned by an external lifecycle tool (kind). This
//! module drives it through create and destroy and classifies its true
//! operational state from the tool's registry plus a control-plane
//! readiness probe.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod lifecycle;
pub mod resolver;

pub use lifecycle::{ClusterLifecycle, NOT_FOUND_PHRASES};

/// Observed operational state of the cluster.
///
/// `Error` means the tooling itself was unusable, not that the cluster is
/// unhealthy. It is never terminal; the next query re-evaluates from
/// scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedClusterStatus {
    /// Not present in the lifecycle tool's registry.
    NotRunning,
    /// Registered, but the control plane is not serving yet.
    Initializing,
    /// Registered and the control plane answers readiness probes.
    Running,
    /// The lifecycle tooling could not be queried.
    Error,
}

impl ObservedClusterStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRunning => "not_running",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ObservedClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
