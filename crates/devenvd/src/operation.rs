//! Single-slot tracking of long-running operations.
//!
//! At most one named operation is in flight per environment. The tracker is
//! the only concurrency gate: cluster mutations go through it too, so a
//! rebuild can never race a destroy on the same cluster.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::errors::TrackerError;

/// Named long-running operations performed against an environment.
///
/// Cluster mutation is tracked through the same slot as the build-level
/// operations so create and destroy exclude each other and everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreatingCluster,
    DestroyingCluster,
    Rebuilding,
    SmokeTesting,
    DeployingMetrics,
    DeployingMpc,
}

impl Operation {
    /// Wire name of the operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatingCluster => "creating_cluster",
            Self::DestroyingCluster => "destroying_cluster",
            Self::Rebuilding => "rebuilding",
            Self::SmokeTesting => "smoke_testing",
            Self::DeployingMetrics => "deploying_metrics",
            Self::DeployingMpc => "deploying_mpc",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "creating_cluster" => Some(Self::CreatingCluster),
            "destroying_cluster" => Some(Self::DestroyingCluster),
            "rebuilding" => Some(Self::Rebuilding),
            "smoke_testing" => Some(Self::SmokeTesting),
            "deploying_metrics" => Some(Self::DeployingMetrics),
            "deploying_mpc" => Some(Self::DeployingMpc),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation field of the environment snapshot.
///
/// Serializes as the bare operation wire name, or `"idle"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationStatus {
    #[default]
    Idle,
    Busy(Operation),
}

const STATUS_NAMES: &[&str] = &[
    "idle",
    "creating_cluster",
    "destroying_cluster",
    "rebuilding",
    "smoke_testing",
    "deploying_metrics",
    "deploying_mpc",
];

impl OperationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy(op) => op.as_str(),
        }
    }

    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name == "idle" {
            return Ok(Self::Idle);
        }
        Operation::parse(&name)
            .map(Self::Busy)
            .ok_or_else(|| de::Error::unknown_variant(&name, STATUS_NAMES))
    }
}

#[derive(Debug, Default)]
struct Slot {
    status: OperationStatus,
    last_error: Option<String>,
}

/// Per-environment operation state machine.
///
/// `begin` is the sole admission gate; `complete` always returns the slot to
/// idle so an unhandled work failure can never wedge the environment.
#[derive(Debug, Default)]
pub struct OperationTracker {
    slot: Mutex<Slot>,
}

impl OperationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `op`.
    ///
    /// Atomically transitions idle to busy and clears the stored error from
    /// the previous operation.
    pub fn begin(&self, op: Operation) -> Result<(), TrackerError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let OperationStatus::Busy(current) = slot.status {
            return Err(TrackerError::AlreadyRunning { current });
        }
        slot.status = OperationStatus::Busy(op);
        slot.last_error = None;
        debug!("operation started: {op}");
        Ok(())
    }

    /// Release the slot, recording the failure message if the work failed.
    ///
    /// The stored error survives until the next `begin`.
    pub fn complete(&self, op: Operation, error: Option<String>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.status != OperationStatus::Busy(op) {
            warn!(
                "completing {op} but tracker holds {}",
                slot.status
            );
        }
        slot.status = OperationStatus::Idle;
        match error {
            Some(message) => {
                warn!("operation failed: {op}: {message}");
                slot.last_error = Some(message);
            }
            None => {
                debug!("operation finished: {op}");
                slot.last_error = None;
            }
        }
    }

    /// Non-blocking read of the slot.
    #[must_use]
    pub fn current(&self) -> (OperationStatus, Option<String>) {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        (slot.status, slot.last_error.clone())
    }
}
