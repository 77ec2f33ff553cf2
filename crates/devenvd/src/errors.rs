//! Error types for the environment daemon.
//!
//! Lifecycle command failures always carry the full captured diagnostic
//! output. Raw process exit codes never cross the client boundary.

use std::time::Duration;

use thiserror::Error;

use crate::cluster::ObservedClusterStatus;
use crate::operation::Operation;

/// Errors from running an external command.
///
/// A non-zero exit is not an error at this level; it is returned as data so
/// callers can classify the failure themselves.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command could not be spawned or waited on
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command exceeded its timeout and was killed
    #[error("command timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The caller canceled the command and it was killed
    #[error("command canceled")]
    Canceled,
}

/// Errors from cluster-mutating lifecycle commands.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The create command exited non-zero
    #[error("cluster create failed: {output}")]
    CreateFailed { output: String },

    /// The delete command exited non-zero with unrecognized diagnostics
    #[error("cluster destroy failed: {output}")]
    DestroyFailed { output: String },

    /// The lifecycle tool itself could not be invoked
    #[error("lifecycle tool unavailable: {0}")]
    Tool(#[from] ProcessError),
}

/// Errors from the operation tracker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// Another operation holds the single in-flight slot
    #[error("operation already running: {current}")]
    AlreadyRunning { current: Operation },
}

/// Errors surfaced by the environment orchestrator.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The environment cannot be mutated while an operation is in flight
    #[error("operation in progress: {current}")]
    OperationInProgress { current: Operation },

    /// The cluster did not reach the running state within the wait bound
    #[error("cluster not running after {waited:?} (last observed: {last})")]
    NotReady {
        waited: Duration,
        last: ObservedClusterStatus,
    },

    /// The caller canceled the request
    #[error("canceled")]
    Canceled,

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}
