#![warn(clippy::pedantic)]
// Allow common pedantic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

//! # devenvd
//!
//! Local daemon that provisions and supervises a single kind-based Konflux
//! development cluster and the long-running operations performed against it
//! (rebuild, smoke test, metrics deployment).
//!
//! This crate provides:
//! - External command execution with cancellation and output capture
//! - Cluster lifecycle management (create, destroy, observed status)
//! - Single-slot tracking of long-running operations per environment
//! - The `DevEnvironment` aggregate served to IDE clients
//!
//! ## Example
//!
//! ```rust,ignore
//! use devenvd::{EnvConfig, EnvironmentOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = EnvironmentOrchestrator::new(EnvConfig::new("konflux"));
//! orchestrator.create_environment(&CancellationToken::new()).await?;
//! let snapshot = orchestrator.status();
//! ```

// Daemon configuration
pub mod config;

// Error types
pub mod errors;

// External process execution
pub mod process;

// Cluster lifecycle and state resolution
pub mod cluster;

// Long-running operation tracking
pub mod operation;

// Environment aggregate and orchestrator
pub mod environment;

// Re-export key types for convenience
pub use cluster::{ClusterLifecycle, ObservedClusterStatus};
pub use config::EnvConfig;
pub use environment::{
    ClusterDeclaredStatus, ClusterState, DevEnvironment, EnvironmentOrchestrator, FeatureState,
    MpcDeployment, RepositoryState,
};
pub use errors::{ClusterError, EnvError, ProcessError, TrackerError};
pub use operation::{Operation, OperationStatus, OperationTracker};
pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
