// ABOUTME: Error types shared by the bridgestack crates.
// ABOUTME: Separates lock, launch, and configuration failures so callers can branch on them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from claiming the single-instance lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another supervisor holds the lock. Not a fault: callers attach instead.
    #[error("another instance is already running (lock port {port} is taken)")]
    AlreadyRunning { port: u16 },

    /// The lock resource could not be bound for a reason other than contention.
    #[error("failed to bind lock port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, LockError::AlreadyRunning { .. })
    }
}

/// Errors from starting or stopping child processes.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The external dependency application could not be launched.
    #[error("dependency launch failed for {path}: {reason}")]
    DependencyLaunchFailed { path: PathBuf, reason: String },

    /// A service process could not be spawned.
    #[error("failed to spawn service '{service}': {reason}")]
    ServiceSpawnFailed { service: String, reason: String },

    /// A service process could not be terminated.
    #[error("failed to terminate service '{service}': {reason}")]
    ShutdownTerminationFailed { service: String, reason: String },
}

/// Errors from validating a loaded configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("duplicate service name '{0}'")]
    DuplicateService(String),

    #[error("service '{service}' health check port {port} collides with the lock port")]
    LockPortCollision { service: String, port: u16 },

    #[error("services '{first}' and '{second}' share health check port {port}")]
    PortCollision {
        first: String,
        second: String,
        port: u16,
    },
}
