// ABOUTME: Shared types and configuration for bridgestack.
// ABOUTME: Contains config parsing, service descriptors, and error types.

pub mod config;
pub mod error;
pub mod service;

pub use config::{
    Config, DependencyConfig, MonitorConfig, ReadinessConfig, ShutdownConfig, DEFAULT_LOCK_PORT,
};
pub use error::{ConfigError, LaunchError, LockError};
pub use service::{HealthCheck, ServiceSpec};
