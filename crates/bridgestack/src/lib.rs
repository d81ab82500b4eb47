// ABOUTME: bridgestack library with supervisor, status, and init modules.
// ABOUTME: Re-exports for programmatic use of the stack supervisor.

pub mod init;
pub mod status;
pub mod supervisor;

pub use bridgestack_core::Config;
pub use init::run_init;
pub use status::StatusReport;
pub use supervisor::{
    BrowserOpener, InstanceLock, PortLock, ProcessTable, RunOutcome, RunReport, ServiceStatus,
    Supervisor, SupervisorState, Warning,
};

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Options for running the supervisor
pub struct SupervisorOptions {
    /// Path to configuration file
    pub config_path: Option<PathBuf>,
    /// Skip opening the dashboard in a browser
    pub no_browser: bool,
}

/// Load the config at `path`, or the default location.
///
/// A missing default file yields the built-in layout; an explicit path must exist.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Config::load(path);
    }

    let default_path = Config::default_path()?;
    if default_path.exists() {
        Config::load(&default_path)
    } else {
        tracing::info!(
            path = %default_path.display(),
            "No config file found, using built-in defaults"
        );
        Ok(Config::default())
    }
}

/// Run the supervisor until a stop signal arrives
pub async fn run_supervisor(options: SupervisorOptions) -> Result<RunReport> {
    // Installed before anything is spawned so an early Ctrl+C still tears down.
    let stop = supervisor::signal::stop_signal();

    let mut config = load_config(options.config_path.as_deref())?;
    if options.no_browser {
        config.open_browser = false;
    }

    let report = Supervisor::new(config).run(stop).await?;

    for warning in &report.warnings {
        tracing::warn!(warning = %warning, "Completed with warning");
    }
    tracing::info!(
        outcome = ?report.outcome,
        exit_code = report.exit_code,
        "Supervisor finished"
    );

    Ok(report)
}

/// Probe the lock and every service once
pub async fn run_status(config_path: Option<&Path>) -> Result<StatusReport> {
    let config = load_config(config_path)?;
    let lock = PortLock::new(config.lock_port);
    Ok(status::collect(&config, &lock).await)
}
