// ABOUTME: Starts the external terminal application when it is not already running.
// ABOUTME: Probes the OS process list and launches the app detached from the supervisor.

use bridgestack_core::{DependencyConfig, LaunchError};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use sysinfo::System;

/// Source of truth for "is a process with this image name alive".
pub trait ProcessTable: Send + Sync {
    fn is_running(&self, image_name: &str) -> bool;
}

/// Process table backed by the live OS process list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn is_running(&self, image_name: &str) -> bool {
        let mut system = System::new();
        system.refresh_processes();
        system
            .processes()
            .values()
            .any(|process| process.name() == image_name)
    }
}

/// Executable plus arguments for the dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Build from configuration; `None` when no executable is configured.
    pub fn from_config(config: &DependencyConfig) -> Option<Self> {
        config
            .path_expanded()
            .map(|program| Self::new(program).with_args(config.args.clone()))
    }
}

/// What `ensure_running` found or did.
#[derive(Debug)]
pub enum DependencyOutcome {
    /// A matching process was already in the process list; nothing was launched.
    AlreadyRunning,
    /// Launched and seen in the process list after the ready delay.
    Launched,
    /// Launched but not (yet) visible in the process list after the ready delay.
    LaunchedUnconfirmed,
    /// The launch itself failed.
    LaunchFailed(LaunchError),
}

impl DependencyOutcome {
    /// Whether the dependency is believed ready. Callers proceed either way.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            DependencyOutcome::AlreadyRunning | DependencyOutcome::Launched
        )
    }
}

pub struct DependencyLauncher<'a> {
    processes: &'a dyn ProcessTable,
}

impl<'a> DependencyLauncher<'a> {
    pub fn new(processes: &'a dyn ProcessTable) -> Self {
        Self { processes }
    }

    /// Launch `command` unless `process_name` is already running, then give it
    /// `ready_delay` to initialize.
    pub async fn ensure_running(
        &self,
        process_name: &str,
        command: &LaunchCommand,
        ready_delay: Duration,
    ) -> DependencyOutcome {
        if self.processes.is_running(process_name) {
            tracing::info!(process = %process_name, "Dependency already running");
            return DependencyOutcome::AlreadyRunning;
        }

        tracing::info!(
            process = %process_name,
            program = %command.program.display(),
            "Launching dependency"
        );

        if let Err(e) = spawn_detached(command) {
            tracing::warn!(error = %e, "Dependency launch failed, continuing without it");
            return DependencyOutcome::LaunchFailed(e);
        }

        if !ready_delay.is_zero() {
            tracing::info!(
                delay_secs = ready_delay.as_secs_f64(),
                "Waiting for dependency to initialize"
            );
            tokio::time::sleep(ready_delay).await;
        }

        if self.processes.is_running(process_name) {
            DependencyOutcome::Launched
        } else {
            tracing::warn!(
                process = %process_name,
                "Dependency not visible in process list yet, continuing"
            );
            DependencyOutcome::LaunchedUnconfirmed
        }
    }
}

/// Spawn a process that outlives the supervisor.
///
/// The child gets its own process group (console on Windows) and no inherited
/// stdio. A background thread reaps it if it exits while we are still alive.
fn spawn_detached(command: &LaunchCommand) -> Result<(), LaunchError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| LaunchError::DependencyLaunchFailed {
            path: command.program.clone(),
            reason: e.to_string(),
        })?;

    tracing::info!(pid = child.id(), "Dependency launched");
    std::thread::spawn(move || {
        let _ = child.wait();
    });

    Ok(())
}
