// ABOUTME: Spawns and manages bridge and dashboard child processes.
// ABOUTME: Every child is tracked through its own handle; teardown never matches by name.

use super::health::{self, PROBE_TIMEOUT};
use bridgestack_core::{LaunchError, ReadinessConfig, ServiceSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// How long to wait for a process to disappear after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Running,
    Exited(i32),
    Failed(String),
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }

    /// Failed to spawn, never became ready, or exited with a non-zero code.
    pub fn is_failure(&self) -> bool {
        match self {
            ServiceStatus::Failed(_) => true,
            ServiceStatus::Exited(code) => *code != 0,
            _ => false,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Exited(code) => write!(f, "exited ({})", code),
            ServiceStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Snapshot of a service handle, safe to keep after the handle is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub pid: Option<u32>,
    pub status: ServiceStatus,
    pub started_at: DateTime<Utc>,
    pub restarts: u32,
}

/// Live record of one spawned service.
pub struct ServiceHandle {
    spec: ServiceSpec,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    status: ServiceStatus,
    restarts: u32,
}

impl ServiceHandle {
    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> &ServiceStatus {
        &self.status
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Whether the launcher still owns a process for this handle
    pub fn has_process(&self) -> bool {
        self.child.is_some()
    }

    pub fn report(&self) -> ServiceReport {
        ServiceReport {
            name: self.spec.name.clone(),
            pid: self.pid,
            status: self.status.clone(),
            started_at: self.started_at,
            restarts: self.restarts,
        }
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.spec.name)
            .field("pid", &self.pid)
            .field("status", &self.status)
            .field("started_at", &self.started_at)
            .field("restarts", &self.restarts)
            .finish()
    }
}

/// Starts services in declared order and owns their processes until `stop_all`.
pub struct ServiceLauncher {
    handles: Vec<ServiceHandle>,
    readiness: ReadinessConfig,
    grace: Duration,
    env: Vec<(String, String)>,
}

impl ServiceLauncher {
    pub fn new(readiness: ReadinessConfig, grace: Duration) -> Self {
        Self {
            handles: Vec::new(),
            readiness,
            grace,
            env: Vec::new(),
        }
    }

    /// Environment variable passed to every spawned service
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn handles(&self) -> &[ServiceHandle] {
        &self.handles
    }

    pub fn handle(&self, name: &str) -> Option<&ServiceHandle> {
        self.handles.iter().find(|h| h.spec.name == name)
    }

    /// Spawn one service and wait for its readiness probe, if it has one.
    ///
    /// Spawn failures do not return an error: the handle comes back `Failed`.
    pub async fn start(&mut self, spec: ServiceSpec) -> &ServiceHandle {
        let index = self.handles.len();
        let handle = self.spawn_handle(spec, 0);
        self.handles.push(handle);
        self.settle(index).await;
        &self.handles[index]
    }

    /// Start every spec in order, pausing each spec's start delay before the next.
    ///
    /// `on_started` sees each handle right after its start attempt.
    pub async fn start_all<F>(&mut self, specs: &[ServiceSpec], mut on_started: F)
    where
        F: FnMut(&ServiceHandle),
    {
        for (i, spec) in specs.iter().enumerate() {
            let handle = self.start(spec.clone()).await;
            on_started(handle);

            let is_last = i + 1 == specs.len();
            if !is_last && !spec.start_delay().is_zero() {
                tokio::time::sleep(spec.start_delay()).await;
            }
        }
        self.refresh();
    }

    /// Poll every owned process and record the ones that exited.
    ///
    /// Returns the names of services whose status changed.
    pub fn refresh(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        for handle in &mut self.handles {
            if !matches!(
                handle.status,
                ServiceStatus::Starting | ServiceStatus::Running
            ) {
                continue;
            }
            let Some(child) = handle.child.as_mut() else {
                continue;
            };
            if let Ok(Some(status)) = child.try_wait() {
                let code = exit_code(status);
                tracing::warn!(service = %handle.spec.name, code, "Service exited");
                handle.status = ServiceStatus::Exited(code);
                changed.push(handle.spec.name.clone());
            }
        }
        changed
    }

    /// Stop a service through its handle and start it again from the same spec.
    pub async fn restart(&mut self, name: &str) -> Option<&ServiceHandle> {
        let index = self.handles.iter().position(|h| h.spec.name == name)?;

        if let Err(e) = terminate(&mut self.handles[index], self.grace).await {
            tracing::debug!(service = %name, error = %e, "Termination before restart failed");
        }

        let spec = self.handles[index].spec.clone();
        let restarts = self.handles[index].restarts + 1;
        tracing::info!(service = %name, attempt = restarts, "Restarting service");

        let handle = self.spawn_handle(spec, restarts);
        let mut previous = std::mem::replace(&mut self.handles[index], handle);
        if let Some(child) = previous.child.as_mut() {
            force_kill(child);
        }
        self.settle(index).await;
        Some(&self.handles[index])
    }

    /// Terminate every owned process and discard the handles.
    ///
    /// Safe to call repeatedly; processes that are already gone count as stopped.
    pub async fn stop_all(&mut self) -> Vec<ServiceReport> {
        let mut reports = Vec::with_capacity(self.handles.len());

        // Reverse start order: the dashboard goes before the bridges it talks to.
        while let Some(mut handle) = self.handles.pop() {
            if let Err(e) = terminate(&mut handle, self.grace).await {
                tracing::debug!(error = %e, "Ignoring termination failure");
            }
            tracing::info!(service = %handle.spec.name, status = %handle.status, "Service stopped");
            reports.push(handle.report());
        }

        reports.reverse();
        reports
    }

    /// Spawn the process for `spec`. Readiness is awaited separately by `settle`.
    fn spawn_handle(&self, spec: ServiceSpec, restarts: u32) -> ServiceHandle {
        let mut handle = ServiceHandle {
            spec,
            child: None,
            pid: None,
            started_at: Utc::now(),
            status: ServiceStatus::Starting,
            restarts,
        };

        match self.spawn_child(&handle.spec) {
            Ok(child) => {
                handle.pid = child.id();
                tracing::info!(service = %handle.spec.name, pid = ?handle.pid, "Spawned service");
                handle.child = Some(child);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Service spawn failed");
                handle.status = ServiceStatus::Failed(e.to_string());
            }
        }
        handle
    }

    /// Wait for the handle at `index` to become ready.
    ///
    /// The handle is already registered while this runs, so a cancelled wait
    /// leaves its process to `stop_all` or `Drop` rather than orphaning it.
    async fn settle(&mut self, index: usize) {
        let readiness = self.readiness.clone();
        let handle = &mut self.handles[index];
        if handle.status == ServiceStatus::Starting {
            handle.status = await_ready(&readiness, handle).await;
        }
    }

    fn spawn_child(&self, spec: &ServiceSpec) -> Result<Child, LaunchError> {
        let spawn_failed = |reason: String| LaunchError::ServiceSpawnFailed {
            service: spec.name.clone(),
            reason,
        };

        let program = spec
            .program()
            .ok_or_else(|| spawn_failed("empty command".to_string()))?;

        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(spec.args())
            .envs(&spec.env)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = spec.working_dir_expanded() {
            std_cmd.current_dir(dir);
        }

        // Own process group: console signals aimed at the supervisor don't reach
        // the services, and teardown can signal the whole group.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            std_cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        }

        let mut cmd = Command::from(std_cmd);
        let mut child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;
        forward_output(&spec.name, &mut child);
        Ok(child)
    }
}

impl Drop for ServiceLauncher {
    fn drop(&mut self) {
        for handle in &mut self.handles {
            if let Some(child) = handle.child.as_mut() {
                if matches!(child.try_wait(), Ok(None)) {
                    tracing::warn!(service = %handle.spec.name, "Killing service left running");
                    force_kill(child);
                }
            }
        }
    }
}

async fn await_ready(readiness: &ReadinessConfig, handle: &mut ServiceHandle) -> ServiceStatus {
    let Some(child) = handle.child.as_mut() else {
        return handle.status.clone();
    };

    let Some(check) = handle.spec.health_check.as_ref() else {
        return match child.try_wait() {
            Ok(Some(status)) => ServiceStatus::Exited(exit_code(status)),
            _ => ServiceStatus::Running,
        };
    };

    let timeout = readiness.timeout();
    let attempt_timeout = PROBE_TIMEOUT.min(timeout);
    let deadline = Instant::now() + timeout;

    loop {
        if let Ok(Some(status)) = child.try_wait() {
            let code = exit_code(status);
            tracing::warn!(service = %handle.spec.name, code, "Service exited before becoming ready");
            return ServiceStatus::Exited(code);
        }

        if health::probe(check, attempt_timeout).await {
            tracing::info!(service = %handle.spec.name, target = %check, "Service ready");
            return ServiceStatus::Running;
        }

        if Instant::now() >= deadline {
            tracing::warn!(service = %handle.spec.name, target = %check, "Service not ready in time");
            return ServiceStatus::Failed(format!(
                "not ready after {}s ({})",
                timeout.as_secs(),
                check
            ));
        }

        tokio::time::sleep(readiness.interval()).await;
    }
}

/// Forward child stdout/stderr lines to the log with the service name attached.
fn forward_output(service: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let service = service.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(service = %service, "{}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let service = service.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(service = %service, stream = "stderr", "{}", line);
            }
        });
    }
}

/// Gracefully stop a handle's process, escalating to a kill after `grace`.
///
/// The child stays in the handle until its exit is confirmed.
async fn terminate(handle: &mut ServiceHandle, grace: Duration) -> Result<(), LaunchError> {
    let Some(child) = handle.child.as_mut() else {
        return Ok(());
    };

    let status = match child.try_wait() {
        Ok(Some(status)) => Some(status),
        _ => {
            request_stop(child);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                _ => {
                    tracing::debug!(service = %handle.spec.name, "Grace period elapsed, killing");
                    force_kill(child);
                    tokio::time::timeout(KILL_WAIT, child.wait())
                        .await
                        .ok()
                        .and_then(Result::ok)
                }
            }
        }
    };

    let Some(status) = status else {
        return Err(LaunchError::ShutdownTerminationFailed {
            service: handle.spec.name.clone(),
            reason: "process did not exit after kill".to_string(),
        });
    };

    handle.child = None;
    // A startup failure explains more than the exit it led to.
    if !matches!(handle.status, ServiceStatus::Failed(_)) {
        handle.status = ServiceStatus::Exited(exit_code(status));
    }
    Ok(())
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), signal) {
        tracing::debug!(pid, error = %e, "killpg failed");
    }
}

fn request_stop(child: &mut Child) {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGTERM);

    #[cfg(not(unix))]
    let _ = child.start_kill();
}

fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGKILL);

    let _ = child.start_kill();
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
