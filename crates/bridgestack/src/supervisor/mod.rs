// ABOUTME: Top-level control loop for the bridge stack.
// ABOUTME: Lock check, dependency launch, ordered service start, wait, then teardown.

pub mod browser;
pub mod dependency;
pub mod health;
pub mod lock;
pub mod monitor;
pub mod preflight;
pub mod report;
pub mod signal;
pub mod spawn;

pub use browser::{BrowserOpener, SystemBrowser};
pub use dependency::{
    DependencyLauncher, DependencyOutcome, LaunchCommand, ProcessTable, SystemProcessTable,
};
pub use lock::{InstanceLock, LockToken, PortLock};
pub use monitor::{ConnectionMonitor, MonitorEvent};
pub use report::{RunOutcome, RunReport, SupervisorState, Warning};
pub use spawn::{ServiceHandle, ServiceLauncher, ServiceReport, ServiceStatus};

use anyhow::{Context, Result};
use bridgestack_core::{Config, LockError};
use std::future::Future;
use tokio::time::MissedTickBehavior;

/// Set in every service's environment: PID of the owning supervisor.
pub const SUPERVISOR_PID_ENV: &str = "BRIDGESTACK_SUPERVISOR_PID";
/// Set in every service's environment: the instance lock port.
pub const LOCK_PORT_ENV: &str = "BRIDGESTACK_LOCK_PORT";

pub struct Supervisor {
    config: Config,
    lock: Box<dyn InstanceLock>,
    processes: Box<dyn ProcessTable>,
    browser: Box<dyn BrowserOpener>,
    transitions: Vec<SupervisorState>,
    warnings: Vec<Warning>,
}

impl Supervisor {
    /// Supervisor using the port lock, the OS process list, and the system browser.
    pub fn new(config: Config) -> Self {
        let lock = PortLock::new(config.lock_port);
        Self {
            config,
            lock: Box::new(lock),
            processes: Box::new(SystemProcessTable),
            browser: Box::new(SystemBrowser),
            transitions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_lock(mut self, lock: impl InstanceLock + 'static) -> Self {
        self.lock = Box::new(lock);
        self
    }

    pub fn with_process_table(mut self, processes: impl ProcessTable + 'static) -> Self {
        self.processes = Box::new(processes);
        self
    }

    pub fn with_browser(mut self, browser: impl BrowserOpener + 'static) -> Self {
        self.browser = Box::new(browser);
        self
    }

    /// Run the stack until `stop` resolves.
    ///
    /// `stop` is watched from the dependency phase on. If it resolves before the
    /// services are up, startup is abandoned and whatever was spawned is torn down.
    ///
    /// Returns `Err` only for the fatal cases: the lock could not be checked at
    /// all, or another instance holds it and attaching to it failed too.
    pub async fn run<F>(mut self, stop: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        self.enter(SupervisorState::Idle);
        self.enter(SupervisorState::LockCheck);

        let token = match self.lock.acquire() {
            Ok(token) => token,
            Err(LockError::AlreadyRunning { port }) => {
                tracing::info!(port, "Bridge stack already running, attaching");
                return self.attach();
            }
            Err(e) => return Err(e).context("Failed to check for a running instance"),
        };
        tracing::info!(lock = %token.resource(), "Instance lock acquired");

        let preflight = preflight::check(&self.config).await;
        self.warnings.extend(preflight);

        let mut launcher = ServiceLauncher::new(
            self.config.readiness.clone(),
            self.config.shutdown.grace(),
        )
        .with_env(SUPERVISOR_PID_ENV, std::process::id().to_string())
        .with_env(LOCK_PORT_ENV, self.config.lock_port.to_string());

        self.enter(SupervisorState::DependencyPhase);
        let interrupted = tokio::select! {
            _ = self.dependency_phase() => false,
            _ = &mut stop => true,
        };

        let started = if interrupted {
            None
        } else {
            self.enter(SupervisorState::ServicePhase);
            tokio::select! {
                failed = self.service_phase(&mut launcher) => Some(failed),
                _ = &mut stop => None,
            }
        };

        let failed_at_start = match started {
            Some(failed) => {
                self.enter(SupervisorState::Running);
                self.wait_running(&mut launcher, &mut stop).await;
                failed
            }
            None => {
                tracing::info!("Stop requested during startup");
                failed_services(&launcher)
            }
        };

        self.enter(SupervisorState::ShuttingDown);
        launcher.refresh();
        let unrecovered: Vec<&String> = failed_at_start
            .iter()
            .filter(|name| {
                !launcher
                    .handle(name)
                    .is_some_and(|h| h.status().is_running())
            })
            .collect();
        if !unrecovered.is_empty() {
            tracing::warn!(services = ?unrecovered, "Services failed at startup and never recovered");
        }
        let exit_code = if unrecovered.is_empty() { 0 } else { 1 };

        let services = launcher.stop_all().await;
        token.release();
        self.enter(SupervisorState::Stopped);

        Ok(self.finish(RunOutcome::Stopped, services, exit_code))
    }

    fn enter(&mut self, state: SupervisorState) {
        tracing::info!(state = %state, "Supervisor state");
        self.transitions.push(state);
    }

    fn attach(mut self) -> Result<RunReport> {
        self.enter(SupervisorState::Attach);
        if self.config.open_browser {
            self.browser
                .open(&self.config.dashboard_url)
                .context("Another instance is running and the dashboard could not be opened")?;
        } else {
            tracing::info!(url = %self.config.dashboard_url, "Dashboard is served by the running instance");
        }
        self.enter(SupervisorState::Stopped);
        Ok(self.finish(RunOutcome::Attached, Vec::new(), 0))
    }

    async fn dependency_phase(&mut self) {
        let Some(dependency) = self.config.launchable_dependency() else {
            tracing::info!("No dependency executable configured, skipping");
            return;
        };
        let Some(command) = LaunchCommand::from_config(dependency) else {
            return;
        };
        let process_name = dependency.resolved_process_name().unwrap_or_default();

        let outcome = DependencyLauncher::new(self.processes.as_ref())
            .ensure_running(&process_name, &command, dependency.ready_delay())
            .await;

        match outcome {
            DependencyOutcome::LaunchFailed(e) => {
                self.warnings.push(Warning::DependencyLaunchFailed {
                    reason: e.to_string(),
                });
            }
            DependencyOutcome::LaunchedUnconfirmed => {
                self.warnings.push(Warning::DependencyUnconfirmed {
                    process: process_name,
                });
            }
            DependencyOutcome::AlreadyRunning | DependencyOutcome::Launched => {}
        }
    }

    /// Start every service in order. Returns the names that failed to start.
    async fn service_phase(&mut self, launcher: &mut ServiceLauncher) -> Vec<String> {
        let specs = self.config.services.clone();
        let dashboard = self.config.dashboard_service.clone();
        let url = self.config.dashboard_url.clone();
        let open_browser = self.config.open_browser;
        let has_dashboard = specs.iter().any(|s| s.name == dashboard);

        let browser = self.browser.as_ref();
        let warnings = &mut self.warnings;

        launcher
            .start_all(&specs, |handle| {
                if open_browser && handle.name() == dashboard {
                    if !handle.status().is_running() {
                        warnings.push(Warning::DashboardNotRunning {
                            service: dashboard.clone(),
                        });
                    }
                    open_dashboard(browser, &url, warnings);
                }
            })
            .await;

        if open_browser && !has_dashboard {
            open_dashboard(browser, &url, warnings);
        }

        let failed = failed_services(launcher);
        for name in &failed {
            if let Some(handle) = launcher.handle(name) {
                warnings.push(Warning::ServiceFailed {
                    service: name.clone(),
                    status: handle.status().to_string(),
                });
            }
        }
        failed
    }

    /// Wait for `stop`, running the connection monitor in between when enabled.
    ///
    /// A monitor pass that is restarting services is abandoned as soon as `stop`
    /// resolves; the launcher still owns anything the pass spawned.
    async fn wait_running<S>(&mut self, launcher: &mut ServiceLauncher, stop: &mut S)
    where
        S: Future<Output = ()> + Unpin,
    {
        let Some(interval) = self.config.monitor.interval() else {
            stop.await;
            return;
        };

        tracing::info!(interval_secs = interval.as_secs(), "Connection monitor enabled");
        let mut monitor = ConnectionMonitor::new(self.config.monitor.max_restarts);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; services were just checked.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut *stop => break,
                _ = ticker.tick() => {}
            }

            let events = tokio::select! {
                events = monitor.check(launcher) => events,
                _ = &mut *stop => break,
            };
            for event in events {
                if let MonitorEvent::GaveUp { service, restarts } = event {
                    self.warnings.push(Warning::RestartsExhausted { service, restarts });
                }
            }
        }
    }

    fn finish(self, outcome: RunOutcome, services: Vec<ServiceReport>, exit_code: i32) -> RunReport {
        RunReport {
            outcome,
            transitions: self.transitions,
            services,
            warnings: self.warnings,
            exit_code,
        }
    }
}

fn failed_services(launcher: &ServiceLauncher) -> Vec<String> {
    launcher
        .handles()
        .iter()
        .filter(|h| h.status().is_failure())
        .map(|h| h.name().to_string())
        .collect()
}

fn open_dashboard(browser: &dyn BrowserOpener, url: &str, warnings: &mut Vec<Warning>) {
    if let Err(e) = browser.open(url) {
        tracing::warn!(error = %e, "Failed to open dashboard in browser");
        warnings.push(Warning::BrowserFailed {
            reason: format!("{:#}", e),
        });
    }
}
