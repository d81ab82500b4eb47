// ABOUTME: Structured result of a supervisor run.
// ABOUTME: Carries the state path, per-service outcome, and non-fatal warnings.

use super::spawn::ServiceReport;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    Idle,
    LockCheck,
    Attach,
    DependencyPhase,
    ServicePhase,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Another supervisor was active; only the browser was opened.
    Attached,
    /// This supervisor ran the stack and tore it down.
    Stopped,
}

/// Problems that did not stop the run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("dependency executable does not exist: {path}")]
    DependencyMissing { path: String },

    #[error("dependency launch failed: {reason}")]
    DependencyLaunchFailed { reason: String },

    #[error("dependency '{process}' not seen running after launch")]
    DependencyUnconfirmed { process: String },

    #[error("port {port} for service '{service}' is already accepting connections")]
    PortInUse { service: String, port: u16 },

    #[error("working directory for service '{service}' does not exist: {path}")]
    MissingWorkingDir { service: String, path: String },

    #[error("service '{service}' did not start: {status}")]
    ServiceFailed { service: String, status: String },

    #[error("dashboard service '{service}' is not running")]
    DashboardNotRunning { service: String },

    #[error("failed to open browser: {reason}")]
    BrowserFailed { reason: String },

    #[error("service '{service}' stayed down after {restarts} restarts")]
    RestartsExhausted { service: String, restarts: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub transitions: Vec<SupervisorState>,
    pub services: Vec<ServiceReport>,
    pub warnings: Vec<Warning>,
    /// 0 on a clean run; 1 when a service failed during startup and never recovered
    pub exit_code: i32,
}

impl RunReport {
    pub fn visited(&self, state: SupervisorState) -> bool {
        self.transitions.contains(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_serializes_with_kind() {
        let warning = Warning::PortInUse {
            service: "ibkr-bridge".to_string(),
            port: 5001,
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "port_in_use");
        assert_eq!(json["port"], 5001);
        assert_eq!(
            warning.to_string(),
            "port 5001 for service 'ibkr-bridge' is already accepting connections"
        );
    }
}
