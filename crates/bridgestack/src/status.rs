// ABOUTME: One-shot status check of the bridge stack.
// ABOUTME: Reports whether a supervisor holds the lock and probes each service once.

use crate::supervisor::health::{self, PROBE_TIMEOUT};
use crate::supervisor::InstanceLock;
use bridgestack_core::Config;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceProbe {
    pub name: String,
    /// Probe target; `None` when the service has no health check
    pub target: Option<String>,
    pub healthy: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub lock_port: u16,
    pub supervisor_running: bool,
    pub services: Vec<ServiceProbe>,
}

impl StatusReport {
    /// Every service with a health check answered.
    pub fn all_healthy(&self) -> bool {
        self.services.iter().all(|s| s.healthy != Some(false))
    }
}

pub async fn collect(config: &Config, lock: &dyn InstanceLock) -> StatusReport {
    let supervisor_running = lock.is_held();

    let mut services = Vec::with_capacity(config.services.len());
    for spec in &config.services {
        let (target, healthy) = match spec.health_check.as_ref() {
            Some(check) => (
                Some(check.to_string()),
                Some(health::probe(check, PROBE_TIMEOUT).await),
            ),
            None => (None, None),
        };
        services.push(ServiceProbe {
            name: spec.name.clone(),
            target,
            healthy,
        });
    }

    StatusReport {
        lock_port: config.lock_port,
        supervisor_running,
        services,
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supervisor = if self.supervisor_running {
            "running"
        } else {
            "not running"
        };
        writeln!(f, "supervisor: {} (lock port {})", supervisor, self.lock_port)?;

        let width = self.services.iter().map(|s| s.name.len()).max().unwrap_or(0);
        for service in &self.services {
            let state = match service.healthy {
                Some(true) => "up",
                Some(false) => "DOWN",
                None => "unknown",
            };
            let target = service.target.as_deref().unwrap_or("no health check");
            writeln!(f, "  {:<width$}  {:<7}  {}", service.name, state, target, width = width)?;
        }
        Ok(())
    }
}
