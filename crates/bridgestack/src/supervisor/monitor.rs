// ABOUTME: Connection monitor for the running stack.
// ABOUTME: Restarts services that exited or stopped answering their health check.

use super::health::{self, PROBE_TIMEOUT};
use super::spawn::{ServiceLauncher, ServiceStatus};
use std::collections::HashSet;

/// Something the monitor did during one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The service was down and has been started again.
    Restarted {
        service: String,
        attempt: u32,
        status: ServiceStatus,
    },
    /// The service is down and out of restart attempts. Reported once.
    GaveUp { service: String, restarts: u32 },
}

pub struct ConnectionMonitor {
    max_restarts: u32,
    abandoned: HashSet<String>,
}

impl ConnectionMonitor {
    pub fn new(max_restarts: u32) -> Self {
        Self {
            max_restarts,
            abandoned: HashSet::new(),
        }
    }

    /// Probe every service once and restart the ones that are down.
    pub async fn check(&mut self, launcher: &mut ServiceLauncher) -> Vec<MonitorEvent> {
        launcher.refresh();

        let mut down = Vec::new();
        for handle in launcher.handles() {
            let is_down = match handle.status() {
                ServiceStatus::Running => match handle.spec().health_check.as_ref() {
                    Some(check) => !health::probe(check, PROBE_TIMEOUT).await,
                    None => false,
                },
                ServiceStatus::Starting => false,
                ServiceStatus::Exited(_) | ServiceStatus::Failed(_) => true,
            };
            if is_down {
                down.push((handle.name().to_string(), handle.restarts()));
            }
        }

        let mut events = Vec::new();
        for (service, restarts) in down {
            if restarts >= self.max_restarts {
                if self.abandoned.insert(service.clone()) {
                    tracing::error!(service = %service, restarts, "Service is down and out of restart attempts");
                    events.push(MonitorEvent::GaveUp { service, restarts });
                }
                continue;
            }

            tracing::warn!(service = %service, "Service is down, restarting");
            if let Some(handle) = launcher.restart(&service).await {
                events.push(MonitorEvent::Restarted {
                    service,
                    attempt: handle.restarts(),
                    status: handle.status().clone(),
                });
            }
        }

        events
    }
}
