// ABOUTME: Pre-start checks on configuration and the local machine.
// ABOUTME: Everything found here is a warning; startup proceeds regardless.

use super::health;
use super::report::Warning;
use bridgestack_core::{Config, HealthCheck};
use std::time::Duration;

const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

pub async fn check(config: &Config) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if let Some(path) = config.dependency.as_ref().and_then(|d| d.path_expanded()) {
        // Bare names are resolved through PATH at launch time.
        if path.components().count() > 1 && !path.exists() {
            warnings.push(Warning::DependencyMissing {
                path: path.display().to_string(),
            });
        }
    }

    for service in &config.services {
        if let Some(dir) = service.working_dir_expanded() {
            if !dir.is_dir() {
                warnings.push(Warning::MissingWorkingDir {
                    service: service.name.clone(),
                    path: dir.display().to_string(),
                });
            }
        }

        if let Some(port) = service.health_check.as_ref().and_then(HealthCheck::tcp_port) {
            let check = HealthCheck::tcp(port);
            if health::probe(&check, PORT_PROBE_TIMEOUT).await {
                warnings.push(Warning::PortInUse {
                    service: service.name.clone(),
                    port,
                });
            }
        }
    }

    for warning in &warnings {
        tracing::warn!(warning = %warning, "Preflight");
    }
    warnings
}
