// ABOUTME: Readiness and liveness probes for services.
// ABOUTME: TCP connect or HTTP GET, each attempt bounded by a timeout.

use bridgestack_core::HealthCheck;
use std::time::Duration;
use tokio::net::TcpStream;

/// Upper bound for a single probe attempt.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one probe attempt. `true` when the service answered.
pub async fn probe(check: &HealthCheck, timeout: Duration) -> bool {
    match check {
        HealthCheck::Tcp { host, port } => {
            matches!(
                tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), *port))).await,
                Ok(Ok(_))
            )
        }
        HealthCheck::Http { url } => probe_http(url, timeout).await,
    }
}

async fn probe_http(url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to build HTTP client");
            return false;
        }
    };

    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            tracing::trace!(url = %url, error = %e, "HTTP probe failed");
            false
        }
    }
}
