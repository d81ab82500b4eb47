// ABOUTME: Resolves when the user or the OS asks the supervisor to stop.
// ABOUTME: Covers Ctrl+C, SIGTERM, and console close (SIGHUP / CTRL_CLOSE).

use std::future::Future;

/// Install the stop handlers now and return a future that resolves on the first request.
///
/// Handlers are registered before this returns, so a signal that arrives before the
/// future is first polled is still observed instead of killing the process.
/// Must be called from inside a tokio runtime.
#[cfg(unix)]
pub fn stop_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::SignalKind;

    let interrupt = listen(SignalKind::interrupt(), "SIGINT");
    let terminate = listen(SignalKind::terminate(), "SIGTERM");
    let hangup = listen(SignalKind::hangup(), "SIGHUP");

    async move {
        tokio::select! {
            _ = recv(interrupt) => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = recv(terminate) => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
            _ = recv(hangup) => {
                tracing::info!("Console closed, shutting down...");
            }
        }
    }
}

#[cfg(unix)]
fn listen(
    kind: tokio::signal::unix::SignalKind,
    name: &'static str,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(signal = name, error = %e, "Failed to install signal handler");
            None
        }
    }
}

#[cfg(unix)]
async fn recv(stream: Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(mut stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(windows)]
pub fn stop_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::windows;

    let ctrl_c = windows::ctrl_c()
        .map_err(|e| tracing::warn!(error = %e, "Failed to install Ctrl+C handler"))
        .ok();
    let close = windows::ctrl_close()
        .map_err(|e| tracing::warn!(error = %e, "Failed to install console close handler"))
        .ok();

    async move {
        let ctrl_c = async {
            match ctrl_c {
                Some(mut s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        let close = async {
            match close {
                Some(mut s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = close => {
                tracing::info!("Console closed, shutting down...");
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
pub fn stop_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal};
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_before_first_poll_is_observed() {
        let stop = stop_signal();

        // Delivered before the future is polled: must not take the default action.
        raise(Signal::SIGHUP).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(tokio::time::timeout(Duration::from_secs(2), stop)
            .await
            .is_ok());
    }
}
