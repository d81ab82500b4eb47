// ABOUTME: Single-instance lock for the supervisor.
// ABOUTME: The default implementation holds a reserved localhost TCP port for the process lifetime.

use bridgestack_core::LockError;
use std::any::Any;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener};

/// Exclusive claim that this process is the active supervisor.
///
/// Dropping the token releases the claim. If the process dies the OS
/// reclaims the underlying resource, so a later `acquire()` succeeds.
pub struct LockToken {
    resource: String,
    _held: Box<dyn Any + Send>,
}

impl LockToken {
    pub fn new(resource: impl Into<String>, held: impl Any + Send) -> Self {
        Self {
            resource: resource.into(),
            _held: Box::new(held),
        }
    }

    /// Human-readable name of the held resource
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn release(self) {
        tracing::debug!(resource = %self.resource, "Releasing instance lock");
    }
}

impl std::fmt::Debug for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockToken")
            .field("resource", &self.resource)
            .finish()
    }
}

/// Mechanism deciding whether a bridge stack is already active on this machine.
pub trait InstanceLock: Send + Sync {
    /// Claim the lock, or report `LockError::AlreadyRunning` if someone else holds it.
    fn acquire(&self) -> Result<LockToken, LockError>;

    /// Whether another holder currently owns the lock.
    fn is_held(&self) -> bool {
        match self.acquire() {
            Ok(token) => {
                token.release();
                false
            }
            Err(e) => e.is_already_running(),
        }
    }
}

/// Lock realized as an exclusive bind on `127.0.0.1:port`.
///
/// A crashed holder whose socket lingers makes `acquire()` report
/// `AlreadyRunning` until the OS frees the port.
#[derive(Debug, Clone)]
pub struct PortLock {
    port: u16,
}

impl PortLock {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn is_contention(kind: ErrorKind) -> bool {
    // Windows reports an exclusively bound port as access denied.
    kind == ErrorKind::AddrInUse || (cfg!(windows) && kind == ErrorKind::PermissionDenied)
}

impl InstanceLock for PortLock {
    fn acquire(&self) -> Result<LockToken, LockError> {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, self.port)) {
            Ok(listener) => {
                tracing::debug!(port = self.port, "Instance lock acquired");
                Ok(LockToken::new(format!("127.0.0.1:{}", self.port), listener))
            }
            Err(e) if is_contention(e.kind()) => {
                Err(LockError::AlreadyRunning { port: self.port })
            }
            Err(source) => Err(LockError::Bind {
                port: self.port,
                source,
            }),
        }
    }
}
