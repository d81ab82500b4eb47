// ABOUTME: Static launch descriptors for the services in the stack.
// ABOUTME: ServiceSpec is read from configuration and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How to tell that a started service is accepting work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HealthCheck {
    /// Ready once a TCP connection to `host:port` succeeds.
    Tcp {
        port: u16,
        #[serde(default = "default_host")]
        host: String,
    },
    /// Ready once a GET to `url` returns a 2xx status.
    Http { url: String },
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl HealthCheck {
    pub fn tcp(port: u16) -> Self {
        HealthCheck::Tcp {
            port,
            host: default_host(),
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        HealthCheck::Http { url: url.into() }
    }

    /// The local TCP port this check targets, if it is a TCP check.
    pub fn tcp_port(&self) -> Option<u16> {
        match self {
            HealthCheck::Tcp { port, .. } => Some(*port),
            HealthCheck::Http { .. } => None,
        }
    }
}

impl fmt::Display for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheck::Tcp { port, host } => write!(f, "tcp://{}:{}", host, port),
            HealthCheck::Http { url } => write!(f, "{}", url),
        }
    }
}

/// Launch descriptor for one bridge or dashboard process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Identifier used in logs and reports
    pub name: String,

    /// Executable followed by its arguments
    pub command: Vec<String>,

    /// Working directory for the process (`~` is expanded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Extra environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Minimum pause after this service starts before the next one may start
    #[serde(default = "default_start_delay_secs")]
    pub start_delay_secs: u64,

    /// Optional readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

fn default_start_delay_secs() -> u64 {
    2
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
            env: BTreeMap::new(),
            start_delay_secs: default_start_delay_secs(),
            health_check: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_start_delay_secs(mut self, secs: u64) -> Self {
        self.start_delay_secs = secs;
        self
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    /// Program to execute, `None` when the command is empty.
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or(&[])
    }

    /// Expand ~ in the working directory path
    pub fn working_dir_expanded(&self) -> Option<PathBuf> {
        self.working_dir
            .as_ref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }
}
