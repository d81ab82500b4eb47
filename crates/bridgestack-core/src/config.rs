// ABOUTME: Configuration for the bridgestack supervisor.
// ABOUTME: Loaded from JSON (or TOML by extension) with defaults for everything but services.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::service::{HealthCheck, ServiceSpec};

/// Port reserved for single-instance detection.
pub const DEFAULT_LOCK_PORT: u16 = 64000;

/// External terminal application started before the services.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyConfig {
    /// Executable to launch; when absent the dependency phase is skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Image name to look for in the process list (defaults to the file name of `path`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,

    /// Arguments passed to the executable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Time given to the application to initialize after launch
    #[serde(default = "default_ready_delay_secs")]
    pub ready_delay_secs: u64,
}

fn default_ready_delay_secs() -> u64 {
    10
}

impl DependencyConfig {
    /// Expanded executable path, `None` when not configured.
    pub fn path_expanded(&self) -> Option<PathBuf> {
        self.path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }

    /// Process image name used for the "already running" check.
    pub fn resolved_process_name(&self) -> Option<String> {
        if let Some(name) = self.process_name.as_ref().filter(|n| !n.is_empty()) {
            return Some(name.clone());
        }
        self.path_expanded()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
    }

    pub fn ready_delay(&self) -> Duration {
        Duration::from_secs(self.ready_delay_secs)
    }
}

/// Bounds for readiness probing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessConfig {
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_readiness_interval_ms")]
    pub interval_ms: u64,
}

fn default_readiness_timeout_secs() -> u64 {
    30
}

fn default_readiness_interval_ms() -> u64 {
    500
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_readiness_timeout_secs(),
            interval_ms: default_readiness_interval_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Wait between the graceful terminate and the forced kill
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

fn default_grace_ms() -> u64 {
    3000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// Periodic health monitoring while the stack is running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Poll interval; monitoring is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    /// Restarts allowed per service before it is left down
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_max_restarts() -> u32 {
    3
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            max_restarts: default_max_restarts(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Local TCP port held for the supervisor's lifetime
    #[serde(default = "default_lock_port")]
    pub lock_port: u16,

    /// Dashboard URL opened in the browser
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,

    /// Name of the service that serves the dashboard
    #[serde(default = "default_dashboard_service")]
    pub dashboard_service: String,

    /// Open the dashboard in a browser once it has started
    #[serde(default = "default_true")]
    pub open_browser: bool,

    /// Terminal application started before the services
    #[serde(default, alias = "mt5", skip_serializing_if = "Option::is_none")]
    pub dependency: Option<DependencyConfig>,

    /// Services in start order
    pub services: Vec<ServiceSpec>,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_lock_port() -> u16 {
    DEFAULT_LOCK_PORT
}

fn default_dashboard_url() -> String {
    "http://localhost:8502".to_string()
}

fn default_dashboard_service() -> String {
    "dashboard".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    /// The stock layout: IBKR bridge, MT5 bridge, then the dashboard.
    fn default() -> Self {
        Self {
            lock_port: DEFAULT_LOCK_PORT,
            dashboard_url: default_dashboard_url(),
            dashboard_service: default_dashboard_service(),
            open_browser: true,
            dependency: Some(DependencyConfig {
                path: None,
                process_name: Some("terminal64.exe".to_string()),
                args: Vec::new(),
                ready_delay_secs: default_ready_delay_secs(),
            }),
            services: vec![
                ServiceSpec::new(
                    "ibkr-bridge",
                    vec!["python".into(), "-m".into(), "src.ibkr.bridge".into()],
                )
                .with_health_check(HealthCheck::tcp(5001)),
                ServiceSpec::new(
                    "mt5-bridge",
                    vec!["python".into(), "-m".into(), "src.mt5.bridge".into()],
                )
                .with_health_check(HealthCheck::tcp(5000)),
                ServiceSpec::new(
                    "dashboard",
                    vec![
                        "streamlit".into(),
                        "run".into(),
                        "dashboard/app.py".into(),
                        "--server.port".into(),
                        "8502".into(),
                        "--server.headless".into(),
                        "true".into(),
                    ],
                )
                .with_health_check(HealthCheck::tcp(8502)),
            ],
            readiness: ReadinessConfig::default(),
            shutdown: ShutdownConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}

impl Config {
    /// Load config from a JSON file, or TOML when the extension is `.toml`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::parse(&content, is_toml(path))
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Parse and validate config text
    pub fn parse(content: &str, toml_format: bool) -> Result<Self> {
        let config: Config = if toml_format {
            toml::from_str(content)?
        } else {
            serde_json::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save config, format chosen by extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_toml(path) {
            toml::to_string_pretty(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/bridgestack/bridgestack.json)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .context("Could not determine home directory")
            })?
            .join("bridgestack");
        Ok(config_dir.join("bridgestack.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names: Vec<&str> = Vec::with_capacity(self.services.len());
        let mut ports: HashMap<u16, &str> = HashMap::new();

        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(ConfigError::EmptyServiceName);
            }
            if service.command.is_empty() || service.command[0].trim().is_empty() {
                return Err(ConfigError::EmptyCommand(service.name.clone()));
            }
            if names.contains(&service.name.as_str()) {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
            names.push(&service.name);

            if let Some(port) = service.health_check.as_ref().and_then(|c| c.tcp_port()) {
                if port == self.lock_port {
                    return Err(ConfigError::LockPortCollision {
                        service: service.name.clone(),
                        port,
                    });
                }
                if let Some(first) = ports.insert(port, &service.name) {
                    return Err(ConfigError::PortCollision {
                        first: first.to_string(),
                        second: service.name.clone(),
                        port,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Dependency section, only when it names an executable
    pub fn launchable_dependency(&self) -> Option<&DependencyConfig> {
        self.dependency
            .as_ref()
            .filter(|dep| dep.path_expanded().is_some())
    }
}
