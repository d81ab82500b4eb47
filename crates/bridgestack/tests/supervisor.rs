// ABOUTME: End-to-end tests for the bridgestack supervisor and CLI.
// ABOUTME: Runs real child processes with a fake process table and a recording browser.

#![cfg(unix)]

use bridgestack::supervisor::{
    BrowserOpener, InstanceLock, PortLock, ProcessTable, RunOutcome, ServiceStatus, Supervisor,
    SupervisorState, Warning,
};
use bridgestack_core::{
    Config, DependencyConfig, HealthCheck, MonitorConfig, ReadinessConfig, ServiceSpec,
    ShutdownConfig,
};
use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Clone, Default)]
struct RecordingBrowser {
    opened: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>,
}

impl RecordingBrowser {
    fn opened(&self) -> Vec<(String, DateTime<Utc>)> {
        self.opened.lock().unwrap().clone()
    }
}

impl BrowserOpener for RecordingBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push((url.to_string(), Utc::now()));
        Ok(())
    }
}

struct BrokenBrowser;

impl BrowserOpener for BrokenBrowser {
    fn open(&self, _url: &str) -> anyhow::Result<()> {
        anyhow::bail!("no browser available")
    }
}

struct FixedProcessTable(bool);

impl ProcessTable for FixedProcessTable {
    fn is_running(&self, _image_name: &str) -> bool {
        self.0
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn sh(name: &str, script: &str, delay_secs: u64) -> ServiceSpec {
    ServiceSpec::new(name, vec!["sh".into(), "-c".into(), script.into()])
        .with_start_delay_secs(delay_secs)
}

fn touching_dependency(marker: &Path) -> DependencyConfig {
    DependencyConfig {
        path: Some("sh".to_string()),
        process_name: Some("terminal64.exe".to_string()),
        args: vec!["-c".into(), format!("touch '{}'", marker.display())],
        ready_delay_secs: 0,
    }
}

fn test_config(lock_port: u16, services: Vec<ServiceSpec>) -> Config {
    Config {
        lock_port,
        dashboard_url: "http://localhost:8502".to_string(),
        open_browser: true,
        dependency: None,
        services,
        readiness: ReadinessConfig {
            timeout_secs: 1,
            interval_ms: 50,
        },
        shutdown: ShutdownConfig { grace_ms: 500 },
        monitor: MonitorConfig::default(),
        ..Config::default()
    }
}

async fn stop_after(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll until `path` holds a pid written by a service script.
fn read_pid_file(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Some(pid) = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            return pid;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("no pid written to {}", path.display());
}

fn bridgestack(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bridgestack"));
    cmd.current_dir(dir).env_remove("BRIDGESTACK_CONFIG");
    cmd
}

async fn wait_for_file(path: &Path) -> bool {
    for _ in 0..50 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ============================================================================
// Fresh start
// ============================================================================

#[tokio::test]
async fn test_fresh_start_runs_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let dependency_marker = dir.path().join("terminal-launched");
    let env_file = dir.path().join("dashboard-env");
    let lock_port = free_port();

    let mut config = test_config(
        lock_port,
        vec![
            sh("ibkr-bridge", "sleep 30", 1),
            sh("mt5-bridge", "sleep 30", 1),
            sh(
                "dashboard",
                &format!(
                    "echo \"$BRIDGESTACK_LOCK_PORT\" > '{}'; sleep 30",
                    env_file.display()
                ),
                1,
            ),
        ],
    );
    config.dependency = Some(touching_dependency(&dependency_marker));

    let browser = RecordingBrowser::default();
    let report = Supervisor::new(config)
        .with_process_table(FixedProcessTable(false))
        .with_browser(browser.clone())
        .run(stop_after(3000))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(
        report.transitions,
        vec![
            SupervisorState::Idle,
            SupervisorState::LockCheck,
            SupervisorState::DependencyPhase,
            SupervisorState::ServicePhase,
            SupervisorState::Running,
            SupervisorState::ShuttingDown,
            SupervisorState::Stopped,
        ]
    );
    assert_eq!(report.exit_code, 0);

    // Dependency was launched
    assert!(wait_for_file(&dependency_marker).await);

    // Services spawned in declared order with at least the configured gap
    let names: Vec<_> = report.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["ibkr-bridge", "mt5-bridge", "dashboard"]);
    for pair in report.services.windows(2) {
        let gap = pair[1].started_at - pair[0].started_at;
        assert!(gap.num_milliseconds() >= 1000, "gap was {:?}", gap);
    }

    // Browser opened once, after the dashboard started
    let opened = browser.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, "http://localhost:8502");
    assert!(opened[0].1 >= report.services[2].started_at);

    // Every service was torn down
    assert!(report
        .services
        .iter()
        .all(|s| matches!(s.status, ServiceStatus::Exited(_))));

    // Children saw the lock port
    assert_eq!(
        std::fs::read_to_string(&env_file).unwrap().trim(),
        lock_port.to_string()
    );

    // Lock released
    assert!(PortLock::new(lock_port).acquire().is_ok());
}

#[tokio::test]
async fn test_running_dependency_is_not_relaunched() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("terminal-launched");

    let mut config = test_config(free_port(), vec![sh("ibkr-bridge", "sleep 30", 0)]);
    config.dependency = Some(touching_dependency(&marker));

    let report = Supervisor::new(config)
        .with_process_table(FixedProcessTable(true))
        .with_browser(RecordingBrowser::default())
        .run(stop_after(100))
        .await
        .unwrap();

    assert!(report.visited(SupervisorState::DependencyPhase));
    assert!(report.warnings.is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_bad_dependency_path_is_a_warning() {
    let mut config = test_config(free_port(), vec![sh("ibkr-bridge", "sleep 30", 0)]);
    config.dependency = Some(DependencyConfig {
        path: Some("/no/such/mt5/terminal64.exe".to_string()),
        ready_delay_secs: 60,
        ..DependencyConfig::default()
    });

    let report = Supervisor::new(config)
        .with_process_table(FixedProcessTable(false))
        .with_browser(RecordingBrowser::default())
        .run(stop_after(100))
        .await
        .unwrap();

    assert_eq!(report.exit_code, 0);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::DependencyMissing { .. })));
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::DependencyLaunchFailed { .. })));
    assert_eq!(report.services[0].name, "ibkr-bridge");
}

// ============================================================================
// Attach
// ============================================================================

#[tokio::test]
async fn test_held_lock_only_opens_browser() {
    let dir = tempfile::tempdir().unwrap();
    let dependency_marker = dir.path().join("terminal-launched");
    let service_marker = dir.path().join("service-started");
    let lock_port = free_port();
    let _held = PortLock::new(lock_port).acquire().unwrap();

    let mut config = test_config(
        lock_port,
        vec![sh(
            "ibkr-bridge",
            &format!("touch '{}'; sleep 30", service_marker.display()),
            0,
        )],
    );
    config.dependency = Some(touching_dependency(&dependency_marker));

    let browser = RecordingBrowser::default();
    let report = Supervisor::new(config)
        .with_process_table(FixedProcessTable(false))
        .with_browser(browser.clone())
        .run(std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Attached);
    assert_eq!(
        report.transitions,
        vec![
            SupervisorState::Idle,
            SupervisorState::LockCheck,
            SupervisorState::Attach,
            SupervisorState::Stopped,
        ]
    );
    assert!(!report.visited(SupervisorState::DependencyPhase));
    assert!(!report.visited(SupervisorState::ServicePhase));
    assert!(report.services.is_empty());
    assert_eq!(browser.opened().len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!dependency_marker.exists());
    assert!(!service_marker.exists());
}

#[tokio::test]
async fn test_attach_with_failing_browser_is_fatal() {
    let lock_port = free_port();
    let _held = PortLock::new(lock_port).acquire().unwrap();

    let result = Supervisor::new(test_config(lock_port, Vec::new()))
        .with_browser(BrokenBrowser)
        .run(std::future::pending::<()>())
        .await;

    assert!(result.is_err());
}

// ============================================================================
// Partial failure and recovery
// ============================================================================

#[tokio::test]
async fn test_failed_service_does_not_block_siblings() {
    let config = test_config(
        free_port(),
        vec![
            sh("ibkr-bridge", "sleep 30", 0),
            ServiceSpec::new("mt5-bridge", vec!["/no/such/python".into()])
                .with_start_delay_secs(0),
            sh("dashboard", "sleep 30", 0),
        ],
    );

    let browser = RecordingBrowser::default();
    let report = Supervisor::new(config)
        .with_browser(browser.clone())
        .run(stop_after(200))
        .await
        .unwrap();

    assert_eq!(report.exit_code, 1);
    assert!(matches!(report.services[1].status, ServiceStatus::Failed(_)));
    assert!(report.services[1].pid.is_none());
    assert!(report.services[0].pid.is_some());
    assert!(report.services[2].pid.is_some());
    assert!(report.warnings.contains(&Warning::ServiceFailed {
        service: "mt5-bridge".to_string(),
        status: report.services[1].status.to_string(),
    }));
    assert_eq!(browser.opened().len(), 1);
}

#[tokio::test]
async fn test_dashboard_not_ready_still_opens_browser_with_warning() {
    let config = test_config(
        free_port(),
        vec![sh("dashboard", "sleep 30", 0).with_health_check(HealthCheck::tcp(free_port()))],
    );

    let browser = RecordingBrowser::default();
    let report = Supervisor::new(config)
        .with_browser(browser.clone())
        .run(stop_after(1500))
        .await
        .unwrap();

    assert!(report.warnings.contains(&Warning::DashboardNotRunning {
        service: "dashboard".to_string()
    }));
    assert_eq!(browser.opened().len(), 1);
    assert_eq!(report.exit_code, 1);
}

#[tokio::test]
async fn test_monitor_recovers_failed_service() {
    let port = free_port();
    let mut config = test_config(
        free_port(),
        vec![sh("mt5-bridge", "sleep 30", 0).with_health_check(HealthCheck::tcp(port))],
    );
    config.open_browser = false;
    config.monitor = MonitorConfig {
        interval_secs: Some(1),
        max_restarts: 3,
    };

    // The port starts answering after the readiness timeout has marked it failed.
    let stop = async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        drop(listener);
    };

    let report = Supervisor::new(config).run(stop).await.unwrap();

    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::ServiceFailed { service, .. } if service == "mt5-bridge")));
    assert_eq!(report.services[0].restarts, 1);
    assert_eq!(report.exit_code, 0);
}

#[tokio::test]
async fn test_no_browser_config_skips_browser() {
    let mut config = test_config(free_port(), vec![sh("dashboard", "sleep 30", 0)]);
    config.open_browser = false;

    let browser = RecordingBrowser::default();
    Supervisor::new(config)
        .with_browser(browser.clone())
        .run(stop_after(100))
        .await
        .unwrap();

    assert!(browser.opened().is_empty());
}

#[tokio::test]
async fn test_stop_interrupts_restart_in_progress() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = test_config(
        free_port(),
        vec![sh("mt5-bridge", "sleep 30", 0).with_health_check(HealthCheck::tcp(port))],
    );
    config.open_browser = false;
    config.readiness.timeout_secs = 20;
    config.monitor = MonitorConfig {
        interval_secs: Some(1),
        max_restarts: 3,
    };

    // The bridge stops answering, so the next monitor pass restarts it and then
    // waits on a readiness check that can only time out.
    let stop = async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(listener);
        tokio::time::sleep(Duration::from_millis(1500)).await;
    };

    let started = Instant::now();
    let report = Supervisor::new(config).run(stop).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(8), "took {:?}", started.elapsed());
    assert!(report.visited(SupervisorState::Running));
    assert_eq!(report.services[0].restarts, 1);
    assert!(!is_alive(report.services[0].pid.unwrap()));
}

// ============================================================================
// Stop during startup
// ============================================================================

#[tokio::test]
async fn test_stop_during_service_phase_tears_down_spawned_services() {
    let lock_port = free_port();
    let mut config = test_config(
        lock_port,
        vec![
            sh("ibkr-bridge", "sleep 30", 0),
            sh("dashboard", "sleep 30", 0).with_health_check(HealthCheck::tcp(free_port())),
        ],
    );
    config.open_browser = false;
    config.readiness.timeout_secs = 20;

    let started = Instant::now();
    let report = Supervisor::new(config)
        .run(stop_after(500))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(8), "took {:?}", started.elapsed());
    assert_eq!(
        report.transitions,
        vec![
            SupervisorState::Idle,
            SupervisorState::LockCheck,
            SupervisorState::DependencyPhase,
            SupervisorState::ServicePhase,
            SupervisorState::ShuttingDown,
            SupervisorState::Stopped,
        ]
    );
    assert_eq!(report.services.len(), 2);
    for service in &report.services {
        assert!(!is_alive(service.pid.unwrap()), "{} still running", service.name);
    }
    assert_eq!(report.exit_code, 0);
    assert!(PortLock::new(lock_port).acquire().is_ok());
}

// ============================================================================
// CLI
// ============================================================================

#[test]
fn test_sigterm_during_startup_stops_every_child() {
    let dir = tempfile::tempdir().unwrap();
    let bridge_pid = dir.path().join("bridge.pid");
    let dashboard_pid = dir.path().join("dashboard.pid");

    let mut config = test_config(
        free_port(),
        vec![
            sh(
                "ibkr-bridge",
                &format!("echo $$ > '{}'; exec sleep 30", bridge_pid.display()),
                0,
            ),
            sh(
                "dashboard",
                &format!("echo $$ > '{}'; exec sleep 30", dashboard_pid.display()),
                0,
            )
            .with_health_check(HealthCheck::tcp(free_port())),
        ],
    );
    config.open_browser = false;
    config.readiness.timeout_secs = 20;
    let config_path = dir.path().join("bridgestack.json");
    config.save(&config_path).unwrap();

    let mut child = bridgestack(dir.path())
        .arg("up")
        .arg("--config")
        .arg(&config_path)
        .arg("--no-browser")
        .spawn()
        .unwrap();

    // Both services are spawned while the dashboard is still waiting to be ready.
    let pids = [read_pid_file(&bridge_pid), read_pid_file(&dashboard_pid)];
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("supervisor did not exit after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    // Exited through teardown rather than being killed by the signal.
    assert_eq!(status.code(), Some(0));
    for pid in pids {
        assert!(!is_alive(pid), "service {} outlived the supervisor", pid);
    }
}

#[test]
fn test_status_exit_code_reflects_service_health() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = test_config(
        free_port(),
        vec![sh("ibkr-bridge", "sleep 30", 0).with_health_check(HealthCheck::tcp(port))],
    );
    let config_path = dir.path().join("bridgestack.json");
    config.save(&config_path).unwrap();

    let status = |json: bool| {
        let mut cmd = bridgestack(dir.path());
        cmd.arg("status").arg("--config").arg(&config_path);
        if json {
            cmd.arg("--json");
        }
        cmd.output().unwrap()
    };

    let answering = status(false);
    assert_eq!(answering.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&answering.stdout).contains("ibkr-bridge"));

    drop(listener);
    let down = status(true);
    assert_eq!(down.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&down.stdout).unwrap();
    assert_eq!(report["services"][0]["healthy"], false);
}
