// ABOUTME: Setup wizard for bridgestack configuration.
// ABOUTME: Asks for the project directory, MT5 terminal path, and dashboard port.

use anyhow::{Context, Result};
use bridgestack_core::{Config, DependencyConfig, HealthCheck};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Answers collected by the wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAnswers {
    pub project_dir: String,
    pub terminal_path: Option<String>,
    pub dashboard_port: u16,
    pub open_browser: bool,
}

fn prompt(message: &str, default: &str) -> Result<String> {
    print!("{} [{}]: ", message, default);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim();
    if input.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(input.to_string())
    }
}

fn prompt_yes_no(message: &str, default: bool) -> Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    let answer = prompt(message, hint)?;
    Ok(match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    })
}

/// Stock three-service layout rooted at the answers' project directory.
pub fn build_config(answers: &InitAnswers) -> Config {
    let mut config = Config {
        open_browser: answers.open_browser,
        dashboard_url: format!("http://localhost:{}", answers.dashboard_port),
        ..Config::default()
    };

    config.dependency = Some(DependencyConfig {
        path: answers.terminal_path.clone(),
        process_name: Some("terminal64.exe".to_string()),
        ..DependencyConfig::default()
    });

    let dashboard_port = answers.dashboard_port.to_string();
    for service in &mut config.services {
        service.working_dir = Some(answers.project_dir.clone());
        if service.name == config.dashboard_service {
            if let Some(pos) = service.command.iter().position(|a| a == "--server.port") {
                if let Some(port) = service.command.get_mut(pos + 1) {
                    *port = dashboard_port.clone();
                }
            }
            service.health_check = Some(HealthCheck::tcp(answers.dashboard_port));
        }
    }

    config
}

pub fn run_init(config_path: Option<&Path>) -> Result<()> {
    println!("bridgestack initialization\n");

    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };

    let default_project = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|_| "~/trading-bridge".to_string());
    let project_dir = prompt("Bridge project directory", &default_project)?;

    let terminal = prompt("MT5 terminal executable (empty to skip)", "")?;
    let terminal_path = Some(terminal).filter(|t| !t.is_empty());

    let dashboard_port: u16 = prompt("Dashboard port", "8502")?
        .parse()
        .context("Invalid port")?;
    let open_browser = prompt_yes_no("Open the dashboard in a browser on start", true)?;

    let config = build_config(&InitAnswers {
        project_dir: project_dir.clone(),
        terminal_path,
        dashboard_port,
        open_browser,
    });
    config.validate().context("Generated configuration is invalid")?;
    config.save(&config_path)?;
    println!("\nConfig written to {}", config_path.display());

    let project = PathBuf::from(shellexpand::tilde(&project_dir).into_owned());
    if !project.is_dir() {
        println!("Note: {} does not exist yet", project.display());
    }

    println!("\nReady to run: bridgestack up");

    Ok(())
}
