// ABOUTME: bridgestack CLI entry point.
// ABOUTME: Provides up, status, and init subcommands.

use bridgestack::{run_init, run_status, run_supervisor, SupervisorOptions};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bridgestack")]
#[command(about = "Supervisor for the local trading-bridge stack")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the stack and keep it running until interrupted
    Up {
        /// Path to configuration file
        #[arg(long, env = "BRIDGESTACK_CONFIG")]
        config: Option<PathBuf>,
        /// Do not open the dashboard in a browser
        #[arg(long)]
        no_browser: bool,
        /// Log to a file instead of the console
        #[arg(long)]
        log_file: bool,
    },
    /// Show whether the stack is running and which services answer.
    /// Exits with 1 when any service does not answer.
    Status {
        /// Path to configuration file
        #[arg(long, env = "BRIDGESTACK_CONFIG")]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a new configuration file
    Init {
        /// Where to write the configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up {
            config: config_path,
            no_browser,
            log_file,
        } => {
            if log_file {
                bridgestack_log::init_file("bridgestack");
            } else {
                bridgestack_log::init();
            }

            let report = run_supervisor(SupervisorOptions {
                config_path,
                no_browser,
            })
            .await?;
            std::process::exit(report.exit_code);
        }
        Commands::Status {
            config: config_path,
            json,
        } => {
            bridgestack_log::init();
            let report = run_status(config_path.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
            if !report.all_healthy() {
                std::io::stdout().flush()?;
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Init {
            config: config_path,
        } => run_init(config_path.as_deref()),
    }
}
