// ABOUTME: Opens the dashboard URL in the user's browser.
// ABOUTME: Fire-and-forget through the platform's URL opener.

use anyhow::{Context, Result};
use std::process::{Command, Stdio};

pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Uses `open` on macOS, `cmd /C start` on Windows, `xdg-open` elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl SystemBrowser {
    fn command(url: &str) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        } else if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", url]);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
    }
}

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let mut child = Self::command(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch browser for {}", url))?;

        tracing::info!(url = %url, "Opened dashboard in browser");
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}
