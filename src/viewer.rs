use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Opens a finished file for the user.
pub trait MediaViewer: Send + Sync {
    fn open(&self, path: &Path) -> Result<()>;
}

/// Hands the file to the desktop's default application and does not wait for it.
pub struct SystemViewer;

impl MediaViewer for SystemViewer {
    fn open(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            anyhow::bail!("{} does not exist", path.display());
        }

        #[cfg(target_os = "windows")]
        let command = {
            let mut command = Command::new("cmd");
            command.arg("/C").arg("start").arg("").arg(path);
            command
        };

        #[cfg(target_os = "macos")]
        let command = {
            let mut command = Command::new("open");
            command.arg(path);
            command
        };

        #[cfg(all(unix, not(target_os = "macos")))]
        let command = {
            let mut command = Command::new("xdg-open");
            command.arg(path);
            command
        };

        launch(command)
            .with_context(|| format!("Failed to open {} in the default player", path.display()))
    }
}

/// Start `command` without waiting for it. The exit is collected in the
/// background so no zombie is left behind. Needs a tokio runtime.
fn launch(mut command: Command) -> std::io::Result<()> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if !status.success() => log::debug!("[VIEWER] launcher exited with {}", status),
            Ok(_) => {}
            Err(e) => log::debug!("[VIEWER] could not wait for launcher: {}", e),
        }
    });
    Ok(())
}
