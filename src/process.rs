use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::Mutex as AsyncMutex;

const STDERR_TAIL_LINES: usize = 50;

/// What an external tool left behind once it exited.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr_tail: String,
}

async fn collect_stderr(stderr: ChildStderr, label: &'static str, buf: Arc<AsyncMutex<VecDeque<String>>>) {
    let mut r = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match r.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let l = line.trim_end().to_string();
                if !l.is_empty() {
                    log::debug!("[{}] {}", label, l);
                    let mut g = buf.lock().await;
                    if g.len() >= STDERR_TAIL_LINES {
                        g.pop_front();
                    }
                    g.push_back(l);
                }
            }
            Err(_) => break,
        }
    }
}

async fn render_tail(buf: &AsyncMutex<VecDeque<String>>) -> String {
    let g = buf.lock().await;
    if g.is_empty() {
        return "no stderr output captured".to_string();
    }
    g.iter().cloned().collect::<Vec<_>>().join("\n")
}

/// Run `cmd` to completion, capturing stdout and the last lines of stderr.
///
/// The child is killed if the returned future is dropped, so an abandoned
/// request does not leave yt-dlp or ffmpeg running.
pub async fn run_tool(mut cmd: Command, label: &'static str) -> std::io::Result<ToolOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let Some(pid) = child.id() {
        log::debug!("[{}] started (pid={})", label, pid);
    }

    let tail_buf: Arc<AsyncMutex<VecDeque<String>>> = Arc::new(AsyncMutex::new(VecDeque::new()));
    let stderr_task = child.stderr.take().map(|stderr| {
        let tail_buf = tail_buf.clone();
        tokio::spawn(async move { collect_stderr(stderr, label, tail_buf).await })
    });

    // Decoded lossily: a console code page must not turn a finished run into an error.
    let mut stdout = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_end(&mut stdout).await?;
    }

    let status = child.wait().await?;
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    Ok(ToolOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr_tail: render_tail(&tail_buf).await,
    })
}
