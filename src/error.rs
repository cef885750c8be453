use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything that can stop a download from producing a file.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request was rejected before any tool ran.
    #[error("{0}")]
    Input(String),
    /// yt-dlp could not resolve or fetch the URL.
    #[error("Extraction failed: {0}")]
    Extraction(String),
    /// ffmpeg exited with an error or could not be started.
    #[error("Transcode failed: {0}")]
    Transcode(String),
    /// Another process kept the file open for the whole retry budget.
    #[error("Timed out waiting for {} to be released after {attempts} attempts", .path.display())]
    FileLockTimeout { path: PathBuf, attempts: u32 },
    #[error("Filesystem error on {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A step reported success but the file it should have written is absent or empty.
    #[error("Expected output is missing or empty: {}", .0.display())]
    MissingOutput(PathBuf),
    #[error("Download cancelled")]
    Cancelled,
    #[error("Download did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Stable, machine-readable error category reported to HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Extraction,
    Transcode,
    FileLockTimeout,
    Filesystem,
    MissingOutput,
    Cancelled,
    TimedOut,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Transcode(_) => ErrorKind::Transcode,
            Self::FileLockTimeout { .. } => ErrorKind::FileLockTimeout,
            Self::Filesystem { .. } => ErrorKind::Filesystem,
            Self::MissingOutput(_) => ErrorKind::MissingOutput,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TimedOut(_) => ErrorKind::TimedOut,
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Extraction => "extraction",
            Self::Transcode => "transcode",
            Self::FileLockTimeout => "file_lock_timeout",
            Self::Filesystem => "filesystem",
            Self::MissingOutput => "missing_output",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}
