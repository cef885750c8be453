use std::fmt;
use std::path::Path;

/// Steps whose failure must never change a request's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    RawCleanup,
    WorkingFileCleanup,
    ViewerLaunch,
    HistoryRecord,
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RawCleanup => "raw cleanup",
            Self::WorkingFileCleanup => "working file cleanup",
            Self::ViewerLaunch => "viewer launch",
            Self::HistoryRecord => "history record",
        };
        f.write_str(name)
    }
}

/// Receives progress and swallowed failures from the pipeline and handlers.
pub trait Observer: Send + Sync {
    fn step(&self, _step: &str, _path: &Path) {}

    fn side_effect_failed(&self, effect: SideEffect, path: &Path, error: &str);
}

/// Default observer: everything goes to the log.
pub struct LogObserver;

impl Observer for LogObserver {
    fn step(&self, step: &str, path: &Path) {
        log::info!("[PIPELINE] {}: {}", step, path.display());
    }

    fn side_effect_failed(&self, effect: SideEffect, path: &Path, error: &str) {
        log::warn!("[PIPELINE] {} failed for {}: {}", effect, path.display(), error);
    }
}
