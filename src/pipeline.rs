// Download-and-normalize pipeline.
//
// One request runs these steps in order: pick formats, let yt-dlp download,
// re-encode with ffmpeg into a temp file, move it to its final name, drop the
// raw download, optionally strip audio, verify, open in the player. The tools
// only ever write into a scratch directory owned by the run; the final name
// is claimed up front. Whatever the run still owns when it fails is deleted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::extractor::{ExtractJob, Extractor};
use crate::format_selector::{combined_selector, select_video_only_format};
use crate::models::{DownloadRequest, DownloadResult};
use crate::observer::{Observer, SideEffect};
use crate::release::{wait_for_release, ReleaseOutcome, ReleasePolicy};
use crate::transcoder::{EncodePolicy, TranscodeJob, Transcoder};
use crate::util::{
    muted_variant, normalize_container, requires_browser_headers, reserve_unique_path,
    sanitize_filename,
};
use crate::viewer::MediaViewer;

const MERGE_CONTAINER: &str = "mp4";
const FALLBACK_STEM: &str = "video";
const SCRATCH_PREFIX: &str = ".makecut_";

/// Title characters kept by the output template. With the longest suffix
/// (`_audio-off_` and a 14 digit timestamp) the stem is exactly 80 characters,
/// so sanitizing never cuts the timestamp off.
pub const TITLE_CHARS: usize = 55;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub download_dir: PathBuf,
    pub header_domains: Vec<String>,
    pub user_agent: String,
    pub encode: EncodePolicy,
    pub release: ReleasePolicy,
    pub deadline: Option<Duration>,
    pub open_in_player: bool,
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            download_dir: cfg.download_dir.clone(),
            header_domains: cfg.header_domains.clone(),
            user_agent: cfg.user_agent.clone(),
            encode: EncodePolicy::from_config(cfg),
            release: ReleasePolicy {
                max_attempts: cfg.release_max_attempts,
                interval: Duration::from_millis(cfg.release_interval_ms),
            },
            deadline: (cfg.pipeline_timeout_secs > 0)
                .then(|| Duration::from_secs(cfg.pipeline_timeout_secs)),
            open_in_player: cfg.open_in_player,
        }
    }
}

/// yt-dlp output template: `<dir>/%(title).55s_audio-on_20240131235959.%(ext)s`.
pub fn output_template(dir: &Path, include_audio: bool, now: DateTime<Local>) -> PathBuf {
    let suffix = if include_audio { "_audio-on" } else { "_audio-off" };
    dir.join(format!(
        "%(title).{}s{}_{}.%(ext)s",
        TITLE_CHARS,
        suffix,
        now.format("%Y%m%d%H%M%S")
    ))
}

/// Paths created by the current run that are still ours to delete.
#[derive(Debug, Default)]
struct WorkingFiles {
    scratch: Option<PathBuf>,
    paths: Vec<PathBuf>,
}

impl WorkingFiles {
    /// A fresh directory under `dir` that only this run writes into.
    async fn create_scratch(&mut self, dir: &Path, now: DateTime<Local>) -> Result<PathBuf> {
        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        let mut n = 0u32;
        loop {
            let candidate = dir.join(format!("{}{}_{}", SCRATCH_PREFIX, stamp, n));
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => {
                    self.scratch = Some(candidate.clone());
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(PipelineError::filesystem(&candidate, e)),
            }
        }
    }

    fn track(&mut self, path: &Path) {
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_path_buf());
        }
    }

    fn forget(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Drops the scratch directory together with any partial tool output in it.
    async fn remove_scratch(&mut self, observer: &dyn Observer) {
        let Some(dir) = self.scratch.take() else {
            return;
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => log::debug!("[PIPELINE] Removed {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                observer.side_effect_failed(SideEffect::WorkingFileCleanup, &dir, &e.to_string())
            }
        }
    }

    async fn discard(&mut self, observer: &dyn Observer) {
        for path in self.paths.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::debug!("[PIPELINE] Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    observer.side_effect_failed(SideEffect::WorkingFileCleanup, &path, &e.to_string())
                }
            }
        }
        self.remove_scratch(observer).await;
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    viewer: Arc<dyn MediaViewer>,
    observer: Arc<dyn Observer>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        viewer: Arc<dyn MediaViewer>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            settings,
            extractor,
            transcoder,
            viewer,
            observer,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.settings.download_dir
    }

    pub async fn run(&self, req: &DownloadRequest) -> DownloadResult {
        self.run_with_cancel(req, &CancellationToken::new()).await
    }

    /// Run the whole pipeline; never returns an error, only a [`DownloadResult`].
    pub async fn run_with_cancel(
        &self,
        req: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> DownloadResult {
        let started = Instant::now();
        let mut working = WorkingFiles::default();
        let deadline = self.settings.deadline;

        let res = {
            let work = async {
                let run = self.execute(req, &mut working, cancel);
                match deadline {
                    Some(limit) => tokio::time::timeout(limit, run)
                        .await
                        .unwrap_or(Err(PipelineError::TimedOut(limit))),
                    None => run.await,
                }
            };
            tokio::select! {
                res = work => res,
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            }
        };

        match &res {
            Ok(path) => log::info!(
                "[PIPELINE] Done in {:.1}s: {}",
                started.elapsed().as_secs_f64(),
                path.display()
            ),
            Err(e) => {
                log::error!("[PIPELINE] Failed for {}: {}", req.url(), e);
                working.discard(self.observer.as_ref()).await;
            }
        }
        res.into()
    }

    async fn execute(
        &self,
        req: &DownloadRequest,
        working: &mut WorkingFiles,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let dir = &self.settings.download_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::filesystem(dir, e))?;

        let now = Local::now();
        let scratch = working.create_scratch(dir, now).await?;
        let job = self.plan(req, &scratch, now).await;
        self.observer.step("download", &job.output_template);
        let raw = self.extractor.download(&job).await?;
        self.observer.step("downloaded", &raw);

        let final_path = self.reserve_final_path(&raw).await?;
        working.track(&final_path);
        let temp_path = scratch.join(format!(
            "temp_{}",
            final_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        ));

        self.transcoder
            .run(&TranscodeJob::Reencode {
                input: raw.clone(),
                output: temp_path.clone(),
                policy: self.settings.encode.clone(),
            })
            .await?;

        self.ensure_released(&temp_path, cancel).await?;
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| PipelineError::filesystem(&temp_path, e))?;
        self.observer.step("finalized", &final_path);

        self.remove_raw(&raw, cancel).await?;

        if !req.include_audio() {
            self.strip_audio(&final_path, &scratch, cancel).await?;
        }

        let len = tokio::fs::metadata(&final_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if len == 0 {
            return Err(PipelineError::MissingOutput(final_path));
        }

        working.remove_scratch(self.observer.as_ref()).await;

        if self.settings.open_in_player {
            if let Err(e) = self.viewer.open(&final_path) {
                self.observer
                    .side_effect_failed(SideEffect::ViewerLaunch, &final_path, &format!("{:#}", e));
            }
        }

        working.forget(&final_path);
        Ok(final_path)
    }

    async fn plan(&self, req: &DownloadRequest, scratch: &Path, now: DateTime<Local>) -> ExtractJob {
        let url = req.url();
        let user_agent = requires_browser_headers(url, &self.settings.header_domains)
            .then(|| self.settings.user_agent.clone());

        let (format, merge_container) = if req.include_audio() {
            (combined_selector(req.max_height()), Some(MERGE_CONTAINER.to_string()))
        } else {
            let format =
                select_video_only_format(self.extractor.as_ref(), url, user_agent.as_deref()).await;
            (format, None)
        };

        ExtractJob {
            url: url.to_string(),
            format,
            output_template: output_template(scratch, req.include_audio(), now),
            merge_container,
            ignore_errors: true,
            user_agent,
        }
    }

    /// Claims `<sanitized stem>.mp4` in the download dir, never clobbering another file.
    async fn reserve_final_path(&self, raw: &Path) -> Result<PathBuf> {
        let dir = &self.settings.download_dir;
        let stem = normalize_container(raw)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut clean = sanitize_filename(&stem);
        if clean.is_empty() {
            clean = FALLBACK_STEM.to_string();
        }

        reserve_unique_path(dir, &clean, "mp4")
            .await
            .map_err(|e| PipelineError::filesystem(dir, e))
    }

    async fn ensure_released(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        match wait_for_release(path, self.settings.release, cancel).await {
            ReleaseOutcome::Released { .. } => Ok(()),
            ReleaseOutcome::TimedOut { attempts } => Err(PipelineError::FileLockTimeout {
                path: path.to_path_buf(),
                attempts,
            }),
            ReleaseOutcome::Missing => Err(PipelineError::MissingOutput(path.to_path_buf())),
            ReleaseOutcome::Cancelled => Err(PipelineError::Cancelled),
        }
    }

    /// Best effort; only cancellation is an error here.
    async fn remove_raw(&self, raw: &Path, cancel: &CancellationToken) -> Result<()> {
        match wait_for_release(raw, self.settings.release, cancel).await {
            ReleaseOutcome::Released { .. } => {
                if let Err(e) = tokio::fs::remove_file(raw).await {
                    self.observer
                        .side_effect_failed(SideEffect::RawCleanup, raw, &e.to_string());
                }
            }
            ReleaseOutcome::Missing => {}
            ReleaseOutcome::TimedOut { attempts } => {
                self.observer.side_effect_failed(
                    SideEffect::RawCleanup,
                    raw,
                    &format!(
                        "still locked after {} attempts ({:?})",
                        attempts,
                        self.settings.release.budget()
                    ),
                );
            }
            ReleaseOutcome::Cancelled => return Err(PipelineError::Cancelled),
        }
        Ok(())
    }

    async fn strip_audio(
        &self,
        final_path: &Path,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let muted = scratch.join(muted_variant(final_path).file_name().unwrap_or_default());
        self.transcoder
            .run(&TranscodeJob::StripAudio {
                input: final_path.to_path_buf(),
                output: muted.clone(),
            })
            .await?;
        if !muted.exists() {
            return Err(PipelineError::MissingOutput(muted));
        }

        self.ensure_released(final_path, cancel).await?;
        // rename replaces the target, so the name is never free for another run.
        tokio::fs::rename(&muted, final_path)
            .await
            .map_err(|e| PipelineError::filesystem(&muted, e))?;
        self.observer.step("audio stripped", final_path);
        Ok(())
    }
}
