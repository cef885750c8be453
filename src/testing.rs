//! Stub collaborators shared by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::extractor::{ExtractJob, Extractor};
use crate::models::MediaFormat;
use crate::observer::{Observer, SideEffect};
use crate::pipeline::{PipelineSettings, TITLE_CHARS};
use crate::release::ReleasePolicy;
use crate::transcoder::{EncodePolicy, TranscodeJob, Transcoder};
use crate::viewer::MediaViewer;

pub fn test_settings(dir: &Path) -> PipelineSettings {
    PipelineSettings {
        download_dir: dir.to_path_buf(),
        header_domains: vec!["snapchat.com".to_string()],
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string(),
        encode: EncodePolicy::default(),
        release: ReleasePolicy {
            max_attempts: 3,
            interval: Duration::from_millis(10),
        },
        deadline: None,
        open_in_player: true,
    }
}

enum DownloadBehavior {
    Write { title: String, ext: String },
    Fail(String),
}

/// Writes `raw:<title>` to the path the output template resolves to.
pub struct StubExtractor {
    formats: std::result::Result<Vec<MediaFormat>, String>,
    download: DownloadBehavior,
    delay: Option<Duration>,
    raw_as_directory: bool,
    format_queries: AtomicUsize,
    jobs: Mutex<Vec<ExtractJob>>,
    last_download: Mutex<Option<PathBuf>>,
}

impl StubExtractor {
    fn build(
        formats: std::result::Result<Vec<MediaFormat>, String>,
        download: DownloadBehavior,
    ) -> Self {
        Self {
            formats,
            download,
            delay: None,
            raw_as_directory: false,
            format_queries: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
            last_download: Mutex::new(None),
        }
    }

    pub fn downloading(title: &str, ext: &str) -> Self {
        Self::build(
            Ok(Vec::new()),
            DownloadBehavior::Write {
                title: title.to_string(),
                ext: ext.to_string(),
            },
        )
    }

    pub fn with_formats(formats: Vec<MediaFormat>) -> Self {
        Self::downloading("Stub Video", "webm").formats(formats)
    }

    /// Both the format query and the download fail with `message`.
    pub fn failing(message: &str) -> Self {
        Self::build(
            Err(message.to_string()),
            DownloadBehavior::Fail(message.to_string()),
        )
    }

    pub fn formats(mut self, formats: Vec<MediaFormat>) -> Self {
        self.formats = Ok(formats);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The "download" is a directory, which can never be opened or removed as a file.
    pub fn raw_as_directory(mut self) -> Self {
        self.raw_as_directory = true;
        self
    }

    pub fn format_queries(&self) -> usize {
        self.format_queries.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<ExtractJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn download_calls(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn last_download(&self) -> Option<PathBuf> {
        self.last_download.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn list_formats(&self, _url: &str, _user_agent: Option<&str>) -> Result<Vec<MediaFormat>> {
        self.format_queries.fetch_add(1, Ordering::SeqCst);
        self.formats.clone().map_err(PipelineError::Extraction)
    }

    async fn download(&self, job: &ExtractJob) -> Result<PathBuf> {
        self.jobs.lock().unwrap().push(job.clone());
        let (title, ext) = match &self.download {
            DownloadBehavior::Fail(msg) => {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                return Err(PipelineError::Extraction(msg.clone()));
            }
            DownloadBehavior::Write { title, ext } => (title, ext),
        };

        let title: String = title.chars().take(TITLE_CHARS).collect();
        let path = PathBuf::from(
            job.output_template
                .to_string_lossy()
                .replace(&format!("%(title).{}s", TITLE_CHARS), &title)
                .replace("%(ext)s", ext),
        );
        if let Some(delay) = self.delay {
            // Like yt-dlp, leave a partial file behind while "downloading".
            let part = PathBuf::from(format!("{}.part", path.display()));
            tokio::fs::write(&part, b"partial")
                .await
                .map_err(|e| PipelineError::filesystem(&part, e))?;
            tokio::time::sleep(delay).await;
        }

        if self.raw_as_directory {
            tokio::fs::create_dir(&path)
                .await
                .map_err(|e| PipelineError::filesystem(&path, e))?;
        } else {
            tokio::fs::write(&path, format!("raw:{}", title))
                .await
                .map_err(|e| PipelineError::filesystem(&path, e))?;
        }
        *self.last_download.lock().unwrap() = Some(path.clone());
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub enum TranscodeMode {
    /// Output = `reencoded:` or `muted:` + input.
    Succeed,
    /// Exit status fine, nothing written.
    NoOutput,
    EmptyOutput,
    /// Leaves a directory at the output path, so it never gets released.
    LockedOutput,
    Fail(String),
}

pub struct StubTranscoder {
    mode: TranscodeMode,
    jobs: Mutex<Vec<TranscodeJob>>,
}

impl StubTranscoder {
    pub fn new(mode: TranscodeMode) -> Self {
        Self {
            mode,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn run(&self, job: &TranscodeJob) -> Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        let (input, output, tag) = match job {
            TranscodeJob::Reencode { input, output, .. } => (input, output, "reencoded:"),
            TranscodeJob::StripAudio { input, output } => (input, output, "muted:"),
        };
        match &self.mode {
            TranscodeMode::Fail(msg) => Err(PipelineError::Transcode(msg.clone())),
            TranscodeMode::NoOutput => Ok(()),
            TranscodeMode::EmptyOutput => tokio::fs::write(output, b"")
                .await
                .map_err(|e| PipelineError::filesystem(output, e)),
            TranscodeMode::LockedOutput => tokio::fs::create_dir(output)
                .await
                .map_err(|e| PipelineError::filesystem(output, e)),
            TranscodeMode::Succeed => {
                let body = tokio::fs::read_to_string(input).await.unwrap_or_default();
                tokio::fs::write(output, format!("{}{}", tag, body))
                    .await
                    .map_err(|e| PipelineError::filesystem(output, e))
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingViewer {
    fail: bool,
    opened: Mutex<Vec<PathBuf>>,
}

impl RecordingViewer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl MediaViewer for RecordingViewer {
    fn open(&self, path: &Path) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            anyhow::bail!("no default player configured");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    failures: Mutex<Vec<(SideEffect, PathBuf)>>,
}

impl RecordingObserver {
    pub fn failures(&self) -> Vec<(SideEffect, PathBuf)> {
        self.failures.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn side_effect_failed(&self, effect: SideEffect, path: &Path, _error: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((effect, path.to_path_buf()));
    }
}
