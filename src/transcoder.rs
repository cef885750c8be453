use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::process::run_tool;

/// Fixed re-encode settings applied to every download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodePolicy {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodePolicy {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

impl EncodePolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            video_codec: cfg.video_codec.clone(),
            preset: cfg.preset.clone(),
            crf: cfg.crf,
            audio_codec: cfg.audio_codec.clone(),
            audio_bitrate: cfg.audio_bitrate.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeJob {
    Reencode {
        input: PathBuf,
        output: PathBuf,
        policy: EncodePolicy,
    },
    /// Copy the video stream as-is and drop every audio track.
    StripAudio { input: PathBuf, output: PathBuf },
}

impl TranscodeJob {
    pub fn output(&self) -> &PathBuf {
        match self {
            Self::Reencode { output, .. } | Self::StripAudio { output, .. } => output,
        }
    }

    /// ffmpeg arguments for this job; the output is always overwritten.
    pub fn ffmpeg_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into(), "-nostdin".into()];
        match self {
            Self::Reencode {
                input,
                output,
                policy,
            } => {
                let crf = policy.crf.to_string();
                args.push("-i".into());
                args.push(input.as_os_str().to_owned());
                for a in [
                    "-c:v",
                    policy.video_codec.as_str(),
                    "-preset",
                    policy.preset.as_str(),
                    "-crf",
                    crf.as_str(),
                    "-c:a",
                    policy.audio_codec.as_str(),
                    "-b:a",
                    policy.audio_bitrate.as_str(),
                ] {
                    args.push(a.into());
                }
                args.push(output.as_os_str().to_owned());
            }
            Self::StripAudio { input, output } => {
                args.push("-i".into());
                args.push(input.as_os_str().to_owned());
                args.push("-c".into());
                args.push("copy".into());
                args.push("-an".into());
                args.push(output.as_os_str().to_owned());
            }
        }
        args
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Run `job` to completion. A non-zero exit is a [`PipelineError::Transcode`].
    async fn run(&self, job: &TranscodeJob) -> Result<()>;
}

pub struct FfmpegTranscoder {
    bin: PathBuf,
    search_path: String,
}

impl FfmpegTranscoder {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            bin: cfg.ffmpeg_bin.clone(),
            search_path: cfg.ytdlp_path.clone(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(&self, job: &TranscodeJob) -> Result<()> {
        let mut cmd = Command::new(&self.bin);
        cmd.env("PATH", &self.search_path).args(job.ffmpeg_args());

        log::info!("[FFMPEG] Writing {}", job.output().display());
        let out = run_tool(cmd, "ffmpeg")
            .await
            .map_err(|e| PipelineError::Transcode(format!("Failed to start ffmpeg: {}", e)))?;
        if !out.status.success() {
            return Err(PipelineError::Transcode(format!(
                "ffmpeg exited with error (status={}): {}",
                out.status, out.stderr_tail
            )));
        }
        Ok(())
    }
}
