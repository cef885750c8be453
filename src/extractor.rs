use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::models::MediaFormat;
use crate::process::run_tool;

/// Everything yt-dlp needs to fetch one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractJob {
    pub url: String,
    pub format: String,
    pub output_template: PathBuf,
    /// Container to merge separate video/audio streams into; `None` skips merging.
    pub merge_container: Option<String>,
    pub ignore_errors: bool,
    pub user_agent: Option<String>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Metadata-only query; nothing is downloaded.
    async fn list_formats(&self, url: &str, user_agent: Option<&str>) -> Result<Vec<MediaFormat>>;

    /// Download according to `job` and return the path the tool wrote.
    async fn download(&self, job: &ExtractJob) -> Result<PathBuf>;
}

pub struct YtDlpExtractor {
    bin: PathBuf,
    search_path: String,
    proxy: Option<String>,
    inherit_proxy_env: bool,
    ffmpeg_bin: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    height: Option<u32>,
}

impl RawFormat {
    fn into_media_format(self) -> Option<MediaFormat> {
        Some(MediaFormat {
            format_id: self.format_id?,
            // Absent codec fields do not mean "none".
            has_audio: self.acodec.as_deref() != Some("none"),
            has_video: self.vcodec.as_deref() != Some("none"),
            height: self.height.unwrap_or(0),
        })
    }
}

pub(crate) fn parse_formats(json: &str) -> Result<Vec<MediaFormat>> {
    let info: InfoJson = serde_json::from_str(json)
        .map_err(|e| PipelineError::Extraction(format!("Failed to parse yt-dlp JSON: {}", e)))?;
    Ok(info
        .formats
        .unwrap_or_default()
        .into_iter()
        .filter_map(RawFormat::into_media_format)
        .collect())
}

impl YtDlpExtractor {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            bin: cfg.ytdlp_bin.clone(),
            search_path: cfg.ytdlp_path.clone(),
            proxy: cfg.ytdlp_proxy.clone(),
            inherit_proxy_env: cfg.inherit_proxy_env,
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.env("PATH", &self.search_path);

        if !self.inherit_proxy_env {
            // Avoid being accidentally bound to a dead local proxy (common in shell env).
            cmd.env_remove("http_proxy")
                .env_remove("https_proxy")
                .env_remove("HTTP_PROXY")
                .env_remove("HTTPS_PROXY")
                .env_remove("no_proxy")
                .env_remove("NO_PROXY");
        }
        cmd
    }

    fn common_args(&self, user_agent: Option<&str>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(p) = &self.proxy {
            args.push("--proxy".into());
            args.push(p.into());
        }
        if let Some(ua) = user_agent {
            args.push("--user-agent".into());
            args.push(ua.into());
        }
        args.extend(
            ["--no-playlist", "--no-warnings", "--geo-bypass", "--encoding", "utf-8"]
                .iter()
                .map(OsString::from),
        );
        args
    }

    pub(crate) fn info_args(&self, url: &str, user_agent: Option<&str>) -> Vec<OsString> {
        let mut args = self.common_args(user_agent);
        args.push("-J".into());
        args.push("--".into());
        args.push(url.into());
        args
    }

    pub(crate) fn download_args(&self, job: &ExtractJob) -> Vec<OsString> {
        let mut args = self.common_args(job.user_agent.as_deref());
        args.push("-f".into());
        args.push(job.format.as_str().into());
        args.push("-o".into());
        args.push(job.output_template.as_os_str().to_owned());
        args.push("--ffmpeg-location".into());
        args.push(self.ffmpeg_bin.as_os_str().to_owned());
        if let Some(container) = &job.merge_container {
            args.push("--merge-output-format".into());
            args.push(container.into());
        }
        if job.ignore_errors {
            args.push("--ignore-errors".into());
        }
        // Report the final path once merging and moving are done.
        args.push("--no-simulate".into());
        args.push("--print".into());
        args.push("after_move:filepath".into());
        args.push("--".into());
        args.push(job.url.as_str().into());
        args
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn list_formats(&self, url: &str, user_agent: Option<&str>) -> Result<Vec<MediaFormat>> {
        let mut cmd = self.base_command();
        cmd.args(self.info_args(url, user_agent));

        let out = run_tool(cmd, "yt-dlp")
            .await
            .map_err(|e| PipelineError::Extraction(format!("Failed to run yt-dlp: {}", e)))?;
        if !out.status.success() {
            return Err(PipelineError::Extraction(format!(
                "yt-dlp exited with error (status={}): {}",
                out.status, out.stderr_tail
            )));
        }
        parse_formats(&out.stdout)
    }

    async fn download(&self, job: &ExtractJob) -> Result<PathBuf> {
        let mut cmd = self.base_command();
        cmd.args(self.download_args(job));

        log::info!("[YTDLP] Downloading {} (format={})", job.url, job.format);
        let out = run_tool(cmd, "yt-dlp")
            .await
            .map_err(|e| PipelineError::Extraction(format!("Failed to start yt-dlp: {}", e)))?;

        let reported = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .map(PathBuf::from);

        match reported {
            // With --ignore-errors a failing variant can flip the exit code even
            // though the requested file landed on disk.
            Some(path) if Path::new(&path).exists() => {
                if !out.status.success() {
                    log::warn!(
                        "[YTDLP] Exited with {} but produced {}",
                        out.status,
                        path.display()
                    );
                }
                Ok(path)
            }
            _ if !out.status.success() => Err(PipelineError::Extraction(format!(
                "yt-dlp exited with error (status={}): {}",
                out.status, out.stderr_tail
            ))),
            _ => Err(PipelineError::Extraction(format!(
                "yt-dlp did not produce a file: {}",
                out.stderr_tail
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> YtDlpExtractor {
        let mut cfg = AppConfig::parse("").unwrap();
        cfg.ytdlp_proxy = Some("socks5://127.0.0.1:7890".to_string());
        YtDlpExtractor::new(&cfg)
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn parses_formats_with_missing_fields() {
        let json = r#"{
            "title": "x",
            "formats": [
                {"format_id": "140", "acodec": "mp4a.40.2", "vcodec": "none"},
                {"format_id": "137", "acodec": "none", "vcodec": "avc1", "height": 1080},
                {"format_id": "18", "height": null},
                {"acodec": "none", "vcodec": "vp9", "height": 720}
            ]
        }"#;
        let formats = parse_formats(json).unwrap();
        assert_eq!(formats.len(), 3);
        assert!(!formats[0].has_video && formats[0].has_audio);
        assert!(formats[1].is_video_only());
        assert_eq!(formats[1].height, 1080);
        assert!(formats[2].has_audio && formats[2].has_video);
        assert_eq!(formats[2].height, 0);
    }

    #[test]
    fn missing_formats_list_is_empty() {
        assert!(parse_formats(r#"{"title": "x"}"#).unwrap().is_empty());
        assert!(parse_formats("not json").is_err());
    }

    #[test]
    fn download_args_carry_every_option() {
        let job = ExtractJob {
            url: "https://www.snapchat.com/spotlight/1".to_string(),
            format: "bestvideo[height<=720]+bestaudio/best[height<=720]/best".to_string(),
            output_template: PathBuf::from("/d/%(title)s_audio-on_20240101120000.%(ext)s"),
            merge_container: Some("mp4".to_string()),
            ignore_errors: true,
            user_agent: Some("Mozilla/5.0".to_string()),
        };
        let args = strings(extractor().download_args(&job));
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();

        assert_eq!(args[pos("--proxy") + 1], "socks5://127.0.0.1:7890");
        assert_eq!(args[pos("--user-agent") + 1], "Mozilla/5.0");
        assert_eq!(args[pos("-f") + 1], job.format);
        assert_eq!(args[pos("-o") + 1], "/d/%(title)s_audio-on_20240101120000.%(ext)s");
        assert_eq!(args[pos("--merge-output-format") + 1], "mp4");
        assert_eq!(args[pos("--print") + 1], "after_move:filepath");
        assert!(args.contains(&"--ignore-errors".to_string()));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(args[pos("--encoding") + 1], "utf-8");
        assert_eq!(args.last().unwrap(), &job.url);
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn video_only_download_skips_merge() {
        let job = ExtractJob {
            url: "https://example.com/v".to_string(),
            format: "137".to_string(),
            output_template: PathBuf::from("/d/t.%(ext)s"),
            merge_container: None,
            ignore_errors: false,
            user_agent: None,
        };
        let args = strings(extractor().download_args(&job));
        assert!(!args.contains(&"--merge-output-format".to_string()));
        assert!(!args.contains(&"--ignore-errors".to_string()));
        assert!(!args.contains(&"--user-agent".to_string()));
    }

    #[test]
    fn info_args_request_json() {
        let args = strings(extractor().info_args("https://example.com/v", None));
        assert!(args.contains(&"-J".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.com/v");
    }
}
