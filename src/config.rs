use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_concurrent_downloads: usize,
    pub download_dir: PathBuf,

    pub ytdlp_bin: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_bin: PathBuf,
    // Explicit yt-dlp proxy (e.g. socks5://127.0.0.1:7890).
    pub ytdlp_proxy: Option<String>,
    // Whether yt-dlp may inherit http_proxy/https_proxy from the service environment.
    pub inherit_proxy_env: bool,

    // Sites that only serve media to browser-looking clients.
    pub header_domains: Vec<String>,
    pub user_agent: String,

    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,

    pub release_max_attempts: u32,
    pub release_interval_ms: u64,
    // 0 disables the deadline.
    pub pipeline_timeout_secs: u64,
    pub open_in_player: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AppConfigFile {
    listen_addr: Option<String>,
    max_concurrent_downloads: Option<usize>,
    download_dir: Option<String>,

    ytdlp_bin: Option<String>,
    ytdlp_path: Option<String>,
    ffmpeg_bin: Option<String>,
    ytdlp_proxy: Option<String>,
    inherit_proxy_env: Option<bool>,

    header_domains: Option<Vec<String>>,
    user_agent: Option<String>,

    video_codec: Option<String>,
    preset: Option<String>,
    crf: Option<u8>,
    audio_codec: Option<String>,
    audio_bitrate: Option<String>,

    release_max_attempts: Option<u32>,
    release_interval_ms: Option<u64>,
    pipeline_timeout_secs: Option<u64>,
    open_in_player: Option<bool>,
}

fn default_ytdlp_path() -> String {
    // Inherit PATH from the service process; override via config.toml when
    // yt-dlp or ffmpeg live somewhere else (Homebrew, pipx, ...).
    std::env::var("PATH").unwrap_or_else(|_| {
        "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin".to_string()
    })
}

fn default_download_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Desktop")
        .join("makecut")
        .join("downloads")
}

fn non_blank(s: String) -> Option<String> {
    let s = s.trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config file: {}",
                path.to_string_lossy().as_ref()
            )
        })?;
        Self::parse(&raw)
    }

    /// Like [`AppConfig::load`], but a missing file means "all defaults".
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!(
                "[CONFIG] {} not found, using defaults",
                path.to_string_lossy()
            );
            return Self::from_file(AppConfigFile::default());
        }
        Self::load(path)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: AppConfigFile = toml::from_str(raw).context("Failed to parse config.toml")?;
        Self::from_file(file)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let cfg = Self {
            listen_addr: file.listen_addr.unwrap_or_else(|| "0.0.0.0:10000".to_string()),
            max_concurrent_downloads: file.max_concurrent_downloads.unwrap_or(3),
            download_dir: file
                .download_dir
                .and_then(non_blank)
                .map(PathBuf::from)
                .unwrap_or_else(default_download_dir),

            ytdlp_bin: PathBuf::from(file.ytdlp_bin.unwrap_or_else(|| "yt-dlp".to_string())),
            ytdlp_path: file.ytdlp_path.unwrap_or_else(default_ytdlp_path),
            ffmpeg_bin: PathBuf::from(
                file.ffmpeg_bin
                    .and_then(non_blank)
                    .unwrap_or_else(|| "ffmpeg".to_string()),
            ),
            ytdlp_proxy: file.ytdlp_proxy.and_then(non_blank),
            inherit_proxy_env: file.inherit_proxy_env.unwrap_or(false),

            header_domains: file
                .header_domains
                .unwrap_or_else(|| vec!["snapchat.com".to_string()]),
            user_agent: file
                .user_agent
                .unwrap_or_else(|| "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string()),

            video_codec: file.video_codec.unwrap_or_else(|| "libx264".to_string()),
            preset: file.preset.unwrap_or_else(|| "fast".to_string()),
            crf: file.crf.unwrap_or(23),
            audio_codec: file.audio_codec.unwrap_or_else(|| "aac".to_string()),
            audio_bitrate: file.audio_bitrate.unwrap_or_else(|| "128k".to_string()),

            release_max_attempts: file.release_max_attempts.unwrap_or(30),
            release_interval_ms: file.release_interval_ms.unwrap_or(500),
            pipeline_timeout_secs: file.pipeline_timeout_secs.unwrap_or(1800),
            open_in_player: file.open_in_player.unwrap_or(true),
        };

        if cfg.max_concurrent_downloads == 0 {
            return Err(anyhow!("max_concurrent_downloads must be at least 1"));
        }
        if cfg.release_max_attempts == 0 {
            return Err(anyhow!("release_max_attempts must be at least 1"));
        }
        if cfg.crf > 51 {
            return Err(anyhow!("Invalid crf: {} (expected: 0..=51)", cfg.crf));
        }

        Ok(cfg)
    }

    /// `PORT` from the environment replaces the port of `listen_addr`.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> Result<()> {
        let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(());
        };
        let port: u16 = port
            .parse()
            .with_context(|| format!("Invalid PORT: {}", port))?;
        let host = self
            .listen_addr
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| self.listen_addr.clone());
        self.listen_addr = format!("{}:{}", host, port);
        Ok(())
    }
}
