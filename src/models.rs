use std::path::PathBuf;

use crate::error::{ErrorKind, PipelineError};

pub const DEFAULT_QUALITY: &str = "1080p";

/// A validated download request. Construct through [`DownloadRequest::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    include_audio: bool,
    max_height: u32,
}

impl DownloadRequest {
    pub fn new(url: &str, include_audio: bool, quality: &str) -> Result<Self, PipelineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PipelineError::Input("No URL provided".to_string()));
        }
        let max_height = parse_quality(quality).ok_or_else(|| {
            PipelineError::Input(format!(
                "Invalid quality: {:?} (expected something like \"720p\")",
                quality
            ))
        })?;
        Ok(Self {
            url: url.to_string(),
            include_audio,
            max_height,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn include_audio(&self) -> bool {
        self.include_audio
    }

    pub fn max_height(&self) -> u32 {
        self.max_height
    }
}

/// "1080p" -> 1080. Bare numbers are accepted too.
pub fn parse_quality(label: &str) -> Option<u32> {
    let label = label.trim();
    let digits = label
        .strip_suffix('p')
        .or_else(|| label.strip_suffix('P'))
        .unwrap_or(label);
    match digits.parse::<u32>() {
        Ok(h) if h > 0 => Some(h),
        _ => None,
    }
}

#[derive(Debug)]
pub enum DownloadResult {
    Success { final_path: PathBuf },
    Failure { kind: ErrorKind, message: String },
}

impl From<Result<PathBuf, PipelineError>> for DownloadResult {
    fn from(res: Result<PathBuf, PipelineError>) -> Self {
        match res {
            Ok(final_path) => Self::Success { final_path },
            Err(e) => Self::Failure {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

/// One stream variant as reported by the extraction tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub format_id: String,
    pub has_audio: bool,
    pub has_video: bool,
    pub height: u32,
}

impl MediaFormat {
    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }
}
