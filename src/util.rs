use std::path::{Path, PathBuf};

const ILLEGAL_FILENAME_CHARS: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
const MAX_FILENAME_CHARS: usize = 80;

/// Turn a media title into something safe to use as a file name.
///
/// Drops the characters Windows refuses in names, trims, swaps spaces for
/// underscores and keeps at most 80 characters. May return an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c))
        .collect();
    kept.trim()
        .replace(' ', "_")
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect()
}

/// Plain substring match, same as the tool's own site checks.
pub fn requires_browser_headers(url: &str, domains: &[String]) -> bool {
    let url = url.to_ascii_lowercase();
    domains
        .iter()
        .any(|d| !d.is_empty() && url.contains(&d.to_ascii_lowercase()))
}

/// `.webm` and `.mkv` downloads are named as if they were `.mp4`.
pub fn normalize_container(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("webm") || ext.eq_ignore_ascii_case("mkv") => {
            path.with_extension("mp4")
        }
        _ => path.to_path_buf(),
    }
}

/// Create `dir/name.ext`, or `dir/name_1.ext`, `dir/name_2.ext`, ... if taken.
///
/// The name is claimed with an empty placeholder file, so two concurrent
/// callers never receive the same path.
pub async fn reserve_unique_path(dir: &Path, stem: &str, ext: &str) -> std::io::Result<PathBuf> {
    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(format!("{}.{}", stem, ext))
        } else {
            dir.join(format!("{}_{}.{}", stem, n, ext))
        };
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// `clip.mp4` -> `clip_muted.mp4`
pub fn muted_variant(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    path.with_file_name(format!("{}_muted.{}", stem, ext))
}

pub fn size_in_mb(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}
