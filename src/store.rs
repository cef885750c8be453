use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::util::size_in_mb;

const HISTORY_FILE: &str = "history.json";
const AUTOSAVE_FILE: &str = "autosave.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub filename: String,
    pub size: String,
    pub path: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveSetting {
    #[serde(default)]
    pub enabled: bool,
}

/// Write `body` next to `path`, then rename it over `path`, so readers only
/// ever see the old or the new content.
async fn write_replacing(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))
}

/// JSON sidecar files kept next to the downloads.
///
/// Unreadable or corrupt files read as empty; writes go through a lock so
/// concurrent requests do not lose each other's updates.
pub struct HistoryStore {
    history_file: PathBuf,
    autosave_file: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl HistoryStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            history_file: dir.join(HISTORY_FILE),
            autosave_file: dir.join(AUTOSAVE_FILE),
            write_lock: AsyncMutex::new(()),
        }
    }

    async fn read_paths(&self) -> Vec<String> {
        let raw = match tokio::fs::read(&self.history_file).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            log::warn!(
                "[STORE] Ignoring unreadable {}: {}",
                self.history_file.display(),
                e
            );
            Vec::new()
        })
    }

    async fn write_paths(&self, paths: &[String]) -> Result<()> {
        write_replacing(&self.history_file, &serde_json::to_vec(paths)?).await
    }

    /// Stored paths whose files still exist, with their sizes.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        let mut out = Vec::new();
        for p in self.read_paths().await {
            let path = PathBuf::from(&p);
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            out.push(HistoryEntry {
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                size: size_in_mb(meta.len()),
                path: path.to_string_lossy().to_string(),
            });
        }
        out
    }

    /// Append `path` unless it is already listed. Returns whether it was added.
    pub async fn record(&self, path: &Path) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = path.to_string_lossy().to_string();
        let mut paths = self.read_paths().await;
        if paths.contains(&path) {
            return Ok(false);
        }
        paths.push(path);
        self.write_paths(&paths).await?;
        Ok(true)
    }

    /// Point every entry equal to `old` at `new`.
    pub async fn replace(&self, old: &str, new: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let new = new.to_string_lossy().to_string();
        let paths: Vec<String> = self
            .read_paths()
            .await
            .into_iter()
            .map(|p| if p == old { new.clone() } else { p })
            .collect();
        self.write_paths(&paths).await
    }

    pub async fn autosave(&self) -> AutosaveSetting {
        match tokio::fs::read(&self.autosave_file).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => AutosaveSetting::default(),
        }
    }

    pub async fn set_autosave(&self, enabled: bool) -> Result<AutosaveSetting> {
        let _guard = self.write_lock.lock().await;
        let setting = AutosaveSetting { enabled };
        write_replacing(&self.autosave_file, &serde_json::to_vec(&setting)?).await?;
        Ok(setting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_deduplicates_and_lists_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, vec![0u8; 1024 * 1024]).unwrap();
        let gone = dir.path().join("gone.mp4");

        assert!(store.record(&clip).await.unwrap());
        assert!(!store.record(&clip).await.unwrap());
        assert!(store.record(&gone).await.unwrap());

        let entries = store.entries().await;
        assert_eq!(
            entries,
            vec![HistoryEntry {
                filename: "clip.mp4".to_string(),
                size: "1.0 MB".to_string(),
                path: clip.to_string_lossy().to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn corrupt_history_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HISTORY_FILE), b"{not json").unwrap();
        let store = HistoryStore::new(dir.path());
        assert!(store.entries().await.is_empty());

        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"x").unwrap();
        assert!(store.record(&clip).await.unwrap());
        assert_eq!(store.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn interrupted_write_leaves_history_intact() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"x").unwrap();
        store.record(&clip).await.unwrap();

        // What a crash halfway through the next write leaves behind.
        let tmp = dir.path().join("history.json.tmp");
        std::fs::write(&tmp, b"[\"/half").unwrap();
        assert_eq!(store.entries().await.len(), 1);

        let other = dir.path().join("other.mp4");
        std::fs::write(&other, b"x").unwrap();
        store.record(&other).await.unwrap();
        assert_eq!(store.entries().await.len(), 2);
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn replace_rewrites_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let old = dir.path().join("old.mp4");
        let new = dir.path().join("new.mp4");
        std::fs::write(&new, b"x").unwrap();

        store.record(&old).await.unwrap();
        store.replace(&old.to_string_lossy(), &new).await.unwrap();

        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "new.mp4");
    }

    #[tokio::test]
    async fn autosave_defaults_to_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        assert!(!store.autosave().await.enabled);

        assert!(store.set_autosave(true).await.unwrap().enabled);
        assert!(store.autosave().await.enabled);

        std::fs::write(dir.path().join(AUTOSAVE_FILE), b"{}").unwrap();
        assert!(!store.autosave().await.enabled);
    }
}
