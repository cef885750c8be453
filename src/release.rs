use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio_util::sync::CancellationToken;

/// How long to keep asking for a file another process may still hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasePolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReleasePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_millis(500),
        }
    }
}

impl ReleasePolicy {
    /// Worst case time spent in [`wait_for_release`].
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { attempts: u32 },
    TimedOut { attempts: u32 },
    /// The path does not exist, so nothing can ever release it.
    Missing,
    Cancelled,
}

/// Poll `path` until it can be opened for appending.
///
/// The file is never created. Sleeps `policy.interval` between attempts and
/// gives up after `policy.max_attempts`, or as soon as `cancel` fires.
pub async fn wait_for_release(
    path: &Path,
    policy: ReleasePolicy,
    cancel: &CancellationToken,
) -> ReleaseOutcome {
    let mut attempts = 0;
    while attempts < policy.max_attempts {
        if cancel.is_cancelled() {
            return ReleaseOutcome::Cancelled;
        }
        attempts += 1;
        match OpenOptions::new().append(true).open(path).await {
            Ok(_) => return ReleaseOutcome::Released { attempts },
            Err(e) if e.kind() == ErrorKind::NotFound => return ReleaseOutcome::Missing,
            Err(e) => {
                log::debug!(
                    "[RELEASE] {} still busy (attempt {}/{}): {}",
                    path.display(),
                    attempts,
                    policy.max_attempts,
                    e
                );
            }
        }
        if attempts < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return ReleaseOutcome::Cancelled,
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }
    ReleaseOutcome::TimedOut { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn fast(max_attempts: u32) -> ReleasePolicy {
        ReleasePolicy {
            max_attempts,
            interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn default_budget_is_about_fifteen_seconds() {
        let policy = ReleasePolicy::default();
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.budget(), Duration::from_millis(14_500));
    }

    #[tokio::test]
    async fn free_file_is_released_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"data").unwrap();

        let outcome = wait_for_release(&path, fast(5), &CancellationToken::new()).await;
        assert_eq!(outcome, ReleaseOutcome::Released { attempts: 1 });
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[tokio::test]
    async fn missing_file_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.mp4");

        let outcome = wait_for_release(&path, fast(5), &CancellationToken::new()).await;
        assert_eq!(outcome, ReleaseOutcome::Missing);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn busy_path_times_out_after_every_attempt() {
        // A directory can never be opened for append.
        let dir = tempfile::tempdir().unwrap();
        let policy = fast(5);

        let started = Instant::now();
        let outcome = wait_for_release(dir.path(), policy, &CancellationToken::new()).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome, ReleaseOutcome::TimedOut { attempts: 5 });
        assert!(elapsed >= policy.budget());
        assert!(elapsed < policy.budget() + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let policy = ReleasePolicy {
            max_attempts: 1_000,
            interval: Duration::from_millis(50),
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = wait_for_release(dir.path(), policy, &cancel).await;
        assert_eq!(outcome, ReleaseOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
