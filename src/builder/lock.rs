//! The cross-process build lock.
//!
//! At most one build per identity may run on the host. The lock is a file
//! created with `create_new` in the target's cache directory; waiters poll
//! at a bounded interval and give up after a deadline rather than wait on
//! a dead holder forever. A waiter that observes the wanted artifact
//! appear returns without ever taking the lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use thiserror::Error;
use tracing::{debug, warn};

/// How often waiters re-check the lock and the artifact.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Give up waiting after this long; a lock this old is likely stale.
pub const WAIT_DEADLINE: Duration = Duration::from_secs(300);

const LOCK_FILE: &str = ".build-lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create the build lock at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "gave up waiting for the build lock at {} after {seconds} s; \
         remove the file if no other build is running",
        path.display()
    )]
    Deadline { path: PathBuf, seconds: u64 },
}

/// What waiting for the lock yielded.
pub enum Acquired {
    /// The lock is held; the guard releases it on drop
    Lock(LockGuard),
    /// Another process finished the same identity while we waited
    ArtifactAppeared,
}

/// Holds the lock file until dropped.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("failed to remove build lock {}: {err}", self.path.display());
        }
    }
}

fn try_take(path: &Path) -> Result<Option<LockGuard>, LockError> {
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => {
            use std::io::Write;
            let mut file = file;
            let _ = writeln!(file, "{}", std::process::id());
            Ok(Some(LockGuard {
                path: path.to_path_buf(),
            }))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Take the build lock for `cache_dir`, or observe the artifact appear.
///
/// `artifact_ready` is polled between attempts; when it reports true the
/// wait ends without the lock, signalling that the work is already done.
pub async fn acquire(
    cache_dir: &Path,
    mut artifact_ready: impl FnMut() -> bool,
) -> Result<Acquired, LockError> {
    fs::create_dir_all(cache_dir).map_err(|source| LockError::Io {
        path: cache_dir.to_path_buf(),
        source,
    })?;
    let path = cache_dir.join(LOCK_FILE);

    let started = std::time::Instant::now();
    loop {
        if let Some(guard) = try_take(&path)? {
            return Ok(Acquired::Lock(guard));
        }
        if artifact_ready() {
            debug!("artifact appeared while waiting on {}", path.display());
            return Ok(Acquired::ArtifactAppeared);
        }
        if started.elapsed() >= WAIT_DEADLINE {
            return Err(LockError::Deadline {
                path,
                seconds: WAIT_DEADLINE.as_secs(),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let guard = match acquire(dir.path(), || false).await.unwrap() {
            Acquired::Lock(guard) => guard,
            Acquired::ArtifactAppeared => panic!("no artifact exists"),
        };
        // a second taker must not get the lock while the first holds it
        assert!(try_take(&dir.path().join(LOCK_FILE)).unwrap().is_none());

        drop(guard);
        assert!(try_take(&dir.path().join(LOCK_FILE)).unwrap().is_some());
    }

    #[tokio::test]
    async fn waiter_returns_when_the_artifact_appears() {
        let dir = tempfile::tempdir().unwrap();
        // simulate another process holding the lock
        let _held = try_take(&dir.path().join(LOCK_FILE)).unwrap().unwrap();

        let artifact = dir.path().join("app");
        let mut polls = 0;
        let result = acquire(dir.path(), || {
            polls += 1;
            if polls == 2 {
                fs::write(&artifact, "binary").unwrap();
            }
            artifact.is_file()
        })
        .await
        .unwrap();
        assert!(matches!(result, Acquired::ArtifactAppeared));
    }
}
