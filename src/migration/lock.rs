//! Single-writer lock around a state document.
//!
//! Two layers: an async mutex per lock path for tasks of this process, and
//! a `<state>.lock` file created exclusively for other processes.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::MigratorConfig;
use crate::core::{MigrateError, Result};

lazy_static! {
    static ref LOCAL_LOCKS: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>> =
        Mutex::new(HashMap::new());
}

fn local_lock(path: &Path) -> Arc<AsyncMutex<()>> {
    let mut locks = LOCAL_LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

#[derive(Debug, Clone)]
pub struct MigrationLock {
    path: PathBuf,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl MigrationLock {
    pub fn new<P: AsRef<Path>>(path: P, timeout: Option<Duration>, poll_interval: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout,
            poll_interval,
        }
    }

    pub fn from_config(config: &MigratorConfig) -> Self {
        Self::new(config.lock_path(), config.lock_timeout, config.lock_poll_interval)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for both lock layers, failing with `LockTimeout` once the
    /// configured timeout has passed.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);

        let local = local_lock(&self.path);
        let local = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, local.lock_owned())
                .await
                .map_err(|_| self.timed_out(started))?,
            None => local.lock_owned().await,
        };

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .await
            {
                Ok(mut file) => {
                    let guard = claim(&self.path, local, &mut file).await?;
                    file.sync_all().await?;
                    debug!(path = %self.path.display(), "Migration lock acquired");
                    return Ok(guard);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if let Some(deadline) = deadline
                        && Instant::now() >= deadline
                    {
                        return Err(self.timed_out(started));
                    }
                    debug!(path = %self.path.display(), "Migration lock held elsewhere, waiting");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn timed_out(&self, started: Instant) -> MigrateError {
        MigrateError::LockTimeout {
            path: self.path.clone(),
            waited: started.elapsed(),
        }
    }
}

/// Takes ownership of a freshly created lock file and stamps it. The guard
/// exists before the first write, so a failed stamp removes the file again.
async fn claim<W: AsyncWrite + Unpin>(
    path: &Path,
    local: OwnedMutexGuard<()>,
    mut file: W,
) -> Result<LockGuard> {
    let guard = LockGuard {
        path: path.to_path_buf(),
        _local: local,
    };
    let owner = format!(
        "pid {} since {}\n",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    );
    file.write_all(owner.as_bytes()).await?;
    file.flush().await?;
    Ok(guard)
}

/// Holds the lock until dropped; dropping removes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    _local: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "Failed to remove migration lock file");
        } else {
            debug!(path = %self.path.display(), "Migration lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    /// Accepts nothing, like a full disk.
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn lock(dir: &TempDir, timeout: Duration) -> MigrationLock {
        MigrationLock::new(
            dir.path().join("state.json.lock"),
            Some(timeout),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_second_holder_times_out() {
        let dir = TempDir::new().unwrap();
        let held = lock(&dir, Duration::from_millis(100)).acquire().await.unwrap();
        assert!(held.path().exists());

        let err = lock(&dir, Duration::from_millis(100)).acquire().await.unwrap_err();
        assert!(matches!(err, MigrateError::LockTimeout { .. }));
        assert_eq!(err.kind(), "LockTimeoutError");

        drop(held);
        assert!(!dir.path().join("state.json.lock").exists());
        let again = lock(&dir, Duration::from_millis(100)).acquire().await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_file_blocks_until_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json.lock");
        std::fs::write(&path, "pid 1\n").unwrap();

        let err = lock(&dir, Duration::from_millis(50)).acquire().await.unwrap_err();
        assert!(matches!(err, MigrateError::LockTimeout { .. }));

        let remover = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                std::fs::remove_file(path).unwrap();
            })
        };
        let guard = lock(&dir, Duration::from_secs(5)).acquire().await.unwrap();
        remover.await.unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn test_failed_stamp_removes_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json.lock");
        std::fs::write(&path, "").unwrap();
        let local = local_lock(&path).lock_owned().await;

        let err = claim(&path, local, FullDisk).await.unwrap_err();
        assert!(matches!(err, MigrateError::Io(_)));
        assert!(!path.exists());

        let again = lock(&dir, Duration::from_millis(100)).acquire().await;
        assert!(again.is_ok());
    }
}
