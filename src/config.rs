use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{MigrateError, Result};

pub const DEFAULT_STATE_PATH: &str = "rowshift.state.json";
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Migrator configuration
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Path of the state document; the lock file sits next to it
    pub state_path: PathBuf,

    /// How long to wait for the migration lock. `None` waits indefinitely
    pub lock_timeout: Option<Duration>,

    /// Delay between attempts to create the lock file
    pub lock_poll_interval: Duration,

    /// Rows recoded per checkpoint
    pub batch_size: usize,
}

impl MigratorConfig {
    pub fn new<P: AsRef<Path>>(state_path: P) -> Self {
        Self {
            state_path: state_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Wait for the lock without a deadline
    pub fn wait_forever(mut self) -> Self {
        self.lock_timeout = None;
        self
    }

    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Set the recode batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Path of the lock file guarding `state_path`
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.state_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.state_path.as_os_str().is_empty() {
            return Err(MigrateError::Config("state path cannot be empty".to_string()));
        }

        if self.batch_size == 0 {
            return Err(MigrateError::Config("batch_size must be > 0".to_string()));
        }

        if self.lock_poll_interval.is_zero() {
            return Err(MigrateError::Config(
                "lock_poll_interval must be > 0".to_string(),
            ));
        }

        if let Some(timeout) = self.lock_timeout
            && timeout < self.lock_poll_interval
        {
            return Err(MigrateError::Config(
                "lock_timeout cannot be shorter than lock_poll_interval".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
