//! Per-actor budget for mutating operations
//!
//! Buckets live in `.envkit/ratelimit.json` and are only read and written
//! while holding `.envkit/ratelimit.lock`, so the check-then-increment is
//! atomic across processes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use envkit_fs::{ConfigStore, FileLock, StatePath};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{ConcurrencyError, Error, GateError, Result};

/// Kind of mutating operation a bucket counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Install,
    Remove,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// Operation count for one (actor, operation class) in the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub actor: String,
    pub operation: OperationClass,
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketFile {
    #[serde(default)]
    buckets: Vec<RateLimitBucket>,
}

/// Fixed-window limiter shared by every process on a workspace.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state_path: PathBuf,
    lock_path: PathBuf,
    max_operations: u32,
    window: Duration,
    lock_timeout: Duration,
}

impl RateLimiter {
    pub fn new(workspace: &Path, config: &EngineConfig) -> Self {
        Self {
            state_path: StatePath::RateLimit.under(workspace),
            lock_path: StatePath::RateLimitLock.under(workspace),
            max_operations: config.rate_limit.max_operations,
            window: config.rate_window(),
            lock_timeout: config.lock_timeout(),
        }
    }

    /// Take one token for `actor`, failing with [`GateError::RateLimited`]
    /// when the window's budget is spent.
    pub fn acquire(&self, actor: &str, operation: OperationClass) -> Result<()> {
        self.acquire_at(actor, operation, Utc::now())
    }

    /// [`RateLimiter::acquire`] with an explicit clock.
    pub fn acquire_at(
        &self,
        actor: &str,
        operation: OperationClass,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _lock = self.lock()?;
        let store = ConfigStore::new();
        let mut state = self.load(&store)?;

        let index = match state
            .buckets
            .iter()
            .position(|b| b.actor == actor && b.operation == operation)
        {
            Some(index) => index,
            None => {
                state.buckets.push(RateLimitBucket {
                    actor: actor.to_string(),
                    operation,
                    window_start: now,
                    count: 0,
                });
                state.buckets.len() - 1
            }
        };
        let bucket = &mut state.buckets[index];

        let elapsed = (now - bucket.window_start).to_std().unwrap_or(Duration::ZERO);
        if elapsed > self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= self.max_operations {
            let retry_after = self.window.saturating_sub(elapsed);
            tracing::warn!(
                actor,
                operation = %operation,
                count = bucket.count,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            return Err(GateError::RateLimited {
                actor: actor.to_string(),
                operation,
                retry_after,
            }
            .into());
        }

        bucket.count += 1;
        tracing::debug!(actor, operation = %operation, count = bucket.count, "Rate-limit token taken");

        state.buckets.retain(|b| {
            (now - b.window_start)
                .to_std()
                .map(|age| age <= self.window)
                .unwrap_or(true)
        });
        store.save(&self.state_path, &state)?;
        Ok(())
    }

    /// Current bucket for `actor`, if any.
    pub fn bucket(&self, actor: &str, operation: OperationClass) -> Result<Option<RateLimitBucket>> {
        let _lock = self.lock()?;
        let state = self.load(&ConfigStore::new())?;
        Ok(state
            .buckets
            .into_iter()
            .find(|b| b.actor == actor && b.operation == operation))
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path, self.lock_timeout).map_err(|e| match e {
            envkit_fs::Error::LockTimeout { path, waited } => {
                Error::from(ConcurrencyError::RateLimitLocked { path, waited })
            }
            other => Error::from(other),
        })
    }

    fn load(&self, store: &ConfigStore) -> Result<BucketFile> {
        if !self.state_path.exists() {
            return Ok(BucketFile::default());
        }
        Ok(store.load(&self.state_path)?)
    }
}
