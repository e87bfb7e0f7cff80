//! Durable job state persistence
//!
//! A [`JobStore`] keeps one document per job and merges partial updates per
//! field (see [`JobPatch`]). It also remembers the process-wide default
//! resume interval learned from earlier jobs, with an expiry.

use crate::errors::StoreResult;
use crate::models::{Job, JobPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod file;
pub mod memory;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

/// Persistence contract for dump jobs
///
/// `save` is durable before it returns. Concurrent saves for the same job are
/// last-writer-wins per field. Saving a partial patch for a job that does not
/// exist (for example after deletion) is a no-op; only a full patch creates a
/// job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load a job, `None` when it does not exist
    async fn load(&self, id: &str) -> StoreResult<Option<Job>>;

    /// Merge `patch` into the stored job
    async fn save(&self, id: &str, patch: JobPatch) -> StoreResult<()>;

    /// Remove all state for a job
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// The learned default resume interval, if one is stored and unexpired
    async fn load_default_interval(&self, now: DateTime<Utc>) -> StoreResult<Option<u64>>;

    /// Remember a default resume interval until `expires_at`
    async fn save_default_interval(&self, seconds: u64, expires_at: DateTime<Utc>) -> StoreResult<()>;
}

/// Stored form of the learned default interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DefaultInterval {
    pub seconds: u64,
    pub expires_at: DateTime<Utc>,
}

impl DefaultInterval {
    pub fn current(&self, now: DateTime<Utc>) -> Option<u64> {
        (self.expires_at > now && self.seconds > 0).then_some(self.seconds)
    }
}

/// Job ids double as file names, so only plain tokens are accepted
pub fn validate_job_id(id: &str) -> StoreResult<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(crate::errors::StoreError::InvalidId { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_job_id() {
        assert!(validate_job_id("a1b2c3d4e5f6").is_ok());
        assert!(validate_job_id("job_1-b").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc/passwd").is_err());
        assert!(validate_job_id("a b").is_err());
    }

    #[test]
    fn test_default_interval_expiry() {
        let now = Utc::now();
        let stored = DefaultInterval {
            seconds: 140,
            expires_at: now + chrono::Duration::days(8),
        };
        assert_eq!(stored.current(now), Some(140));
        assert_eq!(stored.current(now + chrono::Duration::days(9)), None);
    }
}
