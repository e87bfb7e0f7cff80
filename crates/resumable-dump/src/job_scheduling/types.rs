//! Job scheduling type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A pending resumption of a dump job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledResumption {
    pub job_id: String,
    pub resumption: u32,
    /// When the resumption should run
    pub due_at: DateTime<Utc>,
}

impl ScheduledResumption {
    pub fn new<S: Into<String>>(job_id: S, resumption: u32, due_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            resumption,
            due_at,
        }
    }

    /// Deduplication key: one pending entry per job and resumption number
    pub fn key(&self) -> String {
        resumption_key(&self.job_id, self.resumption)
    }

    /// Check if this resumption is ready to run
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

pub fn resumption_key(job_id: &str, resumption: u32) -> String {
    format!("{job_id}:{resumption}")
}

impl PartialOrd for ScheduledResumption {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledResumption {
    /// Earlier due times first, then by job and resumption number
    fn cmp(&self, other: &Self) -> Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then_with(|| self.job_id.cmp(&other.job_id))
            .then_with(|| self.resumption.cmp(&other.resumption))
    }
}

/// Errors that can occur in the tick queue
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    /// Queue persistence file could not be read or written
    #[error("Tick queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue persistence file is not valid
    #[error("Tick queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_key_format() {
        let entry = ScheduledResumption::new("abc123", 4, Utc::now());
        assert_eq!(entry.key(), "abc123:4");
    }

    #[test]
    fn test_ordering_by_due_time() {
        let now = Utc::now();
        let later = ScheduledResumption::new("a", 1, now + Duration::seconds(60));
        let sooner = ScheduledResumption::new("b", 9, now);
        assert!(sooner < later);

        let same_time = ScheduledResumption::new("a", 2, now);
        assert!(same_time < sooner);
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(ScheduledResumption::new("a", 0, now).is_due(now));
        assert!(!ScheduledResumption::new("a", 0, now + Duration::seconds(1)).is_due(now));
    }
}
