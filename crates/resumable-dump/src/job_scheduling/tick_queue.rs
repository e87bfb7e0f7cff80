//! Delayed resumption queue with per-key deduplication

use super::types::{ScheduledResumption, SchedulingResult, resumption_key};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Registers and retracts future resumptions of a job
#[async_trait]
pub trait TickSource: Send + Sync {
    /// Run `resume(job_id, resumption)` at `at`, replacing any pending entry
    /// for the same pair
    async fn schedule_at(&self, at: DateTime<Utc>, job_id: &str, resumption: u32) -> SchedulingResult<()>;

    /// Retract a pending entry, returning whether one existed
    async fn cancel(&self, job_id: &str, resumption: u32) -> SchedulingResult<bool>;

    /// Due time of the pending entry for the pair, if any
    async fn next_scheduled(&self, job_id: &str, resumption: u32) -> SchedulingResult<Option<DateTime<Utc>>>;
}

#[derive(Debug, Default)]
struct QueueState {
    /// Min-heap by due time; may hold stale entries superseded in `entries`
    heap: BinaryHeap<Reverse<ScheduledResumption>>,
    /// Live entry per key
    entries: HashMap<String, ScheduledResumption>,
}

impl QueueState {
    fn from_entries(entries: Vec<ScheduledResumption>) -> Self {
        let mut state = Self::default();
        for entry in entries {
            state.insert(entry);
        }
        state
    }

    fn insert(&mut self, entry: ScheduledResumption) {
        self.heap.push(Reverse(entry.clone()));
        self.entries.insert(entry.key(), entry);
    }

    fn is_live(&self, entry: &ScheduledResumption) -> bool {
        self.entries.get(&entry.key()) == Some(entry)
    }

    fn snapshot(&self) -> Vec<ScheduledResumption> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort();
        entries
    }
}

/// In-process tick source, optionally persisted to a JSON file
///
/// The file lets separate CLI invocations share one queue. Each mutation
/// rewrites it atomically; [`TickQueue::refresh`] reloads it.
#[derive(Debug)]
pub struct TickQueue {
    state: RwLock<QueueState>,
    path: Option<PathBuf>,
}

impl Default for TickQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TickQueue {
    /// Create a new empty, memory-only queue
    pub fn new() -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            path: None,
        }
    }

    /// Open a queue persisted at `path`, loading existing entries
    pub async fn open<P: AsRef<Path>>(path: P) -> SchedulingResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let entries = read_entries(&path).await?;
        info!("Loaded {} pending resumptions from {}", entries.len(), path.display());
        Ok(Self {
            state: RwLock::new(QueueState::from_entries(entries)),
            path: Some(path),
        })
    }

    /// Reload entries written by other processes
    pub async fn refresh(&self) -> SchedulingResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries = read_entries(path).await?;
        *self.state.write().await = QueueState::from_entries(entries);
        Ok(())
    }

    /// Remove and return up to `limit` entries due at `now`, earliest first
    pub async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> SchedulingResult<Vec<ScheduledResumption>> {
        let mut state = self.state.write().await;
        let mut due = Vec::new();

        while due.len() < limit {
            let Some(Reverse(top)) = state.heap.peek() else {
                break;
            };
            if !top.is_due(now) {
                break;
            }
            let Some(Reverse(entry)) = state.heap.pop() else {
                break;
            };
            if state.is_live(&entry) {
                state.entries.remove(&entry.key());
                due.push(entry);
            }
        }

        if !due.is_empty() {
            debug!("Retrieved {} due resumptions", due.len());
            self.persist(&state).await?;
        }
        Ok(due)
    }

    /// Pending entries of one job, earliest first
    pub async fn pending_for(&self, job_id: &str) -> Vec<ScheduledResumption> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .entries
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        entries.sort();
        entries
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, state: &QueueState) -> SchedulingResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&state.snapshot())?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(".ticks.{}.tmp", Uuid::new_v4().simple()));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn read_entries(path: &Path) -> SchedulingResult<Vec<ScheduledResumption>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl TickSource for TickQueue {
    async fn schedule_at(&self, at: DateTime<Utc>, job_id: &str, resumption: u32) -> SchedulingResult<()> {
        let mut state = self.state.write().await;
        let entry = ScheduledResumption::new(job_id, resumption, at);
        if let Some(previous) = state.entries.get(&entry.key()) {
            debug!(
                "Replacing resumption {} (was due {})",
                entry.key(),
                previous.due_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        info!(
            "Scheduled resumption {} of job {} for {}",
            resumption,
            job_id,
            at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        state.insert(entry);
        self.persist(&state).await
    }

    async fn cancel(&self, job_id: &str, resumption: u32) -> SchedulingResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.entries.remove(&resumption_key(job_id, resumption)).is_some();
        if removed {
            debug!("Cancelled resumption {} of job {}", resumption, job_id);
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    async fn next_scheduled(&self, job_id: &str, resumption: u32) -> SchedulingResult<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(&resumption_key(job_id, resumption))
            .map(|e| e.due_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_take_due_in_order() {
        let queue = TickQueue::new();
        let now = Utc::now();
        queue.schedule_at(now + Duration::seconds(5), "b", 1).await.unwrap();
        queue.schedule_at(now - Duration::seconds(5), "a", 1).await.unwrap();
        queue.schedule_at(now + Duration::seconds(60), "c", 1).await.unwrap();

        let due = queue.take_due(now + Duration::seconds(10), 10).await.unwrap();
        let keys: Vec<_> = due.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["a:1", "b:1"]);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_entry() {
        let queue = TickQueue::new();
        let now = Utc::now();
        queue.schedule_at(now, "job", 2).await.unwrap();
        queue.schedule_at(now + Duration::seconds(120), "job", 2).await.unwrap();

        assert_eq!(queue.len().await, 1);
        assert!(queue.take_due(now + Duration::seconds(1), 10).await.unwrap().is_empty());
        assert_eq!(
            queue.next_scheduled("job", 2).await.unwrap(),
            Some(now + Duration::seconds(120))
        );
        assert_eq!(queue.take_due(now + Duration::seconds(121), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let queue = TickQueue::new();
        let now = Utc::now();
        queue.schedule_at(now, "job", 1).await.unwrap();
        assert!(queue.cancel("job", 1).await.unwrap());
        assert!(!queue.cancel("job", 1).await.unwrap());
        assert!(queue.take_due(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_take_due_respects_limit() {
        let queue = TickQueue::new();
        let now = Utc::now();
        for n in 0..5 {
            queue.schedule_at(now, "job", n).await.unwrap();
        }
        assert_eq!(queue.take_due(now, 2).await.unwrap().len(), 2);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ticks.json");
        let now = Utc::now();

        let first = TickQueue::open(&path).await.unwrap();
        first.schedule_at(now, "job", 3).await.unwrap();
        first.schedule_at(now, "other", 1).await.unwrap();

        let second = TickQueue::open(&path).await.unwrap();
        assert_eq!(second.pending_for("job").await.len(), 1);
        second.cancel("other", 1).await.unwrap();

        first.refresh().await.unwrap();
        assert_eq!(first.len().await, 1);
        assert_eq!(first.pending_for("job").await[0].resumption, 3);
    }
}
