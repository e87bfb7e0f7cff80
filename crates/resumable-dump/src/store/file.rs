//! File-backed job store
//!
//! Each job lives in `job-<id>.json` under the state directory. Writes go to
//! a uniquely named temporary file which is synced and renamed over the
//! target, so readers never observe a half-written document.

use super::{DefaultInterval, JobStore, validate_job_id};
use crate::errors::{StoreError, StoreResult};
use crate::models::{Job, JobPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_INTERVAL_FILE: &str = "default-interval.json";

/// Job store keeping one JSON document per job
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Job state directory: {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("job-{id}.json"))
    }

    async fn read_doc(&self, id: &str) -> StoreResult<Option<Map<String, Value>>> {
        let path = self.job_path(id);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&contents)? {
            Value::Object(doc) => Ok(Some(doc)),
            _ => Err(StoreError::Corrupt {
                id: id.to_string(),
                message: "state document is not an object".to_string(),
            }),
        }
    }

    async fn write_atomically<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

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

#[async_trait]
impl JobStore for FileJobStore {
    async fn load(&self, id: &str) -> StoreResult<Option<Job>> {
        validate_job_id(id)?;
        match self.read_doc(id).await? {
            Some(doc) => serde_json::from_value(Value::Object(doc))
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    id: id.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, patch: JobPatch) -> StoreResult<()> {
        validate_job_id(id)?;
        if patch.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut doc = match self.read_doc(id).await? {
            Some(doc) => doc,
            None if patch.is_full() => Map::new(),
            None => {
                debug!("Ignoring update for unknown job {}", id);
                return Ok(());
            }
        };
        patch.merge_into(&mut doc);
        self.write_atomically(&self.job_path(id), &Value::Object(doc))
            .await
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_job_id(id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.job_path(id)).await {
            Ok(()) => {
                debug!("Deleted state for job {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_default_interval(&self, now: DateTime<Utc>) -> StoreResult<Option<u64>> {
        let path = self.dir.join(DEFAULT_INTERVAL_FILE);
        match tokio::fs::read(&path).await {
            Ok(contents) => {
                let stored: DefaultInterval = serde_json::from_slice(&contents)?;
                Ok(stored.current(now))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_default_interval(&self, seconds: u64, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_atomically(
            &self.dir.join(DEFAULT_INTERVAL_FILE),
            &DefaultInterval { seconds, expires_at },
        )
        .await
    }
}
