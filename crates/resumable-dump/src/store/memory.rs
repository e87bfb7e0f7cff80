//! In-memory job store

use super::{DefaultInterval, JobStore, validate_job_id};
use crate::errors::{StoreError, StoreResult};
use crate::models::{Job, JobPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Job store backed by a map, for tests and single-process embedding
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    docs: RwLock<HashMap<String, Map<String, Value>>>,
    default_interval: RwLock<Option<DefaultInterval>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, id: &str) -> StoreResult<Option<Job>> {
        let docs = self.docs.read().await;
        match docs.get(id) {
            Some(doc) => serde_json::from_value(Value::Object(doc.clone()))
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
        let mut docs = self.docs.write().await;
        match docs.get_mut(id) {
            Some(doc) => patch.merge_into(doc),
            None if patch.is_full() => {
                let mut doc = Map::new();
                patch.merge_into(&mut doc);
                docs.insert(id.to_string(), doc);
            }
            None => debug!("Ignoring update for unknown job {}", id),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.docs.write().await.remove(id);
        Ok(())
    }

    async fn load_default_interval(&self, now: DateTime<Utc>) -> StoreResult<Option<u64>> {
        Ok(self
            .default_interval
            .read()
            .await
            .and_then(|stored| stored.current(now)))
    }

    async fn save_default_interval(&self, seconds: u64, expires_at: DateTime<Utc>) -> StoreResult<()> {
        *self.default_interval.write().await = Some(DefaultInterval { seconds, expires_at });
        Ok(())
    }
}
