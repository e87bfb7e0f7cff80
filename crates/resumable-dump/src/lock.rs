//! Named, expiring exclusive locks
//!
//! A lock is a row `(name, locked_until)`. Claiming it is a single conditional
//! update that only succeeds when `locked_until` lies in the past, so two
//! processes can never both win. Rows are created lazily on first use.

use crate::errors::LockResult;
use crate::utils::Clock;
use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const LOCK_NAME_PREFIX: &str = "lock_";

/// Backing storage for lock rows
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `until` on the row if its current `until` is before `now`;
    /// returns whether the row was claimed
    async fn try_claim(&self, name: &str, until: i64, now: i64) -> LockResult<bool>;

    /// Create the row unless it exists; returns whether it exists afterwards
    async fn ensure_exists(&self, name: &str) -> LockResult<bool>;

    /// Mark the row free if it still carries `held_until`; returns whether
    /// the row was freed
    async fn reset(&self, name: &str, held_until: i64) -> LockResult<bool>;

    async fn remove(&self, name: &str) -> LockResult<()>;
}

/// Process-local lock rows, for tests and single-process use
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    rows: Mutex<HashMap<String, i64>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_claim(&self, name: &str, until: i64, now: i64) -> LockResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(name) {
            Some(current) if *current < now => {
                *current = until;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ensure_exists(&self, name: &str) -> LockResult<bool> {
        self.rows.lock().await.entry(name.to_string()).or_insert(0);
        Ok(true)
    }

    async fn reset(&self, name: &str, held_until: i64) -> LockResult<bool> {
        Ok(match self.rows.lock().await.get_mut(name) {
            Some(until) if *until == held_until => {
                *until = 0;
                true
            }
            _ => false,
        })
    }

    async fn remove(&self, name: &str) -> LockResult<()> {
        self.rows.lock().await.remove(name);
        Ok(())
    }
}

/// Lock rows in a SQL table (SQLite or MySQL)
#[derive(Debug, Clone)]
pub struct SqlLockStore {
    connection: DatabaseConnection,
    table: String,
}

impl SqlLockStore {
    /// Connect to `url` and create the lock table if needed
    pub async fn connect(url: &str, table: &str) -> LockResult<Self> {
        let mut options = ConnectOptions::new(url.to_string());
        options
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let connection = Database::connect(options).await?;
        Self::with_connection(connection, table).await
    }

    pub async fn with_connection(connection: DatabaseConnection, table: &str) -> LockResult<Self> {
        let store = Self {
            connection,
            table: table.replace('`', ""),
        };
        store
            .execute(
                format!(
                    "CREATE TABLE IF NOT EXISTS `{}` (name VARCHAR(191) NOT NULL PRIMARY KEY, locked_until BIGINT NOT NULL DEFAULT 0)",
                    store.table
                ),
                Vec::new(),
            )
            .await?;
        info!("Lock table `{}` ready", store.table);
        Ok(store)
    }

    fn backend(&self) -> DbBackend {
        self.connection.get_database_backend()
    }

    async fn execute(&self, sql: String, values: Vec<Value>) -> LockResult<u64> {
        let statement = Statement::from_sql_and_values(self.backend(), sql, values);
        Ok(self.connection.execute(statement).await?.rows_affected())
    }
}

#[async_trait]
impl LockStore for SqlLockStore {
    async fn try_claim(&self, name: &str, until: i64, now: i64) -> LockResult<bool> {
        let sql = format!("UPDATE `{}` SET locked_until = ? WHERE name = ? AND locked_until < ?", self.table);
        let affected = self
            .execute(sql, vec![until.into(), name.into(), now.into()])
            .await?;
        Ok(affected == 1)
    }

    async fn ensure_exists(&self, name: &str) -> LockResult<bool> {
        let insert = match self.backend() {
            DbBackend::Sqlite => "INSERT OR IGNORE INTO",
            _ => "INSERT IGNORE INTO",
        };
        let sql = format!("{insert} `{}` (name, locked_until) VALUES (?, 0)", self.table);
        let created = self.execute(sql, vec![name.into()]).await?;
        if created > 0 {
            debug!("Created lock row {}", name);
        }
        Ok(true)
    }

    async fn reset(&self, name: &str, held_until: i64) -> LockResult<bool> {
        let sql = format!(
            "UPDATE `{}` SET locked_until = 0 WHERE name = ? AND locked_until = ?",
            self.table
        );
        Ok(self.execute(sql, vec![name.into(), held_until.into()]).await? == 1)
    }

    async fn remove(&self, name: &str) -> LockResult<()> {
        let sql = format!("DELETE FROM `{}` WHERE name = ?", self.table);
        self.execute(sql, vec![name.into()]).await?;
        Ok(())
    }
}

/// One holder's handle on a named lock
pub struct Semaphore {
    name: String,
    ttl: Duration,
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    held_until: Option<i64>,
}

impl Semaphore {
    pub fn new(name: &str, ttl: Duration, store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: format!("{LOCK_NAME_PREFIX}{name}"),
            ttl,
            store,
            clock,
            held_until: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_acquired(&self) -> bool {
        self.held_until.is_some()
    }

    /// Try to take the lock, retrying up to `retries` more times one second apart
    pub async fn acquire(&mut self, retries: u32) -> LockResult<bool> {
        if self.is_acquired() {
            return Ok(true);
        }
        if self.claim().await? {
            return Ok(true);
        }
        if !self.store.ensure_exists(&self.name).await? {
            return Ok(false);
        }

        let mut remaining = retries;
        loop {
            if self.claim().await? {
                return Ok(true);
            }
            if remaining == 0 {
                debug!("Lock {} is held elsewhere", self.name);
                return Ok(false);
            }
            remaining -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Free the lock if this handle still holds it
    ///
    /// A claim that expired and was taken by another holder is left alone.
    pub async fn release(&mut self) -> LockResult<bool> {
        let Some(held_until) = self.held_until.take() else {
            return Ok(false);
        };
        let released = self.store.reset(&self.name, held_until).await?;
        if !released {
            warn!("Lock {} was removed or taken over while held", self.name);
        }
        Ok(released)
    }

    /// Delete the lock row regardless of holder
    pub async fn force_clear(&mut self) -> LockResult<()> {
        self.held_until = None;
        self.store.remove(&self.name).await
    }

    async fn claim(&mut self) -> LockResult<bool> {
        let now = self.clock.now().timestamp();
        let until = now + self.ttl.as_secs() as i64;
        if self.store.try_claim(&self.name, until, now).await? {
            debug!("Acquired lock {} until {}", self.name, until);
            self.held_until = Some(until);
        }
        Ok(self.is_acquired())
    }
}
