//! Job lifecycle facade used by the command line
//!
//! [`DumpService`] creates jobs (under a semaphore), reports status, hands
//! out finished artifacts and deletes jobs. [`App`] wires the production
//! components from a [`Config`].

use crate::catalog::CatalogRules;
use crate::config::Config;
use crate::database::MySqlSource;
use crate::dump::DumpBinaryLocator;
use crate::engine::{EngineSettings, ResumeOutcome, ResumptionEngine};
use crate::errors::{AppError, AppResult};
use crate::job_scheduling::{PolicySettings, ReschedulePolicy, TickQueue, TickRunner};
use crate::lock::{LockStore, Semaphore, SqlLockStore};
use crate::models::{Job, JobStatus};
use crate::store::{FileJobStore, JobStore};
use crate::utils::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CREATE_LOCK_NAME: &str = "dump_create";

/// Result of creating a job and running its first resumption
#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub job: Job,
    pub outcome: ResumeOutcome,
}

/// Externally visible state of a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_table: Option<String>,
    pub table_index: usize,
    pub total_tables: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumption: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Running but not updated within the stall threshold
    pub stalled: bool,
}

/// A completed dump ready for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub compressed: bool,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub create_lock_ttl: Duration,
    pub stall_threshold: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            create_lock_ttl: config.locks.create_ttl,
            stall_threshold: config.scheduling.stall_threshold,
        }
    }
}

pub struct DumpService {
    settings: ServiceSettings,
    engine: Arc<ResumptionEngine>,
    locks: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl DumpService {
    pub fn new(
        settings: ServiceSettings,
        engine: Arc<ResumptionEngine>,
        locks: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            engine,
            locks,
            clock,
        }
    }

    fn store(&self) -> &Arc<dyn JobStore> {
        self.engine.store()
    }

    /// Create a job and run resumption 0 in the foreground
    ///
    /// Fails with [`AppError::OperationInProgress`] while another creation
    /// holds the lock.
    pub async fn create(&self) -> AppResult<CreatedJob> {
        let mut lock = Semaphore::new(
            CREATE_LOCK_NAME,
            self.settings.create_lock_ttl,
            self.locks.clone(),
            self.clock.clone(),
        );
        if !lock.acquire(0).await? {
            return Err(AppError::operation_in_progress("create", "dump job"));
        }

        let result = self.create_locked().await;
        if let Err(e) = lock.release().await {
            warn!("Could not release {}: {}", lock.name(), e);
        }
        result
    }

    async fn create_locked(&self) -> AppResult<CreatedJob> {
        let job = self.engine.init_job().await?;
        let outcome = self.engine.resume(&job.id, 0).await;
        Ok(CreatedJob { job, outcome })
    }

    pub async fn status(&self, job_id: &str) -> AppResult<StatusReport> {
        let job = self.load(job_id).await?;
        let running = job.status == JobStatus::Running;
        let stalled = running && self.is_stalled(&job);

        let (file, size) = if job.status == JobStatus::Complete {
            (Some(job.output_path.clone()), Some(job.bytes_written))
        } else {
            (None, None)
        };

        Ok(StatusReport {
            job_id: job.id.clone(),
            status: job.status,
            current_table: job.current_table.clone(),
            table_index: job.cursor,
            total_tables: job.total_tables(),
            started_at: job.started_at,
            updated_at: job.updated_at,
            resumption: running.then_some(job.resumption),
            resume_interval: if running { job.resume_interval_secs } else { None },
            file,
            size,
            error: if job.status == JobStatus::Failed {
                job.error.clone()
            } else {
                None
            },
            stalled,
        })
    }

    /// The finished artifact of a complete job
    pub async fn artifact(&self, job_id: &str) -> AppResult<Artifact> {
        let job = self.load(job_id).await?;
        if job.status != JobStatus::Complete {
            return Err(AppError::validation(format!(
                "Job {} is {}, not complete",
                job.id, job.status
            )));
        }
        let size = match tokio::fs::metadata(&job.output_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found(
                    "artifact".to_string(),
                    job.output_path.display().to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Artifact {
            path: job.output_path,
            compressed: job.compressed,
            size,
        })
    }

    /// Cancel pending resumptions, then remove the artifact and state
    ///
    /// Returns whether the job existed.
    pub async fn delete(&self, job_id: &str) -> AppResult<bool> {
        self.engine.policy().clear_all_scheduled(job_id).await?;

        let Some(job) = self.store().load(job_id).await? else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&job.output_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.store().delete(job_id).await?;
        info!(job_id = %job_id, "Deleted dump job");
        Ok(true)
    }

    fn is_stalled(&self, job: &Job) -> bool {
        let threshold = chrono::Duration::from_std(self.settings.stall_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.clock.now() - job.updated_at > threshold
    }

    async fn load(&self, job_id: &str) -> AppResult<Job> {
        self.store()
            .load(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("job".to_string(), job_id.to_string()))
    }
}

/// Production wiring of every component
pub struct App {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub queue: Arc<TickQueue>,
    pub engine: Arc<ResumptionEngine>,
    pub service: DumpService,
}

impl App {
    pub async fn from_config(config: Config) -> AppResult<Self> {
        tokio::fs::create_dir_all(&config.storage.state_dir).await?;
        tokio::fs::create_dir_all(&config.storage.output_dir).await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let source = Arc::new(MySqlSource::connect(&config.database).await?);
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open(&config.storage.state_dir).await?);
        let queue = Arc::new(TickQueue::open(config.tick_queue_path()).await?);

        let policy = Arc::new(ReschedulePolicy::new(
            PolicySettings::from(&config.scheduling),
            store.clone(),
            queue.clone(),
            clock.clone(),
        ));
        let catalog = CatalogRules::from_config(config.engine.table_prefix.clone(), &config.catalog);
        let mut engine = ResumptionEngine::new(
            EngineSettings::from_config(&config),
            catalog,
            source,
            store,
            policy,
            clock.clone(),
        );
        if let Some(locator) = DumpBinaryLocator::from_config(&config.dump_binary) {
            engine = engine.with_locator(locator.with_spool_dir(config.storage.output_dir.clone()));
        }
        let engine = Arc::new(engine);

        let locks: Arc<dyn LockStore> =
            Arc::new(SqlLockStore::connect(&config.locks.database_url, &config.locks.table).await?);
        let service = DumpService::new(
            ServiceSettings::from_config(&config),
            engine.clone(),
            locks,
            clock.clone(),
        );

        Ok(Self {
            config,
            clock,
            queue,
            engine,
            service,
        })
    }

    pub fn runner(&self) -> TickRunner {
        TickRunner::new(
            self.queue.clone(),
            self.engine.clone(),
            self.clock.clone(),
            &self.config.scheduling,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::database::{FixtureSource, FixtureTable, SqlValue};
    use crate::lock::MemoryLockStore;
    use crate::store::MemoryJobStore;
    use crate::utils::ManualClock;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        queue: Arc<TickQueue>,
        locks: Arc<MemoryLockStore>,
        service: DumpService,
    }

    fn harness(tables: Vec<FixtureTable>) -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(TickQueue::new());
        let policy = Arc::new(ReschedulePolicy::new(
            PolicySettings::default(),
            store.clone(),
            queue.clone(),
            clock.clone(),
        ));
        let mut config = Config::default();
        config.storage.output_dir = dir.path().to_path_buf();
        config.storage.compress = false;
        let engine = Arc::new(ResumptionEngine::new(
            EngineSettings::from_config(&config),
            CatalogRules::from_config("wp_", &CatalogConfig::default()),
            Arc::new(FixtureSource::new(tables).with_clock(clock.clone())),
            store,
            policy,
            clock.clone(),
        ));
        let locks = Arc::new(MemoryLockStore::new());
        let service = DumpService::new(
            ServiceSettings::from_config(&config),
            engine,
            locks.clone(),
            clock.clone(),
        );
        Harness {
            _dir: dir,
            clock,
            queue,
            locks,
            service,
        }
    }

    fn options() -> FixtureTable {
        FixtureTable::table("wp_options")
            .column("option_id", "bigint(20) unsigned", "PRI")
            .column("option_name", "varchar(191)", "")
            .row(vec![SqlValue::text("1"), SqlValue::text("siteurl")])
    }

    #[tokio::test]
    async fn test_create_runs_first_resumption() {
        let h = harness(vec![options()]);
        let created = h.service.create().await.unwrap();
        assert!(matches!(created.outcome, ResumeOutcome::Completed { .. }));

        let report = h.service.status(&created.job.id).await.unwrap();
        assert_eq!(report.status, JobStatus::Complete);
        assert_eq!(report.table_index, 1);
        assert_eq!(report.total_tables, 1);
        assert!(report.size.unwrap() > 0);
        assert!(report.resumption.is_none());
        assert!(!report.stalled);

        let artifact = h.service.artifact(&created.job.id).await.unwrap();
        assert_eq!(Some(artifact.size), report.size);
        assert!(!artifact.compressed);
    }

    #[tokio::test]
    async fn test_create_refused_while_locked() {
        let h = harness(vec![options()]);
        let mut holder = Semaphore::new(
            CREATE_LOCK_NAME,
            Duration::from_secs(300),
            h.locks.clone(),
            h.clock.clone(),
        );
        assert!(holder.acquire(0).await.unwrap());

        let err = h.service.create().await.unwrap_err();
        assert!(matches!(err, AppError::OperationInProgress { .. }));

        holder.release().await.unwrap();
        assert!(h.service.create().await.is_ok());
    }

    #[tokio::test]
    async fn test_status_of_running_job_reports_stall() {
        let slow = options().page_delay(Duration::from_secs(20));
        let h = harness(vec![slow, FixtureTable::table("wp_posts").column("ID", "bigint(20)", "PRI")]);
        let created = h.service.create().await.unwrap();
        assert_eq!(created.outcome, ResumeOutcome::Yielded { cursor: 1 });

        let report = h.service.status(&created.job.id).await.unwrap();
        assert_eq!(report.status, JobStatus::Running);
        assert_eq!(report.resumption, Some(0));
        assert!(report.file.is_none());
        assert!(!report.stalled);

        h.clock.advance(Duration::from_secs(31));
        assert!(h.service.status(&created.job.id).await.unwrap().stalled);

        let err = h.service.artifact(&created.job.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_delete_cancels_and_removes() {
        let slow = options().page_delay(Duration::from_secs(20));
        let h = harness(vec![slow, FixtureTable::table("wp_posts").column("ID", "bigint(20)", "PRI")]);
        let created = h.service.create().await.unwrap();
        assert!(!h.queue.is_empty().await);
        assert!(created.job.output_path.exists());

        assert!(h.service.delete(&created.job.id).await.unwrap());
        assert!(h.queue.is_empty().await);
        assert!(!created.job.output_path.exists());
        assert!(matches!(
            h.service.status(&created.job.id).await.unwrap_err(),
            AppError::NotFound { .. }
        ));
        assert!(!h.service.delete(&created.job.id).await.unwrap());
    }

    #[test]
    fn test_status_report_omits_absent_fields() {
        let now = Utc::now();
        let report = StatusReport {
            job_id: "a1b2c3d4e5f6".to_string(),
            status: JobStatus::Failed,
            current_table: None,
            table_index: 0,
            total_tables: 0,
            started_at: now,
            updated_at: now,
            resumption: None,
            resume_interval: None,
            file: None,
            size: None,
            error: Some("No tables to dump".to_string()),
            stalled: false,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "No tables to dump");
        assert!(json.get("file").is_none());
        assert!(json.get("resumption").is_none());
    }
}
