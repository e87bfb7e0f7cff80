//! Overlap detection and lock behaviour across components

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use resumable_dump::{
    catalog::CatalogRules,
    config::Config,
    database::{FixtureSource, FixtureTable, SqlValue},
    engine::{EngineSettings, ResumeOutcome, ResumptionEngine},
    job_scheduling::{PolicySettings, ReschedulePolicy, TickQueue},
    lock::{LockStore, Semaphore, SqlLockStore},
    models::Job,
    store::{JobStore, MemoryJobStore},
    utils::{Clock, ManualClock},
};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    store: Arc<MemoryJobStore>,
    queue: Arc<TickQueue>,
    engine: ResumptionEngine,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.output_dir = dir.path().to_path_buf();
    config.storage.compress = false;

    let clock = Arc::new(ManualClock::starting_now());
    let source = FixtureSource::new(vec![
        FixtureTable::table("wp_options")
            .column("option_id", "bigint(20) unsigned", "PRI")
            .row(vec![SqlValue::text("1")])
            .page_delay(Duration::from_secs(20)),
        FixtureTable::table("wp_posts")
            .column("ID", "bigint(20) unsigned", "PRI")
            .row(vec![SqlValue::text("1")]),
    ])
    .with_clock(clock.clone());
    let store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(TickQueue::new());
    let policy = Arc::new(ReschedulePolicy::new(
        PolicySettings::default(),
        store.clone(),
        queue.clone(),
        clock.clone(),
    ));
    let engine = ResumptionEngine::new(
        EngineSettings::from_config(&config),
        CatalogRules::from_config("wp_", &config.catalog),
        Arc::new(source),
        store.clone(),
        policy,
        clock.clone(),
    );
    Harness {
        _dir: dir,
        clock,
        store,
        queue,
        engine,
    }
}

impl Harness {
    async fn job(&self, id: &str) -> Job {
        self.store.load(id).await.unwrap().unwrap()
    }

    /// A job whose first resumption dumped one table and yielded
    async fn yielded_job(&self) -> Job {
        let job = self.engine.init_job().await.unwrap();
        assert_eq!(self.engine.resume(&job.id, 0).await, ResumeOutcome::Yielded { cursor: 1 });
        self.job(&job.id).await
    }
}

#[tokio::test]
async fn test_recent_file_activity_is_overlap() {
    let h = harness();
    let job = h.yielded_job().await;

    // wall-clock now: the artifact was written moments ago
    h.clock.set(Utc::now());
    assert_eq!(h.engine.resume(&job.id, 1).await, ResumeOutcome::Overlap);

    let after = h.job(&job.id).await;
    assert_eq!(after.cursor, 1);
    assert_eq!(after.resume_interval_secs, Some(420));
    assert!(
        after
            .activity_detected
            .as_deref()
            .unwrap()
            .starts_with("File activity detected")
    );

    let pending = h.queue.pending_for(&job.id).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].resumption, 2);
    assert_eq!(pending[0].due_at, h.clock.now() + chrono::Duration::seconds(420));
}

#[tokio::test]
async fn test_live_run_record_is_overlap() {
    let h = harness();
    let job = h.yielded_job().await;
    assert_eq!(job.run_timings.get(&0).copied(), Some(40.0));

    // resumption 0 ended 0s ago by the manual clock; well within the margin
    assert_eq!(h.engine.resume(&job.id, 1).await, ResumeOutcome::Overlap);
    let after = h.job(&job.id).await;
    assert_eq!(after.cursor, 1);
    assert_eq!(after.resume_interval_secs, Some(420));
    assert!(
        after
            .activity_detected
            .as_deref()
            .unwrap()
            .contains("resumption 0")
    );
}

#[tokio::test]
async fn test_no_overlap_once_quiet() {
    let h = harness();
    let job = h.yielded_job().await;

    h.clock.advance(Duration::from_secs(120));
    assert!(matches!(
        h.engine.resume(&job.id, 1).await,
        ResumeOutcome::Completed { .. }
    ));
    assert_eq!(h.job(&job.id).await.resume_interval_secs, Some(100));
}

#[tokio::test]
async fn test_sqlite_lock_file_is_shared() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("locks.db").display());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());

    let first_store: Arc<dyn LockStore> = Arc::new(SqlLockStore::connect(&url, "dump_locks").await.unwrap());
    let second_store: Arc<dyn LockStore> = Arc::new(SqlLockStore::connect(&url, "dump_locks").await.unwrap());

    let mut first = Semaphore::new("dump_create", Duration::from_secs(300), first_store, clock.clone());
    let mut second = Semaphore::new("dump_create", Duration::from_secs(300), second_store, clock);

    assert!(first.acquire(0).await.unwrap());
    assert!(!second.acquire(0).await.unwrap());
    assert!(first.release().await.unwrap());
    assert!(second.acquire(0).await.unwrap());
    assert!(second.is_acquired());
}
