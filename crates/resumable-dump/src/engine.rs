//! Resumable, time-boxed dump execution
//!
//! A job is created once by [`ResumptionEngine::init_job`] and then driven by
//! numbered resumptions. Each resumption appends whole tables to the artifact
//! until its time budget runs out, persists the cursor and asks the policy
//! for a follow-up resumption. The last resumption writes triggers, stored
//! routines and the footer, then marks the job complete.

use crate::catalog::{CatalogRules, dump_as_name, has_case_collision, matches_prefix};
use crate::config::Config;
use crate::database::{DumpSource, RoutineKind};
use crate::dump::writer::{
    write_footer, write_functions, write_header, write_procedures, write_triggers,
};
use crate::dump::{BinaryDumper, DumpBinaryLocator, DumpOutput, HeaderInfo, TableDumper};
use crate::errors::{AppError, AppResult, DumpError, StoreError};
use crate::job_scheduling::{ReschedulePolicy, ResumeContext};
use crate::models::{Job, JobPatch, JobStatus};
use crate::store::JobStore;
use crate::utils::Clock;
use crate::utils::clock::unix_seconds;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one resumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Job missing or already finished; nothing was touched
    Skipped,
    /// Another resumption appears active; the next one was pushed back
    Overlap,
    /// Budget exhausted; `cursor` is the first table not yet dumped
    Yielded { cursor: usize },
    /// Dump finished; `bytes` is the artifact size on disk
    Completed { bytes: u64 },
    Failed { error: String },
}

/// Engine knobs taken from the `storage` and `engine` config sections
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub output_dir: PathBuf,
    pub compress: bool,
    pub run_budget: Duration,
    pub fetch_batch_size: usize,
    pub max_statement_bytes: usize,
    pub yield_delay: Duration,
    pub table_prefix: String,
    pub max_allowed_packet: String,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.storage.output_dir.clone(),
            compress: config.storage.compress,
            run_budget: config.engine.run_budget,
            fetch_batch_size: config.engine.fetch_batch_size,
            max_statement_bytes: config.engine.max_statement_bytes,
            yield_delay: config.engine.yield_delay,
            table_prefix: config.engine.table_prefix.clone(),
            max_allowed_packet: config.dump_binary.max_allowed_packet.clone(),
        }
    }
}

pub struct ResumptionEngine {
    settings: EngineSettings,
    catalog: CatalogRules,
    source: Arc<dyn DumpSource>,
    store: Arc<dyn JobStore>,
    policy: Arc<ReschedulePolicy>,
    clock: Arc<dyn Clock>,
    locator: Option<DumpBinaryLocator>,
}

impl ResumptionEngine {
    pub fn new(
        settings: EngineSettings,
        catalog: CatalogRules,
        source: Arc<dyn DumpSource>,
        store: Arc<dyn JobStore>,
        policy: Arc<ReschedulePolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            catalog,
            source,
            store,
            policy,
            clock,
            locator: None,
        }
    }

    /// Probe for an external dump binary when jobs are created
    pub fn with_locator(mut self, locator: DumpBinaryLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn policy(&self) -> &Arc<ReschedulePolicy> {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create and persist a new job covering the current catalog
    pub async fn init_job(&self) -> AppResult<Job> {
        if let Err(e) = self.source.relax_sql_mode().await {
            warn!("Could not relax session SQL mode: {}", e);
        }
        let server_version = self.source.server_version().await?;

        let tables = self.catalog.order(self.source.list_tables().await?);
        let duplicate_tables_exist = has_case_collision(&tables);
        if duplicate_tables_exist {
            info!("Table names collide case-insensitively; prefix matching is exact-case");
        }

        let dump_binary = match (&self.locator, tables.iter().find(|t| !t.is_view())) {
            (Some(locator), Some(probe)) => {
                locator
                    .locate(self.source.origin(), &server_version, &probe.name)
                    .await
            }
            _ => None,
        };

        let id: String = Uuid::new_v4().simple().to_string().chars().take(12).collect();
        let extension = if self.settings.compress { "sql.gz" } else { "sql" };
        let output_path = self.settings.output_dir.join(format!("db-{id}.{extension}"));
        let now = self.clock.now();

        let job = Job {
            id: id.clone(),
            status: JobStatus::Running,
            tables,
            cursor: 0,
            current_table: None,
            header_written: false,
            footer_written: false,
            output_path,
            compressed: self.settings.compress,
            bytes_written: 0,
            started_at: now,
            updated_at: now,
            fetch_batch_size: self.settings.fetch_batch_size,
            resume_interval_secs: None,
            run_timings: BTreeMap::new(),
            run_start_times: BTreeMap::new(),
            useful_checkins: BTreeSet::new(),
            error: None,
            resumption: 0,
            dump_binary,
            duplicate_tables_exist,
            activity_detected: None,
        };

        let patch = JobPatch::full(&job).map_err(StoreError::from)?;
        self.store.save(&id, patch).await?;
        info!(
            job_id = %id,
            "Created dump job with {} tables (binary: {})",
            job.total_tables(),
            job.dump_binary
                .as_ref()
                .map(|b| b.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(job)
    }

    /// Run resumption `resumption` of `job_id`
    ///
    /// Never returns an error: failures mark the job Failed and are reported
    /// through [`ResumeOutcome::Failed`].
    pub async fn resume(&self, job_id: &str, resumption: u32) -> ResumeOutcome {
        let job = match self.store.load(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id = %job_id, resumption, "Job does not exist, skipping");
                return ResumeOutcome::Skipped;
            }
            Err(e) => {
                error!(job_id = %job_id, resumption, "Could not load job: {}", e);
                return ResumeOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        if job.is_finished() {
            debug!(job_id = %job_id, resumption, "Job is {}, skipping", job.status);
            return ResumeOutcome::Skipped;
        }

        let mut ctx = match self.policy.begin(&job, resumption).await {
            Ok(ctx) => ctx,
            Err(e) => return self.fail(job_id, &e).await,
        };

        if let Some(overlap) = self.policy.detect_overlap(&ctx, &job.output_path).await {
            if let Err(e) = self.policy.terminate_due_to_activity(&mut ctx, &overlap).await {
                warn!(job_id = %job_id, resumption, "Could not reschedule after overlap: {}", e);
            }
            return ResumeOutcome::Overlap;
        }

        info!(job_id = %job_id, resumption, "Resuming dump at table {}/{}", job.cursor, job.total_tables());
        let result = self.start_and_run(&job, &mut ctx).await;
        match result {
            Ok(outcome) => outcome,
            Err(e) => self.fail(job_id, &e).await,
        }
    }

    async fn start_and_run(&self, job: &Job, ctx: &mut ResumeContext) -> AppResult<ResumeOutcome> {
        ctx.run_start_times
            .insert(ctx.resumption, unix_seconds(ctx.started_at));
        self.store
            .save(
                &job.id,
                JobPatch::new()
                    .resumption(ctx.resumption)
                    .updated_at(self.clock.now())
                    .run_start_times(&ctx.run_start_times),
            )
            .await?;
        self.run(job, ctx).await
    }

    async fn run(&self, job: &Job, ctx: &mut ResumeContext) -> AppResult<ResumeOutcome> {
        if job.tables.is_empty() {
            return Err(DumpError::NoTables.into());
        }

        let mut out = DumpOutput::open(&job.output_path, job.compressed, job.header_written)?;
        let origin = self.source.origin().clone();
        let prefix = self.catalog.prefix().to_string();

        if !job.header_written {
            let server_version = self.source.server_version().await?;
            write_header(
                &mut out,
                &HeaderInfo {
                    server_version,
                    generated_at: self.clock.now(),
                    host: origin.host.clone(),
                    database: origin.database.clone(),
                    table_prefix: prefix.clone(),
                },
            )?;
            self.store
                .save(&job.id, JobPatch::new().header_written())
                .await?;
            self.policy.something_useful_happened(ctx).await?;
        }

        let binary = match &job.dump_binary {
            Some(path) => Some(
                BinaryDumper::new(
                    path.clone(),
                    origin.clone(),
                    self.source.server_version().await?,
                    self.settings.max_allowed_packet.clone(),
                )
                .with_spool_dir(self.spool_dir(job)),
            ),
            None => None,
        };
        let dumper = TableDumper::new(
            self.source.as_ref(),
            job.fetch_batch_size,
            self.settings.max_statement_bytes,
        );

        let budget = self.settings.run_budget.as_secs_f64();
        let total = job.total_tables();
        let mut cursor = job.cursor;

        while cursor < total {
            if self.policy.elapsed(ctx) > budget {
                out.finish()?;
                self.store
                    .save(
                        &job.id,
                        JobPatch::new().cursor(cursor).updated_at(self.clock.now()),
                    )
                    .await?;
                self.policy
                    .reschedule(ctx, self.settings.yield_delay.as_secs())
                    .await?;
                info!(
                    job_id = %job.id,
                    resumption = ctx.resumption,
                    "Run budget exhausted after {:.1}s, yielding at table {}/{}",
                    self.policy.elapsed(ctx),
                    cursor,
                    total
                );
                return Ok(ResumeOutcome::Yielded { cursor });
            }

            let table = &job.tables[cursor];
            if !matches_prefix(&table.name, &prefix, job.duplicate_tables_exist) {
                debug!(job_id = %job.id, "Skipping table {} outside prefix {}", table.name, prefix);
                cursor += 1;
                continue;
            }

            self.store
                .save(&job.id, JobPatch::new().current_table(&table.name))
                .await?;

            let mut dumped = false;
            if let Some(binary) = binary.as_ref().filter(|_| !table.is_view()) {
                dumped = binary.dump_table(&mut out, &table.name).await?;
                if !dumped {
                    debug!(job_id = %job.id, "Falling back to in-process dump of {}", table.name);
                }
            }
            if !dumped {
                let dump_as = dump_as_name(&table.name, &prefix, job.duplicate_tables_exist);
                dumper.dump(&mut out, table, &dump_as).await?;
            }

            cursor += 1;
            self.store
                .save(
                    &job.id,
                    JobPatch::new().cursor(cursor).updated_at(self.clock.now()),
                )
                .await?;
            self.policy.something_useful_happened(ctx).await?;
        }

        if !job.footer_written {
            write_triggers(&mut out, &self.source.triggers().await?)?;
            write_procedures(&mut out, &self.source.routines(RoutineKind::Procedure).await?)?;
            write_functions(&mut out, &self.source.routines(RoutineKind::Function).await?)?;
            write_footer(&mut out)?;
        }
        out.finish()?;
        if !job.footer_written {
            self.store
                .save(&job.id, JobPatch::new().footer_written())
                .await?;
        }

        let bytes = tokio::fs::metadata(&job.output_path).await?.len();
        self.store
            .save(
                &job.id,
                JobPatch::new()
                    .status(JobStatus::Complete)
                    .cursor(total)
                    .bytes_written(bytes)
                    .updated_at(self.clock.now()),
            )
            .await?;
        self.policy.clear_all_scheduled(&job.id).await?;
        info!(
            job_id = %job.id,
            resumption = ctx.resumption,
            "Dump complete: {} tables, {} bytes",
            total,
            bytes
        );
        Ok(ResumeOutcome::Completed { bytes })
    }

    fn spool_dir(&self, job: &Job) -> PathBuf {
        job.output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.settings.output_dir.clone())
    }

    async fn fail(&self, job_id: &str, e: &AppError) -> ResumeOutcome {
        let message = failure_message(e);
        error!(job_id = %job_id, "Dump failed: {}", message);

        let patch = JobPatch::new()
            .status(JobStatus::Failed)
            .error(message.clone())
            .updated_at(self.clock.now());
        if let Err(save_err) = self.store.save(job_id, patch).await {
            error!(job_id = %job_id, "Could not record failure: {}", save_err);
        }
        if let Err(clear_err) = self.policy.clear_all_scheduled(job_id).await {
            warn!(job_id = %job_id, "Could not clear scheduled resumptions: {}", clear_err);
        }
        ResumeOutcome::Failed { error: message }
    }
}

/// Short error text stored on a failed job
fn failure_message(e: &AppError) -> String {
    match e {
        AppError::Dump(inner) => inner.to_string(),
        AppError::Source(inner) => inner.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::database::{FixtureSource, FixtureTable, SqlValue};
    use crate::job_scheduling::{PolicySettings, TickQueue};
    use crate::store::MemoryJobStore;
    use crate::utils::ManualClock;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        store: Arc<MemoryJobStore>,
        ticks: Arc<TickQueue>,
        engine: ResumptionEngine,
    }

    fn harness(source: FixtureSource, prefix: &str) -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryJobStore::new());
        let ticks = Arc::new(TickQueue::new());
        let policy = Arc::new(ReschedulePolicy::new(
            PolicySettings::default(),
            store.clone(),
            ticks.clone(),
            clock.clone(),
        ));
        let mut config = Config::default();
        config.storage.output_dir = dir.path().to_path_buf();
        config.storage.compress = false;
        config.engine.table_prefix = prefix.to_string();
        let settings = EngineSettings::from_config(&config);
        let engine = ResumptionEngine::new(
            settings,
            CatalogRules::from_config(prefix, &CatalogConfig::default()),
            Arc::new(source.with_clock(clock.clone())),
            store.clone(),
            policy,
            clock.clone(),
        );
        Harness {
            _dir: dir,
            clock,
            store,
            ticks,
            engine,
        }
    }

    fn small_table(name: &str) -> FixtureTable {
        FixtureTable::table(name)
            .column("id", "int(11)", "PRI")
            .row(vec![SqlValue::text("1")])
    }

    #[tokio::test]
    async fn test_init_job_orders_catalog() {
        let source = FixtureSource::new(vec![
            FixtureTable::view("wp_a_view"),
            small_table("wp_posts"),
            small_table("wp_options"),
            small_table("custom_table"),
        ]);
        let h = harness(source, "wp_");
        let job = h.engine.init_job().await.unwrap();

        let names: Vec<_> = job.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["wp_options", "wp_posts", "custom_table", "wp_a_view"]);
        assert_eq!(job.id.len(), 12);
        assert!(job.output_path.ends_with(format!("db-{}.sql", job.id)));
        assert!(h.store.load(&job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_single_run_completes() {
        let source = FixtureSource::new(vec![small_table("wp_options"), small_table("other")]);
        let h = harness(source, "wp_");
        let job = h.engine.init_job().await.unwrap();

        let outcome = h.engine.resume(&job.id, 0).await;
        let stored = h.store.load(&job.id).await.unwrap().unwrap();
        assert!(matches!(outcome, ResumeOutcome::Completed { bytes } if bytes == stored.bytes_written));
        assert_eq!(stored.status, JobStatus::Complete);
        assert_eq!(stored.cursor, 2);
        assert!(stored.header_written && stored.footer_written);

        let text = std::fs::read_to_string(&stored.output_path).unwrap();
        assert!(text.contains("DROP TABLE IF EXISTS `wp_options`;"));
        // outside the prefix
        assert!(!text.contains("`other`"));
        assert!(h.ticks.is_empty().await);
    }

    #[tokio::test]
    async fn test_finished_and_missing_jobs_are_skipped() {
        let h = harness(FixtureSource::new(vec![small_table("wp_options")]), "wp_");
        assert_eq!(h.engine.resume("nosuchjob", 0).await, ResumeOutcome::Skipped);

        let job = h.engine.init_job().await.unwrap();
        h.engine.resume(&job.id, 0).await;
        let before = h.store.load(&job.id).await.unwrap().unwrap();
        h.clock.advance(Duration::from_secs(300));
        assert_eq!(h.engine.resume(&job.id, 1).await, ResumeOutcome::Skipped);
        let after = h.store.load(&job.id).await.unwrap().unwrap();
        assert_eq!(before.updated_at, after.updated_at);
        assert_eq!(after.resumption, 0);
    }

    #[tokio::test]
    async fn test_no_tables_fails() {
        let h = harness(FixtureSource::new(Vec::new()), "wp_");
        let job = h.engine.init_job().await.unwrap();
        let outcome = h.engine.resume(&job.id, 0).await;
        assert_eq!(
            outcome,
            ResumeOutcome::Failed {
                error: "No tables to dump".to_string()
            }
        );
        let stored = h.store.load(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("No tables to dump"));
    }

    #[tokio::test]
    async fn test_budget_yield_and_resume() {
        let source = FixtureSource::new(vec![
            small_table("wp_options").page_delay(Duration::from_secs(20)),
            small_table("wp_posts"),
        ]);
        let h = harness(source, "wp_");
        let job = h.engine.init_job().await.unwrap();

        // two fetches of 20s each put the run past its budget
        assert_eq!(h.engine.resume(&job.id, 0).await, ResumeOutcome::Yielded { cursor: 1 });
        let pending = h.ticks.pending_for(&job.id).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resumption, 1);

        h.clock.advance(Duration::from_secs(120));
        assert!(matches!(h.engine.resume(&job.id, 1).await, ResumeOutcome::Completed { .. }));
        assert!(h.ticks.is_empty().await);
    }

    #[tokio::test]
    async fn test_schema_failure_fails_job() {
        let source = FixtureSource::new(vec![small_table("wp_options")]);
        source.fail_schema_for("wp_options");
        let h = harness(source, "wp_");
        let job = h.engine.init_job().await.unwrap();

        let outcome = h.engine.resume(&job.id, 0).await;
        assert!(matches!(outcome, ResumeOutcome::Failed { .. }));
        let stored = h.store.load(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().contains("simulated failure"));
    }
}
