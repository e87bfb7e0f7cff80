//! Adaptive resumption timing
//!
//! Every resumption learns how long it ran and widens the job's resume
//! interval when runs approach it. Overlap between resumptions is detected
//! heuristically (recent output modification or a run record whose
//! duration still reaches into the present) and answered by pushing the
//! next resumption further out.
//!
//! Per-resumption state lives in a [`ResumeContext`] owned by the caller.

use super::tick_queue::TickSource;
use crate::config::SchedulingConfig;
use crate::errors::AppResult;
use crate::models::{Job, JobPatch};
use crate::store::JobStore;
use crate::utils::Clock;
use crate::utils::clock::unix_seconds;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interval floor when increasing without an extra amount
const INCREASE_FLOOR_IDLE_SECS: u64 = 120;
/// Interval floor when increasing by a non-zero amount
const INCREASE_FLOOR_SECS: u64 = 300;

/// Timing constants, in whole seconds
#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub default_interval: u64,
    pub min_interval: u64,
    pub max_overlap_interval: u64,
    pub activity_margin: u64,
    pub reschedule_window: u64,
    pub overlap_increase: u64,
    pub escalate_from_resumption: u32,
    pub escalation_floor: u64,
    pub long_run_threshold: u64,
    pub long_run_delay: u64,
    pub clear_resumptions_up_to: u32,
    pub default_interval_ttl: chrono::Duration,
}

impl From<&SchedulingConfig> for PolicySettings {
    fn from(config: &SchedulingConfig) -> Self {
        Self {
            default_interval: config.default_resume_interval.as_secs(),
            min_interval: config.min_resume_interval.as_secs(),
            max_overlap_interval: config.max_overlap_interval.as_secs(),
            activity_margin: config.activity_margin.as_secs(),
            reschedule_window: config.reschedule_window.as_secs(),
            overlap_increase: config.overlap_increase.as_secs(),
            escalate_from_resumption: config.escalate_from_resumption,
            escalation_floor: config.escalation_floor.as_secs(),
            long_run_threshold: config.long_run_threshold.as_secs(),
            long_run_delay: config.long_run_delay.as_secs(),
            clear_resumptions_up_to: config.clear_resumptions_up_to,
            default_interval_ttl: chrono::Duration::from_std(config.default_interval_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(8)),
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self::from(&SchedulingConfig::default())
    }
}

/// State of one resumption as seen by the policy
#[derive(Debug, Clone)]
pub struct ResumeContext {
    pub job_id: String,
    pub resumption: u32,
    pub started_at: DateTime<Utc>,
    /// Current resume interval in seconds
    pub interval: u64,
    pub run_timings: BTreeMap<u32, f64>,
    pub run_start_times: BTreeMap<u32, f64>,
    pub useful_checkins: BTreeSet<u32>,
    /// Set once this resumption has reported progress
    pub useful_this_run: bool,
    /// Due time of the next resumption scheduled by this run
    pub next_scheduled: Option<DateTime<Utc>>,
}

/// Evidence that another resumption is active on the same job
#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
    /// Human-readable description stored on the job
    pub note: String,
    /// Seconds to add to the resume interval
    pub increase: u64,
}

/// Scheduling decisions for a job's resumptions
pub struct ReschedulePolicy {
    settings: PolicySettings,
    store: Arc<dyn JobStore>,
    ticks: Arc<dyn TickSource>,
    clock: Arc<dyn Clock>,
}

impl ReschedulePolicy {
    pub fn new(
        settings: PolicySettings,
        store: Arc<dyn JobStore>,
        ticks: Arc<dyn TickSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            store,
            ticks,
            clock,
        }
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Start tracking resumption `resumption` of `job`
    ///
    /// A job without an interval gets the learned process-wide default, or
    /// the configured default when none is stored.
    pub async fn begin(&self, job: &Job, resumption: u32) -> AppResult<ResumeContext> {
        let started_at = self.clock.now();
        let interval = match job.resume_interval_secs.filter(|s| *s > 0) {
            Some(interval) => interval,
            None => {
                let interval = self
                    .store
                    .load_default_interval(started_at)
                    .await?
                    .unwrap_or(self.settings.default_interval);
                self.store
                    .save(&job.id, JobPatch::new().resume_interval(interval))
                    .await?;
                interval
            }
        };

        Ok(ResumeContext {
            job_id: job.id.clone(),
            resumption,
            started_at,
            interval,
            run_timings: job.run_timings.clone(),
            run_start_times: job.run_start_times.clone(),
            useful_checkins: job.useful_checkins.clone(),
            useful_this_run: false,
            next_scheduled: None,
        })
    }

    /// Seconds since this resumption started
    pub fn elapsed(&self, ctx: &ResumeContext) -> f64 {
        self.clock.seconds_since(ctx.started_at)
    }

    /// Look for signs of another active resumption (never on resumption 0)
    pub async fn detect_overlap(&self, ctx: &ResumeContext, output_path: &Path) -> Option<Overlap> {
        if ctx.resumption == 0 {
            return None;
        }
        let now = self.clock.now();
        let margin = self.settings.activity_margin as f64;

        if let Ok(metadata) = tokio::fs::metadata(output_path).await {
            if let Ok(modified) = metadata.modified() {
                let modified: DateTime<Utc> = modified.into();
                let age = (now - modified).num_milliseconds() as f64 / 1000.0;
                if age < margin {
                    let name = output_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    return Some(Overlap {
                        note: format!(
                            "File activity detected on {} (modified {:.0}s ago, size={:.1}KB)",
                            name,
                            age.floor(),
                            metadata.len() as f64 / 1024.0
                        ),
                        increase: self.settings.overlap_increase,
                    });
                }
            }
        }

        let now_unix = unix_seconds(now);
        for (run, passed) in &ctx.run_timings {
            let Some(started) = ctx.run_start_times.get(run) else {
                continue;
            };
            if started + passed + margin > now_unix {
                // a re-delivered tick of this same resumption
                let increase = if *run != 0 && *run == ctx.resumption {
                    0
                } else {
                    self.settings.overlap_increase
                };
                return Some(Overlap {
                    note: format!(
                        "Check-in activity detected from resumption {} ({:.0}s ago)",
                        run,
                        (now_unix - (started + passed)).max(0.0)
                    ),
                    increase,
                });
            }
        }
        None
    }

    /// Stop this resumption because another one is active
    pub async fn terminate_due_to_activity(&self, ctx: &mut ResumeContext, overlap: &Overlap) -> AppResult<()> {
        self.record_still_alive(ctx).await?;
        warn!(
            job_id = %ctx.job_id,
            resumption = ctx.resumption,
            "Terminating resumption: {}",
            overlap.note
        );
        self.store
            .save(&ctx.job_id, JobPatch::new().activity_detected(overlap.note.clone()))
            .await?;
        self.increase_and_reschedule(ctx, overlap.increase, true).await
    }

    /// Record this run's duration and widen the interval if it is being approached
    pub async fn record_still_alive(&self, ctx: &mut ResumeContext) -> AppResult<()> {
        let elapsed = self.elapsed(ctx);
        ctx.run_timings.insert(ctx.resumption, elapsed);
        let mut patch = JobPatch::new().run_timings(&ctx.run_timings);

        let margin = self.settings.activity_margin as f64;
        if elapsed + margin > ctx.interval as f64 {
            let widened = (elapsed + margin).ceil() as u64;
            info!(
                job_id = %ctx.job_id,
                "Run time {:.1}s is approaching the resume interval, raising it to {}s",
                elapsed,
                widened
            );
            let expires_at = self.clock.now() + self.settings.default_interval_ttl;
            self.store.save_default_interval(widened, expires_at).await?;
            ctx.interval = widened;
            patch = patch.resume_interval(widened);
        }

        self.store.save(&ctx.job_id, patch).await?;
        Ok(())
    }

    /// Report progress; may schedule or push back the next resumption
    pub async fn something_useful_happened(&self, ctx: &mut ResumeContext) -> AppResult<()> {
        self.record_still_alive(ctx).await?;

        if !ctx.useful_this_run && ctx.useful_checkins.insert(ctx.resumption) {
            self.store
                .save(&ctx.job_id, JobPatch::new().useful_checkins(&ctx.useful_checkins))
                .await?;
        }
        ctx.useful_this_run = true;

        if ctx.resumption >= self.settings.escalate_from_resumption && ctx.next_scheduled.is_none() {
            let delay = ctx.interval.max(self.settings.escalation_floor);
            let at = self.clock.now() + chrono::Duration::seconds(delay as i64);
            self.ticks.schedule_at(at, &ctx.job_id, ctx.resumption + 1).await?;
            ctx.next_scheduled = Some(at);
            debug!(
                job_id = %ctx.job_id,
                "Resumption {} pre-scheduled the next run in {}s",
                ctx.resumption,
                delay
            );
            Ok(())
        } else {
            self.reschedule_if_needed(ctx).await
        }
    }

    /// Push the next resumption back when it is about to fire during this run
    pub async fn reschedule_if_needed(&self, ctx: &mut ResumeContext) -> AppResult<()> {
        let Some(at) = ctx.next_scheduled else {
            return Ok(());
        };
        let away = (at - self.clock.now()).num_seconds();
        if away > 1 && away <= self.settings.reschedule_window as i64 {
            self.increase_and_reschedule(ctx, self.settings.reschedule_window, false)
                .await?;
        }
        Ok(())
    }

    /// Replace resumption `n + 1` with one `delay_secs` from now (at least the minimum)
    pub async fn reschedule(&self, ctx: &mut ResumeContext, delay_secs: u64) -> AppResult<()> {
        let next = ctx.resumption + 1;
        self.ticks.cancel(&ctx.job_id, next).await?;

        let delay = delay_secs.max(self.settings.min_interval);
        let at = self.clock.now() + chrono::Duration::seconds(delay as i64);
        self.ticks.schedule_at(at, &ctx.job_id, next).await?;
        ctx.next_scheduled = Some(at);
        Ok(())
    }

    /// Raise the resume interval by `by` seconds and move the next resumption
    pub async fn increase_and_reschedule(&self, ctx: &mut ResumeContext, by: u64, due_to_overlap: bool) -> AppResult<()> {
        let floor = if by == 0 {
            INCREASE_FLOOR_IDLE_SECS
        } else {
            INCREASE_FLOOR_SECS
        };
        let base = ctx.interval.max(floor);
        let mut new_interval = base + by;

        let elapsed = self.elapsed(ctx);
        if elapsed > new_interval as f64 {
            new_interval = elapsed.ceil() as u64 + self.settings.reschedule_window;
        }

        let mut delay = if due_to_overlap {
            new_interval.min(self.settings.max_overlap_interval)
        } else {
            new_interval
        };
        if ctx.resumption <= 1 && new_interval > self.settings.long_run_threshold {
            delay = self.settings.long_run_delay;
        }

        if ctx.next_scheduled.is_some() || due_to_overlap {
            self.reschedule(ctx, delay).await?;
        }

        debug!(
            job_id = %ctx.job_id,
            "Resume interval {}s -> {}s (overlap={})",
            ctx.interval,
            new_interval,
            due_to_overlap
        );
        ctx.interval = new_interval;
        self.store
            .save(&ctx.job_id, JobPatch::new().resume_interval(new_interval))
            .await?;
        Ok(())
    }

    /// Retract every resumption a job may have pending
    pub async fn clear_all_scheduled(&self, job_id: &str) -> AppResult<()> {
        for resumption in 0..=self.settings.clear_resumptions_up_to {
            self.ticks.cancel(job_id, resumption).await?;
        }
        debug!(job_id = %job_id, "Cleared all scheduled resumptions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduling::TickQueue;
    use crate::models::{JobStatus, TableEntry};
    use crate::store::MemoryJobStore;
    use crate::utils::ManualClock;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<MemoryJobStore>,
        ticks: Arc<TickQueue>,
        policy: ReschedulePolicy,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryJobStore::new());
        let ticks = Arc::new(TickQueue::new());
        let policy = ReschedulePolicy::new(
            PolicySettings::default(),
            store.clone(),
            ticks.clone(),
            clock.clone(),
        );
        Harness {
            clock,
            store,
            ticks,
            policy,
        }
    }

    fn job(now: DateTime<Utc>) -> Job {
        Job {
            id: "policyjob01".to_string(),
            status: JobStatus::Running,
            tables: vec![TableEntry::table("wp_options")],
            cursor: 0,
            current_table: None,
            header_written: false,
            footer_written: false,
            output_path: PathBuf::from("/nonexistent/db-policyjob01.sql"),
            compressed: false,
            bytes_written: 0,
            started_at: now,
            updated_at: now,
            fetch_batch_size: 1000,
            resume_interval_secs: None,
            run_timings: BTreeMap::new(),
            run_start_times: BTreeMap::new(),
            useful_checkins: BTreeSet::new(),
            error: None,
            resumption: 0,
            dump_binary: None,
            duplicate_tables_exist: false,
            activity_detected: None,
        }
    }

    async fn seeded(h: &Harness) -> Job {
        let job = job(h.clock.now());
        h.store.save(&job.id, JobPatch::full(&job).unwrap()).await.unwrap();
        job
    }

    async fn stored(h: &Harness, id: &str) -> Job {
        h.store.load(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_begin_uses_learned_default() {
        let h = harness();
        let job = seeded(&h).await;
        let ctx = h.policy.begin(&job, 0).await.unwrap();
        assert_eq!(ctx.interval, 100);
        assert_eq!(stored(&h, &job.id).await.resume_interval_secs, Some(100));

        h.store
            .save_default_interval(250, h.clock.now() + chrono::Duration::days(1))
            .await
            .unwrap();
        let mut fresh = job.clone();
        fresh.resume_interval_secs = None;
        assert_eq!(h.policy.begin(&fresh, 0).await.unwrap().interval, 250);
    }

    #[tokio::test]
    async fn test_long_run_widens_interval_and_default() {
        let h = harness();
        let job = seeded(&h).await;
        let mut ctx = h.policy.begin(&job, 2).await.unwrap();

        h.clock.advance(Duration::from_secs(80));
        h.policy.record_still_alive(&mut ctx).await.unwrap();

        assert_eq!(ctx.interval, 110);
        let saved = stored(&h, &job.id).await;
        assert_eq!(saved.resume_interval_secs, Some(110));
        assert_eq!(saved.run_timings.get(&2).copied(), Some(80.0));
        assert_eq!(
            h.store.load_default_interval(h.clock.now()).await.unwrap(),
            Some(110)
        );
    }

    #[tokio::test]
    async fn test_reschedule_clamps_to_minimum() {
        let h = harness();
        let job = seeded(&h).await;
        let mut ctx = h.policy.begin(&job, 0).await.unwrap();

        h.policy.reschedule(&mut ctx, 5).await.unwrap();
        let pending = h.ticks.pending_for(&job.id).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resumption, 1);
        assert_eq!(pending[0].due_at, h.clock.now() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_overlap_skipped_on_first_resumption() {
        let h = harness();
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("db.sql");
        std::fs::write(&output, "x").unwrap();
        let job = seeded(&h).await;

        let ctx = h.policy.begin(&job, 0).await.unwrap();
        assert!(h.policy.detect_overlap(&ctx, &output).await.is_none());

        let ctx = h.policy.begin(&job, 1).await.unwrap();
        let overlap = h.policy.detect_overlap(&ctx, &output).await.unwrap();
        assert_eq!(overlap.increase, 120);
        assert!(overlap.note.contains("db.sql"));
    }

    #[tokio::test]
    async fn test_run_record_overlap() {
        let h = harness();
        let mut job = seeded(&h).await;
        let now = unix_seconds(h.clock.now());
        job.run_start_times.insert(3, now - 10.0);
        job.run_timings.insert(3, 5.0);

        let other = h.policy.begin(&job, 4).await.unwrap();
        let overlap = h.policy.detect_overlap(&other, Path::new("/nonexistent")).await.unwrap();
        assert_eq!(overlap.increase, 120);

        let redelivered = h.policy.begin(&job, 3).await.unwrap();
        let overlap = h
            .policy
            .detect_overlap(&redelivered, Path::new("/nonexistent"))
            .await
            .unwrap();
        assert_eq!(overlap.increase, 0);

        h.clock.advance(Duration::from_secs(60));
        let later = h.policy.begin(&job, 4).await.unwrap();
        assert!(h.policy.detect_overlap(&later, Path::new("/nonexistent")).await.is_none());
    }

    #[tokio::test]
    async fn test_terminate_due_to_activity_reschedules() {
        let h = harness();
        let job = seeded(&h).await;
        let mut ctx = h.policy.begin(&job, 1).await.unwrap();
        let overlap = Overlap {
            note: "busy".into(),
            increase: 120,
        };

        h.policy.terminate_due_to_activity(&mut ctx, &overlap).await.unwrap();

        // max(100, 300) + 120
        let saved = stored(&h, &job.id).await;
        assert_eq!(saved.resume_interval_secs, Some(420));
        assert_eq!(saved.activity_detected.as_deref(), Some("busy"));
        let pending = h.ticks.pending_for(&job.id).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resumption, 2);
        assert_eq!(pending[0].due_at, h.clock.now() + chrono::Duration::seconds(420));
    }

    #[tokio::test]
    async fn test_overlap_delay_is_capped() {
        let h = harness();
        let mut job = seeded(&h).await;
        job.resume_interval_secs = Some(1000);
        let mut ctx = h.policy.begin(&job, 5).await.unwrap();

        h.policy.increase_and_reschedule(&mut ctx, 120, true).await.unwrap();
        assert_eq!(ctx.interval, 1120);
        let pending = h.ticks.pending_for(&job.id).await;
        assert_eq!(pending[0].due_at, h.clock.now() + chrono::Duration::seconds(900));
    }

    #[tokio::test]
    async fn test_early_long_runs_use_fixed_delay() {
        let h = harness();
        let mut job = seeded(&h).await;
        job.resume_interval_secs = Some(700);
        let mut ctx = h.policy.begin(&job, 1).await.unwrap();

        h.policy.increase_and_reschedule(&mut ctx, 120, true).await.unwrap();
        let pending = h.ticks.pending_for(&job.id).await;
        assert_eq!(pending[0].due_at, h.clock.now() + chrono::Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_increase_without_schedule_only_persists() {
        let h = harness();
        let job = seeded(&h).await;
        let mut ctx = h.policy.begin(&job, 3).await.unwrap();

        h.policy.increase_and_reschedule(&mut ctx, 45, false).await.unwrap();
        assert_eq!(ctx.interval, 345);
        assert!(h.ticks.is_empty().await);
    }

    #[tokio::test]
    async fn test_escalation_schedules_ahead() {
        let h = harness();
        let job = seeded(&h).await;

        let mut early = h.policy.begin(&job, 8).await.unwrap();
        h.policy.something_useful_happened(&mut early).await.unwrap();
        assert!(h.ticks.is_empty().await);

        let mut late = h.policy.begin(&job, 9).await.unwrap();
        h.policy.something_useful_happened(&mut late).await.unwrap();
        let pending = h.ticks.pending_for(&job.id).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resumption, 10);
        assert_eq!(pending[0].due_at, h.clock.now() + chrono::Duration::seconds(100));

        let saved = stored(&h, &job.id).await;
        assert!(saved.useful_checkins.contains(&9));
    }

    #[tokio::test]
    async fn test_imminent_resumption_is_pushed_back() {
        let h = harness();
        let job = seeded(&h).await;
        let mut ctx = h.policy.begin(&job, 2).await.unwrap();
        h.policy.reschedule(&mut ctx, 60).await.unwrap();

        h.clock.advance(Duration::from_secs(30));
        h.policy.something_useful_happened(&mut ctx).await.unwrap();

        // 30s away: interval becomes max(100, 300) + 45 and the run moves out
        assert_eq!(ctx.interval, 345);
        let pending = h.ticks.pending_for(&job.id).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].due_at, h.clock.now() + chrono::Duration::seconds(345));
    }

    #[tokio::test]
    async fn test_clear_all_scheduled() {
        let h = harness();
        let now = h.clock.now();
        for n in [0, 1, 57, 100] {
            h.ticks.schedule_at(now, "policyjob01", n).await.unwrap();
        }
        h.ticks.schedule_at(now, "policyjob01", 101).await.unwrap();
        h.ticks.schedule_at(now, "otherjob", 1).await.unwrap();

        h.policy.clear_all_scheduled("policyjob01").await.unwrap();
        let left = h.ticks.pending_for("policyjob01").await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].resumption, 101);
        assert_eq!(h.ticks.pending_for("otherjob").await.len(), 1);
    }
}
