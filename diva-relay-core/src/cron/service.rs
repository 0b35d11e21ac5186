//! Cron service firing scheduled jobs onto the message bus

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::expr;
use super::types::{CronDelivery, CronJob, CronJobState, CronSchedule};
use crate::bus::{meta, InboundMessage, MessageBus, OutboundMessage, SYSTEM_CHANNEL};
use crate::utils::write_atomic_async;
use crate::{Error, Result};

/// Get current time in milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Compute the next run time in milliseconds.
///
/// Pure function of its inputs: calling it twice with the same arguments
/// gives the same answer. Intervals count from `now_ms`, so a job that
/// fires late moves its next run along with it. `None` when the schedule
/// never fires again or the result does not fit in an `i64`.
pub fn compute_next_run(schedule: &CronSchedule, now_ms: i64) -> Option<i64> {
    match schedule {
        CronSchedule::Every { every_ms } if *every_ms <= 0 => None,
        CronSchedule::Every { every_ms } => now_ms.checked_add(*every_ms),
        CronSchedule::Cron { expr, tz } => expr::next_after(expr, tz.as_deref(), now_ms),
    }
}

/// Service for managing and executing scheduled jobs
///
/// Clones share the same job set and background task.
#[derive(Clone)]
pub struct CronService {
    store_path: PathBuf,
    bus: MessageBus,
    tick_interval: Duration,
    jobs: Arc<Mutex<Option<Vec<CronJob>>>>,
    task: Arc<Mutex<Option<(CancellationToken, JoinHandle<()>)>>>,
    running: Arc<RwLock<bool>>,
}

impl CronService {
    /// Create a new cron service persisting to `store_path`
    pub fn new(store_path: PathBuf, bus: MessageBus) -> Self {
        Self {
            store_path,
            bus,
            tick_interval: Duration::from_secs(1),
            jobs: Arc::new(Mutex::new(None)),
            task: Arc::new(Mutex::new(None)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Job file location inside a workspace
    pub fn store_path_for(workspace: &Path) -> PathBuf {
        workspace.join("cron").join("jobs.json")
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval.max(Duration::from_millis(10));
        self
    }

    /// Load jobs from disk
    async fn load_jobs(path: &Path) -> Vec<CronJob> {
        if !path.exists() {
            return Vec::new();
        }
        match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => match serde_json::from_str::<Vec<CronJob>>(&content) {
                Ok(jobs) => {
                    debug!("Loaded {} cron jobs from disk", jobs.len());
                    jobs
                }
                Err(e) => {
                    warn!("Failed to parse cron store: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read cron store: {}", e);
                Vec::new()
            }
        }
    }

    /// Run `f` against the loaded job set while holding the store lock
    async fn with_jobs<T>(&self, f: impl FnOnce(&mut Vec<CronJob>) -> T) -> T {
        let mut guard = self.jobs.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load_jobs(&self.store_path).await);
        }
        let jobs = guard.get_or_insert_with(Vec::new);
        f(jobs)
    }

    /// Persist `jobs` atomically
    async fn save_jobs(&self, jobs: &[CronJob]) -> Result<()> {
        let content = serde_json::to_string_pretty(jobs)?;
        write_atomic_async(&self.store_path, content.as_bytes())
            .await
            .map_err(|e| {
                error!("Failed to save cron store: {}", e);
                Error::Io(e)
            })
    }

    /// Apply a mutation and persist the full job set before returning.
    ///
    /// On a failed write the in-memory set is rolled back.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Vec<CronJob>) -> Option<T>) -> Result<Option<T>> {
        let mut guard = self.jobs.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load_jobs(&self.store_path).await);
        }
        let jobs = guard.get_or_insert_with(Vec::new);

        let mut next = jobs.clone();
        let outcome = f(&mut next);
        if outcome.is_some() {
            self.save_jobs(&next).await?;
            *jobs = next;
        }
        Ok(outcome)
    }

    /// Start the tick loop; `cancel` is the process-wide shutdown signal
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut task_guard = self.task.lock().await;
        if task_guard.is_some() {
            info!("Cron service already running");
            return Ok(());
        }

        // Persisted next runs are kept so intervals do not drift across restarts
        let now = now_ms();
        self.mutate(|jobs| {
            let mut changed = false;
            for job in jobs.iter_mut().filter(|j| j.enabled) {
                if job.state.next_run_at_ms.is_none() {
                    job.state.next_run_at_ms = compute_next_run(&job.schedule, now);
                    changed = true;
                }
            }
            changed.then_some(())
        })
        .await?;

        let token = cancel.child_token();
        let service = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { service.run_loop(loop_token).await });
        *task_guard = Some((token, handle));
        *self.running.write().await = true;

        let job_count = self.with_jobs(|jobs| jobs.len()).await;
        info!("Cron service started with {} jobs", job_count);
        Ok(())
    }

    /// Stop the tick loop
    pub async fn stop(&self) {
        *self.running.write().await = false;
        let task = self.task.lock().await.take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Cron loop ended abnormally: {}", e);
            }
            info!("Cron service stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cron loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(now_ms()).await;
                }
            }
        }
    }

    /// Fire every enabled job due at `now_ms`; returns how many fired
    pub async fn tick(&self, now_ms: i64) -> usize {
        let due: Vec<CronJob> = self
            .with_jobs(|jobs| {
                jobs.iter()
                    .filter(|j| j.enabled && j.state.next_run_at_ms.is_some_and(|at| now_ms >= at))
                    .cloned()
                    .collect()
            })
            .await;
        if due.is_empty() {
            return 0;
        }

        let mut outcomes = Vec::with_capacity(due.len());
        for job in &due {
            info!(job_id = %job.id, "Cron: executing job '{}'", job.name);
            outcomes.push((job.id.clone(), self.fire(job).await));
        }

        // Fired jobs advance in memory whatever the write outcome
        let mut guard = self.jobs.lock().await;
        let jobs = guard.get_or_insert_with(Vec::new);
        for (id, outcome) in &outcomes {
            if let Some(job) = jobs.iter_mut().find(|j| &j.id == id) {
                record_outcome(job, outcome, now_ms);
                job.state.next_run_at_ms = job
                    .enabled
                    .then(|| compute_next_run(&job.schedule, now_ms))
                    .flatten();
            }
        }
        if let Err(e) = self.save_jobs(jobs).await {
            error!("Cron: failed to persist job state after tick, keeping it in memory: {}", e);
        }

        due.len()
    }

    /// Publish or deliver one job; the error string ends up in `last_error`
    async fn fire(&self, job: &CronJob) -> std::result::Result<(), String> {
        let target = job
            .delivery
            .target()
            .or_else(|| self.bus.state().last_target());

        if job.delivery.deliver {
            if let Some((channel, chat_id)) = &target {
                debug!(job_id = %job.id, channel = %channel, chat_id = %chat_id, "Cron: delivering message directly");
                return self
                    .bus
                    .deliver(OutboundMessage::new(channel.clone(), chat_id.clone(), job.message.clone()))
                    .await
                    .map_err(|e| {
                        warn!(job_id = %job.id, "Cron: delivery failed: {}", e);
                        e.to_string()
                    });
            }
            info!(job_id = %job.id, "Cron: no delivery target recorded, running as a turn instead");
        }

        let msg = match target {
            Some((channel, chat_id)) => InboundMessage::new(channel.clone(), "cron", chat_id, job.message.clone())
                .with_metadata(meta::PLATFORM, channel),
            None => InboundMessage::new(
                SYSTEM_CHANNEL,
                "cron",
                format!("cron:{}", job.id),
                job.message.clone(),
            )
            .with_metadata(meta::DELIVER, "false"),
        }
        .with_metadata(meta::SOURCE, meta::SOURCE_CRON)
        .with_metadata(meta::JOB_ID, job.id.clone());

        self.bus.publish(msg).await.map_err(|e| {
            warn!(job_id = %job.id, "Cron: publish failed: {}", e);
            e.to_string()
        })
    }

    // ========== Public API ==========

    /// List jobs in insertion order
    pub async fn list_jobs(&self, include_disabled: bool) -> Vec<CronJob> {
        self.with_jobs(|jobs| {
            jobs.iter()
                .filter(|j| include_disabled || j.enabled)
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn get_job(&self, job_id: &str) -> Option<CronJob> {
        self.with_jobs(|jobs| jobs.iter().find(|j| j.id == job_id).cloned())
            .await
    }

    /// Add a new job; the job file is written before this returns
    pub async fn add_job(
        &self,
        name: String,
        schedule: CronSchedule,
        message: String,
        deliver: bool,
        channel: Option<String>,
        to: Option<String>,
    ) -> Result<CronJob> {
        if message.trim().is_empty() {
            return Err(Error::Validation("job message must not be empty".to_string()));
        }
        schedule.validate()?;

        let now = now_ms();
        let next_run_at_ms = compute_next_run(&schedule, now).ok_or_else(|| {
            Error::Schedule(format!("schedule '{}' never fires", schedule.describe()))
        })?;

        let job = CronJob {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: if name.trim().is_empty() {
                truncate_name(&message)
            } else {
                name
            },
            enabled: true,
            schedule,
            message,
            delivery: CronDelivery {
                deliver,
                channel: channel.filter(|c| !c.is_empty()),
                to: to.filter(|t| !t.is_empty()),
            },
            state: CronJobState {
                next_run_at_ms: Some(next_run_at_ms),
                ..Default::default()
            },
            created_at_ms: now,
            updated_at_ms: now,
        };

        let added = job.clone();
        self.mutate(move |jobs| {
            jobs.push(added);
            Some(())
        })
        .await?;

        info!(job_id = %job.id, "Cron: added job '{}' ({})", job.name, job.schedule.describe());
        Ok(job)
    }

    /// Remove a job by ID; an unknown id leaves the job file untouched
    pub async fn remove_job(&self, job_id: &str) -> Result<bool> {
        let removed = self
            .mutate(|jobs| {
                let index = jobs.iter().position(|j| j.id == job_id)?;
                Some(jobs.remove(index))
            })
            .await?;

        match removed {
            Some(job) => {
                info!(job_id = %job.id, "Cron: removed job '{}'", job.name);
                Ok(true)
            }
            None => {
                debug!(job_id, "Cron: remove requested for unknown job");
                Ok(false)
            }
        }
    }

    /// Enable or disable a job; enabling reschedules from now
    pub async fn enable_job(&self, job_id: &str, enabled: bool) -> Result<Option<CronJob>> {
        let now = now_ms();
        self.mutate(|jobs| {
            let job = jobs.iter_mut().find(|j| j.id == job_id)?;
            job.enabled = enabled;
            job.updated_at_ms = now;
            job.state.next_run_at_ms = if enabled {
                compute_next_run(&job.schedule, now)
            } else {
                None
            };
            Some(job.clone())
        })
        .await
    }

    /// Run a job immediately without moving its schedule.
    ///
    /// Disabled jobs only run when `force` is set.
    pub async fn run_job(&self, job_id: &str, force: bool) -> Result<bool> {
        let Some(job) = self.get_job(job_id).await else {
            return Ok(false);
        };
        if !job.enabled && !force {
            return Ok(false);
        }

        info!(job_id = %job.id, "Cron: running job '{}' on demand", job.name);
        let outcome = self.fire(&job).await;
        let now = now_ms();
        self.mutate(|jobs| {
            let job = jobs.iter_mut().find(|j| j.id == job_id)?;
            record_outcome(job, &outcome, now);
            Some(())
        })
        .await?;
        Ok(true)
    }

    /// Get service status
    pub async fn status(&self) -> serde_json::Value {
        let is_running = self.is_running().await;
        let (total, enabled, next_wake) = self
            .with_jobs(|jobs| {
                let enabled: Vec<&CronJob> = jobs.iter().filter(|j| j.enabled).collect();
                let next_wake = enabled.iter().filter_map(|j| j.state.next_run_at_ms).min();
                (jobs.len(), enabled.len(), next_wake)
            })
            .await;

        serde_json::json!({
            "running": is_running,
            "jobs": total,
            "enabled_jobs": enabled,
            "next_wake_at_ms": next_wake,
        })
    }
}

fn record_outcome(job: &mut CronJob, outcome: &std::result::Result<(), String>, now_ms: i64) {
    job.state.last_run_at_ms = Some(now_ms);
    job.updated_at_ms = now_ms;
    match outcome {
        Ok(()) => {
            job.state.last_status = Some("ok".to_string());
            job.state.last_error = None;
        }
        Err(e) => {
            job.state.last_status = Some("error".to_string());
            job.state.last_error = Some(e.clone());
        }
    }
}

fn truncate_name(message: &str) -> String {
    crate::utils::truncate(message.trim(), 30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use crate::testing::{RecordingChannel, ScriptedHandler};
    use crate::turn::{TurnHandler, TurnSettings};
    use tempfile::TempDir;

    struct Fixture {
        service: CronService,
        bus: MessageBus,
        handler: Arc<ScriptedHandler>,
        dir: TempDir,
    }

    impl Fixture {
        fn store_path(&self) -> PathBuf {
            CronService::store_path_for(self.dir.path())
        }

        /// Second service over the same files, as after a restart
        fn reopen(&self) -> CronService {
            CronService::new(self.store_path(), self.bus.clone())
        }
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let handler = ScriptedHandler::echo();
        let state = Arc::new(StateStore::new(dir.path()));
        let dyn_handler: Arc<dyn TurnHandler> = handler.clone();
        let bus = MessageBus::new(dyn_handler, state, TurnSettings::default());
        let service = CronService::new(CronService::store_path_for(dir.path()), bus.clone());
        Fixture {
            service,
            bus,
            handler,
            dir,
        }
    }

    async fn add_every(service: &CronService, every_ms: i64, message: &str) -> CronJob {
        service
            .add_job(
                "Test Job".to_string(),
                CronSchedule::every(every_ms),
                message.to_string(),
                false,
                None,
                None,
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_now_ms() {
        let now = now_ms();
        assert!(now > 0);
    }

    #[test]
    fn test_compute_next_run_every() {
        let schedule = CronSchedule::every(5000);
        assert_eq!(compute_next_run(&schedule, 1000), Some(6000));
        assert_eq!(compute_next_run(&CronSchedule::every(0), 1000), None);
    }

    #[test]
    fn test_compute_next_run_is_idempotent() {
        let now = 1_709_283_600_000; // 2024-03-01T09:00:00Z
        for schedule in [
            CronSchedule::every(60_000),
            CronSchedule::cron("*/5 * * * *", None),
            CronSchedule::cron("0 9 * * 1-5", Some("Europe/Berlin".to_string())),
        ] {
            let first = compute_next_run(&schedule, now);
            assert!(first.is_some());
            assert_eq!(first, compute_next_run(&schedule, now));
            assert!(first.unwrap() > now);
        }
    }

    #[test]
    fn test_compute_next_run_overflow_is_none() {
        assert_eq!(compute_next_run(&CronSchedule::every(i64::MAX), 1), None);
        assert_eq!(compute_next_run(&CronSchedule::every(i64::MAX), 0), Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_cron_service_add_job() {
        let fx = fixture();
        let job = add_every(&fx.service, 5000, "Test message").await;

        assert_eq!(job.name, "Test Job");
        assert!(job.enabled);
        assert!(job.state.next_run_at_ms.is_some());

        // Persisted as a plain JSON array before add_job returned
        let raw = std::fs::read_to_string(fx.store_path()).unwrap();
        let on_disk: Vec<CronJob> = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk, vec![job]);
    }

    #[tokio::test]
    async fn test_add_job_rejects_bad_input() {
        let fx = fixture();
        let bad_expr = fx
            .service
            .add_job("x".into(), CronSchedule::cron("not a cron", None), "m".into(), false, None, None)
            .await;
        assert!(matches!(bad_expr, Err(Error::Schedule(_))));

        let zero = fx
            .service
            .add_job("x".into(), CronSchedule::every(0), "m".into(), false, None, None)
            .await;
        assert!(zero.is_err());

        let empty = fx
            .service
            .add_job("x".into(), CronSchedule::every(1000), " ".into(), false, None, None)
            .await;
        assert!(matches!(empty, Err(Error::Validation(_))));

        assert!(fx.service.list_jobs(true).await.is_empty());
        assert!(!fx.store_path().exists());
    }

    #[tokio::test]
    async fn test_list_jobs_in_insertion_order() {
        let fx = fixture();
        let a = add_every(&fx.service, 90_000, "a").await;
        let b = add_every(&fx.service, 10_000, "b").await;
        let c = add_every(&fx.service, 50_000, "c").await;
        fx.service.enable_job(&b.id, false).await.unwrap();

        let all: Vec<String> = fx.service.list_jobs(true).await.into_iter().map(|j| j.id).collect();
        assert_eq!(all, vec![a.id.clone(), b.id, c.id.clone()]);

        let enabled: Vec<String> = fx.service.list_jobs(false).await.into_iter().map(|j| j.id).collect();
        assert_eq!(enabled, vec![a.id, c.id]);
    }

    #[tokio::test]
    async fn test_cron_service_remove_job() {
        let fx = fixture();
        let job = add_every(&fx.service, 5000, "Test message").await;

        assert!(fx.service.remove_job(&job.id).await.unwrap());
        assert!(fx.service.list_jobs(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_job_leaves_file_untouched() {
        let fx = fixture();
        add_every(&fx.service, 5000, "keep me").await;
        let before = std::fs::read(fx.store_path()).unwrap();
        let modified = std::fs::metadata(fx.store_path()).unwrap().modified().unwrap();

        assert!(!fx.service.remove_job("missing").await.unwrap());

        assert_eq!(std::fs::read(fx.store_path()).unwrap(), before);
        assert_eq!(
            std::fs::metadata(fx.store_path()).unwrap().modified().unwrap(),
            modified
        );
    }

    #[tokio::test]
    async fn test_cron_service_enable_disable() {
        let fx = fixture();
        let job = add_every(&fx.service, 5000, "Test message").await;

        let disabled = fx.service.enable_job(&job.id, false).await.unwrap().unwrap();
        assert!(!disabled.enabled);
        assert!(disabled.state.next_run_at_ms.is_none());

        let enabled = fx.service.enable_job(&job.id, true).await.unwrap().unwrap();
        assert!(enabled.enabled);
        assert!(enabled.state.next_run_at_ms.is_some());

        assert!(fx.service.enable_job("missing", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fallback_target_from_routing_state() {
        let fx = fixture();
        let telegram = RecordingChannel::new("telegram");
        fx.bus.register_channel(telegram.clone());
        fx.bus.state().record("telegram", "42").unwrap();

        let job = add_every(&fx.service, 60_000, "stand-up reminder").await;
        let due = job.state.next_run_at_ms.unwrap();
        assert_eq!(fx.service.tick(due).await, 1);

        let sent = telegram.wait_for(1).await;
        assert_eq!(
            sent,
            vec![OutboundMessage::new("telegram", "42", "stand-up reminder")]
        );

        let seen = fx.handler.seen();
        assert_eq!(seen[0].source(), meta::SOURCE_CRON);
        assert_eq!(seen[0].metadata.get(meta::JOB_ID), Some(&job.id));
    }

    #[tokio::test]
    async fn test_tick_without_any_target_discards_result() {
        let fx = fixture();
        let job = add_every(&fx.service, 60_000, "nobody listens").await;

        fx.service.tick(job.state.next_run_at_ms.unwrap()).await;

        let seen = fx.handler.wait_for(1).await;
        assert_eq!(seen[0].channel, SYSTEM_CHANNEL);
        assert_eq!(seen[0].chat_id, format!("cron:{}", job.id));
        assert!(!seen[0].wants_delivery());

        let stored = fx.service.get_job(&job.id).await.unwrap();
        assert_eq!(stored.state.last_status.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_deliver_job_sends_message_verbatim() {
        let fx = fixture();
        let line = RecordingChannel::new("line");
        fx.bus.register_channel(line.clone());

        let job = fx
            .service
            .add_job(
                "water".into(),
                CronSchedule::every(3_600_000),
                "Water the plants".into(),
                true,
                Some("line".into()),
                Some("U123".into()),
            )
            .await
            .unwrap();
        fx.service.tick(job.state.next_run_at_ms.unwrap()).await;

        assert_eq!(line.sent(), vec![OutboundMessage::new("line", "U123", "Water the plants")]);
        assert!(fx.handler.seen().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_recorded() {
        let fx = fixture();
        let job = fx
            .service
            .add_job(
                "ghost".into(),
                CronSchedule::every(1000),
                "hello".into(),
                true,
                Some("nowhere".into()),
                Some("1".into()),
            )
            .await
            .unwrap();
        fx.service.tick(job.state.next_run_at_ms.unwrap()).await;

        let stored = fx.service.get_job(&job.id).await.unwrap();
        assert_eq!(stored.state.last_status.as_deref(), Some("error"));
        assert!(stored.state.last_error.unwrap().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_persisted_next_run_survives_restart() {
        let fx = fixture();
        let job = add_every(&fx.service, 60_000, "ping").await;
        let first_due = job.state.next_run_at_ms.unwrap();

        // Restart: persisted next run is kept rather than recomputed from now
        let restarted = fx.reopen();
        restarted.start(CancellationToken::new()).await.unwrap();
        restarted.stop().await;
        let reloaded = restarted.get_job(&job.id).await.unwrap();
        assert_eq!(reloaded.state.next_run_at_ms, Some(first_due));
    }

    #[tokio::test]
    async fn test_interval_counts_from_actual_fire() {
        let fx = fixture();
        let job = add_every(&fx.service, 60_000, "ping").await;
        let fired_at = job.state.next_run_at_ms.unwrap() + 700;

        assert_eq!(fx.service.tick(fired_at).await, 1);
        let after = fx.service.get_job(&job.id).await.unwrap();
        assert_eq!(after.state.next_run_at_ms, Some(fired_at + 60_000));
        assert_eq!(after.state.last_run_at_ms, Some(fired_at));

        // Long downtime: one run, then a full period from that run
        let much_later = fired_at + 10 * 60_000 + 123;
        assert_eq!(fx.service.tick(much_later).await, 1);
        let after = fx.reopen().get_job(&job.id).await.unwrap();
        assert_eq!(after.state.next_run_at_ms, Some(much_later + 60_000));
    }

    #[tokio::test]
    async fn test_huge_interval_is_rejected() {
        let fx = fixture();
        let result = fx
            .service
            .add_job("x".into(), CronSchedule::every(i64::MAX), "m".into(), false, None, None)
            .await;
        assert!(matches!(result, Err(Error::Schedule(_))));
        assert!(fx.service.list_jobs(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_job_ids_are_unique() {
        let fx = fixture();
        let a = add_every(&fx.service, 60_000, "a").await;
        let b = add_every(&fx.service, 60_000, "b").await;
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }

    #[tokio::test]
    async fn test_failed_save_after_tick_does_not_refire() {
        let fx = fixture();
        let job = add_every(&fx.service, 60_000, "once").await;
        let due = job.state.next_run_at_ms.unwrap();
        let before = std::fs::read(fx.store_path()).unwrap();

        // A directory in place of the scratch file makes every write fail
        std::fs::create_dir(crate::utils::temp_path_for(&fx.store_path())).unwrap();

        assert_eq!(fx.service.tick(due).await, 1);
        assert_eq!(fx.service.tick(due + 1000).await, 0);
        assert_eq!(fx.service.tick(due + 2000).await, 0);
        fx.handler.wait_for(1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.handler.seen().len(), 1);

        let stored = fx.service.get_job(&job.id).await.unwrap();
        assert_eq!(stored.state.next_run_at_ms, Some(due + 60_000));
        // The last good copy is still on disk
        assert_eq!(std::fs::read(fx.store_path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_add_keeps_previous_store() {
        let fx = fixture();
        let kept = add_every(&fx.service, 60_000, "kept").await;
        let before = std::fs::read(fx.store_path()).unwrap();
        std::fs::create_dir(crate::utils::temp_path_for(&fx.store_path())).unwrap();

        let result = fx
            .service
            .add_job("x".into(), CronSchedule::every(1000), "lost".into(), false, None, None)
            .await;
        assert!(matches!(result, Err(Error::Io(_))));

        let ids: Vec<String> = fx.service.list_jobs(true).await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![kept.id]);
        assert_eq!(std::fs::read(fx.store_path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_corrupt_or_unreadable_store_loads_empty() {
        let fx = fixture();
        std::fs::create_dir_all(fx.store_path().parent().unwrap()).unwrap();
        std::fs::write(fx.store_path(), "{not json").unwrap();
        assert!(fx.reopen().list_jobs(true).await.is_empty());

        // A fresh job replaces the corrupt file
        let service = fx.reopen();
        let job = add_every(&service, 60_000, "fresh").await;
        assert_eq!(fx.reopen().list_jobs(true).await, vec![job]);

        std::fs::remove_file(fx.store_path()).unwrap();
        std::fs::create_dir(fx.store_path()).unwrap();
        assert!(fx.reopen().list_jobs(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_ignores_disabled_and_future_jobs() {
        let fx = fixture();
        let future = add_every(&fx.service, 60_000, "later").await;
        let disabled = add_every(&fx.service, 1000, "off").await;
        fx.service.enable_job(&disabled.id, false).await.unwrap();

        assert_eq!(fx.service.tick(future.state.next_run_at_ms.unwrap() - 1).await, 0);
    }

    #[tokio::test]
    async fn test_run_job_respects_force() {
        let fx = fixture();
        let job = add_every(&fx.service, 60_000, "manual").await;
        fx.service.enable_job(&job.id, false).await.unwrap();

        assert!(!fx.service.run_job(&job.id, false).await.unwrap());
        assert!(fx.service.run_job(&job.id, true).await.unwrap());
        assert!(!fx.service.run_job("missing", true).await.unwrap());

        fx.handler.wait_for(1).await;
        let stored = fx.service.get_job(&job.id).await.unwrap();
        assert!(stored.state.last_run_at_ms.is_some());
        assert!(stored.state.next_run_at_ms.is_none());
    }

    #[tokio::test]
    async fn test_start_stop_and_status() {
        let fx = fixture();
        let service = fx.service.clone().with_tick_interval(Duration::from_millis(20));
        add_every(&service, 60_000, "a").await;

        service.start(CancellationToken::new()).await.unwrap();
        assert!(service.is_running().await);
        // Second start is a no-op
        service.start(CancellationToken::new()).await.unwrap();

        let status = service.status().await;
        assert_eq!(status["running"], true);
        assert_eq!(status["jobs"], 1);
        assert!(status["next_wake_at_ms"].is_i64());

        service.stop().await;
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn test_tick_loop_fires_due_jobs() {
        let fx = fixture();
        let service = fx.service.clone().with_tick_interval(Duration::from_millis(20));
        add_every(&service, 50, "fast").await;

        let cancel = CancellationToken::new();
        service.start(cancel.clone()).await.unwrap();
        let seen = fx.handler.wait_for(1).await;
        cancel.cancel();
        service.stop().await;

        assert!(!seen.is_empty());
        assert_eq!(seen[0].content, "fast");
    }
}
