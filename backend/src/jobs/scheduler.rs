// Job Scheduler - one non-overlapping periodic monitoring job per account

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::monitor::{CycleRunner, MonitorCommand};
use crate::config::SchedulerConfig;
use crate::services::registry::{AccountDirectory, PolicySource};
use crate::workflows::{CycleResult, CycleStatus};
use trafficguard_shared::MonitoringJobInfo;

const EXECUTION_LOG_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

/// Deterministic key used for idempotent add/remove.
pub fn job_key(account_id: i64) -> String {
    format!("monitor_account_{}", account_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_key: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Completed,
    Skipped,
    Failed,
    PartialFailure,
}

impl From<CycleStatus> for JobStatus {
    fn from(status: CycleStatus) -> Self {
        match status {
            CycleStatus::Completed => JobStatus::Completed,
            CycleStatus::Skipped => JobStatus::Skipped,
            CycleStatus::PartialFailure => JobStatus::PartialFailure,
            CycleStatus::Failed => JobStatus::Failed,
        }
    }
}

/// What happened when a job fired.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Ran(CycleStatus),
    Paused,
    /// Fired later than the misfire grace allows
    Missed,
    /// Previous run of the same job still in progress
    Coalesced,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total: usize,
    pub added: usize,
    pub rescheduled: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct JobTiming {
    paused: bool,
    next_fire_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
}

/// Registry entry for one account's job.
struct MonitoringJob {
    key: String,
    account_id: i64,
    interval_minutes: u32,
    interval: ChronoDuration,
    cron_id: StdMutex<Option<Uuid>>,
    timing: StdMutex<JobTiming>,
    /// Per-account guard, shared with any later entry for the same account
    running: Arc<Mutex<()>>,
}

impl MonitoringJob {
    fn new(account_id: i64, interval_minutes: u32, now: DateTime<Utc>, running: Arc<Mutex<()>>) -> Self {
        let interval = ChronoDuration::minutes(i64::from(interval_minutes.max(1)));
        Self {
            key: job_key(account_id),
            account_id,
            interval_minutes,
            interval,
            cron_id: StdMutex::new(None),
            timing: StdMutex::new(JobTiming {
                paused: false,
                next_fire_at: now + interval,
                last_run_at: None,
            }),
            running,
        }
    }

    fn info(&self) -> MonitoringJobInfo {
        let timing = self.timing.lock().unwrap_or_else(|p| p.into_inner());
        MonitoringJobInfo {
            job_key: self.key.clone(),
            account_id: self.account_id,
            interval_minutes: self.interval_minutes,
            enabled: !timing.paused,
            running: self.running.try_lock().is_err(),
            next_fire_at: timing.next_fire_at,
            last_run_at: timing.last_run_at,
        }
    }

    fn cron_id(&self) -> Option<Uuid> {
        *self.cron_id.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// State every tick needs, shared with the cron closures.
struct TickContext {
    runner: Arc<dyn CycleRunner>,
    workers: Arc<Semaphore>,
    misfire_grace: ChronoDuration,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl TickContext {
    /// Fire `job` as if the clock read `now`.
    async fn tick(&self, job: &MonitoringJob, now: DateTime<Utc>) -> TickOutcome {
        {
            let mut timing = job.timing.lock().unwrap_or_else(|p| p.into_inner());
            if timing.paused {
                debug!(job_key = %job.key, "Job paused, skipping tick");
                return TickOutcome::Paused;
            }

            let scheduled = timing.next_fire_at;
            // Missed fires collapse into this one; next_fire_at only moves forward
            loop {
                timing.next_fire_at += job.interval;
                if timing.next_fire_at > now {
                    break;
                }
            }

            if now - scheduled > self.misfire_grace {
                warn!(
                    job_key = %job.key,
                    late_secs = (now - scheduled).num_seconds(),
                    "Run missed its grace period, waiting for the next fire"
                );
                return TickOutcome::Missed;
            }
        }

        self.execute(job).await
    }

    /// Run one cycle unless the same job is already running.
    async fn execute(&self, job: &MonitoringJob) -> TickOutcome {
        let Ok(_running) = job.running.try_lock() else {
            info!(job_key = %job.key, "Previous run still in progress, coalescing");
            return TickOutcome::Coalesced;
        };

        let Ok(_permit) = self.workers.clone().acquire_owned().await else {
            return TickOutcome::Closed;
        };

        let log_id = Uuid::new_v4();
        let started_at = Utc::now();
        {
            let mut timing = job.timing.lock().unwrap_or_else(|p| p.into_inner());
            timing.last_run_at = Some(started_at);
        }

        info!(job_key = %job.key, account_id = job.account_id, "Running monitoring job");

        let runner = self.runner.clone();
        let command = MonitorCommand {
            account_id: job.account_id,
        };
        // A panicking cycle must not take the job down with it
        let outcome = tokio::spawn(async move { runner.run(command).await }).await;

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds();

        let (status, items_processed, errors) = match outcome {
            Ok(result) => summarize(&result),
            Err(e) => {
                error!(job_key = %job.key, "Monitoring job aborted: {}", e);
                (CycleStatus::Failed, 0, vec![format!("Cycle aborted: {}", e)])
            }
        };

        let log = JobExecutionLog {
            id: log_id,
            job_key: job.key.clone(),
            started_at,
            completed_at: Some(completed_at),
            status: status.into(),
            items_processed,
            errors,
            duration_ms: Some(duration),
        };

        let mut logs = self.execution_logs.write().await;
        logs.push(log);
        // Keep only the most recent entries
        if logs.len() > EXECUTION_LOG_CAPACITY {
            let overflow = logs.len() - EXECUTION_LOG_CAPACITY;
            logs.drain(..overflow);
        }

        TickOutcome::Ran(status)
    }
}

fn summarize(result: &CycleResult) -> (CycleStatus, i32, Vec<String>) {
    (
        result.status,
        i32::try_from(result.items_processed()).unwrap_or(i32::MAX),
        result.errors.clone(),
    )
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    jobs: RwLock<HashMap<String, Arc<MonitoringJob>>>,
    // Outlives job entries so a replaced job cannot overlap its predecessor's cycle
    run_guards: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
    context: Arc<TickContext>,
    accounts: Arc<dyn AccountDirectory>,
    policies: Arc<dyn PolicySource>,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub async fn new(
        runner: Arc<dyn CycleRunner>,
        accounts: Arc<dyn AccountDirectory>,
        policies: Arc<dyn PolicySource>,
        config: SchedulerConfig,
    ) -> JobResult<Self> {
        if config.worker_pool_size == 0 {
            return Err(JobError::ConfigError("worker pool size must be at least 1".to_string()));
        }

        let scheduler = TokioScheduler::new().await?;
        let context = Arc::new(TickContext {
            runner,
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
            misfire_grace: ChronoDuration::seconds(config.misfire_grace_secs as i64),
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        });

        Ok(Self {
            scheduler,
            jobs: RwLock::new(HashMap::new()),
            run_guards: StdMutex::new(HashMap::new()),
            context,
            accounts,
            policies,
            config,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!(workers = self.config.worker_pool_size, "Starting monitoring scheduler");
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> JobResult<()> {
        info!("Shutting down monitoring scheduler");
        self.context.workers.close();
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        Ok(())
    }

    /// Register a job for the account. Returns false if one already exists.
    pub async fn add(&self, account_id: i64, interval_minutes: u32) -> JobResult<bool> {
        let key = job_key(account_id);
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&key) {
            debug!(job_key = %key, "Job already registered");
            return Ok(false);
        }

        let job = Arc::new(MonitoringJob::new(
            account_id,
            interval_minutes,
            Utc::now(),
            self.run_guard(account_id),
        ));
        let period = Duration::from_secs(u64::from(interval_minutes.max(1)) * 60);

        let context = self.context.clone();
        let fired = job.clone();
        let cron_job = Job::new_repeated_async(period, move |_uuid, _lock| {
            let context = context.clone();
            let job = fired.clone();
            Box::pin(async move {
                let outcome = context.tick(&job, Utc::now()).await;
                debug!(job_key = %job.key, ?outcome, "Tick finished");
            })
        })?;

        let cron_id = self.scheduler.add(cron_job).await?;
        *job.cron_id.lock().unwrap_or_else(|p| p.into_inner()) = Some(cron_id);
        jobs.insert(key.clone(), job);

        info!(job_key = %key, interval_minutes, "Scheduled monitoring job");
        Ok(true)
    }

    fn run_guard(&self, account_id: i64) -> Arc<Mutex<()>> {
        self.run_guards
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(account_id)
            .or_default()
            .clone()
    }

    /// Returns false if no job exists for the account.
    /// A cycle already in flight keeps running and still blocks the account's next job.
    pub async fn remove(&self, account_id: i64) -> JobResult<bool> {
        let key = job_key(account_id);
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.remove(&key) else {
            return Ok(false);
        };

        if let Some(cron_id) = job.cron_id() {
            self.scheduler.remove(&cron_id).await?;
        }
        info!(job_key = %key, "Removed monitoring job");
        Ok(true)
    }

    pub async fn pause(&self, account_id: i64) -> bool {
        self.set_paused(account_id, true).await
    }

    /// Resuming restarts the cadence from now.
    pub async fn resume(&self, account_id: i64) -> bool {
        self.set_paused(account_id, false).await
    }

    async fn set_paused(&self, account_id: i64, paused: bool) -> bool {
        let jobs = self.jobs.read().await;
        let Some(job) = jobs.get(&job_key(account_id)) else {
            return false;
        };

        let mut timing = job.timing.lock().unwrap_or_else(|p| p.into_inner());
        if timing.paused && !paused {
            timing.next_fire_at = Utc::now() + job.interval;
        }
        timing.paused = paused;
        info!(job_key = %job.key, paused, "Job pause state changed");
        true
    }

    pub async fn list(&self) -> Vec<MonitoringJobInfo> {
        let mut infos: Vec<MonitoringJobInfo> = self.jobs.read().await.values().map(|job| job.info()).collect();
        infos.sort_by_key(|info| info.account_id);
        infos
    }

    pub async fn get(&self, account_id: i64) -> Option<MonitoringJobInfo> {
        self.jobs.read().await.get(&job_key(account_id)).map(|job| job.info())
    }

    /// Run a cycle immediately, outside the cadence. Still one run per job at a time.
    pub async fn run_now(&self, account_id: i64) -> JobResult<TickOutcome> {
        let job = self
            .jobs
            .read()
            .await
            .get(&job_key(account_id))
            .cloned()
            .ok_or_else(|| JobError::ExecutionError(format!("No job for account {}", account_id)))?;
        Ok(self.context.execute(&job).await)
    }

    pub async fn execution_logs(&self) -> Vec<JobExecutionLog> {
        self.context.execution_logs.read().await.clone()
    }

    /// Bring the job set in line with the registry.
    pub async fn sync_accounts(&self) -> SyncStats {
        let accounts = self.accounts.list_accounts().await;
        let mut stats = SyncStats {
            total: accounts.len(),
            ..SyncStats::default()
        };
        let mut eligible = HashSet::new();

        for record in accounts {
            let account_id = record.account.id;
            if !record.account.enabled {
                stats.skipped += 1;
                continue;
            }
            let Some(policy) = self.policies.effective_policy(account_id).await else {
                stats.skipped += 1;
                continue;
            };
            eligible.insert(account_id);

            let interval = policy.check_interval_minutes.max(1);
            match self.get(account_id).await {
                None => match self.add(account_id, interval).await {
                    Ok(true) => stats.added += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(account_id, "Failed to schedule job: {}", e);
                        stats.failed += 1;
                    }
                },
                Some(existing) if existing.interval_minutes != interval => {
                    let rescheduled = async {
                        self.remove(account_id).await?;
                        self.add(account_id, interval).await
                    };
                    match rescheduled.await {
                        Ok(_) => stats.rescheduled += 1,
                        Err(e) => {
                            error!(account_id, "Failed to reschedule job: {}", e);
                            stats.failed += 1;
                        }
                    }
                }
                Some(_) => {}
            }
        }

        let stale: Vec<i64> = self
            .jobs
            .read()
            .await
            .values()
            .map(|job| job.account_id)
            .filter(|id| !eligible.contains(id))
            .collect();
        for account_id in stale {
            match self.remove(account_id).await {
                Ok(true) => stats.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(account_id, "Failed to remove job: {}", e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            total = stats.total,
            added = stats.added,
            rescheduled = stats.rescheduled,
            removed = stats.removed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Account sync finished"
        );
        stats
    }

    /// Reconcile against the registry every `sync_interval_secs`.
    pub async fn schedule_reconcile(self: &Arc<Self>) -> JobResult<()> {
        let interval = Duration::from_secs(self.config.sync_interval_secs.max(1));
        let weak: Weak<Self> = Arc::downgrade(self);

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.sync_accounts().await;
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!(interval_secs = interval.as_secs(), "Scheduled account reconciliation");
        Ok(())
    }
}
