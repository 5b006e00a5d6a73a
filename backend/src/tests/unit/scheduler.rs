// Scheduler lifecycle tests: idempotent add/remove, pause, manual runs, registry sync

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::SchedulerConfig;
use crate::jobs::{job_key, CycleRunner, JobError, JobScheduler, MonitorCommand, TickOutcome};
use crate::tests::fixtures::{disabled_record, policy, record};
use crate::tests::helpers::StaticRegistry;
use crate::workflows::{CycleResult, CycleStatus};
use trafficguard_shared::ThresholdPolicy;

#[derive(Default)]
struct RecordingRunner {
    runs: AtomicUsize,
}

#[async_trait]
impl CycleRunner for RecordingRunner {
    async fn run(&self, command: MonitorCommand) -> CycleResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut result = CycleResult::new(command.account_id);
        result.measured = 2;
        result.finish()
    }
}

/// Holds every cycle open until released.
#[derive(Default)]
struct BlockingRunner {
    runs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl CycleRunner for BlockingRunner {
    async fn run(&self, command: MonitorCommand) -> CycleResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        CycleResult::new(command.account_id).finish()
    }
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        worker_pool_size: 2,
        misfire_grace_secs: 60,
        sync_interval_secs: 300,
    }
}

fn every(minutes: u32) -> ThresholdPolicy {
    ThresholdPolicy {
        check_interval_minutes: minutes,
        ..policy(10.0, 0)
    }
}

async fn scheduler_with(registry: Arc<StaticRegistry>) -> (JobScheduler, Arc<RecordingRunner>) {
    crate::tests::init_tracing();
    let runner = Arc::new(RecordingRunner::default());
    let scheduler = JobScheduler::new(runner.clone(), registry.clone(), registry, config())
        .await
        .expect("scheduler");
    (scheduler, runner)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_is_idempotent() {
    let (scheduler, _) = scheduler_with(Arc::new(StaticRegistry::default())).await;

    assert!(scheduler.add(1, 5).await.unwrap());
    assert!(!scheduler.add(1, 5).await.unwrap());

    let jobs = scheduler.list().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_key, job_key(1));
    assert_eq!(jobs[0].interval_minutes, 5);
    assert!(jobs[0].enabled);
    assert!(!jobs[0].running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_unknown_job_returns_false() {
    let (scheduler, _) = scheduler_with(Arc::new(StaticRegistry::default())).await;

    assert!(!scheduler.remove(9).await.unwrap());

    scheduler.add(9, 5).await.unwrap();
    assert!(scheduler.remove(9).await.unwrap());
    assert!(scheduler.get(9).await.is_none());
    assert!(!scheduler.remove(9).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_and_resume() {
    let (scheduler, _) = scheduler_with(Arc::new(StaticRegistry::default())).await;
    scheduler.add(1, 5).await.unwrap();

    assert!(scheduler.pause(1).await);
    assert!(!scheduler.get(1).await.unwrap().enabled);

    assert!(scheduler.resume(1).await);
    let info = scheduler.get(1).await.unwrap();
    assert!(info.enabled);
    assert!(info.next_fire_at > chrono::Utc::now());

    assert!(!scheduler.pause(2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_now_executes_and_logs() {
    let (scheduler, runner) = scheduler_with(Arc::new(StaticRegistry::default())).await;
    scheduler.add(1, 5).await.unwrap();

    let outcome = scheduler.run_now(1).await.unwrap();
    assert_eq!(outcome, TickOutcome::Ran(CycleStatus::Completed));
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

    let logs = scheduler.execution_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].job_key, job_key(1));
    assert_eq!(logs[0].items_processed, 2);
    assert!(logs[0].completed_at.is_some());
    assert!(scheduler.get(1).await.unwrap().last_run_at.is_some());

    assert!(matches!(scheduler.run_now(2).await, Err(JobError::ExecutionError(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_workers_is_rejected() {
    let registry = Arc::new(StaticRegistry::default());
    let runner = Arc::new(RecordingRunner::default());
    let config = SchedulerConfig {
        worker_pool_size: 0,
        ..config()
    };

    let result = JobScheduler::new(runner, registry.clone(), registry, config).await;
    assert!(matches!(result, Err(JobError::ConfigError(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_accounts_follows_registry() {
    let registry = Arc::new(StaticRegistry::new(vec![
        record(1, Some(every(5))),
        disabled_record(2, Some(every(5))),
        record(3, None),
        record(4, Some(every(15))),
    ]));
    let (scheduler, _) = scheduler_with(registry.clone()).await;

    let stats = scheduler.sync_accounts().await;
    assert_eq!(stats.total, 4);
    assert_eq!(stats.added, 2);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.failed, 0);
    let ids: Vec<i64> = scheduler.list().await.iter().map(|j| j.account_id).collect();
    assert_eq!(ids, vec![1, 4]);

    // Unchanged registry is a no-op
    let stats = scheduler.sync_accounts().await;
    assert_eq!((stats.added, stats.rescheduled, stats.removed), (0, 0, 0));

    // Interval change reschedules, removal drops the job
    registry.replace(vec![record(1, Some(every(10)))]);
    let stats = scheduler.sync_accounts().await;
    assert_eq!(stats.rescheduled, 1);
    assert_eq!(stats.removed, 1);
    assert_eq!(scheduler.get(1).await.unwrap().interval_minutes, 10);
    assert!(scheduler.get(4).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replaced_job_does_not_overlap_running_cycle() {
    crate::tests::init_tracing();
    let registry = Arc::new(StaticRegistry::new(vec![record(1, Some(every(5)))]));
    let runner = Arc::new(BlockingRunner::default());
    let scheduler = Arc::new(
        JobScheduler::new(runner.clone(), registry.clone(), registry.clone(), config())
            .await
            .expect("scheduler"),
    );
    assert_eq!(scheduler.sync_accounts().await.added, 1);

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_now(1).await })
    };
    runner.started.notified().await;

    // Interval change while the cycle is still open
    registry.replace(vec![record(1, Some(every(10)))]);
    assert_eq!(scheduler.sync_accounts().await.rescheduled, 1);
    assert!(scheduler.get(1).await.unwrap().running);
    assert_eq!(scheduler.run_now(1).await.unwrap(), TickOutcome::Coalesced);

    // Disable then re-enable while the cycle is still open
    assert!(scheduler.remove(1).await.unwrap());
    assert!(scheduler.add(1, 10).await.unwrap());
    assert_eq!(scheduler.run_now(1).await.unwrap(), TickOutcome::Coalesced);

    runner.release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), TickOutcome::Ran(CycleStatus::Completed));
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    assert_eq!(runner.max_in_flight.load(Ordering::SeqCst), 1);

    // Once the old cycle is done the new job runs normally
    runner.release.notify_one();
    assert_eq!(scheduler.run_now(1).await.unwrap(), TickOutcome::Ran(CycleStatus::Completed));
    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    assert!(!scheduler.get(1).await.unwrap().running);
}
