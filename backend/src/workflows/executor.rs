// Workflow Executor - one monitoring cycle for one account

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::conditions::{check_threshold, shutdown_decision, AggregateUsage, ShutdownDecision, ThresholdCheck};
use crate::config::Config;
use crate::error::{CloudError, ConfigError, PollError};
use crate::integrations::{CloudGateway, GatewayFactory, JobPoller};
use crate::services::notifier::NotificationDispatcher;
use crate::services::registry::{AccountDirectory, PolicySource};
use crate::services::retry::{self, RetryPolicy};
use crate::services::LogSink;
use trafficguard_shared::{
    Account, AttemptStatus, InstanceRef, JobState, ManagedInstance, MeasurementRecord, NotificationEvent,
    PowerAction, PowerMode, RemediationAttempt, ThresholdPolicy, TrafficSnapshot,
};

/// Cycle-wide knobs that do not come from the per-account policy.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Backoff shape; the retry count comes from each account's policy
    pub retry: RetryPolicy,
    pub poller: JobPoller,
    pub warning_percentage: f64,
    pub stop_mode: PowerMode,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poller: JobPoller::default(),
            warning_percentage: 70.0,
            stop_mode: PowerMode::Soft,
        }
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            retry: RetryPolicy::from_config(&config.retry, 3)?,
            poller: JobPoller::new(config.poll.timeout(), config.poll.interval()),
            warning_percentage: config.traffic_warning_percentage,
            stop_mode: PowerMode::Soft,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CycleStatus {
    /// Account missing, disabled or without a policy
    Skipped,
    Completed,
    PartialFailure,
    Failed,
}

/// Aggregate outcome of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle_id: Uuid,
    pub account_id: i64,
    pub status: CycleStatus,
    pub skip_reason: Option<String>,
    pub measured: usize,
    pub warned: bool,
    pub remediated: Vec<RemediationAttempt>,
    /// Instances whose shutdown was called off by the delayed recheck
    pub cancelled: Vec<String>,
    pub notifications_sent: usize,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CycleResult {
    pub fn new(account_id: i64) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            account_id,
            status: CycleStatus::Completed,
            skip_reason: None,
            measured: 0,
            warned: false,
            remediated: Vec::new(),
            cancelled: Vec::new(),
            notifications_sent: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        info!(account_id = self.account_id, "Skipping cycle: {}", reason);
        self.status = CycleStatus::Skipped;
        self.skip_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        self
    }

    fn fail(mut self, error: String) -> Self {
        error!(account_id = self.account_id, "Cycle failed: {}", error);
        self.status = CycleStatus::Failed;
        self.errors.push(error);
        self.finished_at = Some(Utc::now());
        self
    }

    /// Completed when no error was collected, otherwise a partial failure.
    pub fn finish(mut self) -> Self {
        self.status = if self.errors.is_empty() {
            CycleStatus::Completed
        } else {
            CycleStatus::PartialFailure
        };
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn items_processed(&self) -> usize {
        self.measured
    }
}

/// One instance with its package reading.
#[derive(Debug, Clone)]
struct Reading {
    instance: ManagedInstance,
    snapshot: TrafficSnapshot,
}

enum InstanceOutcome {
    Remediated(RemediationAttempt),
    Cancelled(String),
    Aborted(String),
}

/// Per-cycle state shared by every instance pipeline.
struct CycleContext<'a> {
    account: &'a Account,
    policy: &'a ThresholdPolicy,
    gateway: &'a dyn CloudGateway,
    retry: RetryPolicy,
}

pub struct WorkflowExecutor {
    accounts: Arc<dyn AccountDirectory>,
    policies: Arc<dyn PolicySource>,
    gateways: Arc<dyn GatewayFactory>,
    notifications: NotificationDispatcher,
    audit: Arc<dyn LogSink>,
    settings: WorkflowSettings,
}

impl WorkflowExecutor {
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        policies: Arc<dyn PolicySource>,
        gateways: Arc<dyn GatewayFactory>,
        notifications: NotificationDispatcher,
        audit: Arc<dyn LogSink>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            accounts,
            policies,
            gateways,
            notifications,
            audit,
            settings,
        }
    }

    /// Resolve, measure, evaluate, warn, then remediate every instance below its threshold.
    pub async fn run_cycle(&self, account_id: i64) -> CycleResult {
        let mut result = CycleResult::new(account_id);

        // Resolve
        let Some(record) = self.accounts.get_account(account_id).await else {
            return result.skip("account not found");
        };
        if !record.account.enabled {
            return result.skip("account disabled");
        }
        let Some(policy) = self.policies.effective_policy(account_id).await else {
            return result.skip("no effective policy");
        };
        let account = record.account;

        let gateway = match self.gateways.gateway(account_id, &record.credentials).await {
            Ok(gateway) => gateway,
            Err(e) => {
                let message = format!("Failed to prepare client: {}", e);
                self.record_failed_measurement(account_id, &policy, message.clone()).await;
                return result.fail(message);
            }
        };

        let ctx = CycleContext {
            account: &account,
            policy: &policy,
            gateway: gateway.as_ref(),
            retry: self.settings.retry.with_max_retries(policy.retry_times),
        };

        info!(
            account_id,
            threshold = policy.traffic_threshold,
            auto_shutdown = policy.auto_shutdown_enabled,
            delay_minutes = policy.shutdown_delay_minutes,
            "Starting monitoring cycle"
        );

        // Measure
        let readings = match self.measure(&ctx).await {
            Ok(readings) => readings,
            Err(e) => {
                let message = format!("Measurement failed: {}", e);
                self.record_failed_measurement(account_id, &policy, message.clone()).await;
                return result.fail(message);
            }
        };

        // Evaluate
        let mut candidates: Vec<(Reading, ThresholdCheck)> = Vec::new();
        for reading in &readings {
            let check = check_threshold(reading.snapshot.remaining_amount, policy.traffic_threshold);
            self.audit
                .record_measurement(MeasurementRecord::from_snapshot(
                    account_id,
                    &reading.snapshot,
                    policy.traffic_threshold,
                    check.is_below,
                    check.message.clone(),
                ))
                .await;
            result.measured += 1;

            match shutdown_decision(&check, &policy, &reading.instance) {
                ShutdownDecision::Proceed => candidates.push((reading.clone(), check)),
                ShutdownDecision::NotBelow => {}
                decision => debug!(
                    account_id,
                    instance_id = %reading.instance.id,
                    ?decision,
                    "Below threshold, not remediating"
                ),
            }
        }

        // Warn
        let aggregate = AggregateUsage::from_snapshots(readings.iter().map(|r| &r.snapshot));
        if aggregate.should_warn(self.settings.warning_percentage) {
            result.warned = true;
            let event = NotificationEvent::TrafficWarning {
                account_name: account.name.clone(),
                region: account.region.clone(),
                remaining_traffic_gb: aggregate.remaining,
                threshold_gb: policy.traffic_threshold,
                usage_percentage: aggregate.usage_percentage(),
                server_count: readings.len(),
            };
            if self.notify(&ctx, event).await {
                result.notifications_sent += 1;
            }
        }

        // Delay, remediate and await, each instance independently
        let outcomes = join_all(
            candidates
                .into_iter()
                .map(|(reading, check)| self.remediate_instance(&ctx, reading, check)),
        )
        .await;

        for (outcome, sent) in outcomes {
            result.notifications_sent += sent;
            match outcome {
                InstanceOutcome::Remediated(attempt) => {
                    if attempt.status == AttemptStatus::Failed {
                        result.errors.push(format!(
                            "Instance {}: {}",
                            attempt.instance_id,
                            attempt.error.as_deref().unwrap_or("shutdown failed")
                        ));
                    }
                    result.remediated.push(attempt);
                }
                InstanceOutcome::Cancelled(instance_id) => result.cancelled.push(instance_id),
                InstanceOutcome::Aborted(error) => result.errors.push(error),
            }
        }

        let result = result.finish();
        info!(
            account_id,
            measured = result.measured,
            warned = result.warned,
            remediated = result.remediated.len(),
            cancelled = result.cancelled.len(),
            errors = result.errors.len(),
            "Monitoring cycle finished"
        );
        result
    }

    async fn measure(&self, ctx: &CycleContext<'_>) -> Result<Vec<Reading>, CloudError> {
        let gateway = ctx.gateway;
        let instances = retry::execute(&ctx.retry, move || gateway.list_instances()).await?;

        let package_ids: Vec<String> = instances
            .iter()
            .filter_map(|i| i.traffic_package_id.clone())
            .collect();
        if package_ids.is_empty() {
            debug!(account_id = ctx.account.id, "No instance carries a traffic package");
            return Ok(Vec::new());
        }

        let ids = package_ids.as_slice();
        let packages = retry::execute(&ctx.retry, move || gateway.query_usage(ids)).await?;
        let by_id: HashMap<&str, _> = packages.iter().map(|p| (p.resource_id.as_str(), p)).collect();

        let mut readings = Vec::new();
        for instance in instances {
            let Some(package_id) = instance.traffic_package_id.as_deref() else {
                continue;
            };
            match by_id.get(package_id) {
                Some(package) => readings.push(Reading {
                    snapshot: TrafficSnapshot::from_package(&instance.id, package),
                    instance,
                }),
                None => warn!(
                    account_id = ctx.account.id,
                    instance_id = %instance.id,
                    package_id,
                    "No usage returned for traffic package"
                ),
            }
        }
        Ok(readings)
    }

    async fn recheck(&self, ctx: &CycleContext<'_>, instance: &ManagedInstance) -> Result<TrafficSnapshot, CloudError> {
        let gateway = ctx.gateway;
        let package_id = instance
            .traffic_package_id
            .clone()
            .ok_or_else(|| CloudError::InvalidRequest(format!("Instance {} has no traffic package", instance.id)))?;
        let ids = vec![package_id.clone()];
        let ids_ref = ids.as_slice();

        let packages = retry::execute(&ctx.retry, move || gateway.query_usage(ids_ref)).await?;
        packages
            .iter()
            .find(|p| p.resource_id == package_id)
            .map(|p| TrafficSnapshot::from_package(&instance.id, p))
            .ok_or_else(|| CloudError::Decode(format!("No usage returned for package {}", package_id)))
    }

    /// Returns the outcome and how many notifications were delivered.
    async fn remediate_instance(
        &self,
        ctx: &CycleContext<'_>,
        reading: Reading,
        check: ThresholdCheck,
    ) -> (InstanceOutcome, usize) {
        let account = ctx.account;
        let policy = ctx.policy;
        let instance = reading.instance;
        let mut sent = 0usize;
        let mut remaining = reading.snapshot.remaining_amount;
        let mut reason = check.message;

        // Delay and recheck
        if policy.shutdown_delay_minutes > 0 {
            let event = NotificationEvent::ShutdownDelayed {
                account_name: account.name.clone(),
                region: region_of(&instance, account).to_string(),
                delay_minutes: policy.shutdown_delay_minutes,
                remaining_traffic_gb: remaining,
                threshold_gb: policy.traffic_threshold,
            };
            sent += self.notify(ctx, event).await as usize;

            info!(
                account_id = account.id,
                instance_id = %instance.id,
                delay_minutes = policy.shutdown_delay_minutes,
                "Delaying shutdown before recheck"
            );
            sleep(Duration::from_secs(u64::from(policy.shutdown_delay_minutes) * 60)).await;

            match self.recheck(ctx, &instance).await {
                Ok(snapshot) => {
                    let recheck = check_threshold(snapshot.remaining_amount, policy.traffic_threshold);
                    self.audit
                        .record_measurement(MeasurementRecord::from_snapshot(
                            account.id,
                            &snapshot,
                            policy.traffic_threshold,
                            recheck.is_below,
                            recheck.message.clone(),
                        ))
                        .await;

                    if !recheck.is_below {
                        info!(
                            account_id = account.id,
                            instance_id = %instance.id,
                            remaining = snapshot.remaining_amount,
                            "Traffic recovered during delay, shutdown cancelled"
                        );
                        return (InstanceOutcome::Cancelled(instance.id), sent);
                    }
                    remaining = snapshot.remaining_amount;
                    reason = recheck.message;
                }
                Err(e) => {
                    let message = format!("Instance {}: recheck failed, shutdown aborted: {}", instance.id, e);
                    warn!(account_id = account.id, "{}", message);
                    self.audit
                        .record_measurement(MeasurementRecord::failed(
                            account.id,
                            Some(instance.id.clone()),
                            policy.traffic_threshold,
                            message.clone(),
                        ))
                        .await;
                    return (InstanceOutcome::Aborted(message), sent);
                }
            }
        }

        // Remediate
        let region = region_of(&instance, account).to_string();
        let mut attempt = RemediationAttempt::new(account.id, &instance.id, &region, PowerAction::Stop, remaining);

        let event = NotificationEvent::ShutdownRequested {
            account_name: account.name.clone(),
            region: region.clone(),
            servers: vec![InstanceRef {
                id: instance.id.clone(),
                name: instance.name.clone(),
                ip: instance.public_ip.clone(),
            }],
            reason,
        };
        sent += self.notify(ctx, event).await as usize;

        let gateway = ctx.gateway;
        let retry_policy = &ctx.retry;
        let region_ref = region.as_str();
        let ids = vec![instance.id.clone()];
        let ids_ref = ids.as_slice();
        let mode = self.settings.stop_mode;
        let started = Instant::now();

        let job_id = match retry::execute(retry_policy, move || {
            gateway.send_power_action(region_ref, PowerAction::Stop, mode, ids_ref)
        })
        .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                attempt.fail(format!("Stop request failed: {}", e));
                sent += self.notify_failure(ctx, &attempt).await as usize;
                self.audit.record_attempt(attempt.clone()).await;
                return (InstanceOutcome::Remediated(attempt), sent);
            }
        };
        attempt.job_id = Some(job_id.clone());

        // Await
        let job_ref = job_id.as_str();
        let waited = self
            .settings
            .poller
            .wait_for_completion(job_ref, move || {
                retry::execute(retry_policy, move || gateway.get_job_status(job_ref, region_ref))
            })
            .await;

        match waited {
            Ok(status) if status.status == JobState::Success => {
                attempt.succeed();
                let event = NotificationEvent::ShutdownSucceeded {
                    account_name: account.name.clone(),
                    server_count: 1,
                    job_id: job_id.clone(),
                    duration_seconds: started.elapsed().as_secs_f64(),
                };
                sent += self.notify(ctx, event).await as usize;
            }
            Ok(status) => {
                let reason = status
                    .fail_reason
                    .or(status.error_code)
                    .unwrap_or_else(|| "remote job failed".to_string());
                attempt.fail(reason);
                sent += self.notify_failure(ctx, &attempt).await as usize;
            }
            Err(PollError::Timeout { elapsed, .. }) => {
                // Still in progress; the next cycle observes the real state
                info!(
                    account_id = account.id,
                    instance_id = %instance.id,
                    job_id = %job_id,
                    ?elapsed,
                    "Shutdown still pending after poll timeout"
                );
            }
            Err(PollError::Cloud(e)) => {
                attempt.fail(format!("Job status unavailable: {}", e));
                sent += self.notify_failure(ctx, &attempt).await as usize;
            }
        }

        self.audit.record_attempt(attempt.clone()).await;
        (InstanceOutcome::Remediated(attempt), sent)
    }

    async fn notify(&self, ctx: &CycleContext<'_>, event: NotificationEvent) -> bool {
        self.notifications
            .dispatch(ctx.account, ctx.policy.notification_enabled, event)
            .await
    }

    async fn notify_failure(&self, ctx: &CycleContext<'_>, attempt: &RemediationAttempt) -> bool {
        let event = NotificationEvent::ShutdownFailed {
            account_name: ctx.account.name.clone(),
            server_count: 1,
            job_id: attempt.job_id.clone(),
            error_message: attempt.error.clone().unwrap_or_default(),
        };
        self.notify(ctx, event).await
    }

    async fn record_failed_measurement(&self, account_id: i64, policy: &ThresholdPolicy, error: String) {
        self.audit
            .record_measurement(MeasurementRecord::failed(account_id, None, policy.traffic_threshold, error))
            .await;
    }
}

fn region_of<'a>(instance: &'a ManagedInstance, account: &'a Account) -> &'a str {
    if instance.region.is_empty() {
        &account.region
    } else {
        &instance.region
    }
}
