use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use crate::error::CloudError;
use crate::integrations::{CloudGateway, Credentials, GatewayFactory, JobPoller};
use crate::services::{
    AccountDirectory, AccountRecord, AuditTrail, NotificationDispatcher, Notifier, NotifyError, PolicySource,
    RetryPolicy,
};
use crate::workflows::{WorkflowExecutor, WorkflowSettings};
use trafficguard_shared::{
    Account, JobState, ManagedInstance, NotificationEvent, NotificationKind, PowerAction, PowerMode,
    RemoteJobStatus, ThresholdPolicy, TrafficPackage,
};

use super::fixtures;

/// Pops scripted values in order; the last one repeats forever.
fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopCall {
    pub region: String,
    pub action: PowerAction,
    pub mode: PowerMode,
    pub instance_ids: Vec<String>,
}

/// Scripted provider: fixed instances, scripted usage readings and job states.
#[derive(Default)]
pub struct FakeGateway {
    instances: Vec<ManagedInstance>,
    usage: Mutex<VecDeque<Vec<TrafficPackage>>>,
    job_states: Mutex<VecDeque<(JobState, Option<String>)>>,
    /// Transport failures returned before listing succeeds
    list_failures: AtomicUsize,
    /// Transport failures returned before the stop request is accepted
    stop_failures: AtomicUsize,
    /// Usage calls from this one (1-based) on return the error
    usage_failure: Option<(usize, CloudError)>,
    rejected: HashSet<String>,
    pub list_calls: AtomicUsize,
    pub usage_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub stop_calls: Mutex<Vec<StopCall>>,
}

impl FakeGateway {
    pub fn new(instances: Vec<ManagedInstance>) -> Self {
        Self {
            instances,
            ..Self::default()
        }
    }

    /// Each call to `query_usage` consumes the next reading.
    pub fn with_usage(self, readings: Vec<Vec<TrafficPackage>>) -> Self {
        *self.usage.lock().unwrap() = readings.into();
        self
    }

    pub fn with_job_states(self, states: Vec<(JobState, Option<&str>)>) -> Self {
        *self.job_states.lock().unwrap() = states
            .into_iter()
            .map(|(state, reason)| (state, reason.map(str::to_string)))
            .collect();
        self
    }

    pub fn with_list_failures(self, count: usize) -> Self {
        self.list_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_usage_failing_from(mut self, call: usize, error: CloudError) -> Self {
        self.usage_failure = Some((call, error));
        self
    }

    pub fn with_stop_failures(self, count: usize) -> Self {
        self.stop_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Stop requests for this instance get a non-retryable API error.
    pub fn rejecting(mut self, instance_id: &str) -> Self {
        self.rejected.insert(instance_id.to_string());
        self
    }

    pub fn stops(&self) -> Vec<StopCall> {
        self.stop_calls.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CloudGateway for FakeGateway {
    async fn list_instances(&self) -> Result<Vec<ManagedInstance>, CloudError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.list_failures) {
            return Err(CloudError::Transport("connection reset by peer".to_string()));
        }
        Ok(self.instances.clone())
    }

    async fn query_usage(&self, package_ids: &[String]) -> Result<Vec<TrafficPackage>, CloudError> {
        let call = self.usage_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((from, error)) = &self.usage_failure {
            if call >= *from {
                return Err(error.clone());
            }
        }
        let reading = next_scripted(&self.usage).unwrap_or_default();
        Ok(reading
            .into_iter()
            .filter(|p| package_ids.contains(&p.resource_id))
            .collect())
    }

    async fn send_power_action(
        &self,
        region: &str,
        action: PowerAction,
        mode: PowerMode,
        instance_ids: &[String],
    ) -> Result<String, CloudError> {
        let mut calls = self.stop_calls.lock().unwrap();
        calls.push(StopCall {
            region: region.to_string(),
            action,
            mode,
            instance_ids: instance_ids.to_vec(),
        });

        if instance_ids.iter().any(|id| self.rejected.contains(id)) {
            return Err(CloudError::api(400, "Ecs.0114", "instance is locked"));
        }
        if Self::take_failure(&self.stop_failures) {
            return Err(CloudError::Transport("operation timed out".to_string()));
        }
        Ok(format!("job-{}", calls.len()))
    }

    async fn get_job_status(&self, job_id: &str, _region: &str) -> Result<RemoteJobStatus, CloudError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let (state, reason) = next_scripted(&self.job_states).unwrap_or((JobState::Success, None));
        Ok(fixtures::job_status(job_id, state, reason.as_deref()))
    }
}

/// Hands the same fake gateway to every account.
pub struct FakeFactory {
    gateway: Arc<FakeGateway>,
}

impl FakeFactory {
    pub fn new(gateway: Arc<FakeGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl GatewayFactory for FakeFactory {
    async fn gateway(&self, _account_id: i64, _credentials: &Credentials) -> Result<Arc<dyn CloudGateway>, CloudError> {
        Ok(self.gateway.clone())
    }
}

/// Keeps every event it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records events but reports every delivery as failed.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind() == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, _account: &Account, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        if self.failing {
            return Err(NotifyError::WebhookFailed("code=9499, msg=Bad Request".to_string()));
        }
        Ok(())
    }
}

/// In-memory registry; account policy first, then the global one.
#[derive(Default)]
pub struct StaticRegistry {
    records: RwLock<Vec<AccountRecord>>,
    global: Option<ThresholdPolicy>,
}

impl StaticRegistry {
    pub fn new(records: Vec<AccountRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            global: None,
        }
    }

    pub fn with_global(mut self, policy: ThresholdPolicy) -> Self {
        self.global = Some(policy);
        self
    }

    pub fn replace(&self, records: Vec<AccountRecord>) {
        *self.records.write().unwrap() = records;
    }
}

#[async_trait]
impl AccountDirectory for StaticRegistry {
    async fn get_account(&self, account_id: i64) -> Option<AccountRecord> {
        self.records
            .read()
            .unwrap()
            .iter()
            .find(|r| r.account.id == account_id)
            .cloned()
    }

    async fn list_accounts(&self) -> Vec<AccountRecord> {
        self.records.read().unwrap().clone()
    }
}

#[async_trait]
impl PolicySource for StaticRegistry {
    async fn effective_policy(&self, account_id: i64) -> Option<ThresholdPolicy> {
        let records = self.records.read().unwrap();
        let record = records.iter().find(|r| r.account.id == account_id)?;
        record.policy.clone().or_else(|| self.global.clone())
    }
}

/// A wired executor plus handles on every collaborator.
pub struct Harness {
    pub executor: WorkflowExecutor,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<AuditTrail>,
}

pub fn harness(registry: StaticRegistry, gateway: FakeGateway) -> Harness {
    harness_with(registry, gateway, RecordingNotifier::new())
}

pub fn harness_with(registry: StaticRegistry, gateway: FakeGateway, notifier: RecordingNotifier) -> Harness {
    super::init_tracing();

    let registry = Arc::new(registry);
    let gateway = Arc::new(gateway);
    let notifier = Arc::new(notifier);
    let audit = Arc::new(AuditTrail::new());

    let executor = WorkflowExecutor::new(
        registry.clone(),
        registry,
        Arc::new(FakeFactory::new(gateway.clone())),
        NotificationDispatcher::new(notifier.clone()),
        audit.clone(),
        WorkflowSettings {
            retry: RetryPolicy::default(),
            poller: JobPoller::default(),
            warning_percentage: 70.0,
            stop_mode: PowerMode::Soft,
        },
    );

    Harness {
        executor,
        gateway,
        notifier,
        audit,
    }
}
