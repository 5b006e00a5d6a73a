use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Policy applied to one account, read fresh at the start of every monitoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicy {
    pub check_interval_minutes: u32,
    /// Remaining traffic (GB) below which an instance is remediated
    pub traffic_threshold: f64,
    pub auto_shutdown_enabled: bool,
    pub shutdown_delay_minutes: u32,
    pub retry_times: u32,
    pub notification_enabled: bool,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            check_interval_minutes: 5,
            traffic_threshold: 10.0,
            auto_shutdown_enabled: true,
            shutdown_delay_minutes: 0,
            retry_times: 3,
            notification_enabled: true,
        }
    }
}

/// A monitored provider account. Credentials are held by the backend, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    /// Preferred region, used when an instance does not report its own
    pub region: String,
    #[serde(default = "default_true")]
    pub is_international: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A compute instance managed under an account, as reported by the resource listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedInstance {
    pub id: String,
    pub name: String,
    pub region: String,
    pub status: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub traffic_package_id: Option<String>,
}

impl ManagedInstance {
    pub fn is_stopped(&self) -> bool {
        matches!(self.status.to_ascii_uppercase().as_str(), "SHUTOFF" | "STOPPED")
    }
}

/// Usage of one traffic package as returned by the billing API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficPackage {
    pub resource_id: String,
    pub remaining_amount: f64,
    pub total_amount: f64,
    pub used_amount: f64,
    pub measure_unit: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Per-cycle traffic reading for one instance. Never persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub instance_id: String,
    pub remaining_amount: f64,
    pub total_amount: f64,
    pub used_amount: f64,
    pub usage_percentage: f64,
}

impl TrafficSnapshot {
    pub fn new(instance_id: impl Into<String>, remaining: f64, total: f64, used: f64) -> Self {
        let usage_percentage = if total > 0.0 { used / total * 100.0 } else { 0.0 };
        Self {
            instance_id: instance_id.into(),
            remaining_amount: remaining,
            total_amount: total,
            used_amount: used,
            usage_percentage,
        }
    }

    pub fn from_package(instance_id: impl Into<String>, package: &TrafficPackage) -> Self {
        Self::new(
            instance_id,
            package.remaining_amount,
            package.total_amount,
            package.used_amount,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Start,
    Stop,
    Reboot,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Reboot => "reboot",
        }
    }
}

/// Stop/reboot mode. Ignored for start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerMode {
    #[default]
    Soft,
    Hard,
}

impl PowerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMode::Soft => "SOFT",
            PowerMode::Hard => "HARD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

/// One shutdown issued for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAttempt {
    pub id: Uuid,
    pub account_id: i64,
    pub instance_id: String,
    pub region: String,
    pub action: PowerAction,
    pub job_id: Option<String>,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub remaining_at_trigger: f64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RemediationAttempt {
    pub fn new(
        account_id: i64,
        instance_id: impl Into<String>,
        region: impl Into<String>,
        action: PowerAction,
        remaining_at_trigger: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            instance_id: instance_id.into(),
            region: region.into(),
            action,
            job_id: None,
            status: AttemptStatus::Pending,
            error: None,
            remaining_at_trigger,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn succeed(&mut self) {
        self.status = AttemptStatus::Success;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = AttemptStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Remote asynchronous job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Init,
    Running,
    Success,
    Fail,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Fail)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    pub job_id: String,
    #[serde(default)]
    pub job_type: String,
    pub status: JobState,
    #[serde(default)]
    pub begin_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

/// Reference to an instance inside a notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: String,
    pub name: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TrafficWarning,
    ShutdownRequested,
    ShutdownSucceeded,
    ShutdownFailed,
    ShutdownDelayed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TrafficWarning => "traffic_warning",
            NotificationKind::ShutdownRequested => "shutdown_requested",
            NotificationKind::ShutdownSucceeded => "shutdown_succeeded",
            NotificationKind::ShutdownFailed => "shutdown_failed",
            NotificationKind::ShutdownDelayed => "shutdown_delayed",
        }
    }

    /// Name of the renderer template on the notifier side
    pub fn template_name(&self) -> &'static str {
        match self {
            NotificationKind::TrafficWarning => "traffic_warning",
            NotificationKind::ShutdownRequested => "shutdown_notification",
            NotificationKind::ShutdownSucceeded => "shutdown_success",
            NotificationKind::ShutdownFailed => "shutdown_failure",
            NotificationKind::ShutdownDelayed => "shutdown_delay",
        }
    }
}

/// Event emitted by the workflow for the external notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    TrafficWarning {
        account_name: String,
        region: String,
        remaining_traffic_gb: f64,
        threshold_gb: f64,
        usage_percentage: f64,
        server_count: usize,
    },
    ShutdownRequested {
        account_name: String,
        region: String,
        servers: Vec<InstanceRef>,
        reason: String,
    },
    ShutdownSucceeded {
        account_name: String,
        server_count: usize,
        job_id: String,
        duration_seconds: f64,
    },
    ShutdownFailed {
        account_name: String,
        server_count: usize,
        job_id: Option<String>,
        error_message: String,
    },
    ShutdownDelayed {
        account_name: String,
        region: String,
        delay_minutes: u32,
        remaining_traffic_gb: f64,
        threshold_gb: f64,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationEvent::TrafficWarning { .. } => NotificationKind::TrafficWarning,
            NotificationEvent::ShutdownRequested { .. } => NotificationKind::ShutdownRequested,
            NotificationEvent::ShutdownSucceeded { .. } => NotificationKind::ShutdownSucceeded,
            NotificationEvent::ShutdownFailed { .. } => NotificationKind::ShutdownFailed,
            NotificationEvent::ShutdownDelayed { .. } => NotificationKind::ShutdownDelayed,
        }
    }

    /// Variant fields without the `kind` tag
    pub fn fields(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("kind");
        }
        value
    }
}

/// Per-instance (or account-level, when `instance_id` is None) measurement outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub account_id: i64,
    pub instance_id: Option<String>,
    pub remaining_traffic: f64,
    pub total_traffic: Option<f64>,
    pub used_traffic: Option<f64>,
    pub usage_percentage: Option<f64>,
    pub threshold: f64,
    pub is_below_threshold: bool,
    pub message: String,
    pub error_message: Option<String>,
    pub check_time: DateTime<Utc>,
}

impl MeasurementRecord {
    pub fn from_snapshot(
        account_id: i64,
        snapshot: &TrafficSnapshot,
        threshold: f64,
        is_below_threshold: bool,
        message: String,
    ) -> Self {
        Self {
            account_id,
            instance_id: Some(snapshot.instance_id.clone()),
            remaining_traffic: snapshot.remaining_amount,
            total_traffic: Some(snapshot.total_amount),
            used_traffic: Some(snapshot.used_amount),
            usage_percentage: Some(snapshot.usage_percentage),
            threshold,
            is_below_threshold,
            message,
            error_message: None,
            check_time: Utc::now(),
        }
    }

    /// Record for a cycle that failed before (or while) measuring
    pub fn failed(account_id: i64, instance_id: Option<String>, threshold: f64, error: String) -> Self {
        Self {
            account_id,
            instance_id,
            remaining_traffic: 0.0,
            total_traffic: None,
            used_traffic: None,
            usage_percentage: None,
            threshold,
            is_below_threshold: false,
            message: "error".to_string(),
            error_message: Some(error),
            check_time: Utc::now(),
        }
    }
}

/// Snapshot of one scheduled monitoring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringJobInfo {
    pub job_key: String,
    pub account_id: i64,
    pub interval_minutes: u32,
    pub enabled: bool,
    pub running: bool,
    pub next_fire_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}
