// Workflow Conditions - threshold and warning rules evaluated each cycle

use serde::{Deserialize, Serialize};

use trafficguard_shared::{ManagedInstance, ThresholdPolicy, TrafficSnapshot};

/// Strictly below: a balance equal to the threshold is not below it.
pub fn is_below(remaining: f64, threshold: f64) -> bool {
    remaining < threshold
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub is_below: bool,
    pub message: String,
}

pub fn check_threshold(remaining: f64, threshold: f64) -> ThresholdCheck {
    if is_below(remaining, threshold) {
        let percentage = if threshold > 0.0 { remaining / threshold * 100.0 } else { 0.0 };
        ThresholdCheck {
            is_below: true,
            message: format!(
                "Traffic below threshold ({:.2}GB < {:.2}GB, {:.1}% of threshold left)",
                remaining, threshold, percentage
            ),
        }
    } else {
        ThresholdCheck {
            is_below: false,
            message: format!("Traffic normal ({:.2}GB >= {:.2}GB)", remaining, threshold),
        }
    }
}

/// Why an instance is or is not remediated this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownDecision {
    Proceed,
    NotBelow,
    AutoShutdownDisabled,
    AlreadyStopped,
}

pub fn shutdown_decision(check: &ThresholdCheck, policy: &ThresholdPolicy, instance: &ManagedInstance) -> ShutdownDecision {
    if !check.is_below {
        ShutdownDecision::NotBelow
    } else if !policy.auto_shutdown_enabled {
        ShutdownDecision::AutoShutdownDisabled
    } else if instance.is_stopped() {
        ShutdownDecision::AlreadyStopped
    } else {
        ShutdownDecision::Proceed
    }
}

/// Sums across every measured package of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateUsage {
    pub total: f64,
    pub used: f64,
    pub remaining: f64,
}

impl AggregateUsage {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a TrafficSnapshot>) -> Self {
        snapshots.into_iter().fold(Self::default(), |acc, s| Self {
            total: acc.total + s.total_amount,
            used: acc.used + s.used_amount,
            remaining: acc.remaining + s.remaining_amount,
        })
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.total > 0.0 {
            self.used / self.total * 100.0
        } else {
            0.0
        }
    }

    pub fn should_warn(&self, warning_percentage: f64) -> bool {
        self.total > 0.0 && self.usage_percentage() >= warning_percentage
    }
}
