use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use trafficguard_shared::{AttemptStatus, MeasurementRecord, RemediationAttempt};

/// Entries kept in memory; older ones are dropped first.
pub const AUDIT_CAPACITY: usize = 100;

/// Receives measurement records and remediation attempts from the workflow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn record_measurement(&self, record: MeasurementRecord);

    async fn record_attempt(&self, attempt: RemediationAttempt);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEntry {
    Measurement(MeasurementRecord),
    Remediation(RemediationAttempt),
}

/// Bounded in-memory history, mirrored to the tracing log.
#[derive(Default)]
pub struct AuditTrail {
    entries: RwLock<VecDeque<AuditEntry>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, entry: AuditEntry) {
        let mut entries = self.entries.write().await;
        entries.push_back(entry);
        while entries.len() > AUDIT_CAPACITY {
            entries.pop_front();
        }
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn measurements(&self, account_id: i64) -> Vec<MeasurementRecord> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|entry| match entry {
                AuditEntry::Measurement(record) if record.account_id == account_id => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn attempts(&self, account_id: i64) -> Vec<RemediationAttempt> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|entry| match entry {
                AuditEntry::Remediation(attempt) if attempt.account_id == account_id => Some(attempt.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl LogSink for AuditTrail {
    async fn record_measurement(&self, record: MeasurementRecord) {
        match &record.error_message {
            Some(err) => warn!(
                account_id = record.account_id,
                instance_id = ?record.instance_id,
                threshold = record.threshold,
                "Measurement failed: {}",
                err
            ),
            None => info!(
                account_id = record.account_id,
                instance_id = ?record.instance_id,
                remaining = record.remaining_traffic,
                threshold = record.threshold,
                below = record.is_below_threshold,
                "{}",
                record.message
            ),
        }
        self.push(AuditEntry::Measurement(record)).await;
    }

    async fn record_attempt(&self, attempt: RemediationAttempt) {
        match attempt.status {
            AttemptStatus::Failed => error!(
                account_id = attempt.account_id,
                instance_id = %attempt.instance_id,
                job_id = ?attempt.job_id,
                "Remediation failed: {}",
                attempt.error.as_deref().unwrap_or("unknown error")
            ),
            _ => info!(
                account_id = attempt.account_id,
                instance_id = %attempt.instance_id,
                job_id = ?attempt.job_id,
                status = ?attempt.status,
                "Remediation recorded"
            ),
        }
        self.push(AuditEntry::Remediation(attempt)).await;
    }
}
