// Remediation workflow
//
// Threshold rules plus the executor that runs one monitoring cycle per account.

pub mod conditions;
pub mod executor;

pub use conditions::{check_threshold, is_below, AggregateUsage, ShutdownDecision, ThresholdCheck};
pub use executor::{CycleResult, CycleStatus, WorkflowExecutor, WorkflowSettings};
