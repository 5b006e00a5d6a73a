// Background Jobs
//
// One periodic monitoring job per eligible account, plus a reconcile job that
// keeps the job set in line with the account registry.

pub mod monitor;
pub mod scheduler;

pub use monitor::{CycleRunner, MonitorCommand};
pub use scheduler::{job_key, JobError, JobResult, JobScheduler, SyncStats, TickOutcome};
