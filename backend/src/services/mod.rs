// Service collaborators used by the monitoring workflow

pub mod audit;
pub mod notifier;
pub mod registry;
pub mod retry;

pub use audit::{AuditEntry, AuditTrail, LogSink};
pub use notifier::{NotificationDispatcher, Notifier, NotifyError, WebhookNotifier};
pub use registry::{AccountDirectory, AccountRecord, FileRegistry, PolicySource};
pub use retry::{RetryPolicy, Retryable};
