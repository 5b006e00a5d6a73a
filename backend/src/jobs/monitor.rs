// Monitor job - the typed payload a scheduled tick hands to the workflow

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::workflows::{CycleResult, WorkflowExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorCommand {
    pub account_id: i64,
}

/// Runs one monitoring cycle. Implemented by the workflow executor.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run(&self, command: MonitorCommand) -> CycleResult;
}

#[async_trait]
impl CycleRunner for WorkflowExecutor {
    async fn run(&self, command: MonitorCommand) -> CycleResult {
        self.run_cycle(command.account_id).await
    }
}
