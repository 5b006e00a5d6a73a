// Async-job poller - tracks remote jobs until a terminal state or the wait ceiling

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::client::SignedClient;
use crate::error::{CloudError, PollError};
use trafficguard_shared::{JobState, RemoteJobStatus};

pub struct JobClient {
    client: SignedClient,
    project_id: String,
}

impl JobClient {
    pub fn new(client: SignedClient, project_id: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
        }
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<RemoteJobStatus, CloudError> {
        let path = format!("/v1/{}/jobs/{}", self.project_id, job_id);
        self.client.get(&path, &[]).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl JobPoller {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self { timeout, poll_interval }
    }

    /// Poll until SUCCESS or FAIL. Stops with [`PollError::Timeout`] once the next
    /// poll would land at or past the ceiling, so 300s / 10s means 30 polls.
    pub async fn wait_for_completion<F, Fut>(
        &self,
        job_id: &str,
        mut fetch: F,
    ) -> Result<RemoteJobStatus, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RemoteJobStatus, CloudError>>,
    {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let status = fetch().await?;
            polls += 1;

            if status.status.is_terminal() {
                if status.status == JobState::Success {
                    info!(job_id, polls, "Remote job succeeded");
                } else {
                    warn!(job_id, polls, reason = ?status.fail_reason, "Remote job failed");
                }
                return Ok(status);
            }
            debug!(job_id, polls, state = ?status.status, "Remote job still in progress");

            let elapsed = started.elapsed();
            if elapsed + self.poll_interval >= self.timeout {
                warn!(job_id, polls, ?elapsed, "Gave up waiting for remote job");
                return Err(PollError::Timeout {
                    job_id: job_id.to_string(),
                    elapsed,
                });
            }

            sleep(self.poll_interval).await;
        }
    }
}
