// Power-action sender - batch start/stop/reboot on compute instances

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::client::SignedClient;
use crate::error::CloudError;
use trafficguard_shared::{PowerAction, PowerMode};

pub const MAX_SERVERS_PER_ACTION: usize = 1000;

#[derive(Debug, Deserialize)]
struct ActionResponse {
    job_id: String,
}

/// Request body for one batch action. Start ignores the mode.
pub fn action_body(action: PowerAction, mode: PowerMode, instance_ids: &[String]) -> Result<Value, CloudError> {
    if instance_ids.is_empty() {
        return Err(CloudError::InvalidRequest("At least one instance id is required".to_string()));
    }
    if instance_ids.len() > MAX_SERVERS_PER_ACTION {
        return Err(CloudError::InvalidRequest(format!(
            "At most {} instances per action, got {}",
            MAX_SERVERS_PER_ACTION,
            instance_ids.len()
        )));
    }

    let servers: Vec<Value> = instance_ids.iter().map(|id| json!({ "id": id })).collect();
    Ok(match action {
        PowerAction::Start => json!({ "os-start": { "servers": servers } }),
        PowerAction::Stop => json!({ "os-stop": { "type": mode.as_str(), "servers": servers } }),
        PowerAction::Reboot => json!({ "reboot": { "type": mode.as_str(), "servers": servers } }),
    })
}

pub struct PowerClient {
    client: SignedClient,
    project_id: String,
}

impl PowerClient {
    pub fn new(client: SignedClient, project_id: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
        }
    }

    /// Issue the action and return the remote job id to poll.
    pub async fn send(
        &self,
        action: PowerAction,
        mode: PowerMode,
        instance_ids: &[String],
    ) -> Result<String, CloudError> {
        let body = action_body(action, mode, instance_ids)?;
        let path = format!("/v1/{}/cloudservers/action", self.project_id);

        let response: ActionResponse = self.client.post(&path, &body).await?;
        info!(
            action = action.as_str(),
            count = instance_ids.len(),
            job_id = %response.job_id,
            "Power action accepted"
        );
        Ok(response.job_id)
    }
}
