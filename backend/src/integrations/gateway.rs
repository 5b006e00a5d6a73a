// Cloud gateway - the provider operations a monitoring cycle depends on

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::info;

use super::client::SignedClient;
use super::instances::InstanceClient;
use super::jobs::JobClient;
use super::power::PowerClient;
use super::projects::{ProjectClient, ProjectDirectory};
use super::traffic::TrafficClient;
use super::{Credentials, Endpoints, Signer};
use crate::error::CloudError;
use trafficguard_shared::{ManagedInstance, PowerAction, PowerMode, RemoteJobStatus, TrafficPackage};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudGateway: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<ManagedInstance>, CloudError>;

    async fn query_usage(&self, package_ids: &[String]) -> Result<Vec<TrafficPackage>, CloudError>;

    /// Returns the remote job id
    async fn send_power_action(
        &self,
        region: &str,
        action: PowerAction,
        mode: PowerMode,
        instance_ids: &[String],
    ) -> Result<String, CloudError>;

    async fn get_job_status(&self, job_id: &str, region: &str) -> Result<RemoteJobStatus, CloudError>;
}

/// Hands out the gateway for an account.
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn gateway(
        &self,
        account_id: i64,
        credentials: &Credentials,
    ) -> Result<Arc<dyn CloudGateway>, CloudError>;
}

/// Gateway over the signed provider clients for one account.
pub struct ProviderGateway {
    account_id: i64,
    http: Client,
    signer: Signer,
    endpoints: Endpoints,
    is_international: bool,
    directory: OnceCell<ProjectDirectory>,
}

impl ProviderGateway {
    pub fn new(account_id: i64, http: Client, credentials: &Credentials, endpoints: Endpoints) -> Self {
        Self {
            account_id,
            http,
            signer: credentials.signer(),
            endpoints,
            is_international: credentials.is_international,
            directory: OnceCell::new(),
        }
    }

    fn client(&self, endpoint: &str) -> Result<SignedClient, CloudError> {
        SignedClient::new(self.http.clone(), endpoint, self.signer.clone())
    }

    /// Domain and project ids are resolved once and reused for the gateway's lifetime.
    async fn directory(&self) -> Result<&ProjectDirectory, CloudError> {
        self.directory
            .get_or_try_init(|| async {
                let directory = ProjectClient::new(self.client(&self.endpoints.iam)?).resolve().await?;
                info!(
                    account_id = self.account_id,
                    domain_id = %directory.domain_id,
                    regions = directory.projects.len(),
                    "Resolved project directory"
                );
                Ok::<_, CloudError>(directory)
            })
            .await
    }

    async fn project_id(&self, region: &str) -> Result<String, CloudError> {
        Ok(self.directory().await?.project_id(region)?.to_string())
    }
}

#[async_trait]
impl CloudGateway for ProviderGateway {
    async fn list_instances(&self) -> Result<Vec<ManagedInstance>, CloudError> {
        let domain_id = self.directory().await?.domain_id.clone();
        InstanceClient::new(self.client(&self.endpoints.rms)?)
            .list_instances(&domain_id)
            .await
    }

    async fn query_usage(&self, package_ids: &[String]) -> Result<Vec<TrafficPackage>, CloudError> {
        if package_ids.is_empty() {
            return Ok(Vec::new());
        }
        TrafficClient::new(self.client(self.endpoints.billing(self.is_international))?)
            .query_usage(package_ids)
            .await
    }

    async fn send_power_action(
        &self,
        region: &str,
        action: PowerAction,
        mode: PowerMode,
        instance_ids: &[String],
    ) -> Result<String, CloudError> {
        let project_id = self.project_id(region).await?;
        PowerClient::new(self.client(&self.endpoints.compute(region))?, project_id)
            .send(action, mode, instance_ids)
            .await
    }

    async fn get_job_status(&self, job_id: &str, region: &str) -> Result<RemoteJobStatus, CloudError> {
        let project_id = self.project_id(region).await?;
        JobClient::new(self.client(&self.endpoints.compute(region))?, project_id)
            .get_job_status(job_id)
            .await
    }
}
