// Client cache - one gateway per account, shared by every worker

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::debug;

use super::gateway::{CloudGateway, GatewayFactory, ProviderGateway};
use super::{Credentials, Endpoints};
use crate::error::CloudError;

struct CachedGateway {
    credentials: Credentials,
    gateway: Arc<ProviderGateway>,
}

/// Read-mostly map of account id to gateway. A miss takes the write lock and
/// re-checks before building, so concurrent misses build once.
pub struct ClientCache {
    http: Client,
    endpoints: Endpoints,
    gateways: RwLock<HashMap<i64, CachedGateway>>,
}

impl ClientCache {
    pub fn new(http: Client, endpoints: Endpoints) -> Self {
        Self {
            http,
            endpoints,
            gateways: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(
        &self,
        account_id: i64,
        credentials: &Credentials,
    ) -> Arc<ProviderGateway> {
        {
            let gateways = self.gateways.read().await;
            if let Some(cached) = gateways.get(&account_id) {
                if &cached.credentials == credentials {
                    return cached.gateway.clone();
                }
            }
        }

        let mut gateways = self.gateways.write().await;
        if let Some(cached) = gateways.get(&account_id) {
            if &cached.credentials == credentials {
                return cached.gateway.clone();
            }
            debug!(account_id, "Credentials changed, rebuilding gateway");
        }

        let gateway = Arc::new(ProviderGateway::new(
            account_id,
            self.http.clone(),
            credentials,
            self.endpoints.clone(),
        ));
        gateways.insert(
            account_id,
            CachedGateway {
                credentials: credentials.clone(),
                gateway: gateway.clone(),
            },
        );
        gateway
    }

}

#[async_trait]
impl GatewayFactory for ClientCache {
    async fn gateway(
        &self,
        account_id: i64,
        credentials: &Credentials,
    ) -> Result<Arc<dyn CloudGateway>, CloudError> {
        let gateway: Arc<dyn CloudGateway> = self.get_or_create(account_id, credentials).await;
        Ok(gateway)
    }
}
