// Provider integrations - signed clients for identity, resources, billing and compute

pub mod client;
pub mod client_cache;
pub mod gateway;
pub mod instances;
pub mod jobs;
pub mod power;
pub mod projects;
pub mod signer;
pub mod traffic;

pub use client::SignedClient;
pub use client_cache::ClientCache;
pub use gateway::{CloudGateway, GatewayFactory, ProviderGateway};
pub use jobs::JobPoller;
pub use signer::Signer;

use serde::{Deserialize, Serialize};

/// Base URLs of the provider services. `{region}` in `ecs` is substituted per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    pub iam: String,
    pub rms: String,
    pub bss: String,
    pub bss_international: String,
    pub ecs: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            iam: "https://iam.myhuaweicloud.com".to_string(),
            rms: "https://rms.myhuaweicloud.com".to_string(),
            bss: "https://bss.myhuaweicloud.com".to_string(),
            bss_international: "https://bss-intl.myhuaweicloud.com".to_string(),
            ecs: "https://ecs.{region}.myhuaweicloud.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Every service on one base URL. Used to point the clients at a local stand-in.
    pub fn single(base_url: &str) -> Self {
        Self {
            iam: base_url.to_string(),
            rms: base_url.to_string(),
            bss: base_url.to_string(),
            bss_international: base_url.to_string(),
            ecs: base_url.to_string(),
        }
    }

    pub fn billing(&self, is_international: bool) -> &str {
        if is_international {
            &self.bss_international
        } else {
            &self.bss
        }
    }

    pub fn compute(&self, region: &str) -> String {
        self.ecs.replace("{region}", region)
    }
}

/// AK/SK credentials for one account plus the billing site it belongs to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_international")]
    pub is_international: bool,
}

fn default_international() -> bool {
    true
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("is_international", &self.is_international)
            .finish()
    }
}

impl Credentials {
    pub fn signer(&self) -> Signer {
        Signer::new(&self.access_key, &self.secret_key)
    }
}
