// Instance lister - lightweight instances from the resource-management listing

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::SignedClient;
use crate::error::CloudError;
use trafficguard_shared::ManagedInstance;

const TRAFFIC_PACKAGE_TYPE: &str = "huaweicloudinternal_cbc_freeresource";
const EIP_TYPE: &str = "huaweicloudinternal_eip";
const PAGE_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    #[serde(default)]
    resources: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    region_id: String,
    /// Object or JSON-encoded string depending on the API version
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    resources: Vec<SubResource>,
}

#[derive(Debug, Deserialize)]
struct SubResource {
    #[serde(default)]
    logical_resource_type: String,
    #[serde(default)]
    physical_resource_id: String,
    #[serde(default)]
    resource_attributes: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
struct Attribute {
    key: String,
    #[serde(default)]
    value: Value,
}

impl SubResource {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.resource_attributes
            .iter()
            .find(|attr| attr.key == key)
            .map(|attr| &attr.value)
    }
}

pub struct InstanceClient {
    client: SignedClient,
}

impl InstanceClient {
    pub fn new(client: SignedClient) -> Self {
        Self { client }
    }

    pub async fn list_instances(&self, domain_id: &str) -> Result<Vec<ManagedInstance>, CloudError> {
        let path = format!("/v1/resource-manager/domains/{}/all-resources", domain_id);
        let query = vec![
            ("provider".to_string(), "hcss".to_string()),
            ("type".to_string(), "hcss.l-instance".to_string()),
            ("limit".to_string(), PAGE_LIMIT.to_string()),
        ];

        let response: ResourcesResponse = self.client.get(&path, &query).await?;
        let instances: Vec<ManagedInstance> = response.resources.into_iter().map(parse_resource).collect();

        debug!(domain_id, count = instances.len(), "Listed instances");
        Ok(instances)
    }
}

fn parse_properties(value: Value) -> Properties {
    let value = match value {
        Value::String(raw) => match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Unparseable resource properties: {}", e);
                return Properties::default();
            }
        },
        other => other,
    };
    serde_json::from_value(value).unwrap_or_default()
}

fn parse_resource(resource: RawResource) -> ManagedInstance {
    let properties = parse_properties(resource.properties);

    let mut traffic_package_id = None;
    let mut public_ip = None;
    let mut private_ip = None;

    for sub in &properties.resources {
        if sub.logical_resource_type == TRAFFIC_PACKAGE_TYPE {
            if !sub.physical_resource_id.is_empty() {
                traffic_package_id = Some(sub.physical_resource_id.clone());
            }
        } else if sub.logical_resource_type == EIP_TYPE {
            public_ip = sub
                .attribute("public_ip_address")
                .and_then(Value::as_str)
                .map(str::to_string);
        } else if sub.logical_resource_type.contains("ecs_instance") {
            private_ip = sub.attribute("nics").and_then(first_nic_address);
        }
    }

    ManagedInstance {
        id: resource.id,
        name: resource.name,
        region: resource.region_id,
        status: properties.status.unwrap_or_else(|| "unknown".to_string()),
        public_ip,
        private_ip,
        traffic_package_id,
    }
}

/// `nics` is a JSON-encoded list; the first entry's `ip_address` is the private IP.
fn first_nic_address(value: &Value) -> Option<String> {
    let nics: Value = match value {
        Value::String(raw) => serde_json::from_str(raw).ok()?,
        other => other.clone(),
    };
    nics.as_array()?
        .first()?
        .get("ip_address")?
        .as_str()
        .map(str::to_string)
}
