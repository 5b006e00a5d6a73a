// Traffic usage reader - free-resource (traffic package) balances from billing

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::client::SignedClient;
use crate::error::CloudError;
use trafficguard_shared::TrafficPackage;

const USAGE_PATH: &str = "/v2/payments/free-resources/usages/details/query";
/// Billing accepts at most this many ids per query
pub const MAX_IDS_PER_QUERY: usize = 100;

#[derive(Debug, Serialize)]
struct UsageQuery<'a> {
    free_resource_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    free_resources: Vec<RawFreeResource>,
}

#[derive(Debug, Deserialize)]
struct RawFreeResource {
    free_resource_id: String,
    /// Remaining amount
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    original_amount: Value,
    #[serde(default)]
    measure_id: Option<i64>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

pub fn measure_unit(measure_id: Option<i64>) -> &'static str {
    match measure_id {
        Some(11) => "MB",
        Some(12) => "KB",
        Some(17) => "Byte",
        _ => "GB",
    }
}

/// Parse a billing amount. Billing sends numbers or numeric strings; anything
/// else is a decode error so a garbled balance never reads as zero.
fn parse_amount(resource_id: &str, field: &str, value: &Value) -> Result<f64, CloudError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|amount| amount.is_finite()).ok_or_else(|| {
        CloudError::Decode(format!(
            "Invalid {} for traffic package {}: {}",
            field, resource_id, value
        ))
    })
}

impl TryFrom<RawFreeResource> for TrafficPackage {
    type Error = CloudError;

    fn try_from(raw: RawFreeResource) -> Result<Self, Self::Error> {
        let remaining = parse_amount(&raw.free_resource_id, "amount", &raw.amount)?;
        // Total only feeds the usage percentage; absent means unknown
        let total = match raw.original_amount {
            Value::Null => 0.0,
            ref value => parse_amount(&raw.free_resource_id, "original_amount", value)?,
        };
        Ok(TrafficPackage {
            resource_id: raw.free_resource_id,
            remaining_amount: remaining,
            total_amount: total,
            used_amount: if total > 0.0 { total - remaining } else { 0.0 },
            measure_unit: measure_unit(raw.measure_id).to_string(),
            start_time: raw.start_time,
            end_time: raw.end_time,
        })
    }
}

pub struct TrafficClient {
    client: SignedClient,
}

impl TrafficClient {
    pub fn new(client: SignedClient) -> Self {
        Self { client }
    }

    /// Usage for every package id, queried in chunks of [`MAX_IDS_PER_QUERY`].
    pub async fn query_usage(&self, package_ids: &[String]) -> Result<Vec<TrafficPackage>, CloudError> {
        let mut packages = Vec::with_capacity(package_ids.len());

        for chunk in package_ids.chunks(MAX_IDS_PER_QUERY) {
            let response: UsageResponse = self
                .client
                .post(USAGE_PATH, &UsageQuery { free_resource_ids: chunk })
                .await?;
            for raw in response.free_resources {
                packages.push(TrafficPackage::try_from(raw)?);
            }
        }

        debug!(requested = package_ids.len(), returned = packages.len(), "Queried traffic usage");
        Ok(packages)
    }
}
