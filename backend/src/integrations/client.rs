// Signed HTTP client - every provider call goes through here

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::signer::{canonical_query, SignRequest, Signer};
use crate::error::CloudError;

pub fn build_http_client(timeout: Duration) -> Result<Client, CloudError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CloudError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))
}

/// One provider endpoint bound to one account's credentials.
#[derive(Debug, Clone)]
pub struct SignedClient {
    http: Client,
    signer: Signer,
    base_url: String,
    host: String,
}

impl SignedClient {
    pub fn new(http: Client, endpoint: &str, signer: Signer) -> Result<Self, CloudError> {
        let host = signing_host(endpoint)?;
        Ok(Self {
            http,
            signer,
            base_url: endpoint.trim_end_matches('/').to_string(),
            host,
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, CloudError> {
        self.send(Method::GET, path, query, String::new()).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CloudError> {
        let body = serde_json::to_string(body)
            .map_err(|e| CloudError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.send(Method::POST, path, &[], body).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: String,
    ) -> Result<T, CloudError> {
        let headers = self.signer.sign(
            &SignRequest {
                method: method.as_str(),
                path,
                query,
                body: &body,
                host: &self.host,
            },
            Utc::now(),
        );

        // The sent query string must be byte-identical to the signed one
        let query_string = canonical_query(query);
        let url = if query_string.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query_string)
        };

        debug!(method = %method, url = %url, "Sending signed request");

        let mut request = self
            .http
            .request(method, &url)
            .header("Content-Type", headers.content_type)
            .header("Host", headers.host)
            .header("X-Sdk-Date", headers.x_sdk_date)
            .header("Authorization", headers.authorization);
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = api_error(status.as_u16(), &text);
            warn!(url = %url, status = status.as_u16(), code = err.error_code(), "Provider rejected request");
            return Err(err);
        }

        let payload = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(payload).map_err(CloudError::from)
    }
}

/// `host[:port]` of an endpoint, as used in both the Host header and the signature.
pub fn signing_host(endpoint: &str) -> Result<String, CloudError> {
    let url = Url::parse(endpoint)?;
    let host = url
        .host_str()
        .ok_or_else(|| CloudError::Endpoint(format!("{} has no host", endpoint)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Map a non-2xx body onto a typed error. Both `{"error_code", "error_msg"}`
/// and `{"error": {"code", "message"}}` shapes occur across services.
fn api_error(status: u16, body: &str) -> CloudError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(value) => {
            if let Some(code) = value.get("error_code").and_then(Value::as_str) {
                let message = value
                    .get("error_msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                (code.to_string(), message.to_string())
            } else if let Some(inner) = value.get("error") {
                let code = inner.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN");
                let message = inner.get("message").and_then(Value::as_str).unwrap_or_default();
                (code.to_string(), message.to_string())
            } else {
                ("UNKNOWN".to_string(), body.to_string())
            }
        }
        None => ("UNKNOWN".to_string(), body.to_string()),
    };
    CloudError::api(status, code, message)
}
