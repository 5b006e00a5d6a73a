// Request signer - SDK-HMAC-SHA256 authentication headers for provider calls

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const SIGNED_HEADERS: &str = "content-type;host;x-sdk-date";
pub const CONTENT_TYPE: &str = "application/json";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

type HmacSha256 = Hmac<Sha256>;

/// The parts of an outbound request that take part in the signature.
#[derive(Debug, Clone)]
pub struct SignRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub body: &'a str,
    /// `host[:port]` exactly as sent in the Host header
    pub host: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub content_type: &'static str,
    pub host: String,
    pub x_sdk_date: String,
    pub authorization: String,
}

/// AK/SK pair bound to one account.
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

impl Signer {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn sign(&self, request: &SignRequest<'_>, now: DateTime<Utc>) -> SignedHeaders {
        let timestamp = format_timestamp(now);
        let canonical = canonical_request(request, &timestamp);
        let to_sign = string_to_sign(&timestamp, &canonical);
        let signature = self.signature(&to_sign);

        SignedHeaders {
            content_type: CONTENT_TYPE,
            host: request.host.to_string(),
            authorization: format!(
                "{} Access={}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.access_key, SIGNED_HEADERS, signature
            ),
            x_sdk_date: timestamp,
        }
    }

    fn signature(&self, string_to_sign: &str) -> String {
        // HMAC accepts keys of any length
        let mut mac = match HmacSha256::new_from_slice(self.secret_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
        };
        mac.update(string_to_sign.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Percent-encode every path segment on its own and force a trailing slash.
pub fn canonical_uri(path: &str) -> String {
    let mut uri = path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

/// Sorted, encoded `k=v` pairs joined with `&`. Also used verbatim as the sent query string.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn canonical_request(request: &SignRequest<'_>, timestamp: &str) -> String {
    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-sdk-date:{}\n",
        CONTENT_TYPE, request.host, timestamp
    );

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_ascii_uppercase(),
        canonical_uri(request.path),
        canonical_query(request.query),
        canonical_headers,
        SIGNED_HEADERS,
        sha256_hex(request.body.as_bytes()),
    )
}

pub fn string_to_sign(timestamp: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        sha256_hex(canonical_request.as_bytes())
    )
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
