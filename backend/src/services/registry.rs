// Account registry - accounts, credentials and policies from a watched JSON file

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::integrations::Credentials;
use trafficguard_shared::{Account, ThresholdPolicy};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything the workflow needs to know about one account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub account: Account,
    pub credentials: Credentials,
    /// Account-specific policy, if any
    pub policy: Option<ThresholdPolicy>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, account_id: i64) -> Option<AccountRecord>;

    async fn list_accounts(&self) -> Vec<AccountRecord>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Account policy, else the global policy, else none.
    async fn effective_policy(&self, account_id: i64) -> Option<ThresholdPolicy>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub global_policy: Option<ThresholdPolicy>,
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    #[serde(flatten)]
    pub account: Account,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub policy: Option<ThresholdPolicy>,
}

impl From<AccountEntry> for AccountRecord {
    fn from(entry: AccountEntry) -> Self {
        AccountRecord {
            credentials: Credentials {
                access_key: entry.access_key,
                secret_key: entry.secret_key,
                is_international: entry.account.is_international,
            },
            account: entry.account,
            policy: entry.policy,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    modified: Option<SystemTime>,
    global_policy: Option<ThresholdPolicy>,
    accounts: BTreeMap<i64, AccountRecord>,
}

/// File-backed registry. The file is re-read whenever its modification time
/// changes; a file that fails to parse leaves the last good state in place.
pub struct FileRegistry {
    path: PathBuf,
    state: RwLock<RegistryState>,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Load the file once, failing loudly. Used at startup.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let registry = Self::new(path);
        registry.reload().await?;
        Ok(registry)
    }

    async fn reload(&self) -> Result<(), RegistryError> {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })?;

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })?;
        let file: RegistryFile = serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let accounts: BTreeMap<i64, AccountRecord> = file
            .accounts
            .into_iter()
            .map(|entry| (entry.account.id, AccountRecord::from(entry)))
            .collect();

        let mut state = self.state.write().await;
        state.modified = Some(modified);
        state.global_policy = file.global_policy;
        state.accounts = accounts;
        info!(path = %self.path.display(), accounts = state.accounts.len(), "Registry loaded");
        Ok(())
    }

    /// Re-read the file if it changed since the last load.
    pub async fn refresh(&self) {
        let modified = match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(path = %self.path.display(), "Registry file unavailable, keeping last state: {}", e);
                return;
            }
        };

        if self.state.read().await.modified == Some(modified) {
            return;
        }

        if let Err(e) = self.reload().await {
            warn!("Keeping last good registry: {}", e);
            // Remember the bad version so it is not re-parsed every tick
            self.state.write().await.modified = Some(modified);
        }
    }
}

#[async_trait]
impl AccountDirectory for FileRegistry {
    async fn get_account(&self, account_id: i64) -> Option<AccountRecord> {
        self.refresh().await;
        self.state.read().await.accounts.get(&account_id).cloned()
    }

    async fn list_accounts(&self) -> Vec<AccountRecord> {
        self.refresh().await;
        self.state.read().await.accounts.values().cloned().collect()
    }
}

#[async_trait]
impl PolicySource for FileRegistry {
    async fn effective_policy(&self, account_id: i64) -> Option<ThresholdPolicy> {
        self.refresh().await;
        let state = self.state.read().await;
        state
            .accounts
            .get(&account_id)
            .and_then(|record| record.policy.clone())
            .or_else(|| state.global_policy.clone())
    }
}
