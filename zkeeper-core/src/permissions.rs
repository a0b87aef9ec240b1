//! Per-origin approval policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Result, ZKeeperError};
use crate::storage::{PersistedStore, NS_PERMISSIONS};
use crate::vault::Vault;

/// Approval policy for one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPermission {
    /// The origin this policy applies to.
    pub host: String,
    /// Accept privileged requests from this origin without prompting.
    pub no_approval: bool,
}

/// Persisted per-origin policy table, encrypted under the vault key.
pub struct PermissionTable {
    store: Arc<dyn PersistedStore>,
    vault: Arc<Vault>,
    permissions: Mutex<BTreeMap<String, HostPermission>>,
}

impl PermissionTable {
    /// Creates an empty table over the injected store and vault.
    pub fn new(store: Arc<dyn PersistedStore>, vault: Arc<Vault>) -> Self {
        Self {
            store,
            vault,
            permissions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Loads the persisted table into memory. Called on unlock.
    ///
    /// # Errors
    /// Fails if the vault is locked or the blob cannot be decrypted.
    pub async fn load(&self) -> Result<()> {
        let Some(blob) = self.store.get(NS_PERMISSIONS).await? else {
            return Ok(());
        };
        let plain = self.vault.decrypt(NS_PERMISSIONS, &blob).await?;
        let table = serde_json::from_slice(&plain)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        *self.permissions.lock().await = table;
        Ok(())
    }

    /// Policy for an origin, if any was set.
    pub async fn get(&self, host: &str) -> Option<HostPermission> {
        self.permissions.lock().await.get(host).cloned()
    }

    /// Upserts the policy for an origin.
    ///
    /// # Errors
    /// Fails if the vault is locked or persistence fails.
    pub async fn set(&self, permission: HostPermission) -> Result<HostPermission> {
        let mut permissions = self.permissions.lock().await;
        let mut next = permissions.clone();
        next.insert(permission.host.clone(), permission.clone());
        self.persist(&next).await?;
        *permissions = next;
        info!(host = %permission.host, no_approval = permission.no_approval, "permission updated");
        Ok(permission)
    }

    /// Removes the policy for an origin, if present.
    ///
    /// # Errors
    /// Fails if the vault is locked or persistence fails.
    pub async fn remove(&self, host: &str) -> Result<()> {
        let mut permissions = self.permissions.lock().await;
        let mut next = permissions.clone();
        if next.remove(host).is_some() {
            self.persist(&next).await?;
            *permissions = next;
        }
        Ok(())
    }

    async fn persist(&self, table: &BTreeMap<String, HostPermission>) -> Result<()> {
        let plain = serde_json::to_vec(table)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        let blob = self.vault.encrypt(NS_PERMISSIONS, &plain).await?;
        self.store.set(NS_PERMISSIONS, blob).await
    }
}
