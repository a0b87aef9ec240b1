//! Append-only encrypted log of identity-affecting operations.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, ZKeeperError};
use crate::identity::{IdentitySnapshot, IdentityStrategy};
use crate::keeper::FeatureFlags;
use crate::storage::{PersistedStore, NS_HISTORY};
use crate::vault::Vault;

/// Kind of identity-affecting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// An identity was created.
    CreateIdentity,
    /// An identity was renamed.
    RenameIdentity,
    /// An identity was deleted.
    DeleteIdentity,
    /// All identities were deleted.
    DeleteAllIdentities,
    /// The active identity changed.
    SetActiveIdentity,
    /// A proof was generated for an identity.
    GenerateProof,
}

/// One immutable history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// What happened.
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Commitment + metadata of the affected identity at the time.
    pub identity: IdentitySnapshot,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

/// Filter for [`HistoryLog::list`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OperationFilter {
    /// Restrict to a single operation type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub op_type: Option<OperationType>,
}

/// Append-only operation log, persisted as one encrypted blob.
///
/// The whole sequence is re-persisted after each append; write volume is a
/// handful of entries per user action, so incremental persistence is not
/// worth the complexity.
pub struct HistoryLog {
    store: Arc<dyn PersistedStore>,
    vault: Arc<Vault>,
    features: FeatureFlags,
    operations: Mutex<Vec<Operation>>,
}

impl HistoryLog {
    /// Creates an empty log over the injected store and vault.
    pub fn new(store: Arc<dyn PersistedStore>, vault: Arc<Vault>, features: FeatureFlags) -> Self {
        Self {
            store,
            vault,
            features,
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Loads the persisted sequence into memory. Called on unlock.
    ///
    /// # Errors
    /// Fails if the vault is locked or the blob cannot be decrypted.
    pub async fn load(&self) -> Result<()> {
        let Some(blob) = self.store.get(NS_HISTORY).await? else {
            return Ok(());
        };
        let plain = self.vault.decrypt(NS_HISTORY, &blob).await?;
        let operations: Vec<Operation> = serde_json::from_slice(&plain)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        debug!(count = operations.len(), "history loaded");
        *self.operations.lock().await = operations;
        Ok(())
    }

    /// Appends an operation and re-persists the encrypted sequence.
    ///
    /// # Errors
    /// Fails if the vault is locked or persistence fails.
    pub async fn append(&self, op_type: OperationType, identity: IdentitySnapshot) -> Result<()> {
        let mut operations = self.operations.lock().await;
        // Persist first so a failed write leaves memory untouched.
        let mut next = operations.clone();
        next.push(Operation {
            op_type,
            identity,
            created_at: unix_now(),
        });
        let plain = serde_json::to_vec(&next)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        let blob = self.vault.encrypt(NS_HISTORY, &plain).await?;
        self.store.set(NS_HISTORY, blob).await?;
        *operations = next;
        Ok(())
    }

    /// Returns operations matching the filter.
    ///
    /// When random identities are feature-disabled, operations on random
    /// identities are excluded here at read time; the stored sequence is
    /// untouched, so re-enabling the feature restores them.
    pub async fn list(&self, filter: OperationFilter) -> Vec<Operation> {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|op| filter.op_type.map_or(true, |wanted| op.op_type == wanted))
            .filter(|op| {
                self.features.random_identities
                    || op.identity.metadata.strategy != IdentityStrategy::Random
            })
            .cloned()
            .collect()
    }

    /// Wipes the persisted blob and the in-memory sequence.
    ///
    /// # Errors
    /// Fails if the store cannot clear the namespace.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear(NS_HISTORY).await?;
        self.operations.lock().await.clear();
        Ok(())
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
