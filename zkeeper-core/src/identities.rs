//! CRUD over zero-knowledge identities, persisted through the vault.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, ZKeeperError};
use crate::events::{EventBus, KeeperEvent};
use crate::history::{HistoryLog, OperationType};
use crate::identity::{IdentitySnapshot, IdentityStrategy, ZkIdentity};
use crate::keeper::FeatureFlags;
use crate::primitives::Field;
use crate::storage::{PersistedStore, NS_IDENTITIES};
use crate::vault::Vault;

/// Filter for [`IdentityStore::list`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IdentityFilter {
    /// Restrict to a single strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<IdentityStrategy>,
}

/// Persisted form of the whole identity set.
#[derive(Serialize, Deserialize)]
struct IdentitySetBlob {
    identities: Vec<serde_json::Value>,
    active: Option<Field>,
}

#[derive(Default, Clone)]
struct IdentityState {
    identities: BTreeMap<Field, ZkIdentity>,
    active: Option<Field>,
}

/// In-memory identity set backed by one encrypted blob.
///
/// Every mutation rewrites the blob and appends a history operation. Reads
/// apply the random-identity feature policy at read time, never at storage
/// time, so toggling the feature loses no data.
pub struct IdentityStore {
    store: Arc<dyn PersistedStore>,
    vault: Arc<Vault>,
    history: Arc<HistoryLog>,
    events: EventBus,
    features: FeatureFlags,
    inner: Mutex<IdentityState>,
}

impl IdentityStore {
    /// Creates an empty store over the injected collaborators.
    pub fn new(
        store: Arc<dyn PersistedStore>,
        vault: Arc<Vault>,
        history: Arc<HistoryLog>,
        events: EventBus,
        features: FeatureFlags,
    ) -> Self {
        Self {
            store,
            vault,
            history,
            events,
            features,
            inner: Mutex::new(IdentityState::default()),
        }
    }

    /// Loads the persisted identity set into memory. Called on unlock.
    ///
    /// # Errors
    /// Fails if the vault is locked or the blob cannot be decrypted.
    pub async fn load(&self) -> Result<()> {
        let Some(blob) = self.store.get(NS_IDENTITIES).await? else {
            return Ok(());
        };
        let plain = self.vault.decrypt(NS_IDENTITIES, &blob).await?;
        let set: IdentitySetBlob = serde_json::from_slice(&plain)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;

        let mut identities = BTreeMap::new();
        for value in set.identities {
            let identity = ZkIdentity::from_serialized(value)?;
            identities.insert(identity.commitment(), identity);
        }
        debug!(count = identities.len(), "identities loaded");

        let mut inner = self.inner.lock().await;
        inner.identities = identities;
        inner.active = set.active;
        Ok(())
    }

    /// Drops the in-memory identity set. Called on lock so secrets do not
    /// outlive the vault key.
    pub async fn unload(&self) {
        let mut inner = self.inner.lock().await;
        inner.identities.clear();
        inner.active = None;
    }

    /// Inserts a new identity.
    ///
    /// # Errors
    /// Fails with `DuplicateCommitment` if an identity with the same
    /// commitment exists; the store is unchanged in that case.
    pub async fn create(&self, identity: ZkIdentity) -> Result<IdentitySnapshot> {
        let snapshot = identity.snapshot();
        {
            let mut inner = self.inner.lock().await;
            if inner.identities.contains_key(&snapshot.commitment) {
                return Err(ZKeeperError::DuplicateCommitment);
            }
            // Persist first so a failed write leaves memory untouched.
            let mut next = inner.clone();
            next.identities.insert(snapshot.commitment, identity);
            self.persist(&next).await?;
            *inner = next;
        }
        info!(commitment = %snapshot.commitment, "identity created");
        self.history
            .append(OperationType::CreateIdentity, snapshot.clone())
            .await?;
        self.events.publish(KeeperEvent::IdentityChanged);
        Ok(snapshot)
    }

    /// Marks the identity as active. At most one identity is active.
    ///
    /// # Errors
    /// Fails with `IdentityNotFound` if no identity has that commitment.
    pub async fn set_active(&self, commitment: Field) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let snapshot = inner
                .identities
                .get(&commitment)
                .ok_or(ZKeeperError::IdentityNotFound)?
                .snapshot();
            let mut next = inner.clone();
            next.active = Some(commitment);
            self.persist(&next).await?;
            *inner = next;
            snapshot
        };
        self.history
            .append(OperationType::SetActiveIdentity, snapshot)
            .await?;
        self.events.publish(KeeperEvent::IdentityChanged);
        Ok(())
    }

    /// Renames an identity.
    ///
    /// # Errors
    /// Fails with `IdentityNotFound` if no identity has that commitment.
    pub async fn rename(&self, commitment: Field, name: String) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let mut next = inner.clone();
            let identity = next
                .identities
                .get_mut(&commitment)
                .ok_or(ZKeeperError::IdentityNotFound)?;
            identity.metadata.name = name;
            let snapshot = identity.snapshot();
            self.persist(&next).await?;
            *inner = next;
            snapshot
        };
        self.history
            .append(OperationType::RenameIdentity, snapshot)
            .await?;
        self.events.publish(KeeperEvent::IdentityChanged);
        Ok(())
    }

    /// Deletes an identity, clearing the active pointer if it pointed here.
    ///
    /// # Errors
    /// Fails with `IdentityNotFound` if no identity has that commitment.
    pub async fn delete(&self, commitment: Field) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let mut next = inner.clone();
            let identity = next
                .identities
                .remove(&commitment)
                .ok_or(ZKeeperError::IdentityNotFound)?;
            if next.active == Some(commitment) {
                next.active = None;
            }
            self.persist(&next).await?;
            *inner = next;
            identity.snapshot()
        };
        info!(commitment = %commitment, "identity deleted");
        self.history
            .append(OperationType::DeleteIdentity, snapshot)
            .await?;
        self.events.publish(KeeperEvent::IdentityChanged);
        Ok(())
    }

    /// Deletes every identity and clears the active pointer.
    ///
    /// # Errors
    /// Fails if persistence fails.
    pub async fn delete_all(&self) -> Result<()> {
        let snapshots: Vec<IdentitySnapshot> = {
            let mut inner = self.inner.lock().await;
            let snapshots = inner.identities.values().map(ZkIdentity::snapshot).collect();
            let next = IdentityState::default();
            self.persist(&next).await?;
            *inner = next;
            snapshots
        };
        for snapshot in snapshots {
            self.history
                .append(OperationType::DeleteAllIdentities, snapshot)
                .await?;
        }
        self.events.publish(KeeperEvent::IdentityChanged);
        Ok(())
    }

    /// Lists identity snapshots matching the filter.
    ///
    /// When random identities are feature-disabled, identities with the
    /// random strategy are excluded from the result but stay in storage.
    pub async fn list(&self, filter: IdentityFilter) -> Vec<IdentitySnapshot> {
        self.inner
            .lock()
            .await
            .identities
            .values()
            .filter(|identity| {
                filter
                    .strategy
                    .map_or(true, |wanted| identity.metadata.strategy == wanted)
            })
            .filter(|identity| {
                self.features.random_identities
                    || identity.metadata.strategy != IdentityStrategy::Random
            })
            .map(ZkIdentity::snapshot)
            .collect()
    }

    /// Number of identities in the store, ignoring read-time policy.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.identities.len()
    }

    /// True if the store holds no identities.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The active identity's commitment, if one is set.
    pub async fn active(&self) -> Option<Field> {
        self.inner.lock().await.active
    }

    /// Clones the identity with the given commitment, secret included.
    /// Proving-pipeline use only.
    ///
    /// # Errors
    /// Fails with `IdentityNotFound` if absent.
    pub async fn get(&self, commitment: Field) -> Result<ZkIdentity> {
        self.inner
            .lock()
            .await
            .identities
            .get(&commitment)
            .cloned()
            .ok_or(ZKeeperError::IdentityNotFound)
    }

    /// Clones the active identity, secret included.
    ///
    /// # Errors
    /// Fails with `IdentityNotFound` if no identity is active.
    pub async fn active_identity(&self) -> Result<ZkIdentity> {
        let inner = self.inner.lock().await;
        let commitment = inner.active.ok_or(ZKeeperError::IdentityNotFound)?;
        inner
            .identities
            .get(&commitment)
            .cloned()
            .ok_or(ZKeeperError::IdentityNotFound)
    }

    async fn persist(&self, state: &IdentityState) -> Result<()> {
        let identities = state
            .identities
            .values()
            .map(ZkIdentity::serialize)
            .collect::<Result<Vec<_>>>()?;
        let plain = serde_json::to_vec(&IdentitySetBlob {
            identities,
            active: state.active,
        })
        .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        let blob = self.vault.encrypt(NS_IDENTITIES, &plain).await?;
        self.store.set(NS_IDENTITIES, blob).await
    }
}
