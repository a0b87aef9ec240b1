//! Process-wide keeper context.
//!
//! One explicitly constructed [`ZKeeper`] owns every service and is handed
//! to the dispatcher at startup; nothing in the crate reaches for hidden
//! global state.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::approval::ApprovalQueue;
use crate::error::Result;
use crate::events::{EventBus, KeeperEvent};
use crate::history::HistoryLog;
use crate::identities::IdentityStore;
use crate::merkle_resolver::MerkleProofResolver;
use crate::permissions::PermissionTable;
use crate::proof::{RlnProofService, SemaphoreProofService, SnarkProver};
use crate::storage::PersistedStore;
use crate::vault::Vault;

/// Runtime policy toggles.
#[derive(Debug, Clone, Copy)]
pub struct FeatureFlags {
    /// Whether identities with the `random` strategy are visible to reads.
    pub random_identities: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            random_identities: true,
        }
    }
}

/// The keeper: every service wired onto the injected store and prover.
pub struct ZKeeper {
    /// Encrypted secret store and lock-state gate.
    pub vault: Arc<Vault>,
    /// Identity set.
    pub identities: Arc<IdentityStore>,
    /// Append-only operation log.
    pub history: Arc<HistoryLog>,
    /// Per-origin approval policy.
    pub permissions: Arc<PermissionTable>,
    /// Pending privileged requests.
    pub approvals: Arc<ApprovalQueue>,
    /// Semaphore proof pipeline.
    pub semaphore: SemaphoreProofService,
    /// RLN proof pipeline.
    pub rln: RlnProofService,
    /// Notification channel.
    pub events: EventBus,
}

impl ZKeeper {
    /// Wires all services onto the injected storage and proving backends.
    #[must_use]
    pub fn new(
        store: Arc<dyn PersistedStore>,
        prover: Arc<dyn SnarkProver>,
        features: FeatureFlags,
    ) -> Self {
        let events = EventBus::new();
        let vault = Arc::new(Vault::new(Arc::clone(&store)));
        let history = Arc::new(HistoryLog::new(
            Arc::clone(&store),
            Arc::clone(&vault),
            features,
        ));
        let identities = Arc::new(IdentityStore::new(
            Arc::clone(&store),
            Arc::clone(&vault),
            Arc::clone(&history),
            events.clone(),
            features,
        ));
        let permissions = Arc::new(PermissionTable::new(
            Arc::clone(&store),
            Arc::clone(&vault),
        ));
        let approvals = Arc::new(ApprovalQueue::new(
            Arc::clone(&permissions),
            events.clone(),
        ));
        let resolver = Arc::new(MerkleProofResolver::new());
        let semaphore = SemaphoreProofService::new(
            Arc::clone(&vault),
            Arc::clone(&resolver),
            Arc::clone(&prover),
        );
        let rln = RlnProofService::new(Arc::clone(&vault), resolver, prover);

        Self {
            vault,
            identities,
            history,
            permissions,
            approvals,
            semaphore,
            rln,
            events,
        }
    }

    /// Initializes the vault with a fresh password and brings every store
    /// online.
    ///
    /// # Errors
    /// Fails with `AlreadyInitialized` if a vault record already exists.
    pub async fn setup_password(&self, password: &SecretString) -> Result<()> {
        self.vault.initialize(password).await?;
        self.bring_online().await
    }

    /// Unlocks the vault and loads every persisted store into memory.
    ///
    /// # Errors
    /// Fails with `NotInitialized` or `WrongPassword` from the vault, or if
    /// a persisted blob cannot be decrypted.
    pub async fn unlock(&self, password: &SecretString) -> Result<()> {
        self.vault.unlock(password).await?;
        self.bring_online().await
    }

    /// Locks the vault and drops every decrypted secret from memory.
    pub async fn lock(&self) {
        self.vault.lock().await;
        self.identities.unload().await;
        info!("keeper locked");
        self.events.publish(KeeperEvent::Logout);
    }

    async fn bring_online(&self) -> Result<()> {
        self.identities.load().await?;
        self.history.load().await?;
        self.permissions.load().await?;
        info!("keeper unlocked");
        self.events.publish(KeeperEvent::Login);
        Ok(())
    }
}
