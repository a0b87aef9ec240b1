//! Injected persisted-store boundary.
//!
//! The engine never talks to a storage backend directly. Every persisted blob
//! (already encrypted by the vault) goes through [`PersistedStore`], keyed by
//! a logical namespace. The in-memory implementation backs tests and default
//! wiring; production embedders supply their own.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

/// Namespace for the vault bootstrap record (salt, password check, mnemonic).
pub const NS_VAULT: &str = "vault";
/// Namespace for the encrypted identity set.
pub const NS_IDENTITIES: &str = "identities";
/// Namespace for the encrypted operation history.
pub const NS_HISTORY: &str = "history";
/// Namespace for the encrypted per-origin permission table.
pub const NS_PERMISSIONS: &str = "permissions";

/// Namespaced get/set/clear over opaque blobs.
///
/// Values handed to `set` are ciphertext (or non-sensitive bootstrap data);
/// the store never sees plaintext secrets. Writes to a given namespace are
/// serialized by the owning service, so implementations only need atomicity
/// per call.
#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// Reads the blob stored under `namespace`, if any.
    async fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces the blob stored under `namespace`.
    async fn set(&self, namespace: &str, value: Vec<u8>) -> Result<()>;

    /// Removes the blob stored under `namespace`.
    async fn clear(&self, namespace: &str) -> Result<()>;
}

/// In-memory [`PersistedStore`] used by tests and as default wiring.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistedStore for MemoryStore {
    async fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(namespace).cloned())
    }

    async fn set(&self, namespace: &str, value: Vec<u8>) -> Result<()> {
        self.blobs.lock().await.insert(namespace.to_string(), value);
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        self.blobs.lock().await.remove(namespace);
        Ok(())
    }
}
