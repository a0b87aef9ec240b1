//! Encrypted vault and its lock/unlock lifecycle.
//!
//! The vault owns the unlock secret. A symmetric key is derived from the
//! password via HKDF-SHA256 with a random persisted salt, held only in process
//! memory while unlocked, and wiped on lock. Every sensitive blob in the
//! engine is encrypted with XChaCha20-Poly1305 under this key; a cipher call
//! in any other state fails fast instead of degrading to plaintext.
//!
//! State machine: `Uninitialized -> Unlocked` (initialize) or
//! `Locked <-> Unlocked` (unlock/lock).

use std::sync::Arc;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, ZKeeperError};
use crate::storage::{PersistedStore, NS_VAULT};

/// XChaCha20-Poly1305 nonce size.
const NONCE_SIZE: usize = 24;

/// HKDF info label for the password-derived vault key.
const LABEL_VAULT_KEY: &[u8] = b"zkeeper:vault-key";

/// Associated-data prefix for namespaced blob encryption.
const LABEL_BLOB_AD: &[u8] = b"zkeeper:blob:";

/// Known plaintext sealed at initialization; failing to open it on unlock
/// means the password is wrong.
const PASSWORD_CHECK: &[u8] = b"zkeeper:password-check";

/// Vault encryption key (256-bit), derived from the unlock password.
///
/// Held only while the vault is unlocked and zeroized on drop. Never
/// persisted, never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl VaultKey {
    /// Derives the vault key from a password and the persisted salt.
    fn derive(password: &SecretString, salt: &[u8]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt), password.expose_secret().as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(LABEL_VAULT_KEY, &mut okm)
            .map_err(|_| ZKeeperError::Crypto("hkdf expand failed".to_string()))?;
        Ok(Self(okm))
    }

    const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey").field("key", &"[REDACTED]").finish()
    }
}

/// Lock state of the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No password has ever been set up.
    Uninitialized,
    /// A password exists but the derived key is not in memory.
    Locked,
    /// The derived key is in memory and cipher operations are allowed.
    Unlocked,
}

/// Snapshot of the vault state, as reported by `GET_STATUS`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    /// A password has been set up at some point.
    pub is_initialized: bool,
    /// The derived key is currently in memory.
    pub is_unlocked: bool,
    /// An encrypted mnemonic seed blob exists.
    pub is_mnemonic_generated: bool,
}

/// Bootstrap record persisted under the `vault` namespace.
///
/// The salt and check ciphertext are not secret; the mnemonic blob is
/// ciphertext under the vault key.
#[derive(Debug, Serialize, Deserialize)]
struct VaultRecord {
    salt: String,
    check: String,
    #[serde(default)]
    mnemonic: Option<String>,
}

/// The encrypted vault.
pub struct Vault {
    store: Arc<dyn PersistedStore>,
    key: Mutex<Option<VaultKey>>,
}

impl Vault {
    /// Creates a vault over the injected store. The vault starts without a
    /// key in memory regardless of whether a record is persisted.
    pub fn new(store: Arc<dyn PersistedStore>) -> Self {
        Self {
            store,
            key: Mutex::new(None),
        }
    }

    /// Sets up the vault password for the first time and transitions to
    /// Unlocked.
    ///
    /// # Errors
    /// Fails with `AlreadyInitialized` if a password was set up before.
    pub async fn initialize(&self, password: &SecretString) -> Result<()> {
        if self.load_record().await?.is_some() {
            return Err(ZKeeperError::AlreadyInitialized);
        }

        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = VaultKey::derive(password, &salt)?;
        let check = seal(&key, b"check", PASSWORD_CHECK)?;

        self.save_record(&VaultRecord {
            salt: hex::encode(salt),
            check: hex::encode(check),
            mnemonic: None,
        })
        .await?;

        *self.key.lock().await = Some(key);
        info!("vault initialized");
        Ok(())
    }

    /// Unlocks the vault with the given password.
    ///
    /// # Errors
    /// Fails with `NotInitialized` if no password was ever set up, and with
    /// `WrongPassword` if the derived key cannot open the check blob.
    pub async fn unlock(&self, password: &SecretString) -> Result<()> {
        let record = self
            .load_record()
            .await?
            .ok_or(ZKeeperError::NotInitialized)?;

        let salt = decode_hex(&record.salt)?;
        let check = decode_hex(&record.check)?;

        let key = VaultKey::derive(password, &salt)?;
        open(&key, b"check", &check).map_err(|_| ZKeeperError::WrongPassword)?;

        *self.key.lock().await = Some(key);
        info!("vault unlocked");
        Ok(())
    }

    /// Locks the vault, wiping the derived key from memory.
    pub async fn lock(&self) {
        // VaultKey zeroizes on drop.
        *self.key.lock().await = None;
        info!("vault locked");
    }

    /// Current lock state.
    pub async fn lock_state(&self) -> Result<LockState> {
        if self.key.lock().await.is_some() {
            return Ok(LockState::Unlocked);
        }
        if self.load_record().await?.is_some() {
            Ok(LockState::Locked)
        } else {
            Ok(LockState::Uninitialized)
        }
    }

    /// Fails with `VaultLocked` unless the vault is unlocked.
    pub async fn require_unlocked(&self) -> Result<()> {
        if self.key.lock().await.is_some() {
            Ok(())
        } else {
            Err(ZKeeperError::VaultLocked)
        }
    }

    /// Status snapshot for `GET_STATUS`.
    pub async fn status(&self) -> Result<VaultStatus> {
        let record = self.load_record().await?;
        Ok(VaultStatus {
            is_initialized: record.is_some(),
            is_unlocked: self.key.lock().await.is_some(),
            is_mnemonic_generated: record.is_some_and(|r| r.mnemonic.is_some()),
        })
    }

    /// Encrypts a plaintext blob bound to a storage namespace.
    ///
    /// Output layout is `nonce || ciphertext`. The namespace participates in
    /// the associated data, so a blob moved between namespaces fails to open.
    ///
    /// # Errors
    /// Fails with `VaultLocked` unless unlocked.
    pub async fn encrypt(&self, namespace: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let guard = self.key.lock().await;
        let key = guard.as_ref().ok_or(ZKeeperError::VaultLocked)?;
        seal(key, namespace.as_bytes(), plaintext)
    }

    /// Decrypts a blob produced by [`Vault::encrypt`] for the same namespace.
    ///
    /// # Errors
    /// Fails with `VaultLocked` unless unlocked, and with a crypto error on
    /// authentication failure or malformed input.
    pub async fn decrypt(&self, namespace: &str, blob: &[u8]) -> Result<Vec<u8>> {
        let guard = self.key.lock().await;
        let key = guard.as_ref().ok_or(ZKeeperError::VaultLocked)?;
        open(key, namespace.as_bytes(), blob)
    }

    /// Generates the mnemonic seed and stores it encrypted in the vault
    /// record. Idempotent: a second call returns the existing seed.
    ///
    /// # Errors
    /// Fails with `VaultLocked` unless unlocked.
    pub async fn generate_mnemonic(&self) -> Result<String> {
        self.require_unlocked().await?;
        let mut record = self
            .load_record()
            .await?
            .ok_or(ZKeeperError::NotInitialized)?;

        if let Some(existing) = &record.mnemonic {
            let blob = decode_hex(existing)?;
            let seed = self.decrypt("mnemonic", &blob).await?;
            return Ok(hex::encode(seed));
        }

        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let blob = self.encrypt("mnemonic", &seed).await?;
        record.mnemonic = Some(hex::encode(blob));
        self.save_record(&record).await?;
        Ok(hex::encode(seed))
    }

    async fn load_record(&self) -> Result<Option<VaultRecord>> {
        let Some(bytes) = self.store.get(NS_VAULT).await? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&bytes)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        Ok(Some(record))
    }

    async fn save_record(&self, record: &VaultRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        self.store.set(NS_VAULT, bytes).await
    }
}

/// AEAD seal with a random nonce prefixed to the ciphertext.
fn seal(key: &VaultKey, aad_suffix: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let aad = build_aad(aad_suffix);
    let ciphertext = cipher
        .encrypt(
            nonce,
            chacha20poly1305::aead::Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| ZKeeperError::Crypto("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// AEAD open of a `nonce || ciphertext` blob.
fn open(key: &VaultKey, aad_suffix: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE {
        return Err(ZKeeperError::Crypto("ciphertext too short".to_string()));
    }
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let aad = build_aad(aad_suffix);
    cipher
        .decrypt(
            nonce,
            chacha20poly1305::aead::Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| ZKeeperError::Crypto("decryption failed".to_string()))
}

fn build_aad(suffix: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(LABEL_BLOB_AD.len() + suffix.len());
    aad.extend_from_slice(LABEL_BLOB_AD);
    aad.extend_from_slice(suffix);
    aad
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|err| ZKeeperError::Serialization(err.to_string()))
}
