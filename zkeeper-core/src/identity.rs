//! Zero-knowledge identity model.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use zeroize::Zeroizing;

use crate::error::{Result, ZKeeperError};
use crate::primitives::Field;

/// Domain separation label for commitment derivation.
const LABEL_COMMITMENT: &[u8] = b"zkeeper:commitment";

/// How an identity's secret was produced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IdentityStrategy {
    /// Derived from a signed message tied to a web2 account.
    InterRep,
    /// Freshly generated random secret.
    Random,
}

/// Descriptive metadata attached to an identity. Safe to disclose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    /// Display name chosen by the user.
    pub name: String,
    /// Strategy used to produce the secret.
    pub strategy: IdentityStrategy,
    /// Backing web2 provider for interrep identities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web2_provider: Option<String>,
    /// Associated wallet account, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Public view of an identity: commitment plus metadata, no secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    /// The identity commitment.
    pub commitment: Field,
    /// The identity metadata.
    pub metadata: IdentityMetadata,
}

/// A zero-knowledge membership identity held on the user's behalf.
///
/// The secret never leaves this type except through [`ZkIdentity::secret`]
/// on the proving path; the commitment is its public, deterministic
/// derivation.
#[derive(Debug, Clone)]
pub struct ZkIdentity {
    secret: Zeroizing<Vec<u8>>,
    /// Descriptive metadata, mutable via rename.
    pub metadata: IdentityMetadata,
}

/// Persisted form: hex secret plus metadata, serialized as one JSON object
/// inside the encrypted identities blob.
#[derive(Serialize, Deserialize)]
struct SerializedIdentity {
    secret: String,
    metadata: IdentityMetadata,
}

impl ZkIdentity {
    /// Builds an identity from an existing secret.
    pub fn from_secret(secret: Vec<u8>, metadata: IdentityMetadata) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            metadata,
        }
    }

    /// Generates an identity with a fresh 32-byte random secret.
    pub fn random(metadata: IdentityMetadata) -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::from_secret(secret, metadata)
    }

    /// The public, deterministic derivation of the secret.
    #[must_use]
    pub fn commitment(&self) -> Field {
        let mut data = Vec::with_capacity(LABEL_COMMITMENT.len() + self.secret.len());
        data.extend_from_slice(LABEL_COMMITMENT);
        data.extend_from_slice(&self.secret);
        Field::from_digest(&data)
    }

    /// The raw secret, for the proving pipeline only.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Commitment + metadata, safe to hand across the dispatch boundary.
    #[must_use]
    pub fn snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot {
            commitment: self.commitment(),
            metadata: self.metadata.clone(),
        }
    }

    /// Serializes to the persisted JSON form.
    ///
    /// # Errors
    /// Fails on JSON serialization errors.
    pub fn serialize(&self) -> Result<serde_json::Value> {
        serde_json::to_value(SerializedIdentity {
            secret: hex::encode(&*self.secret),
            metadata: self.metadata.clone(),
        })
        .map_err(|err| ZKeeperError::Serialization(err.to_string()))
    }

    /// Rebuilds an identity from its persisted JSON form.
    ///
    /// # Errors
    /// Fails if the secret or metadata fields are missing or malformed.
    pub fn from_serialized(value: serde_json::Value) -> Result<Self> {
        let data: SerializedIdentity = serde_json::from_value(value)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        let secret = hex::decode(&data.secret)
            .map_err(|err| ZKeeperError::Serialization(err.to_string()))?;
        Ok(Self::from_secret(secret, data.metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn metadata(name: &str) -> IdentityMetadata {
        IdentityMetadata {
            name: name.to_string(),
            strategy: IdentityStrategy::Random,
            web2_provider: None,
            account: None,
        }
    }

    #[test]
    fn test_commitment_is_deterministic() {
        let identity = ZkIdentity::from_secret(vec![1, 2, 3], metadata("a"));
        let same_secret = ZkIdentity::from_secret(vec![1, 2, 3], metadata("b"));
        assert_eq!(identity.commitment(), same_secret.commitment());

        let other = ZkIdentity::from_secret(vec![4, 5, 6], metadata("a"));
        assert_ne!(identity.commitment(), other.commitment());
    }

    #[test]
    fn test_random_identities_have_distinct_commitments() {
        let a = ZkIdentity::random(metadata("a"));
        let b = ZkIdentity::random(metadata("b"));
        assert_ne!(a.commitment(), b.commitment());
    }

    #[test]
    fn test_serialized_round_trip() {
        let identity = ZkIdentity::from_secret(vec![7u8; 32], metadata("roundtrip"));
        let value = identity.serialize().unwrap();
        let back = ZkIdentity::from_serialized(value).unwrap();
        assert_eq!(back.commitment(), identity.commitment());
        assert_eq!(back.metadata, identity.metadata);
    }

    #[test]
    fn test_from_serialized_rejects_missing_fields() {
        let result = ZkIdentity::from_serialized(serde_json::json!({ "secret": "0102" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_strategy_string_forms() {
        assert_eq!(IdentityStrategy::Random.to_string(), "random");
        assert_eq!(
            "interrep".parse::<IdentityStrategy>().unwrap(),
            IdentityStrategy::InterRep
        );
    }
}
