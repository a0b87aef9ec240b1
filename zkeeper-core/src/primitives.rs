use std::ops::Deref;

use ruint::aliases::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ZKeeperError;

/// A 256-bit field element used throughout the protocol surface.
///
/// Commitments, Merkle nodes, external nullifiers and signals are all `U256`
/// values. On the wire (JSON over the action protocol or the remote Merkle
/// service) they are represented as `0x`-prefixed hex strings padded to 32
/// bytes, so this wrapper carries the canonical hex encoding alongside the
/// numeric form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Field(pub U256);

impl Field {
    /// The zero element, used to pad Merkle tree leaves.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Outputs the hex representation padded to 32 bytes plus the `0x` prefix.
    #[must_use]
    pub fn to_hex_string(&self) -> String {
        format!("{:#066x}", self.0)
    }

    /// Attempts to parse a hex string (with or without `0x`) as a field element.
    ///
    /// # Errors
    /// Returns `ZKeeperError::InvalidNumber` if the input is not a valid
    /// hex-presented number of up to 256 bits.
    pub fn try_from_hex_string(hex_string: &str) -> Result<Self, ZKeeperError> {
        let hex_string = hex_string.trim().trim_start_matches("0x");

        let number = U256::from_str_radix(hex_string, 16)
            .map_err(|_| ZKeeperError::InvalidNumber)?;

        Ok(Self(number))
    }

    /// Reduces a SHA-256 digest over `data` into a field element.
    ///
    /// Deterministic hash-to-field used for commitment derivation and Merkle
    /// node hashing. Domain separation is the caller's responsibility via a
    /// label prefix in `data`.
    #[must_use]
    pub fn from_digest(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(U256::from_be_bytes(bytes))
    }

    /// Big-endian byte representation, 32 bytes.
    #[must_use]
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0.to_be_bytes()
    }
}

impl From<u64> for Field {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<U256> for Field {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl Deref for Field {
    type Target = U256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for Field {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::try_from_hex_string(&s).map_err(serde::de::Error::custom)
    }
}
