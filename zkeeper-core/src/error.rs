use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ZKeeperError>;

/// Error outputs from the zkeeper trust engine.
#[derive(Debug, Error)]
pub enum ZKeeperError {
    /// A cipher operation was attempted while the vault is locked.
    #[error("vault is locked")]
    VaultLocked,
    /// The supplied unlock password does not match the vault.
    #[error("wrong password")]
    WrongPassword,
    /// The vault has never been initialized with a password.
    #[error("vault is not initialized")]
    NotInitialized,
    /// `initialize` was called on a vault that already holds a password.
    #[error("vault is already initialized")]
    AlreadyInitialized,
    /// An identity with the same commitment already exists.
    #[error("identity commitment already exists")]
    DuplicateCommitment,
    /// No identity matches the requested commitment.
    #[error("identity not found")]
    IdentityNotFound,
    /// The approver rejected the request; carries the rejection payload.
    #[error("request was rejected by the approver")]
    ApprovalRejected {
        /// Data supplied by the approving surface alongside the rejection.
        data: serde_json::Value,
    },
    /// The approving surface went away before resolving the request.
    #[error("request was abandoned before resolution")]
    RequestAbandoned,
    /// `resolve` was called for an id that is not pending.
    #[error("unknown request: {0}")]
    UnknownRequest(String),
    /// The inbound message names an action with no registered handler.
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    /// Neither Merkle artifacts nor a storage address were supplied.
    #[error("no merkle proof source provided")]
    MissingMerkleSource,
    /// Remote Merkle proof fetch failed (transport or deserialization).
    #[error("merkle fetch error: {0}")]
    MerkleFetchError(String),
    /// The external prover failed or the proving pipeline was cancelled.
    #[error("proof generation error: {0}")]
    ProofGeneration(String),
    /// The presented input is not valid for the requested operation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The presented data is not a valid 256-bit hex number.
    #[error("invalid number")]
    InvalidNumber,
    /// Unexpected error serializing or deserializing information.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// AEAD or key-derivation failure.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// Failure in the injected persisted store.
    #[error("storage error: {0}")]
    Storage(String),
    /// HTTP request failure.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

impl ZKeeperError {
    /// Stable label for the wire envelope. Callers match on this, never on
    /// the display message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::VaultLocked => "vault_locked",
            Self::WrongPassword => "wrong_password",
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::DuplicateCommitment => "duplicate_commitment",
            Self::IdentityNotFound => "identity_not_found",
            Self::ApprovalRejected { .. } => "approval_rejected",
            Self::RequestAbandoned => "request_abandoned",
            Self::UnknownRequest(_) => "unknown_request",
            Self::UnknownMethod(_) => "unknown_method",
            Self::MissingMerkleSource => "missing_merkle_source",
            Self::MerkleFetchError(_) => "merkle_fetch_error",
            Self::ProofGeneration(_) => "proof_generation_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidNumber => "invalid_number",
            Self::Serialization(_) => "serialization_error",
            Self::Crypto(_) => "crypto_error",
            Self::Storage(_) => "storage_error",
            Self::Reqwest(_) => "network_error",
        }
    }
}
