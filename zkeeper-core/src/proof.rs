//! Proof orchestration: assembles prover inputs and drives the injected
//! SNARK prover.
//!
//! The prover itself is a black box behind [`SnarkProver`]; this module owns
//! everything up to its invocation: commitment derivation, Merkle path
//! resolution, verification-key handling for RLN, lock-state gating, and
//! cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Result, ZKeeperError};
use crate::identity::ZkIdentity;
use crate::merkle_resolver::{MerkleProofResolver, MerkleProtocol, MerkleSource};
use crate::merkle_tree::MerkleProof;
use crate::primitives::Field;
use crate::vault::Vault;

/// Opaque proof returned by the prover, passed through to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    /// Full proof object as produced by the proving backend.
    pub full_proof: serde_json::Value,
}

/// Everything the proving backend needs for one proof.
#[derive(Debug)]
pub struct ProverInput {
    /// Identity secret, wiped when the input is dropped.
    pub identity_secret: Zeroizing<Vec<u8>>,
    /// Inclusion path for the identity commitment.
    pub merkle_proof: MerkleProof,
    /// Caller-supplied external nullifier, passed through unchanged.
    pub external_nullifier: String,
    /// Caller-supplied signal, passed through unchanged.
    pub signal: String,
    /// Path to the circuit wasm artifact.
    pub circuit_file_path: String,
    /// Path to the proving key artifact.
    pub zkey_file_path: String,
    /// Parsed verification key, present for RLN proofs.
    pub verification_key: Option<serde_json::Value>,
    /// RLN group identifier, absent for Semaphore proofs.
    pub rln_identifier: Option<Field>,
}

/// Black-box proving backend.
#[async_trait]
pub trait SnarkProver: Send + Sync {
    /// Generates one proof; honors `cancel` as best it can.
    async fn generate_proof(
        &self,
        input: ProverInput,
        cancel: CancellationToken,
    ) -> Result<ProofPayload>;
}

/// Parameters of a Semaphore membership proof request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemaphoreProofRequest {
    /// Context value preventing proof reuse across contexts.
    pub external_nullifier: String,
    /// Message the proof is bound to.
    pub signal: String,
    /// Where the group membership data comes from.
    #[serde(flatten)]
    pub merkle: MerkleSource,
    /// Path to the circuit wasm artifact.
    pub circuit_file_path: String,
    /// Path to the proving key artifact.
    pub zkey_file_path: String,
}

/// Parameters of an RLN proof request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RlnProofRequest {
    /// RLN group identifier.
    pub rln_identifier: Field,
    /// Context value preventing proof reuse across contexts.
    pub external_nullifier: String,
    /// Message the proof is bound to.
    pub signal: String,
    /// Where the group membership data comes from.
    #[serde(flatten)]
    pub merkle: MerkleSource,
    /// Path to the circuit wasm artifact.
    pub circuit_file_path: String,
    /// Path to the proving key artifact.
    pub zkey_file_path: String,
    /// Verification key as a JSON document, parsed before proving.
    pub verification_key: String,
}

/// One proof variant's orchestration pipeline.
#[async_trait]
pub trait ProofService: Send + Sync {
    /// Request type of this variant.
    type Request: Send + 'static;

    /// Runs the full pipeline: resolve the Merkle path, assemble the prover
    /// input, invoke the prover.
    async fn generate(
        &self,
        identity: &ZkIdentity,
        request: Self::Request,
        cancel: CancellationToken,
    ) -> Result<ProofPayload>;
}

struct ProofPipeline {
    vault: Arc<Vault>,
    resolver: Arc<MerkleProofResolver>,
    prover: Arc<dyn SnarkProver>,
}

impl ProofPipeline {
    async fn resolve_path(
        &self,
        protocol: MerkleProtocol,
        identity: &ZkIdentity,
        source: &MerkleSource,
    ) -> Result<MerkleProof> {
        self.vault.require_unlocked().await?;
        let commitment = identity.commitment();
        debug!(%commitment, ?protocol, "resolving merkle path");
        self.resolver.resolve(protocol, commitment, source).await
    }

    async fn prove(
        &self,
        input: ProverInput,
        cancel: CancellationToken,
    ) -> Result<ProofPayload> {
        // The vault may have locked while the path was being resolved; the
        // secret must not reach the prover in that case.
        self.vault.require_unlocked().await?;
        if cancel.is_cancelled() {
            return Err(ZKeeperError::ProofGeneration(
                "proof generation cancelled".to_string(),
            ));
        }
        tokio::select! {
            () = cancel.cancelled() => Err(ZKeeperError::ProofGeneration(
                "proof generation cancelled".to_string(),
            )),
            payload = self.prover.generate_proof(input, cancel.clone()) => payload,
        }
    }
}

/// Semaphore membership proof pipeline.
pub struct SemaphoreProofService {
    pipeline: ProofPipeline,
}

impl SemaphoreProofService {
    /// Creates the service over the shared vault, resolver, and prover.
    pub fn new(
        vault: Arc<Vault>,
        resolver: Arc<MerkleProofResolver>,
        prover: Arc<dyn SnarkProver>,
    ) -> Self {
        Self {
            pipeline: ProofPipeline {
                vault,
                resolver,
                prover,
            },
        }
    }
}

#[async_trait]
impl ProofService for SemaphoreProofService {
    type Request = SemaphoreProofRequest;

    async fn generate(
        &self,
        identity: &ZkIdentity,
        request: SemaphoreProofRequest,
        cancel: CancellationToken,
    ) -> Result<ProofPayload> {
        let merkle_proof = self
            .pipeline
            .resolve_path(MerkleProtocol::Semaphore, identity, &request.merkle)
            .await?;
        info!(root = %merkle_proof.root, "generating semaphore proof");
        let input = ProverInput {
            identity_secret: Zeroizing::new(identity.secret().to_vec()),
            merkle_proof,
            external_nullifier: request.external_nullifier,
            signal: request.signal,
            circuit_file_path: request.circuit_file_path,
            zkey_file_path: request.zkey_file_path,
            verification_key: None,
            rln_identifier: None,
        };
        self.pipeline.prove(input, cancel).await
    }
}

/// RLN proof pipeline.
pub struct RlnProofService {
    pipeline: ProofPipeline,
}

impl RlnProofService {
    /// Creates the service over the shared vault, resolver, and prover.
    pub fn new(
        vault: Arc<Vault>,
        resolver: Arc<MerkleProofResolver>,
        prover: Arc<dyn SnarkProver>,
    ) -> Self {
        Self {
            pipeline: ProofPipeline {
                vault,
                resolver,
                prover,
            },
        }
    }
}

#[async_trait]
impl ProofService for RlnProofService {
    type Request = RlnProofRequest;

    async fn generate(
        &self,
        identity: &ZkIdentity,
        request: RlnProofRequest,
        cancel: CancellationToken,
    ) -> Result<ProofPayload> {
        let merkle_proof = self
            .pipeline
            .resolve_path(MerkleProtocol::Rln, identity, &request.merkle)
            .await?;
        let verification_key: serde_json::Value =
            serde_json::from_str(&request.verification_key).map_err(|err| {
                ZKeeperError::ProofGeneration(format!("invalid verification key: {err}"))
            })?;
        info!(root = %merkle_proof.root, rln_identifier = %request.rln_identifier, "generating rln proof");
        let input = ProverInput {
            identity_secret: Zeroizing::new(identity.secret().to_vec()),
            merkle_proof,
            external_nullifier: request.external_nullifier,
            signal: request.signal,
            circuit_file_path: request.circuit_file_path,
            zkey_file_path: request.zkey_file_path,
            verification_key: Some(verification_key),
            rln_identifier: Some(request.rln_identifier),
        };
        self.pipeline.prove(input, cancel).await
    }
}
