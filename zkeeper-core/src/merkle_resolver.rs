//! Merkle proof resolution from local artifacts or a remote group service.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ZKeeperError};
use crate::http::Request;
use crate::merkle_tree::{MerkleProof, MerkleTree, DEPTH_RLN, DEPTH_SEMAPHORE};
use crate::primitives::Field;

/// Group protocol a membership proof is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerkleProtocol {
    /// RLN group, depth 15.
    Rln,
    /// Semaphore group, depth 20.
    Semaphore,
}

impl MerkleProtocol {
    /// Fixed tree depth of this protocol's groups.
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            Self::Rln => DEPTH_RLN,
            Self::Semaphore => DEPTH_SEMAPHORE,
        }
    }

    const fn path_segment(self) -> &'static str {
        match self {
            Self::Rln => "RLN",
            Self::Semaphore => "SEMAPHORE",
        }
    }
}

/// Where the group membership data for a proof request comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleSource {
    /// Full member commitment list, enabling a local tree build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Field>>,
    /// Base URL of a group service holding the tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_address: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteProofRequest {
    identity_commitment: String,
}

// Remote siblings arrive either as a bare hex string or a one-element array.
#[derive(Deserialize)]
#[serde(untagged)]
enum RemoteSibling {
    Single(Field),
    Nested(Vec<Field>),
}

impl RemoteSibling {
    fn into_field(self) -> Result<Field> {
        match self {
            Self::Single(field) => Ok(field),
            Self::Nested(fields) => fields.into_iter().next().ok_or_else(|| {
                ZKeeperError::MerkleFetchError("empty sibling entry in response".to_string())
            }),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteMerkleProof {
    root: Field,
    leaf: Field,
    siblings: Vec<RemoteSibling>,
    path_indices: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteProofData {
    merkle_proof: RemoteMerkleProof,
}

#[derive(Deserialize)]
struct RemoteProofResponse {
    data: RemoteProofData,
}

#[derive(Deserialize)]
struct RemoteErrorResponse {
    error: String,
}

/// Resolves inclusion proofs for identity commitments.
pub struct MerkleProofResolver {
    request: Request,
}

impl MerkleProofResolver {
    /// Creates a resolver with its own HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request: Request::new(),
        }
    }

    /// Produces an inclusion proof for `commitment` against the group
    /// described by `source`.
    ///
    /// Artifacts win over a storage address when both are present.
    ///
    /// # Errors
    /// `MissingMerkleSource` when the source names neither artifacts nor an
    /// address; `MerkleFetchError` on any remote transport, decode, or
    /// service failure.
    pub async fn resolve(
        &self,
        protocol: MerkleProtocol,
        commitment: Field,
        source: &MerkleSource,
    ) -> Result<MerkleProof> {
        if let Some(artifacts) = &source.artifacts {
            debug!(members = artifacts.len(), ?protocol, "building local tree");
            let tree = MerkleTree::build(protocol.depth(), artifacts)?;
            return tree.proof(commitment);
        }
        if let Some(address) = &source.storage_address {
            return self.fetch(protocol, commitment, address).await;
        }
        Err(ZKeeperError::MissingMerkleSource)
    }

    async fn fetch(
        &self,
        protocol: MerkleProtocol,
        commitment: Field,
        address: &str,
    ) -> Result<MerkleProof> {
        let url = format!(
            "{}/merkleProof/{}",
            address.trim_end_matches('/'),
            protocol.path_segment()
        );
        info!(%url, "fetching merkle proof");
        let body = RemoteProofRequest {
            identity_commitment: commitment.to_hex_string(),
        };
        let response = self
            .request
            .post(url, body)
            .await
            .map_err(|err| ZKeeperError::MerkleFetchError(err.to_string()))?;

        if !response.status().is_success() {
            let message = match response.json::<RemoteErrorResponse>().await {
                Ok(body) => body.error,
                Err(err) => err.to_string(),
            };
            return Err(ZKeeperError::MerkleFetchError(message));
        }

        let body: RemoteProofResponse = response
            .json()
            .await
            .map_err(|err| ZKeeperError::MerkleFetchError(err.to_string()))?;
        let remote = body.data.merkle_proof;
        let siblings = remote
            .siblings
            .into_iter()
            .map(RemoteSibling::into_field)
            .collect::<Result<Vec<_>>>()?;
        Ok(MerkleProof {
            root: remote.root,
            leaf: remote.leaf,
            siblings,
            path_indices: remote.path_indices,
        })
    }
}

impl Default for MerkleProofResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_source_fails() {
        let resolver = MerkleProofResolver::new();
        let err = resolver
            .resolve(
                MerkleProtocol::Semaphore,
                Field::from(1u64),
                &MerkleSource::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ZKeeperError::MissingMerkleSource));
    }

    #[tokio::test]
    async fn test_artifacts_build_local_proof() {
        let resolver = MerkleProofResolver::new();
        let commitment = Field::from(5u64);
        let source = MerkleSource {
            artifacts: Some(vec![Field::from(3u64), commitment, Field::from(9u64)]),
            storage_address: None,
        };
        let proof = resolver
            .resolve(MerkleProtocol::Rln, commitment, &source)
            .await
            .unwrap();
        assert_eq!(proof.leaf, commitment);
        assert_eq!(proof.siblings.len(), DEPTH_RLN);
        assert_eq!(proof.compute_root(), proof.root);
    }

    #[tokio::test]
    async fn test_artifacts_win_over_storage_address() {
        let resolver = MerkleProofResolver::new();
        let commitment = Field::from(5u64);
        // The address is unreachable; artifacts must short-circuit it.
        let source = MerkleSource {
            artifacts: Some(vec![commitment]),
            storage_address: Some("http://127.0.0.1:1/merkle".to_string()),
        };
        let proof = resolver
            .resolve(MerkleProtocol::Semaphore, commitment, &source)
            .await
            .unwrap();
        assert_eq!(proof.leaf, commitment);
    }

    #[tokio::test]
    async fn test_remote_fetch_happy_path() {
        let mut server = mockito::Server::new_async().await;
        let commitment = Field::from(7u64);
        let local = MerkleTree::build(DEPTH_SEMAPHORE, &[commitment]).unwrap();
        let local_proof = local.proof(commitment).unwrap();

        let response_body = serde_json::json!({
            "data": {
                "merkleProof": {
                    "root": local_proof.root,
                    "leaf": local_proof.leaf,
                    // Exercise both sibling encodings the service emits.
                    "siblings": local_proof
                        .siblings
                        .iter()
                        .enumerate()
                        .map(|(i, sibling)| {
                            if i % 2 == 0 {
                                serde_json::json!(sibling)
                            } else {
                                serde_json::json!([sibling])
                            }
                        })
                        .collect::<Vec<_>>(),
                    "pathIndices": local_proof.path_indices,
                }
            }
        });
        let mock = server
            .mock("POST", "/merkleProof/SEMAPHORE")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "identityCommitment": commitment.to_hex_string(),
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response_body.to_string())
            .create_async()
            .await;

        let resolver = MerkleProofResolver::new();
        let source = MerkleSource {
            artifacts: None,
            storage_address: Some(server.url()),
        };
        let proof = resolver
            .resolve(MerkleProtocol::Semaphore, commitment, &source)
            .await
            .unwrap();
        mock.assert_async().await;

        // Remote and local agree on the same group.
        assert_eq!(proof, local_proof);
        assert_eq!(proof.compute_root(), proof.root);
    }

    #[tokio::test]
    async fn test_remote_service_error_maps_to_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/merkleProof/RLN")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "commitment not in group"}"#)
            .create_async()
            .await;

        let resolver = MerkleProofResolver::new();
        let source = MerkleSource {
            artifacts: None,
            storage_address: Some(server.url()),
        };
        let err = resolver
            .resolve(MerkleProtocol::Rln, Field::from(1u64), &source)
            .await
            .unwrap_err();
        match err {
            ZKeeperError::MerkleFetchError(message) => {
                assert_eq!(message, "commitment not in group");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_garbage_body_maps_to_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/merkleProof/SEMAPHORE")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("not json")
            .create_async()
            .await;

        let resolver = MerkleProofResolver::new();
        let source = MerkleSource {
            artifacts: None,
            storage_address: Some(server.url()),
        };
        let err = resolver
            .resolve(MerkleProtocol::Semaphore, Field::from(1u64), &source)
            .await
            .unwrap_err();
        assert!(matches!(err, ZKeeperError::MerkleFetchError(_)));
    }
}
