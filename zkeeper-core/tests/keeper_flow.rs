//! End-to-end flows through the dispatcher wire protocol.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zkeeper_core::dispatcher::{ActionDispatcher, RpcRequest, RpcResponse};
use zkeeper_core::error::Result;
use zkeeper_core::merkle_resolver::{MerkleProofResolver, MerkleProtocol, MerkleSource};
use zkeeper_core::merkle_tree::{MerkleTree, DEPTH_SEMAPHORE};
use zkeeper_core::proof::{ProofPayload, ProverInput, SnarkProver};
use zkeeper_core::storage::MemoryStore;
use zkeeper_core::{FeatureFlags, Field, ZKeeper};

/// Prover double that echoes the proof inputs back as the "proof".
struct StubProver {
    calls: AtomicUsize,
}

impl StubProver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SnarkProver for StubProver {
    async fn generate_proof(
        &self,
        input: ProverInput,
        _cancel: CancellationToken,
    ) -> Result<ProofPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProofPayload {
            full_proof: json!({
                "root": input.merkle_proof.root,
                "leaf": input.merkle_proof.leaf,
                "externalNullifier": input.external_nullifier,
                "signal": input.signal,
            }),
        })
    }
}

fn init_tracing() {
    // RUST_LOG controls verbosity; repeated init calls are fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture() -> (Arc<ActionDispatcher>, Arc<StubProver>) {
    init_tracing();
    let prover = StubProver::new();
    let keeper = Arc::new(ZKeeper::new(
        Arc::new(MemoryStore::new()),
        Arc::clone(&prover) as Arc<dyn SnarkProver>,
        FeatureFlags::default(),
    ));
    (Arc::new(ActionDispatcher::new(keeper)), prover)
}

async fn call(dispatcher: &ActionDispatcher, id: &str, method: &str, payload: Value) -> Value {
    let response = dispatcher
        .dispatch(RpcRequest {
            id: id.to_string(),
            method: method.to_string(),
            payload,
            origin: None,
        })
        .await;
    assert!(response.error.is_none(), "{method}: {:?}", response.error);
    response.result.unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_semaphore_proof_end_to_end_with_artifacts() {
    let (dispatcher, prover) = fixture();

    call(
        &dispatcher,
        "r1",
        "SETUP_PASSWORD",
        json!({"password": "pw1"}),
    )
    .await;
    let created = call(
        &dispatcher,
        "r2",
        "CREATE_IDENTITY",
        json!({"metadata": {"name": "Account #0", "strategy": "random"}}),
    )
    .await;
    let commitment_hex = created["commitment"].as_str().unwrap().to_string();
    call(
        &dispatcher,
        "r3",
        "SET_ACTIVE_IDENTITY",
        json!({"commitment": commitment_hex}),
    )
    .await;
    // Pre-authorize the origin so the proof never waits on an approver.
    call(
        &dispatcher,
        "r4",
        "SET_HOST_PERMISSION",
        json!({"host": "https://example.com", "noApproval": true}),
    )
    .await;

    let response = dispatcher
        .dispatch(RpcRequest {
            id: "r5".to_string(),
            method: "GEN_SEMAPHORE_PROOF".to_string(),
            payload: json!({
                "externalNullifier": "poll-1",
                "signal": "yes",
                "artifacts": [commitment_hex],
                "circuitFilePath": "semaphore.wasm",
                "zkeyFilePath": "semaphore.zkey",
            }),
            origin: Some("https://example.com".to_string()),
        })
        .await;
    assert!(response.error.is_none(), "{:?}", response.error);
    let proof = response.result.unwrap();

    let commitment = Field::try_from_hex_string(&commitment_hex).unwrap();
    let expected_root = MerkleTree::build(DEPTH_SEMAPHORE, &[commitment])
        .unwrap()
        .root();
    assert_eq!(proof["fullProof"]["root"], json!(expected_root));
    assert_eq!(proof["fullProof"]["leaf"], json!(commitment));
    assert_eq!(proof["fullProof"]["externalNullifier"], json!("poll-1"));
    assert_eq!(prover.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_pending_then_accept_over_the_bus() {
    let (dispatcher, _prover) = fixture();
    let (req_tx, req_rx) = mpsc::channel::<RpcRequest>(8);
    let (resp_tx, mut resp_rx) = mpsc::channel::<RpcResponse>(8);
    tokio::spawn(Arc::clone(&dispatcher).serve(req_rx, resp_tx));

    req_tx
        .send(RpcRequest {
            id: "setup".to_string(),
            method: "SETUP_PASSWORD".to_string(),
            payload: json!({"password": "pw1"}),
            origin: None,
        })
        .await
        .unwrap();
    let response = resp_rx.recv().await.unwrap();
    assert_eq!(response.id, "setup");

    // CONNECT from an origin with no permission parks as Pending.
    req_tx
        .send(RpcRequest {
            id: "connect".to_string(),
            method: "CONNECT".to_string(),
            payload: Value::Null,
            origin: Some("https://example.com".to_string()),
        })
        .await
        .unwrap();

    let pending_id = loop {
        let pending = call(&dispatcher, "poll", "GET_PENDING_REQUESTS", Value::Null).await;
        if let Some(first) = pending.as_array().unwrap().first() {
            assert_eq!(first["origin"], json!("https://example.com"));
            break first["id"].as_str().unwrap().to_string();
        }
        tokio::task::yield_now().await;
    };

    call(
        &dispatcher,
        "finalize",
        "FINALIZE_REQUEST",
        json!({"id": pending_id, "status": "accepted", "data": {}}),
    )
    .await;

    // The parked CONNECT fulfills with the approver's data.
    let response = resp_rx.recv().await.unwrap();
    assert_eq!(response.id, "connect");
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap(), json!({}));

    // The queue is drained afterwards.
    let pending = call(&dispatcher, "poll2", "GET_PENDING_REQUESTS", Value::Null).await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_local_and_remote_merkle_roots_agree() {
    init_tracing();
    let members: Vec<Field> = [3u64, 5, 8, 13].into_iter().map(Field::from).collect();
    let target = members[2];
    let tree = MerkleTree::build(DEPTH_SEMAPHORE, &members).unwrap();
    let local = tree.proof(target).unwrap();

    // Serve the same group from a mock remote service.
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/merkleProof/SEMAPHORE")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": {"merkleProof": {
                    "root": local.root,
                    "leaf": local.leaf,
                    "siblings": local.siblings,
                    "pathIndices": local.path_indices,
                }}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let resolver = MerkleProofResolver::new();
    let remote = resolver
        .resolve(
            MerkleProtocol::Semaphore,
            target,
            &MerkleSource {
                artifacts: None,
                storage_address: Some(server.url()),
            },
        )
        .await
        .unwrap();

    assert_eq!(remote.root, local.root);
    assert_eq!(remote.compute_root(), local.root);
}

#[tokio::test]
async fn test_lock_mid_session_blocks_identity_reads() {
    let (dispatcher, _prover) = fixture();
    call(
        &dispatcher,
        "r1",
        "SETUP_PASSWORD",
        json!({"password": "pw1"}),
    )
    .await;
    call(
        &dispatcher,
        "r2",
        "CREATE_IDENTITY",
        json!({"metadata": {"name": "A", "strategy": "random"}}),
    )
    .await;
    call(&dispatcher, "r3", "LOCK", Value::Null).await;

    let response = dispatcher
        .dispatch(RpcRequest {
            id: "r4".to_string(),
            method: "GET_IDENTITIES".to_string(),
            payload: Value::Null,
            origin: None,
        })
        .await;
    assert_eq!(response.error.unwrap().kind, "vault_locked");

    // Unlock restores the persisted identity set.
    call(&dispatcher, "r5", "UNLOCK", json!({"password": "pw1"})).await;
    let identities = call(&dispatcher, "r6", "GET_IDENTITIES", Value::Null).await;
    assert_eq!(identities.as_array().unwrap().len(), 1);
}
