//! Action dispatch over the injected message bus.
//!
//! Inbound messages name an [`Action`]; the dispatcher enforces the
//! action's lock-state and approval preconditions, runs the handler, and
//! answers with a correlated envelope. Every internal failure is
//! normalized into the envelope's error field, so callers never see a raw
//! fault.

use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::approval::{PendingRequestType, RequestStatus, Resolution};
use crate::error::{Result, ZKeeperError};
use crate::history::{OperationFilter, OperationType};
use crate::identities::IdentityFilter;
use crate::identity::{IdentityMetadata, ZkIdentity};
use crate::keeper::ZKeeper;
use crate::permissions::HostPermission;
use crate::primitives::Field;
use crate::proof::{ProofService, RlnProofRequest, SemaphoreProofRequest};

/// Every action the keeper answers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Action {
    Lock,
    Unlock,
    SetupPassword,
    GetStatus,
    GenerateMnemonic,
    Connect,
    CreateIdentity,
    GetIdentities,
    SetActiveIdentity,
    RenameIdentity,
    DeleteIdentity,
    DeleteAllIdentities,
    GenSemaphoreProof,
    GenRlnProof,
    SetHostPermission,
    GetHostPermission,
    GetPendingRequests,
    FinalizeRequest,
    GetHistory,
    ClearHistory,
}

impl Action {
    /// Whether the action may only run against an unlocked vault.
    #[must_use]
    pub const fn requires_unlocked(self) -> bool {
        matches!(
            self,
            Self::GenerateMnemonic
                | Self::CreateIdentity
                | Self::GetIdentities
                | Self::SetActiveIdentity
                | Self::RenameIdentity
                | Self::DeleteIdentity
                | Self::DeleteAllIdentities
                | Self::GenSemaphoreProof
                | Self::GenRlnProof
                | Self::SetHostPermission
                | Self::GetHistory
                | Self::ClearHistory
        )
    }

    /// Approval gate for the action, if it has one.
    #[must_use]
    pub const fn approval_gate(self) -> Option<PendingRequestType> {
        match self {
            Self::Connect => Some(PendingRequestType::Connect),
            Self::GenSemaphoreProof => Some(PendingRequestType::SemaphoreProof),
            Self::GenRlnProof => Some(PendingRequestType::RlnProof),
            _ => None,
        }
    }
}

/// Inbound message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Correlation id echoed back on the response.
    pub id: String,
    /// Action name in its wire form, e.g. `GEN_SEMAPHORE_PROOF`.
    pub method: String,
    /// Action parameters.
    #[serde(default)]
    pub payload: Value,
    /// Origin of the caller, required for approval-gated actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Normalized error carried on a response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcError {
    /// Stable machine-readable label.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
    /// Structured payload, present for approval rejections so the caller
    /// sees what the approver supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ZKeeperError> for RpcError {
    fn from(err: &ZKeeperError) -> Self {
        let data = match err {
            ZKeeperError::ApprovalRejected { data } => Some(data.clone()),
            _ => None,
        };
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            data,
        }
    }
}

/// Outbound message envelope, correlated by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    /// Correlation id of the request this answers.
    pub id: String,
    /// Handler result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Normalized error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Deserialize)]
struct PasswordPayload {
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitmentPayload {
    commitment: Field,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenamePayload {
    commitment: Field,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIdentityPayload {
    metadata: IdentityMetadata,
    #[serde(default, with = "hex::serde")]
    secret: Vec<u8>,
}

#[derive(Deserialize)]
struct HostPayload {
    host: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalizePayload {
    id: String,
    status: RequestStatus,
    #[serde(default)]
    data: Value,
}

/// Routes inbound actions to keeper services.
pub struct ActionDispatcher {
    keeper: Arc<ZKeeper>,
}

impl ActionDispatcher {
    /// Creates a dispatcher over the keeper context.
    #[must_use]
    pub fn new(keeper: Arc<ZKeeper>) -> Self {
        Self { keeper }
    }

    /// Dispatches one request to completion.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        self.dispatch_cancellable(request, CancellationToken::new())
            .await
    }

    /// Dispatches one request, threading the caller's cancellation signal
    /// into the proof pipeline.
    pub async fn dispatch_cancellable(
        &self,
        request: RpcRequest,
        cancel: CancellationToken,
    ) -> RpcResponse {
        let id = request.id.clone();
        debug!(%id, method = %request.method, "dispatching");
        match self.handle(request, cancel).await {
            Ok(result) => RpcResponse {
                id,
                result: Some(result),
                error: None,
            },
            Err(err) => {
                error!(%id, kind = err.kind(), %err, "request failed");
                RpcResponse {
                    id,
                    result: None,
                    error: Some(RpcError::from(&err)),
                }
            }
        }
    }

    /// Serves requests from `rx`, answering on `tx`. Each request runs as
    /// its own task so one parked in the approval queue never blocks an
    /// unrelated one. Returns when the inbound channel closes.
    pub async fn serve(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<RpcRequest>,
        tx: mpsc::Sender<RpcResponse>,
    ) {
        info!("dispatcher serving");
        while let Some(request) = rx.recv().await {
            let dispatcher = Arc::clone(&self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = dispatcher.dispatch(request).await;
                // A closed outbound channel means the bus went away.
                let _ = tx.send(response).await;
            });
        }
        info!("dispatcher stopped");
    }

    async fn handle(&self, request: RpcRequest, cancel: CancellationToken) -> Result<Value> {
        let action = Action::from_str(&request.method)
            .map_err(|_| ZKeeperError::UnknownMethod(request.method.clone()))?;

        if action.requires_unlocked() {
            self.keeper.vault.require_unlocked().await?;
        }

        if let Some(gate) = action.approval_gate() {
            let origin = request.origin.clone().ok_or_else(|| {
                ZKeeperError::InvalidInput(format!("{action} requires an origin"))
            })?;
            let resolution = self
                .keeper
                .approvals
                .enqueue(gate, request.payload.clone(), origin)
                .await?;
            match resolution {
                Resolution {
                    status: RequestStatus::Accepted,
                    data,
                } => {
                    // CONNECT carries the approver's data straight back.
                    if action == Action::Connect {
                        return Ok(data);
                    }
                }
                Resolution {
                    status: RequestStatus::Rejected,
                    data,
                } => return Err(ZKeeperError::ApprovalRejected { data }),
            }
        }

        self.run(action, request.payload, cancel).await
    }

    async fn run(&self, action: Action, payload: Value, cancel: CancellationToken) -> Result<Value> {
        match action {
            Action::Lock => {
                self.keeper.lock().await;
                Ok(Value::Null)
            }
            Action::Unlock => {
                let params: PasswordPayload = parse(payload)?;
                self.keeper
                    .unlock(&secrecy::SecretString::from(params.password))
                    .await?;
                Ok(Value::Null)
            }
            Action::SetupPassword => {
                let params: PasswordPayload = parse(payload)?;
                self.keeper
                    .setup_password(&secrecy::SecretString::from(params.password))
                    .await?;
                Ok(Value::Null)
            }
            Action::GetStatus => to_value(self.keeper.vault.status().await?),
            Action::GenerateMnemonic => {
                let mnemonic = self.keeper.vault.generate_mnemonic().await?;
                Ok(Value::String(mnemonic))
            }
            // Handled by the approval gate before `run`.
            Action::Connect => Ok(Value::Null),
            Action::CreateIdentity => {
                let params: CreateIdentityPayload = parse(payload)?;
                let identity = if params.secret.is_empty() {
                    ZkIdentity::random(params.metadata)
                } else {
                    ZkIdentity::from_secret(params.secret, params.metadata)
                };
                to_value(self.keeper.identities.create(identity).await?)
            }
            Action::GetIdentities => {
                let filter: IdentityFilter = parse_or_default(payload)?;
                to_value(self.keeper.identities.list(filter).await)
            }
            Action::SetActiveIdentity => {
                let params: CommitmentPayload = parse(payload)?;
                self.keeper.identities.set_active(params.commitment).await?;
                Ok(Value::Null)
            }
            Action::RenameIdentity => {
                let params: RenamePayload = parse(payload)?;
                self.keeper
                    .identities
                    .rename(params.commitment, params.name)
                    .await?;
                Ok(Value::Null)
            }
            Action::DeleteIdentity => {
                let params: CommitmentPayload = parse(payload)?;
                self.keeper.identities.delete(params.commitment).await?;
                Ok(Value::Null)
            }
            Action::DeleteAllIdentities => {
                self.keeper.identities.delete_all().await?;
                Ok(Value::Null)
            }
            Action::GenSemaphoreProof => {
                let params: SemaphoreProofRequest = parse(payload)?;
                let identity = self.keeper.identities.active_identity().await?;
                let proof = self
                    .keeper
                    .semaphore
                    .generate(&identity, params, cancel)
                    .await?;
                self.keeper
                    .history
                    .append(OperationType::GenerateProof, identity.snapshot())
                    .await?;
                to_value(proof)
            }
            Action::GenRlnProof => {
                let params: RlnProofRequest = parse(payload)?;
                let identity = self.keeper.identities.active_identity().await?;
                let proof = self.keeper.rln.generate(&identity, params, cancel).await?;
                self.keeper
                    .history
                    .append(OperationType::GenerateProof, identity.snapshot())
                    .await?;
                to_value(proof)
            }
            Action::SetHostPermission => {
                let params: HostPermission = parse(payload)?;
                to_value(self.keeper.permissions.set(params).await?)
            }
            Action::GetHostPermission => {
                let params: HostPayload = parse(payload)?;
                to_value(self.keeper.permissions.get(&params.host).await)
            }
            Action::GetPendingRequests => to_value(self.keeper.approvals.pending().await),
            Action::FinalizeRequest => {
                let params: FinalizePayload = parse(payload)?;
                self.keeper
                    .approvals
                    .resolve(&params.id, params.status, params.data)
                    .await?;
                Ok(Value::Null)
            }
            Action::GetHistory => {
                let filter: OperationFilter = parse_or_default(payload)?;
                to_value(self.keeper.history.list(filter).await)
            }
            Action::ClearHistory => {
                self.keeper.history.clear().await?;
                Ok(Value::Null)
            }
        }
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|err| ZKeeperError::InvalidInput(format!("bad payload: {err}")))
}

fn parse_or_default<T: DeserializeOwned + Default>(payload: Value) -> Result<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    parse(payload)
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| ZKeeperError::Serialization(err.to_string()))
}
