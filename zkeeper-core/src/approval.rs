//! Request/approval state machine.
//!
//! Every privileged inbound action becomes a [`PendingRequest`] parked on a
//! oneshot completion handle keyed by request id. The approving surface
//! resolves it exactly once; auto-approved origins never surface at all; a
//! surface teardown rejects everything still pending so no caller hangs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ZKeeperError};
use crate::events::{EventBus, KeeperEvent};
use crate::permissions::PermissionTable;

/// Kind of privileged action awaiting approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingRequestType {
    /// An origin asks to connect to the keeper.
    Connect,
    /// An origin asks for a Semaphore membership proof.
    SemaphoreProof,
    /// An origin asks for an RLN proof.
    RlnProof,
}

/// Terminal status chosen by the approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    /// The approver allowed the action.
    Accepted,
    /// The approver declined the action.
    Rejected,
}

/// Outcome delivered to the caller awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Terminal status.
    pub status: RequestStatus,
    /// Data supplied by the approver alongside the status.
    pub data: serde_json::Value,
}

impl Resolution {
    /// An acceptance carrying no data, used for auto-approved origins.
    #[must_use]
    pub fn auto_accepted() -> Self {
        Self {
            status: RequestStatus::Accepted,
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// One privileged action waiting for a human (or pre-authorized) decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    /// Unique request id; the resolution key.
    pub id: String,
    /// What is being asked.
    pub request_type: PendingRequestType,
    /// Action payload, shown to the approver.
    pub payload: serde_json::Value,
    /// Origin that triggered the action.
    pub origin: String,
}

#[derive(Default)]
struct QueueState {
    // Arrival order, for the approving surface.
    order: Vec<PendingRequest>,
    // Completion handle per id; removal on first resolve gives exactly-once.
    waiters: HashMap<String, oneshot::Sender<Resolution>>,
}

/// FIFO queue of pending privileged requests.
pub struct ApprovalQueue {
    permissions: Arc<PermissionTable>,
    events: EventBus,
    state: Mutex<QueueState>,
}

impl ApprovalQueue {
    /// Creates an empty queue consulting the given permission table.
    pub fn new(permissions: Arc<PermissionTable>, events: EventBus) -> Self {
        Self {
            permissions,
            events,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Wraps a privileged action as a pending request and waits for its
    /// resolution.
    ///
    /// If the origin's permission carries `no_approval`, the request resolves
    /// Accepted immediately and never surfaces to the approving surface.
    ///
    /// # Errors
    /// Fails with `RequestAbandoned` if the approving surface goes away
    /// before resolving.
    pub async fn enqueue(
        &self,
        request_type: PendingRequestType,
        payload: serde_json::Value,
        origin: String,
    ) -> Result<Resolution> {
        if let Some(permission) = self.permissions.get(&origin).await {
            if permission.no_approval {
                debug!(%origin, ?request_type, "auto-accepted by host permission");
                return Ok(Resolution::auto_accepted());
            }
        }

        let id = Uuid::new_v4().to_string();
        let rx = {
            let mut state = self.state.lock().await;
            let (tx, rx) = oneshot::channel();
            state.order.push(PendingRequest {
                id: id.clone(),
                request_type,
                payload,
                origin: origin.clone(),
            });
            state.waiters.insert(id.clone(), tx);
            rx
        };
        info!(%id, %origin, ?request_type, "request pending approval");
        self.events.publish(KeeperEvent::PendingRequestsUpdated);

        // A dropped sender means the surface disappeared without resolving.
        rx.await.map_err(|_| ZKeeperError::RequestAbandoned)
    }

    /// Resolves a pending request exactly once.
    ///
    /// # Errors
    /// Fails with `UnknownRequest` if the id is not pending — including the
    /// second of two resolve calls for the same id.
    pub async fn resolve(
        &self,
        id: &str,
        status: RequestStatus,
        data: serde_json::Value,
    ) -> Result<()> {
        let waiter = {
            let mut state = self.state.lock().await;
            let Some(waiter) = state.waiters.remove(id) else {
                return Err(ZKeeperError::UnknownRequest(id.to_string()));
            };
            state.order.retain(|request| request.id != id);
            waiter
        };
        info!(%id, ?status, "request resolved");
        // The awaiting task may itself have gone away; nothing to deliver to.
        let _ = waiter.send(Resolution { status, data });
        self.events.publish(KeeperEvent::PendingRequestsUpdated);
        Ok(())
    }

    /// Rejects everything still pending; the approving surface's teardown
    /// hook. Each waiting caller observes `RequestAbandoned`.
    pub async fn reject_all_pending(&self) {
        let mut state = self.state.lock().await;
        if !state.order.is_empty() {
            warn!(count = state.order.len(), "abandoning pending requests");
        }
        state.order.clear();
        // Dropping the senders fails every outstanding receiver.
        state.waiters.clear();
        drop(state);
        self.events.publish(KeeperEvent::PendingRequestsUpdated);
    }

    /// Snapshot of pending requests in arrival order.
    pub async fn pending(&self) -> Vec<PendingRequest> {
        self.state.lock().await.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::HostPermission;
    use crate::storage::{MemoryStore, PersistedStore};
    use crate::vault::Vault;
    use secrecy::SecretString;

    async fn fixture() -> (Arc<PermissionTable>, Arc<ApprovalQueue>) {
        let store = Arc::new(MemoryStore::new()) as Arc<dyn PersistedStore>;
        let vault = Arc::new(Vault::new(Arc::clone(&store)));
        vault.initialize(&SecretString::from("pw")).await.unwrap();
        let permissions = Arc::new(PermissionTable::new(store, vault));
        let queue = Arc::new(ApprovalQueue::new(
            Arc::clone(&permissions),
            EventBus::new(),
        ));
        (permissions, queue)
    }

    #[tokio::test]
    async fn test_enqueue_then_resolve_accepted() {
        let (_permissions, queue) = fixture().await;

        let waiting = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .enqueue(
                        PendingRequestType::Connect,
                        serde_json::json!({}),
                        "https://example.com".to_string(),
                    )
                    .await
            }
        });

        // Wait for the request to surface.
        let id = loop {
            let pending = queue.pending().await;
            if let Some(request) = pending.first() {
                assert_eq!(request.request_type, PendingRequestType::Connect);
                assert_eq!(request.origin, "https://example.com");
                break request.id.clone();
            }
            tokio::task::yield_now().await;
        };

        queue
            .resolve(&id, RequestStatus::Accepted, serde_json::json!({}))
            .await
            .unwrap();

        let resolution = waiting.await.unwrap().unwrap();
        assert_eq!(resolution.status, RequestStatus::Accepted);
        assert_eq!(resolution.data, serde_json::json!({}));
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_resolve_fails_with_unknown_request() {
        let (_permissions, queue) = fixture().await;

        let waiting = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .enqueue(
                        PendingRequestType::Connect,
                        serde_json::json!({}),
                        "https://example.com".to_string(),
                    )
                    .await
            }
        });

        let id = loop {
            if let Some(request) = queue.pending().await.first() {
                break request.id.clone();
            }
            tokio::task::yield_now().await;
        };

        queue
            .resolve(&id, RequestStatus::Accepted, serde_json::json!({ "ok": true }))
            .await
            .unwrap();
        let err = queue
            .resolve(&id, RequestStatus::Rejected, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ZKeeperError::UnknownRequest(_)));

        // The first resolution is the one delivered.
        let resolution = waiting.await.unwrap().unwrap();
        assert_eq!(resolution.status, RequestStatus::Accepted);
        assert_eq!(resolution.data, serde_json::json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_fails() {
        let (_permissions, queue) = fixture().await;
        let err = queue
            .resolve("nope", RequestStatus::Accepted, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ZKeeperError::UnknownRequest(_)));
    }

    #[tokio::test]
    async fn test_no_approval_permission_short_circuits() {
        let (permissions, queue) = fixture().await;
        permissions
            .set(HostPermission {
                host: "https://trusted.app".to_string(),
                no_approval: true,
            })
            .await
            .unwrap();

        let resolution = queue
            .enqueue(
                PendingRequestType::SemaphoreProof,
                serde_json::json!({}),
                "https://trusted.app".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(resolution.status, RequestStatus::Accepted);
        // Never surfaced.
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_abandons_pending_requests() {
        let (_permissions, queue) = fixture().await;

        let waiting = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .enqueue(
                        PendingRequestType::RlnProof,
                        serde_json::json!({}),
                        "https://example.com".to_string(),
                    )
                    .await
            }
        });

        while queue.pending().await.is_empty() {
            tokio::task::yield_now().await;
        }

        queue.reject_all_pending().await;

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, ZKeeperError::RequestAbandoned));
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_requests_are_independent() {
        let (_permissions, queue) = fixture().await;

        let first = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .enqueue(
                        PendingRequestType::Connect,
                        serde_json::json!({"n": 1}),
                        "https://a.test".to_string(),
                    )
                    .await
            }
        });
        let second = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .enqueue(
                        PendingRequestType::Connect,
                        serde_json::json!({"n": 2}),
                        "https://b.test".to_string(),
                    )
                    .await
            }
        });

        let ids = loop {
            let pending = queue.pending().await;
            if pending.len() == 2 {
                break (pending[0].id.clone(), pending[1].id.clone());
            }
            tokio::task::yield_now().await;
        };

        // Resolve the second arrival first; the first stays pending.
        queue
            .resolve(&ids.1, RequestStatus::Accepted, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(queue.pending().await.len(), 1);

        queue
            .resolve(&ids.0, RequestStatus::Rejected, serde_json::json!({"why": "no"}))
            .await
            .unwrap();

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, RequestStatus::Rejected);
        assert_eq!(first.data, serde_json::json!({"why": "no"}));
        let second = second.await.unwrap().unwrap();
        assert_eq!(second.status, RequestStatus::Accepted);
    }
}
