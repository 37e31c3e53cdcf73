/// `link/registry.rs` - correlation of outstanding requests with their callers
///
/// Each registered message id owns a oneshot sink and a timeout task. An entry
/// is removed under the lock before it is fulfilled, so it settles exactly once
/// whichever of settle / expire / reject_all reaches it first.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::protocol::Response;
use crate::error::{LinkError, LinkResult};

struct PendingCall {
    tx: oneshot::Sender<LinkResult<Response>>,
    timer: JoinHandle<()>,
}

/// Shared handle; clones refer to the same table.
#[derive(Clone)]
pub struct CorrelationRegistry {
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
    timeout: Duration,
}

/// Awaitable side of a registered call.
pub struct PendingHandle {
    message_id: String,
    rx: oneshot::Receiver<LinkResult<Response>>,
}

impl PendingHandle {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl Future for PendingHandle {
    type Output = LinkResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| Err(LinkError::Transport("pending call was dropped".to_string())))
        })
    }
}

impl CorrelationRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `message_id` and arm its timeout. Must be called inside a tokio runtime.
    pub fn register(&self, message_id: &str) -> LinkResult<PendingHandle> {
        let mut pending = self.lock();
        if pending.contains_key(message_id) {
            return Err(LinkError::DuplicateMessageId(message_id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let timer = {
            let registry = self.clone();
            let id = message_id.to_string();
            let after = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                registry.expire(&id);
            })
        };
        pending.insert(message_id.to_string(), PendingCall { tx, timer });

        Ok(PendingHandle {
            message_id: message_id.to_string(),
            rx,
        })
    }

    /// Fulfil the call waiting on `message_id`. Returns false for unknown ids.
    pub fn settle(&self, message_id: &str, response: Response) -> bool {
        let Some(call) = self.lock().remove(message_id) else {
            log::debug!("Dropping response for unknown message {message_id} (late or duplicate)");
            return false;
        };
        call.timer.abort();
        let _ = call.tx.send(Ok(response));
        true
    }

    /// Timer path: reject with a timeout error if still pending.
    pub fn expire(&self, message_id: &str) -> bool {
        let Some(call) = self.lock().remove(message_id) else {
            return false;
        };
        log::warn!("Request {message_id} timed out after {:?}", self.timeout);
        let _ = call.tx.send(Err(LinkError::Timeout {
            message_id: message_id.to_string(),
            after_ms: self.timeout.as_millis() as u64,
        }));
        true
    }

    /// Forget a call whose request never left the client.
    pub fn cancel(&self, message_id: &str) -> bool {
        match self.lock().remove(message_id) {
            Some(call) => {
                call.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Reject everything currently pending and clear the table.
    pub fn reject_all(&self, err: LinkError) -> usize {
        let drained: Vec<(String, PendingCall)> = self.lock().drain().collect();
        let count = drained.len();
        for (_, call) in drained {
            call.timer.abort();
            let _ = call.tx.send(Err(err.clone()));
        }
        if count > 0 {
            log::warn!("Rejected {count} pending request(s): {err}");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.lock().contains_key(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CorrelationRegistry {
        CorrelationRegistry::new(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn settle_resolves_exactly_once() {
        let reg = registry();
        let handle = reg.register("a").unwrap();
        assert_eq!(reg.pending_count(), 1);

        assert!(reg.settle("a", Response::ok("a", json!({ "id": "Root" }))));
        assert!(!reg.settle("a", Response::ok("a", json!(null))));
        assert_eq!(reg.pending_count(), 0);

        let resp = handle.await.unwrap();
        assert_eq!(resp.data, Some(json!({ "id": "Root" })));
    }

    #[tokio::test]
    async fn settle_unknown_id_is_noop() {
        let reg = registry();
        let _handle = reg.register("known").unwrap();
        assert!(!reg.settle("other", Response::ok("other", json!(1))));
        assert!(reg.is_pending("known"));
    }

    #[tokio::test]
    async fn distinct_ids_settle_independently_in_any_order() {
        let reg = registry();
        let first = reg.register("1").unwrap();
        let second = reg.register("2").unwrap();

        reg.settle("2", Response::ok("2", json!("two")));
        reg.settle("1", Response::ok("1", json!("one")));

        assert_eq!(first.await.unwrap().data, Some(json!("one")));
        assert_eq!(second.await.unwrap().data, Some(json!("two")));
    }

    #[tokio::test]
    async fn duplicate_live_id_is_rejected() {
        let reg = registry();
        let _handle = reg.register("dup").unwrap();
        assert_eq!(
            reg.register("dup").err(),
            Some(LinkError::DuplicateMessageId("dup".to_string()))
        );
    }

    #[tokio::test]
    async fn timeout_rejects_and_removes() {
        let reg = CorrelationRegistry::new(Duration::from_millis(20));
        let handle = reg.register("slow").unwrap();

        let err = handle.await.unwrap_err();
        assert_eq!(
            err,
            LinkError::Timeout {
                message_id: "slow".to_string(),
                after_ms: 20
            }
        );
        assert_eq!(reg.pending_count(), 0);
        assert!(!reg.settle("slow", Response::ok("slow", json!(null))));
    }

    #[tokio::test]
    async fn timeout_of_one_call_leaves_others_pending() {
        let reg = CorrelationRegistry::new(Duration::from_millis(20));
        let slow = reg.register("slow").unwrap();
        let fast = reg.register("fast").unwrap();
        reg.settle("fast", Response::ok("fast", json!(1)));

        assert!(fast.await.is_ok());
        assert!(matches!(slow.await, Err(LinkError::Timeout { .. })));
    }

    #[tokio::test]
    async fn reject_all_clears_everything_once() {
        let reg = registry();
        let a = reg.register("a").unwrap();
        let b = reg.register("b").unwrap();

        let err = LinkError::closed(1006, "abnormal closure");
        assert_eq!(reg.reject_all(err.clone()), 2);
        assert_eq!(reg.pending_count(), 0);

        // registered after the bulk rejection, untouched by it
        let c = reg.register("c").unwrap();
        assert_eq!(reg.pending_count(), 1);
        assert_eq!(reg.reject_all(err.clone()), 1);

        assert_eq!(a.await.unwrap_err(), err);
        assert_eq!(b.await.unwrap_err(), err);
        assert_eq!(c.await.unwrap_err(), err);
        assert!(!reg.settle("a", Response::ok("a", json!(null))));
    }

    #[tokio::test]
    async fn cancel_drops_without_settling() {
        let reg = registry();
        let handle = reg.register("never-sent").unwrap();
        assert!(reg.cancel("never-sent"));
        assert!(!reg.cancel("never-sent"));
        assert!(matches!(handle.await, Err(LinkError::Transport(_))));
    }
}
