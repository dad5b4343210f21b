//! Correlates outbound calls with their responses by id.
//!
//! Ids come from one atomic counter and are never reused. A call is
//! registered before its request is written, so a response that arrives
//! before anyone waits on it is kept in the call's oneshot slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value as Json;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::rpc::message::RpcError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The peer answered with an error object.
    #[error("{0}")]
    Remote(RpcError),
    #[error("call {id} abandoned before a response arrived")]
    Abandoned { id: u64 },
    #[error("transport closed")]
    Disconnected,
}

type Outcome = Result<Json, CallError>;

pub struct Multiplexer {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strictly increasing, safe under concurrent callers.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and start tracking it.
    pub fn register(&self) -> PendingCall {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.table().insert(id, tx);
        PendingCall { id, rx }
    }

    /// Hand a response to its waiter. Returns `false` for unknown ids.
    pub fn deliver(&self, id: u64, outcome: Result<Json, RpcError>) -> bool {
        let Some(tx) = self.table().remove(&id) else {
            warn!(id, "dropping response for unknown or already resolved call");
            return false;
        };
        if tx.send(outcome.map_err(CallError::Remote)).is_err() {
            debug!(id, "waiter went away before its response arrived");
        }
        true
    }

    /// Stop tracking `id`; a later response for it is dropped.
    pub fn cancel(&self, id: u64) -> bool {
        self.table().remove(&id).is_some()
    }

    /// Wake every waiter with [`CallError::Abandoned`]. Returns how many.
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<(u64, oneshot::Sender<Outcome>)> = self.table().drain().collect();
        let count = drained.len();
        for (id, tx) in drained {
            let _ = tx.send(Err(CallError::Abandoned { id }));
        }
        if count > 0 {
            debug!(count, "abandoned pending calls");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.table().len()
    }
}

/// Handle to one outstanding call.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<Json, CallError> {
        self.rx.await.unwrap_or(Err(CallError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use serde_json::json;

    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let mux = Multiplexer::new();
        let ids: Vec<u64> = (0..5).map(|_| mux.allocate_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn concurrent_allocation_never_repeats() {
        let mux = Arc::new(Multiplexer::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mux = Arc::clone(&mux);
                thread::spawn(move || (0..250).map(|_| mux.allocate_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("join"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000);
    }

    #[tokio::test]
    async fn deliver_before_wait_is_not_lost() {
        let mux = Multiplexer::new();
        let call = mux.register();
        assert!(mux.deliver(call.id(), Ok(json!({"ok": true}))));
        assert_eq!(call.wait().await, Ok(json!({"ok": true})));
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test]
    async fn reverse_order_delivery_reaches_each_waiter() {
        let mux = Multiplexer::new();
        let calls: Vec<PendingCall> = (0..16).map(|_| mux.register()).collect();
        let ids: Vec<u64> = calls.iter().map(PendingCall::id).collect();
        for id in ids.iter().rev() {
            assert!(mux.deliver(*id, Ok(json!(id))));
        }
        for call in calls {
            let id = call.id();
            assert_eq!(call.wait().await, Ok(json!(id)));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiters_on_separate_tasks_get_their_own_results() {
        let mux = Arc::new(Multiplexer::new());
        let calls: Vec<PendingCall> = (0..8).map(|_| mux.register()).collect();
        let ids: Vec<u64> = calls.iter().map(PendingCall::id).collect();
        let handles: Vec<_> = calls
            .into_iter()
            .map(|call| tokio::spawn(async move { (call.id(), call.wait().await) }))
            .collect();
        for id in ids.iter().rev() {
            mux.deliver(*id, Ok(json!(id * 10)));
        }
        for handle in handles {
            let (id, result) = handle.await.expect("join");
            assert_eq!(result, Ok(json!(id * 10)));
        }
    }

    #[tokio::test]
    async fn unknown_and_duplicate_ids_are_dropped() {
        let mux = Multiplexer::new();
        assert!(!mux.deliver(42, Ok(Json::Null)));
        let call = mux.register();
        let id = call.id();
        assert!(mux.deliver(id, Err(RpcError::new(-32000, "boom"))));
        assert!(!mux.deliver(id, Ok(Json::Null)));
        assert_eq!(
            call.wait().await,
            Err(CallError::Remote(RpcError::new(-32000, "boom")))
        );
    }

    #[tokio::test]
    async fn abandon_wakes_everyone() {
        let mux = Multiplexer::new();
        let first = mux.register();
        let second = mux.register();
        assert_eq!(mux.abandon_all(), 2);
        assert_eq!(first.wait().await, Err(CallError::Abandoned { id: 1 }));
        assert_eq!(second.wait().await, Err(CallError::Abandoned { id: 2 }));
    }

    #[tokio::test]
    async fn dropped_multiplexer_disconnects_waiters() {
        let mux = Multiplexer::new();
        let call = mux.register();
        drop(mux);
        assert_eq!(call.wait().await, Err(CallError::Disconnected));
    }
}
