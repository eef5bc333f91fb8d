//! Event subscription bridge: serialises transitions onto the single client snapshot.

use crate::chain::{ChainClient, ChainError};
use engine::{apply, IngestError, LedgerEvent, Snapshot, TransactionKind, Transition};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("projector stopped")]
    Closed,
    #[error(transparent)]
    Invalid(#[from] IngestError),
}

struct Command {
    transition: Transition,
    applied: Option<oneshot::Sender<Arc<Snapshot>>>,
}

/// Handle to the projector. Cloning is cheap; all clones feed the same queue.
#[derive(Clone)]
pub struct Bridge {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<Arc<Snapshot>>,
}

/// Spawns the projector task. Transitions are applied strictly in arrival
/// order and every resulting snapshot is published whole.
pub fn start(initial: Snapshot) -> (Bridge, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Command>(QUEUE_DEPTH);
    let (state_tx, state_rx) = watch::channel(Arc::new(initial));
    let handle = tokio::spawn(async move {
        let mut current = state_tx.borrow().clone();
        info!(target = "exchange", version = current.version, "projector started");
        while let Some(Command { transition, applied }) = rx.recv().await {
            let next = apply(&current, transition);
            if next.version == current.version {
                debug!(target = "exchange", "transition was a no-op");
            } else {
                current = Arc::new(next);
                // no receivers left is fine, the Bridge keeps one
                let _ = state_tx.send(current.clone());
            }
            if let Some(ack) = applied {
                let _ = ack.send(current.clone());
            }
        }
        info!(target = "exchange", "projector stopped");
    });
    (Bridge { tx, state: state_rx }, handle)
}

impl Bridge {
    /// Queues a transition. Returns once queued, not once applied.
    pub async fn send(&self, t: Transition) -> Result<(), BridgeError> {
        self.tx.send(Command { transition: t, applied: None }).await.map_err(|_| BridgeError::Closed)
    }

    /// Queues a transition and waits for the projector to apply it. The
    /// returned snapshot reflects it and everything queued before it.
    pub async fn commit(&self, t: Transition) -> Result<Arc<Snapshot>, BridgeError> {
        let (ack, applied) = oneshot::channel();
        self.tx
            .send(Command { transition: t, applied: Some(ack) })
            .await
            .map_err(|_| BridgeError::Closed)?;
        applied.await.map_err(|_| BridgeError::Closed)
    }

    /// Validates a ledger event and queues it.
    pub async fn ingest(&self, event: LedgerEvent) -> Result<(), BridgeError> {
        if let Err(e) = event.validate() {
            warn!(target = "exchange", kind = event.kind(), error = %e, "rejecting ledger event");
            return Err(e.into());
        }
        self.send(Transition::Event { event }).await
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.state.clone()
    }

    /// Waits until the published snapshot reaches `version`.
    pub async fn wait_for(&self, version: u64) -> Arc<Snapshot> {
        let mut rx = self.subscribe();
        loop {
            let s = rx.borrow_and_update().clone();
            if s.version >= version || rx.changed().await.is_err() {
                return s;
            }
        }
    }

    /// Tracks one ledger transaction: REQUEST now, FAIL if the ledger rejects
    /// it. Success is recorded when the confirming ledger event arrives.
    /// Errors end up in the snapshot, never with the caller.
    pub async fn submit<F, T>(&self, kind: TransactionKind, ledger_call: F) -> Option<T>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        if self.send(Transition::TransactionRequest { kind }).await.is_err() {
            return None;
        }
        match ledger_call.await {
            Ok(v) => {
                info!(target = "exchange", ?kind, "transaction confirmed");
                Some(v)
            }
            Err(e) => {
                warn!(target = "exchange", ?kind, error = %e, "transaction failed");
                let _ = self.send(Transition::TransactionFail { kind, reason: e.to_string() }).await;
                None
            }
        }
    }
}

/// Polls the ledger for new blocks and forwards their events, starting after `from_block`.
pub fn spawn_live_feed(chain: ChainClient, bridge: Bridge, from_block: u64, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next = from_block + 1;
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let head = match chain.block_number().await {
                Ok(h) => h,
                Err(e) => {
                    warn!(target = "exchange", error = %e, "block number poll failed");
                    continue;
                }
            };
            if head < next {
                continue;
            }
            match chain.events_between(next, head).await {
                Ok(events) => {
                    for ev in events {
                        if let Err(BridgeError::Closed) = bridge.ingest(ev).await {
                            return;
                        }
                    }
                    next = head + 1;
                }
                Err(e) => warn!(target = "exchange", error = %e, from = next, to = head, "event poll failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{OrderId, RawOrder, TransactionStatus};

    fn order(id: u64) -> LedgerEvent {
        LedgerEvent::Order(RawOrder {
            id: OrderId(id),
            user: "0xme".into(),
            token_get: "0xa".into(),
            amount_get: 1,
            token_give: "0xb".into(),
            amount_give: 2,
            timestamp: id,
        })
    }

    #[tokio::test]
    async fn test_events_projected_in_order_and_deduplicated() {
        let (bridge, _h) = start(Snapshot::default());
        for id in [1, 2, 2, 3, 1] {
            bridge.ingest(order(id)).await.unwrap();
        }
        bridge.send(Transition::NetworkLoaded { chain_id: 5 }).await.unwrap();
        let s = bridge.wait_for(4).await;
        let ids: Vec<u64> = s.exchange.orders.all().iter().map(|o| o.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(s.provider.chain_id, Some(5));
        assert_eq!(s.version, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_commit_returns_applied_state() {
        let (bridge, _h) = start(Snapshot::default());
        bridge.send(Transition::AccountLoaded { account: "0xme".into() }).await.unwrap();
        let s = bridge.commit(Transition::NetworkLoaded { chain_id: 5 }).await.unwrap();
        assert_eq!(s.version, 2);
        assert_eq!(s.account(), Some(&engine::Address::new("0xme")));
        assert_eq!(bridge.snapshot().version, 2);

        // a no-op still acknowledges with the current state
        let same = bridge.commit(Transition::NetworkLoaded { chain_id: 5 }).await.unwrap();
        assert_eq!(same.version, 2);
    }

    #[tokio::test]
    async fn test_invalid_event_rejected() {
        let (bridge, _h) = start(Snapshot::default());
        let mut bad = RawOrder {
            id: OrderId(1),
            user: "0xme".into(),
            token_get: "0xa".into(),
            amount_get: 0,
            token_give: "0xb".into(),
            amount_give: 2,
            timestamp: 0,
        };
        assert!(matches!(bridge.ingest(LedgerEvent::Order(bad.clone())).await, Err(BridgeError::Invalid(_))));
        bad.amount_get = 1;
        bridge.ingest(LedgerEvent::Order(bad)).await.unwrap();
        assert_eq!(bridge.wait_for(1).await.exchange.orders.all().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_submission_lands_in_state() {
        let (bridge, _h) = start(Snapshot::default());
        let chain = ChainClient::new(None, None, 31337, None);
        let out = bridge.submit(TransactionKind::Cancel, chain.cancel_order(OrderId(9))).await;
        assert!(out.is_none());
        let s = bridge.wait_for(2).await;
        assert_eq!(s.exchange.transaction.kind, Some(TransactionKind::Cancel));
        assert!(matches!(s.exchange.transaction.status, TransactionStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_successful_submission_waits_for_event() {
        let (bridge, _h) = start(Snapshot::default());
        bridge.send(Transition::AccountLoaded { account: "0xme".into() }).await.unwrap();
        let out = bridge
            .submit(TransactionKind::NewOrder, async { Ok::<_, ChainError>("0xabc".to_string()) })
            .await;
        assert_eq!(out.as_deref(), Some("0xabc"));
        assert!(bridge.wait_for(2).await.exchange.transaction.is_pending());
        bridge.ingest(order(1)).await.unwrap();
        let s = bridge.wait_for(3).await;
        assert_eq!(s.exchange.transaction.status, TransactionStatus::Successful);
    }
}
