use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};

use super::{CartBackend, CartMutation};
use crate::domain::{Cart, OwnerId};
use crate::services::CartView;
use crate::Result;

/// Whether the local view matches the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncState {
    Synced,
    Pending,
    Failed { message: String },
}

struct LocalState {
    view: Option<CartView>,
    next_seq: u64,
    /// Sequence of the newest response applied to `view`.
    applied_seq: u64,
    pending: VecDeque<(u64, CartMutation)>,
    sync: SyncState,
}

impl LocalState {
    fn latest_issued(&self) -> u64 { self.next_seq.saturating_sub(1) }

    fn settle_sync(&mut self) {
        if self.pending.is_empty() {
            self.sync = SyncState::Synced;
        }
    }
}

/// Marks `seq` as sent when dropped, so a failed or cancelled send still
/// hands the turn on.
struct SendTurn<'a> {
    sent: &'a watch::Sender<u64>,
    seq: u64,
}

impl Drop for SendTurn<'_> {
    fn drop(&mut self) {
        let seq = self.seq;
        self.sent.send_modify(|done| *done = (*done).max(seq));
    }
}

/// Optimistic cart view over a [`CartBackend`].
///
/// Mutations show up locally at once. Sends go out one at a time in issue
/// order: a mutation waits until every earlier send has finished. Only the
/// newest mutation's response may replace the local view; older responses
/// are dropped. On failure the view is rebuilt from a fresh server read
/// rather than by undoing the local change.
pub struct OptimisticCart {
    backend: Arc<dyn CartBackend>,
    owner: OwnerId,
    currency: String,
    state: Mutex<LocalState>,
    /// Highest sequence whose send has finished.
    sent: watch::Sender<u64>,
}

impl OptimisticCart {
    pub fn new(backend: Arc<dyn CartBackend>, owner: OwnerId, currency: &str) -> Self {
        Self {
            backend,
            owner,
            currency: currency.to_uppercase(),
            state: Mutex::new(LocalState {
                view: None,
                next_seq: 1,
                applied_seq: 0,
                pending: VecDeque::new(),
                sync: SyncState::Synced,
            }),
            sent: watch::channel(0).0,
        }
    }

    pub async fn snapshot(&self) -> Option<CartView> { self.state.lock().await.view.clone() }

    pub async fn sync_state(&self) -> SyncState { self.state.lock().await.sync.clone() }

    pub async fn pending_count(&self) -> usize { self.state.lock().await.pending.len() }

    /// Replaces the local view with the server's cart.
    pub async fn refresh(&self) -> Result<Option<CartView>> {
        let issued_before = self.state.lock().await.latest_issued();
        let fetched = self.backend.fetch(&self.owner).await?;
        let mut state = self.state.lock().await;
        // A mutation issued during the read will bring its own response.
        if state.latest_issued() == issued_before {
            state.view = fetched;
            state.applied_seq = issued_before;
            state.settle_sync();
        }
        Ok(state.view.clone())
    }

    /// Applies `mutation` locally, sends it, and reconciles with the response.
    pub async fn apply(&self, mutation: CartMutation) -> Result<Option<CartView>> {
        let seq = {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            let view = state
                .view
                .get_or_insert_with(|| CartView { cart: Cart::new(self.owner.clone(), &self.currency), unavailable: vec![] });
            mutation.apply_local(&mut view.cart)?;
            state.next_seq += 1;
            state.pending.push_back((seq, mutation.clone()));
            state.sync = SyncState::Pending;
            seq
        };

        let turn = SendTurn { sent: &self.sent, seq };
        self.wait_turn(seq).await;
        let response = self.backend.send(&self.owner, &mutation).await;
        drop(turn);

        let needs_refetch = {
            let mut state = self.state.lock().await;
            state.pending.retain(|(s, _)| *s != seq);
            let superseded = seq < state.latest_issued();
            match &response {
                Ok(view) if !superseded => {
                    state.view = Some(view.clone());
                    state.applied_seq = seq;
                    state.settle_sync();
                    false
                }
                Ok(_) => {
                    tracing::debug!(seq, "dropping response superseded by a newer mutation");
                    // A newer response already landed but was computed before this write.
                    state.pending.is_empty() && state.applied_seq > seq
                }
                Err(err) => {
                    tracing::warn!(seq, error = %err, "cart mutation failed; reconciling with server");
                    state.sync = SyncState::Failed { message: err.to_string() };
                    !superseded || state.pending.is_empty()
                }
            }
        };

        if needs_refetch {
            self.reconcile().await;
        }
        response?;
        Ok(self.snapshot().await)
    }

    async fn wait_turn(&self, seq: u64) {
        let mut sent = self.sent.subscribe();
        // `self.sent` outlives this call, so the wait only ends on our turn.
        let _ = sent.wait_for(|done| done + 1 >= seq).await;
    }

    /// Re-reads the server cart after a failure or an out-of-order response,
    /// keeping a `Failed` state visible.
    async fn reconcile(&self) {
        let issued_before = self.state.lock().await.latest_issued();
        match self.backend.fetch(&self.owner).await {
            Ok(fetched) => {
                let mut state = self.state.lock().await;
                if state.latest_issued() == issued_before {
                    state.view = fetched;
                    state.applied_seq = issued_before;
                    if state.pending.is_empty() && !matches!(state.sync, SyncState::Failed { .. }) {
                        state.sync = SyncState::Synced;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not re-read cart");
                self.state.lock().await.sync = SyncState::Failed { message: err.to_string() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, Product, ProductId};
    use crate::outbound::memory::{InMemoryCartStore, InMemoryCatalog, MemoryEventLog};
    use crate::services::{fast_backoff, CartService, TotalAggregator};
    use crate::Error;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    /// Wraps the real service; can hold back the next send or fail it.
    struct ScriptedBackend {
        inner: CartService,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl CartBackend for ScriptedBackend {
        async fn fetch(&self, owner: &OwnerId) -> Result<Option<CartView>> { self.inner.fetch(owner).await }

        async fn send(&self, owner: &OwnerId, mutation: &CartMutation) -> Result<CartView> {
            let gate = self.gate.lock().await.take();
            if let Some(rx) = gate {
                let _ = rx.await;
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::Upstream("connection reset".into()));
            }
            self.inner.send(owner, mutation).await
        }
    }

    async fn setup() -> (Arc<ScriptedBackend>, ProductId, OwnerId) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let product = ProductId::new();
        catalog.insert(Product::new(product, "Kikoy", Money::from_minor(1200, "USD"))).await;
        let service = CartService::new(
            Arc::new(InMemoryCartStore::new()),
            TotalAggregator::new(catalog),
            Arc::new(MemoryEventLog::new()),
            "USD",
        )
        .with_write_backoff(fast_backoff(4));
        let backend = Arc::new(ScriptedBackend { inner: service, gate: Mutex::new(None), fail_next: AtomicBool::new(false) });
        (backend, product, OwnerId::new("buyer-1").unwrap())
    }

    #[tokio::test]
    async fn test_confirmed_mutation_takes_server_total() {
        let (backend, product, owner) = setup().await;
        let cart = OptimisticCart::new(backend, owner, "USD");

        let view = cart.apply(CartMutation::Add { product_id: product, quantity: 2 }).await.unwrap().unwrap();
        assert_eq!(view.cart.quantity_of(product), 2);
        assert_eq!(view.cart.total_amount().amount(), Decimal::new(2400, 2));
        assert_eq!(cart.sync_state().await, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_by_refetch() {
        let (backend, product, owner) = setup().await;
        let cart = OptimisticCart::new(backend.clone(), owner, "USD");
        cart.apply(CartMutation::Add { product_id: product, quantity: 1 }).await.unwrap();

        backend.fail_next.store(true, Ordering::SeqCst);
        let err = cart.apply(CartMutation::Add { product_id: product, quantity: 5 }).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Upstream);

        let view = cart.snapshot().await.unwrap();
        assert_eq!(view.cart.quantity_of(product), 1);
        assert!(matches!(cart.sync_state().await, SyncState::Failed { .. }));

        cart.refresh().await.unwrap();
        assert_eq!(cart.sync_state().await, SyncState::Synced);
    }

    async fn wait_for_pending(cart: &OptimisticCart, n: usize) {
        while cart.pending_count().await < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_stale_response_is_dropped_and_view_converges() {
        let (backend, product, owner) = setup().await;
        let (release, gate) = oneshot::channel();
        *backend.gate.lock().await = Some(gate);
        let cart = Arc::new(OptimisticCart::new(backend, owner, "USD"));

        let slow = {
            let cart = cart.clone();
            tokio::spawn(async move { cart.apply(CartMutation::Adjust { product_id: product, delta: 1 }).await })
        };
        wait_for_pending(&cart, 1).await;
        assert_eq!(cart.snapshot().await.unwrap().cart.quantity_of(product), 1);

        let fast = {
            let cart = cart.clone();
            tokio::spawn(async move { cart.apply(CartMutation::Add { product_id: product, quantity: 1 }).await })
        };
        wait_for_pending(&cart, 2).await;
        assert_eq!(cart.snapshot().await.unwrap().cart.quantity_of(product), 2);
        assert_eq!(cart.sync_state().await, SyncState::Pending);

        release.send(()).unwrap();
        slow.await.unwrap().unwrap();
        fast.await.unwrap().unwrap();

        let view = cart.snapshot().await.unwrap();
        assert_eq!(view.cart.quantity_of(product), 2);
        assert_eq!(view.cart.total_amount().amount(), Decimal::new(2400, 2));
        assert_eq!(cart.sync_state().await, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_later_mutation_waits_for_earlier_send() {
        let (backend, product, owner) = setup().await;
        let cart = Arc::new(OptimisticCart::new(backend.clone(), owner.clone(), "USD"));
        cart.apply(CartMutation::Add { product_id: product, quantity: 2 }).await.unwrap();

        let (release, gate) = oneshot::channel();
        *backend.gate.lock().await = Some(gate);
        let clear = {
            let cart = cart.clone();
            tokio::spawn(async move { cart.apply(CartMutation::Clear).await })
        };
        wait_for_pending(&cart, 1).await;
        let add = {
            let cart = cart.clone();
            tokio::spawn(async move { cart.apply(CartMutation::Add { product_id: product, quantity: 1 }).await })
        };
        wait_for_pending(&cart, 2).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // The add is held until the clear has gone through.
        let server = backend.inner.fetch(&owner).await.unwrap().unwrap();
        assert_eq!(server.cart.quantity_of(product), 2);
        assert_eq!(cart.snapshot().await.unwrap().cart.quantity_of(product), 1);

        release.send(()).unwrap();
        clear.await.unwrap().unwrap();
        add.await.unwrap().unwrap();

        let server = backend.inner.fetch(&owner).await.unwrap().unwrap();
        assert_eq!(server.cart.quantity_of(product), 1);
        assert_eq!(server.cart.total_amount().amount(), Decimal::new(1200, 2));
        assert_eq!(cart.snapshot().await.unwrap().cart, server.cart);
        assert_eq!(cart.sync_state().await, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_failed_send_hands_turn_to_next() {
        let (backend, product, owner) = setup().await;
        let cart = OptimisticCart::new(backend.clone(), owner, "USD");
        backend.fail_next.store(true, Ordering::SeqCst);
        assert!(cart.apply(CartMutation::Add { product_id: product, quantity: 1 }).await.is_err());

        let view = cart.apply(CartMutation::Add { product_id: product, quantity: 3 }).await.unwrap().unwrap();
        assert_eq!(view.cart.quantity_of(product), 3);
    }

    #[tokio::test]
    async fn test_local_change_is_visible_before_confirmation() {
        let (backend, product, owner) = setup().await;
        let (release, gate) = oneshot::channel();
        *backend.gate.lock().await = Some(gate);
        let cart = Arc::new(OptimisticCart::new(backend, owner, "USD"));

        let pending = {
            let cart = cart.clone();
            tokio::spawn(async move { cart.apply(CartMutation::Adjust { product_id: product, delta: 3 }).await })
        };
        wait_for_pending(&cart, 1).await;
        assert_eq!(cart.snapshot().await.unwrap().cart.quantity_of(product), 3);
        assert_eq!(cart.sync_state().await, SyncState::Pending);

        release.send(()).unwrap();
        pending.await.unwrap().unwrap();
        assert_eq!(cart.sync_state().await, SyncState::Synced);
    }
}
