//! Signal bus for primary-store save and delete events.
//!
//! Receivers subscribe per model and signal kind. A receiver can be
//! temporarily disabled through a `DisabledReceivers` token; it is enabled
//! again when the token drops, on every exit path.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::store::Row;

/// Kinds of primary-store signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalKind {
    PostSave,
    PreDelete,
    PostDelete,
}

/// A save or delete of one row.
#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    /// Last known state of the row.
    pub row: Row,
}

impl Signal {
    pub fn post_save(row: Row) -> Self {
        Self {
            kind: SignalKind::PostSave,
            row,
        }
    }

    pub fn pre_delete(row: Row) -> Self {
        Self {
            kind: SignalKind::PreDelete,
            row,
        }
    }

    pub fn post_delete(row: Row) -> Self {
        Self {
            kind: SignalKind::PostDelete,
            row,
        }
    }
}

/// Handler invoked for a matching signal.
pub type Receiver = Arc<dyn Fn(Signal) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifies a connected receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReceiverId(u64);

struct Registration {
    id: ReceiverId,
    model: String,
    kinds: BTreeSet<SignalKind>,
    /// Search app that declared the receiver, if any.
    owner: Option<String>,
    receiver: Receiver,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    registrations: Vec<Registration>,
    /// Receiver id to number of outstanding disable tokens.
    disabled: HashMap<ReceiverId, usize>,
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide registry of signal receivers.
///
/// Cloning shares the registry.
#[derive(Clone, Default)]
pub struct SignalBus {
    state: Arc<Mutex<BusState>>,
    collector_gate: Arc<AsyncMutex<()>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a receiver for `kinds` signals of `model`.
    ///
    /// # Arguments
    ///
    /// * `model` - Primary-store model the receiver listens to
    /// * `kinds` - Signal kinds the receiver handles
    /// * `owner` - Search app that declared the receiver, used to disable it during deletion collection
    /// * `receiver` - The handler
    pub fn connect(
        &self,
        model: &str,
        kinds: &[SignalKind],
        owner: Option<&str>,
        receiver: Receiver,
    ) -> ReceiverId {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = ReceiverId(state.next_id);
        state.registrations.push(Registration {
            id,
            model: model.to_string(),
            kinds: kinds.iter().copied().collect(),
            owner: owner.map(str::to_string),
            receiver,
        });
        debug!(model = %model, receiver = id.0, "Signal receiver connected");
        id
    }

    /// Disconnect a receiver. Returns whether it was connected.
    pub fn disconnect(&self, id: ReceiverId) -> bool {
        let mut state = lock(&self.state);
        let before = state.registrations.len();
        state.registrations.retain(|registration| registration.id != id);
        state.disabled.remove(&id);
        before != state.registrations.len()
    }

    /// Receivers declared by `owner` handling any of `kinds`.
    pub fn receivers_owned_by(&self, owner: &str, kinds: &[SignalKind]) -> Vec<ReceiverId> {
        lock(&self.state)
            .registrations
            .iter()
            .filter(|registration| registration.owner.as_deref() == Some(owner))
            .filter(|registration| kinds.iter().any(|kind| registration.kinds.contains(kind)))
            .map(|registration| registration.id)
            .collect()
    }

    /// Disable receivers until the returned token drops.
    ///
    /// Tokens nest: a receiver disabled twice stays disabled until both
    /// tokens are dropped.
    pub fn disable(&self, ids: Vec<ReceiverId>) -> DisabledReceivers {
        let mut state = lock(&self.state);
        for id in &ids {
            *state.disabled.entry(*id).or_insert(0) += 1;
        }
        DisabledReceivers {
            state: Arc::clone(&self.state),
            ids,
        }
    }

    pub fn is_enabled(&self, id: ReceiverId) -> bool {
        let state = lock(&self.state);
        state.registrations.iter().any(|r| r.id == id) && !state.disabled.contains_key(&id)
    }

    /// Deliver a signal to every enabled receiver of its model and kind, in
    /// connection order.
    pub async fn send(&self, signal: Signal) {
        let receivers: Vec<Receiver> = {
            let state = lock(&self.state);
            state
                .registrations
                .iter()
                .filter(|r| r.model == signal.row.model && r.kinds.contains(&signal.kind))
                .filter(|r| !state.disabled.contains_key(&r.id))
                .map(|r| Arc::clone(&r.receiver))
                .collect()
        };

        for receiver in receivers {
            receiver(signal.clone()).await;
        }
    }

    /// Serialize deletion collectors: only one may rewire receivers at a time.
    pub(crate) async fn acquire_collector_gate(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.collector_gate).lock_owned().await
    }
}

/// Scoped token keeping a set of receivers disabled.
#[must_use = "receivers are enabled again as soon as the token drops"]
pub struct DisabledReceivers {
    state: Arc<Mutex<BusState>>,
    ids: Vec<ReceiverId>,
}

impl Drop for DisabledReceivers {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        for id in &self.ids {
            if let Some(count) = state.disabled.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    state.disabled.remove(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn counting_receiver(counter: Arc<AtomicUsize>) -> Receiver {
        Arc::new(move |_signal: Signal| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    fn row(model: &str) -> Row {
        Row::new(model, Uuid::new_v4(), Map::new())
    }

    #[tokio::test]
    async fn test_send_matches_model_and_kind() {
        let bus = SignalBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.connect(
            "company",
            &[SignalKind::PostSave],
            None,
            counting_receiver(Arc::clone(&counter)),
        );

        bus.send(Signal::post_save(row("company"))).await;
        bus.send(Signal::post_delete(row("company"))).await;
        bus.send(Signal::post_save(row("contact"))).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_receiver_is_restored_on_drop() {
        let bus = SignalBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.connect(
            "company",
            &[SignalKind::PostDelete],
            Some("company"),
            counting_receiver(Arc::clone(&counter)),
        );

        {
            let _token = bus.disable(bus.receivers_owned_by("company", &[SignalKind::PostDelete]));
            assert!(!bus.is_enabled(id));
            bus.send(Signal::post_delete(row("company"))).await;
        }

        assert!(bus.is_enabled(id));
        bus.send(Signal::post_delete(row("company"))).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disable_tokens_nest() {
        let bus = SignalBus::new();
        let id = bus.connect(
            "company",
            &[SignalKind::PostDelete],
            None,
            counting_receiver(Arc::new(AtomicUsize::new(0))),
        );

        let outer = bus.disable(vec![id]);
        let inner = bus.disable(vec![id]);
        drop(inner);
        assert!(!bus.is_enabled(id));
        drop(outer);
        assert!(bus.is_enabled(id));
    }

    #[test]
    fn test_disconnect() {
        let bus = SignalBus::new();
        let id = bus.connect(
            "company",
            &[SignalKind::PostSave],
            None,
            counting_receiver(Arc::new(AtomicUsize::new(0))),
        );

        assert!(bus.disconnect(id));
        assert!(!bus.disconnect(id));
        assert!(!bus.is_enabled(id));
    }

    #[test]
    fn test_receivers_owned_by() {
        let bus = SignalBus::new();
        let noop = counting_receiver(Arc::new(AtomicUsize::new(0)));
        let delete = bus.connect("company", &[SignalKind::PostDelete], Some("company"), noop.clone());
        bus.connect("company", &[SignalKind::PostSave], Some("company"), noop.clone());
        bus.connect("company", &[SignalKind::PostDelete], None, noop);

        let owned = bus.receivers_owned_by(
            "company",
            &[SignalKind::PreDelete, SignalKind::PostDelete],
        );

        assert_eq!(owned, vec![delete]);
    }
}
