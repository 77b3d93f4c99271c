//! Concurrency policies composed around an [`ActionProducer`].
//!
//! Each policy owns one producer and hands out [`ProducerCall`]s whose
//! cancellation probes encode the policy: staleness is observed by the
//! producer body at its next suspension point, so no action from a
//! superseded call ever reaches the store.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;

use super::{ActionProducer, CancelProbe, ProducerCall};

/// Keep-Latest: a monotonic call counter; each call captures its id and
/// forwards only while that id is still current. A newer call supersedes
/// every older one, so only the most recent call completes.
pub struct KeepLatest {
    producer: ActionProducer,
    latest: Arc<AtomicU64>,
}

impl KeepLatest {
    pub fn new(producer: ActionProducer) -> Self {
        KeepLatest {
            producer,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Begin a new call, superseding any call still in flight.
    pub fn call(&self) -> ProducerCall {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.latest);
        let probe = CancelProbe::from_fn(move || latest.load(Ordering::SeqCst) != id);
        self.producer.call_with_probe(probe)
    }
}

/// The single in-flight slot tracked by [`KeyedKeepFirst`].
struct InFlight<K> {
    key: K,
    epoch: u64,
    cancelled: Arc<AtomicBool>,
}

/// Keyed-Keep-First: calls are identified by key. A call whose key matches
/// the in-flight one is a no-op; a different key cancels the in-flight call
/// and takes over. The slot is released by an epoch compare-and-swap when a
/// call finishes (normally or by failure), so a stale call can never clear
/// a successor's slot.
pub struct KeyedKeepFirst<K> {
    producer: ActionProducer,
    slot: Arc<Mutex<Option<InFlight<K>>>>,
    next_epoch: AtomicU64,
}

impl<K> KeyedKeepFirst<K>
where
    K: Eq + Clone + Send + 'static,
{
    pub fn new(producer: ActionProducer) -> Self {
        KeyedKeepFirst {
            producer,
            slot: Arc::new(Mutex::new(None)),
            next_epoch: AtomicU64::new(0),
        }
    }

    /// Begin a call under `key`, or return the no-op call if `key` is
    /// already in flight.
    pub fn call(&self, key: K) -> ProducerCall {
        let cancelled = Arc::new(AtomicBool::new(false));
        let epoch = {
            let mut slot = self.slot.lock();
            if let Some(current) = slot.as_ref() {
                if current.key == key {
                    return ProducerCall::noop();
                }
                current.cancelled.store(true, Ordering::SeqCst);
            }
            let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *slot = Some(InFlight {
                key,
                epoch,
                cancelled: Arc::clone(&cancelled),
            });
            epoch
        };

        let probe = {
            let cancelled = Arc::clone(&cancelled);
            CancelProbe::from_fn(move || cancelled.load(Ordering::SeqCst))
        };

        let slot = Arc::clone(&self.slot);
        self.producer
            .call_with_probe(probe)
            .with_wrapper(move |fut| {
                async move {
                    let result = fut.await;
                    // Release the key only if the slot still belongs to this
                    // call. A cancelled call was already superseded, so its
                    // swap naturally misses.
                    let mut slot = slot.lock();
                    if slot.as_ref().is_some_and(|cur| cur.epoch == epoch) {
                        *slot = None;
                    }
                    result
                }
                .boxed()
            })
    }

    /// The key currently in flight, if any.
    pub fn in_flight_key(&self) -> Option<K> {
        self.slot.lock().as_ref().map(|s| s.key.clone())
    }
}

/// Keyed-Keep-Latest: Keep-Latest applied independently per key via per-key
/// monotonic counters. Calls under distinct keys never cancel each other.
pub struct KeyedKeepLatest<K> {
    producer: ActionProducer,
    counters: Arc<Mutex<HashMap<K, Arc<AtomicU64>>>>,
}

impl<K> KeyedKeepLatest<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(producer: ActionProducer) -> Self {
        KeyedKeepLatest {
            producer,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begin a new call under `key`, superseding only calls with that key.
    pub fn call(&self, key: K) -> ProducerCall {
        let counter = {
            let mut counters = self.counters.lock();
            Arc::clone(counters.entry(key).or_default())
        };
        let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let probe = CancelProbe::from_fn(move || counter.load(Ordering::SeqCst) != id);
        self.producer.call_with_probe(probe)
    }
}
