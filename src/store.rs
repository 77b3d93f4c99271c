//! The store: composes slices, drives reducers, drains action producers,
//! and owns the root selector graph.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use crate::action::{Action, ActionType};
use crate::error::{Result, StoreError};
use crate::producer::{ActionSink, ProducerCall};
use crate::selector::{Selector, SelectorGraph, Source};
use crate::slice::{ReducerFn, SliceRegistration};

/// Store configuration, passed explicitly at construction.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Emit a `debug!` trace for every dispatched action.
    pub debug: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { debug: false }
    }
}

type ObserverFn<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// A dispatch received before `init`, replayed in FIFO order.
enum Queued {
    Action(Action),
    Producer(ProducerCall),
}

/// The reactive state container.
///
/// State is an application-defined immutable value, replaced wholesale by
/// reducers and never mutated in place. Cheap to clone; clones share the
/// same store.
///
/// Plain actions fold through the registered reducers synchronously, in
/// call order. Producer calls are drained on spawned tasks, each yielded
/// action re-entering dispatch in yield order. After any state change the
/// store runs one incremental selector pass and then notifies observers
/// (unless a batch update is open).
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<S> {
    debug: AtomicBool,
    /// One reducer list per action type; multiple slices may append to it.
    reducers: HashMap<ActionType, Vec<ReducerFn<S>>>,
    state: RwLock<Option<Arc<S>>>,
    initialized: AtomicBool,
    /// Dispatches that arrived before `init`.
    pending: Mutex<Vec<Queued>>,
    /// Serializes reducer folds (the write path).
    dispatch_lock: Mutex<()>,
    /// Observers in registration order.
    observers: Mutex<Vec<(u64, ObserverFn<S>)>>,
    next_observer: AtomicU64,
    batching: AtomicBool,
    batch_dirty: AtomicBool,
    graph: SelectorGraph,
    root: Source<S>,
}

impl<S> Store<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Compose slices into a store over the given selector graph.
    ///
    /// Builds the reducer registry (accumulating per-type lists across
    /// slices in registration order), creates the root source node, and
    /// wires every slice's subtree selector onto it. Fails if two slices
    /// share a name or a slice's selector belongs to a different graph.
    pub fn new(
        config: StoreConfig,
        graph: SelectorGraph,
        slices: Vec<SliceRegistration<S>>,
    ) -> Result<Self> {
        let mut names: HashSet<String> = HashSet::new();
        let mut reducers: HashMap<ActionType, Vec<ReducerFn<S>>> = HashMap::new();

        let root = graph.source::<S>("root", None);
        for registration in slices {
            if !names.insert(registration.name.clone()) {
                return Err(StoreError::DuplicateSlice(registration.name));
            }
            for (ty, reducer) in registration.reducers {
                reducers.entry(ty).or_default().push(reducer);
            }
            (registration.attach)(&root.selector())?;
        }

        Ok(Store {
            inner: Arc::new(StoreInner {
                debug: AtomicBool::new(config.debug),
                reducers,
                state: RwLock::new(None),
                initialized: AtomicBool::new(false),
                pending: Mutex::new(Vec::new()),
                dispatch_lock: Mutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(1),
                batching: AtomicBool::new(false),
                batch_dirty: AtomicBool::new(false),
                graph,
                root,
            }),
        })
    }

    /// Initialize with the starting state.
    ///
    /// Replays every dispatch queued before initialization in FIFO order
    /// (plain actions fold silently; producers start draining), then forces
    /// one full selector pass and notifies observers exactly once.
    pub fn init(&self, initial: S) -> Result<()> {
        if self.inner.initialized.load(Ordering::SeqCst) {
            return Err(StoreError::AlreadyInitialized);
        }
        *self.inner.state.write() = Some(Arc::new(initial));

        // Flag first, then drain until empty: a dispatcher that misses the
        // flag lands in the queue before one of the drain rounds.
        self.inner.initialized.store(true, Ordering::SeqCst);
        loop {
            let batch: Vec<Queued> = {
                let mut pending = self.inner.pending.lock();
                if pending.is_empty() {
                    break;
                }
                pending.drain(..).collect()
            };
            for queued in batch {
                match queued {
                    Queued::Action(action) => self.inner.apply_action(action, true),
                    Queued::Producer(call) => self.spawn_call(call),
                }
            }
        }

        let state = self
            .inner
            .state
            .read()
            .clone()
            .expect("state set above");
        self.inner.root.set_arc(Arc::clone(&state));
        self.inner.graph.process_change();
        self.inner.notify_observers(&state);
        Ok(())
    }

    /// Dispatch a plain action.
    ///
    /// Queued until `init`; afterwards the action is folded through its
    /// reducer list synchronously, before this call returns.
    pub fn dispatch(&self, action: Action) {
        {
            let mut pending = self.inner.pending.lock();
            if !self.inner.initialized.load(Ordering::SeqCst) {
                pending.push(Queued::Action(action));
                return;
            }
        }
        self.inner.apply_action(action, false);
    }

    /// Dispatch a producer call.
    ///
    /// Queued until `init`; afterwards the call is drained on a spawned
    /// task, each yielded action re-entering dispatch as it arrives. Must
    /// run inside a Tokio runtime once the store is initialized.
    pub fn dispatch_producer(&self, call: ProducerCall) {
        {
            let mut pending = self.inner.pending.lock();
            if !self.inner.initialized.load(Ordering::SeqCst) {
                pending.push(Queued::Producer(call));
                return;
            }
        }
        self.spawn_call(call);
    }

    /// Current state. `None` before `init`.
    pub fn get_state(&self) -> Option<Arc<S>> {
        self.inner.state.read().clone()
    }

    /// Register a state observer. Returns a handle for explicit teardown.
    ///
    /// Observers are called with the new state after each non-batched
    /// dispatch that changed it. Notification iterates a snapshot of the
    /// observer list, and a panicking observer is logged without blocking
    /// delivery to the rest.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle<S>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer.fetch_add(1, Ordering::SeqCst);
        self.inner.observers.lock().push((id, Arc::new(observer)));
        ObserverHandle {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Suppress observer notification until `end_batch_update`.
    ///
    /// Nested batches are rejected; the selector graph still republishes
    /// per dispatch, only store observers are deferred.
    pub fn begin_batch_update(&self) -> Result<()> {
        if self.inner.batching.swap(true, Ordering::SeqCst) {
            return Err(StoreError::BatchInProgress);
        }
        self.inner.batch_dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Close the batch. Fires exactly one notification reflecting the
    /// cumulative result, and only if some dispatch changed state.
    pub fn end_batch_update(&self) -> Result<()> {
        if !self.inner.batching.swap(false, Ordering::SeqCst) {
            return Err(StoreError::BatchNotActive);
        }
        if self.inner.batch_dirty.swap(false, Ordering::SeqCst) {
            if let Some(state) = self.get_state() {
                self.inner.notify_observers(&state);
            }
        }
        Ok(())
    }

    /// The selector over the whole root state.
    pub fn root_selector(&self) -> Selector<S> {
        self.inner.root.selector()
    }

    /// The selector graph this store publishes into.
    pub fn graph(&self) -> &SelectorGraph {
        &self.inner.graph
    }

    /// Toggle per-dispatch debug traces at runtime.
    pub fn set_debug(&self, enabled: bool) {
        self.inner.debug.store(enabled, Ordering::SeqCst);
    }

    /// Start draining one producer call on a spawned task.
    fn spawn_call(&self, call: ProducerCall) {
        if call.is_noop() {
            trace!("producer call is a no-op; skipping spawn");
            return;
        }
        let sink: Arc<dyn ActionSink> = self.inner.clone();
        let fut = call.execute(sink);
        tokio::spawn(async move {
            match fut.await {
                Ok(()) => trace!("producer completed"),
                Err(err) if err.is_cancelled() => {
                    debug!("producer superseded; terminating silently")
                }
                Err(err) => error!(error = %err, "producer failed; dropping its remaining output"),
            }
        });
    }
}

impl<S> StoreInner<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Fold an action through its reducer list and publish the result.
    ///
    /// `silent` is the pre-init replay mode: state advances but no selector
    /// pass or observer notification runs (init fires both once at the end).
    fn apply_action(&self, action: Action, silent: bool) {
        let changed = {
            let _guard = self.dispatch_lock.lock();
            if self.debug.load(Ordering::SeqCst) {
                debug!(action = %action.ty(), "dispatch");
            }
            let reducers = match self.reducers.get(action.ty()) {
                Some(list) => list,
                None => {
                    warn!(action = %action.ty(), "no reducer registered for dispatched action");
                    return;
                }
            };
            let current = self
                .state
                .read()
                .clone()
                .expect("apply_action runs only after init");
            let mut next: S = (*current).clone();
            for reducer in reducers {
                next = reducer(&next, action.payload());
            }
            let changed = next != *current;
            if changed {
                *self.state.write() = Some(Arc::new(next));
            }
            changed
        };

        if !changed || silent {
            return;
        }

        // Re-read rather than reuse the fold result: if another dispatch
        // won the race in between, the pass publishes the newer state and
        // the equality gate drops the duplicate.
        let latest = match self.state.read().clone() {
            Some(s) => s,
            None => return,
        };
        self.root.set_arc(Arc::clone(&latest));
        self.graph.process_change();

        if self.batching.load(Ordering::SeqCst) {
            self.batch_dirty.store(true, Ordering::SeqCst);
        } else {
            self.notify_observers(&latest);
        }
    }

    fn notify_observers(&self, state: &Arc<S>) {
        let snapshot: Vec<(u64, ObserverFn<S>)> = self.observers.lock().clone();
        for (id, observer) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(state))).is_err() {
                error!(observer = id, "store observer panicked; continuing with remaining observers");
            }
        }
    }
}

impl<S> ActionSink for StoreInner<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    fn accept(&self, action: Action) {
        self.apply_action(action, false);
    }
}

/// Active store observer registration. Teardown is explicit.
pub struct ObserverHandle<S> {
    inner: Arc<StoreInner<S>>,
    id: u64,
}

impl<S> ObserverHandle<S> {
    /// Remove the observer.
    pub fn unsubscribe(self) {
        self.inner.observers.lock().retain(|(id, _)| *id != self.id);
    }
}
