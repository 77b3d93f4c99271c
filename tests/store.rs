//! Store integration tests.
//!
//! These tests verify that:
//! 1. Pre-init dispatches replay in FIFO order with one observer call
//! 2. Batch updates suppress intermediate notifications
//! 3. Reducer lists accumulate across slices and fold in registration order
//! 4. Slice selectors republish only when their subtree changed
//! 5. Store construction rejects misconfigured slices

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use undertow::{ActionFactory, SelectorGraph, Slice, Store, StoreConfig, StoreError};

#[derive(Clone, PartialEq, Debug)]
struct AppState {
    count: i64,
    log: Vec<String>,
}

impl AppState {
    fn zero() -> Self {
        AppState {
            count: 0,
            log: Vec::new(),
        }
    }
}

struct Fixture {
    store: Store<AppState>,
    counter: Slice<AppState, i64>,
    audit: Slice<AppState, Vec<String>>,
    add: ActionFactory<i64>,
    bump: ActionFactory<()>,
}

/// Two slices: `counter` owns the `add`/`bump` types, `audit` attaches an
/// extra reducer to `add` through its factory.
fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt::try_init();
    let graph = SelectorGraph::new();
    let counter: Slice<AppState, i64> = Slice::new(&graph, "counter", |s: &AppState| s.count);
    let audit: Slice<AppState, Vec<String>> = Slice::new(&graph, "audit", |s: &AppState| s.log.clone());

    let add = counter
        .add_reducer("add", |s: &AppState, n: &i64| AppState {
            count: s.count + n,
            log: s.log.clone(),
        })
        .unwrap();
    let bump = counter
        .add_reducer("bump", |s: &AppState, _: &()| AppState {
            count: s.count + 1,
            log: s.log.clone(),
        })
        .unwrap();
    audit
        .add_reducer_for(&add, |s: &AppState, n: &i64| {
            let mut log = s.log.clone();
            log.push(format!("add {}", n));
            AppState {
                count: s.count,
                log,
            }
        })
        .unwrap();

    let store = Store::new(
        StoreConfig::default(),
        graph,
        vec![counter.registration(), audit.registration()],
    )
    .unwrap();

    Fixture {
        store,
        counter,
        audit,
        add,
        bump,
    }
}

// --- Initialization & dispatch ordering ---

#[test]
fn test_pre_init_dispatches_drain_in_fifo_order_with_one_notification() {
    let f = fixture();
    let notifications = Arc::new(AtomicUsize::new(0));
    let last_count = Arc::new(Mutex::new(None));
    let (n2, l2) = (Arc::clone(&notifications), Arc::clone(&last_count));
    let _observer = f.store.subscribe(move |s: &AppState| {
        n2.fetch_add(1, Ordering::SeqCst);
        *l2.lock() = Some(s.count);
    });

    f.store.dispatch(f.add.of(1));
    f.store.dispatch(f.add.of(1));
    f.store.dispatch(f.add.of(1));
    assert!(f.store.get_state().is_none(), "nothing applied before init");

    f.store
        .init(AppState {
            count: 2,
            log: Vec::new(),
        })
        .unwrap();

    assert_eq!(f.store.get_state().unwrap().count, 5);
    assert_eq!(notifications.load(Ordering::SeqCst), 1, "exactly one observer call");
    assert_eq!(*last_count.lock(), Some(5));
}

#[test]
fn test_init_twice_fails() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();
    assert!(matches!(
        f.store.init(AppState::zero()),
        Err(StoreError::AlreadyInitialized)
    ));
}

#[test]
fn test_synchronous_dispatch_applies_before_returning() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();
    f.store.dispatch(f.add.of(3));
    assert_eq!(f.store.get_state().unwrap().count, 3);
    f.store.dispatch(f.add.of(4));
    assert_eq!(f.store.get_state().unwrap().count, 7);
}

#[test]
fn test_unknown_action_type_is_a_logged_noop() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();
    f.store
        .dispatch(undertow::Action::new(undertow::ActionType::new("[nowhere] missing"), ()));
    assert_eq!(f.store.get_state().unwrap().count, 0);
}

// --- Observers & batching ---

#[test]
fn test_batch_produces_one_notification_with_final_state() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (n2, s2) = (Arc::clone(&notifications), Arc::clone(&seen));
    let _observer = f.store.subscribe(move |s: &AppState| {
        n2.fetch_add(1, Ordering::SeqCst);
        s2.lock().push(s.count);
    });

    f.store.begin_batch_update().unwrap();
    f.store.dispatch(f.add.of(1));
    f.store.dispatch(f.add.of(2));
    f.store.dispatch(f.add.of(3));
    assert_eq!(notifications.load(Ordering::SeqCst), 0, "suppressed inside batch");
    f.store.end_batch_update().unwrap();

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), vec![6]);
}

#[test]
fn test_empty_batch_fires_no_notification() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();
    let notifications = Arc::new(AtomicUsize::new(0));
    let n2 = Arc::clone(&notifications);
    let _observer = f.store.subscribe(move |_: &AppState| {
        n2.fetch_add(1, Ordering::SeqCst);
    });

    f.store.begin_batch_update().unwrap();
    f.store.end_batch_update().unwrap();
    assert_eq!(notifications.load(Ordering::SeqCst), 0);
}

#[test]
fn test_nested_batch_is_rejected() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();
    f.store.begin_batch_update().unwrap();
    assert!(matches!(
        f.store.begin_batch_update(),
        Err(StoreError::BatchInProgress)
    ));
    f.store.end_batch_update().unwrap();
    assert!(matches!(
        f.store.end_batch_update(),
        Err(StoreError::BatchNotActive)
    ));
}

#[test]
fn test_dispatch_without_state_change_does_not_notify() {
    let graph = SelectorGraph::new();
    let slice: Slice<AppState, i64> = Slice::new(&graph, "counter", |s: &AppState| s.count);
    let set = slice
        .add_reducer("set", |s: &AppState, n: &i64| AppState {
            count: *n,
            log: s.log.clone(),
        })
        .unwrap();
    let store = Store::new(StoreConfig::default(), graph, vec![slice.registration()]).unwrap();
    store.init(AppState::zero()).unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let n2 = Arc::clone(&notifications);
    let _observer = store.subscribe(move |_: &AppState| {
        n2.fetch_add(1, Ordering::SeqCst);
    });

    store.dispatch(set.of(0));
    assert_eq!(notifications.load(Ordering::SeqCst), 0, "state was equal");
    store.dispatch(set.of(1));
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[test]
fn test_observer_panic_does_not_block_remaining_observers() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();
    let _bad = f.store.subscribe(|_: &AppState| panic!("broken observer"));
    let notifications = Arc::new(AtomicUsize::new(0));
    let n2 = Arc::clone(&notifications);
    let _good = f.store.subscribe(move |_: &AppState| {
        n2.fetch_add(1, Ordering::SeqCst);
    });

    f.store.dispatch(f.bump.of(()));
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubscribed_observer_is_not_called() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();
    let notifications = Arc::new(AtomicUsize::new(0));
    let n2 = Arc::clone(&notifications);
    let observer = f.store.subscribe(move |_: &AppState| {
        n2.fetch_add(1, Ordering::SeqCst);
    });

    f.store.dispatch(f.bump.of(()));
    observer.unsubscribe();
    f.store.dispatch(f.bump.of(()));
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

// --- Cross-slice reducers ---

#[test]
fn test_reducers_for_shared_type_fold_in_registration_order() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();

    f.store.dispatch(f.add.of(7));
    let state = f.store.get_state().unwrap();
    assert_eq!(state.count, 7, "counter's reducer fired");
    assert_eq!(state.log, vec!["add 7".to_string()], "audit's reducer fired");
}

// --- Slice selectors ---

#[test]
fn test_slice_selectors_track_their_subtrees() {
    let f = fixture();
    assert!(f.counter.selector().get().is_none(), "unwired before init");

    f.store.init(AppState::zero()).unwrap();
    assert_eq!(*f.counter.selector().get().unwrap(), 0);
    assert_eq!(*f.audit.selector().get().unwrap(), Vec::<String>::new());

    f.store.dispatch(f.add.of(5));
    assert_eq!(*f.counter.selector().get().unwrap(), 5);
    assert_eq!(*f.audit.selector().get().unwrap(), vec!["add 5".to_string()]);
}

#[test]
fn test_untouched_subtree_selector_is_not_renotified() {
    let f = fixture();
    f.store.init(AppState::zero()).unwrap();

    let audit_hits = Arc::new(AtomicUsize::new(0));
    let a2 = Arc::clone(&audit_hits);
    let _sub = f.audit.selector().subscribe(move |_| {
        a2.fetch_add(1, Ordering::SeqCst);
    });

    // bump changes only the count; the audit subtree is equal and gated.
    f.store.dispatch(f.bump.of(()));
    f.store.dispatch(f.bump.of(()));
    assert_eq!(audit_hits.load(Ordering::SeqCst), 0);

    f.store.dispatch(f.add.of(1));
    assert_eq!(audit_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_derived_selector_over_slices() {
    let f = fixture();
    let graph = f.store.graph().clone();
    let summary = graph
        .zip2(
            "summary",
            &f.counter.selector(),
            &f.audit.selector(),
            |count, log| format!("{} after {} actions", count, log.len()),
        )
        .unwrap();

    f.store.init(AppState::zero()).unwrap();
    assert_eq!(*summary.get().unwrap(), "0 after 0 actions");

    f.store.dispatch(f.add.of(9));
    assert_eq!(*summary.get().unwrap(), "9 after 1 actions");
}

// --- Construction errors ---

#[test]
fn test_duplicate_slice_names_rejected() {
    let graph = SelectorGraph::new();
    let a: Slice<AppState, i64> = Slice::new(&graph, "dup", |s: &AppState| s.count);
    let b: Slice<AppState, i64> = Slice::new(&graph, "dup", |s: &AppState| s.count);
    let err = Store::new(
        StoreConfig::default(),
        graph,
        vec![a.registration(), b.registration()],
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateSlice(name) if name == "dup"));
}

#[test]
fn test_slice_from_foreign_graph_rejected() {
    let graph = SelectorGraph::new();
    let other = SelectorGraph::new();
    let slice: Slice<AppState, i64> = Slice::new(&other, "counter", |s: &AppState| s.count);
    let err = Store::new(StoreConfig::default(), graph, vec![slice.registration()]).unwrap_err();
    assert!(matches!(err, StoreError::GraphMismatch));
}
