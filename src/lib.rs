//! # Undertow
//!
//! A reactive state-management core: one immutable state container updated
//! only through dispatched actions and pure reducers, cancellable
//! asynchronous action producers with composable concurrency policies, and
//! an incremental selector graph that derives and republishes views of
//! state.
//!
//! ## Core Concepts
//!
//! - **Actions**: tagged records describing intended state transitions
//! - **Slices**: named reducer bundles, each with a selector over its subtree
//! - **Producers**: cancellable async sequences of actions, wrapped by
//!   Keep-Latest / Keyed-Keep-First / Keyed-Keep-Latest policies
//! - **Selectors**: a DAG of derived values with depth-ordered, equality-gated
//!   incremental propagation
//!
//! ## Example
//!
//! ```ignore
//! use undertow::{Slice, SelectorGraph, Store, StoreConfig};
//!
//! #[derive(Clone, PartialEq)]
//! struct AppState { count: i64 }
//!
//! let graph = SelectorGraph::new();
//! let counter = Slice::new(&graph, "counter", |s: &AppState| s.count);
//! let add = counter.add_reducer("add", |s: &AppState, n: &i64| {
//!     AppState { count: s.count + n }
//! })?;
//!
//! let store = Store::new(StoreConfig::default(), graph, vec![counter.registration()])?;
//! store.init(AppState { count: 0 })?;
//!
//! store.dispatch(add.of(5));
//! assert_eq!(store.get_state().unwrap().count, 5);
//! ```

pub mod action;
pub mod error;
pub mod producer;
pub mod selector;
pub mod slice;
pub mod store;

// Re-exports
pub use action::{Action, ActionFactory, ActionType};
pub use error::{ProducerError, ProducerResult, Result, StoreError};
pub use producer::{ActionProducer, ActionScope, CancelProbe, KeepLatest, KeyedKeepFirst, KeyedKeepLatest, ProducerCall};
pub use selector::{ControllerHost, Deferred, Selector, SelectorController, SelectorGraph, SelectorSubscription, Source};
pub use slice::{Slice, SliceRegistration};
pub use store::{ObserverHandle, Store, StoreConfig};
