//! Named reducer bundles with a derived selector for their state subtree.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::action::{ActionFactory, ActionType, Payload};
use crate::error::{Result, StoreError};
use crate::selector::{Deferred, Selector, SelectorGraph};

/// A reducer folded over root state, payload already erased.
pub(crate) type ReducerFn<S> = Arc<dyn Fn(&S, &Payload) -> S + Send + Sync>;

/// A named bundle of reducers plus one selector over a subtree of root state.
///
/// Reducers are registered before the slice is handed to
/// [`Store::new`](crate::Store::new); each registration returns an
/// [`ActionFactory`] whose type tag is auto-namespaced as
/// `"[sliceName] localType"`. The subtree selector is created detached and
/// wired to the store's root source node at store construction.
pub struct Slice<S, T> {
    name: String,
    deferred: Deferred<S, T>,
    inner: Mutex<SliceInner<S>>,
}

struct SliceInner<S> {
    /// Types this slice registered, for duplicate detection.
    types: HashSet<ActionType>,
    /// Registration order is fold order.
    reducers: Vec<(ActionType, ReducerFn<S>)>,
    /// Set once the registration was handed to a store.
    consumed: bool,
}

impl<S, T> Slice<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
{
    /// Create a slice selecting its subtree out of root state.
    pub fn new<F>(graph: &SelectorGraph, name: &str, select: F) -> Self
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        let deferred = graph.deferred::<S, T, F>(name, select);
        Slice {
            name: name.to_string(),
            deferred,
            inner: Mutex::new(SliceInner {
                types: HashSet::new(),
                reducers: Vec::new(),
                consumed: false,
            }),
        }
    }

    /// Register a reducer under a (possibly auto-namespaced) action type.
    ///
    /// An unqualified `local_type` becomes `"[sliceName] localType"`; an
    /// already-qualified type (for example another slice's
    /// `ActionFactory` tag) passes through unchanged, which lets this slice
    /// attach an additional reducer to a type owned elsewhere. Fails if this
    /// slice already registered a reducer for the exact resulting type.
    pub fn add_reducer<P, F>(&self, local_type: &str, reducer: F) -> Result<ActionFactory<P>>
    where
        P: Send + Sync + 'static,
        F: Fn(&S, &P) -> S + Send + Sync + 'static,
    {
        let ty = ActionType::qualify(&self.name, local_type);
        self.register(ty.clone(), reducer)?;
        Ok(ActionFactory::new(ty))
    }

    /// Attach a reducer to a type owned by another slice, typed through its
    /// factory.
    pub fn add_reducer_for<P, F>(&self, factory: &ActionFactory<P>, reducer: F) -> Result<()>
    where
        P: Send + Sync + 'static,
        F: Fn(&S, &P) -> S + Send + Sync + 'static,
    {
        self.register(factory.ty().clone(), reducer)
    }

    fn register<P, F>(&self, ty: ActionType, reducer: F) -> Result<()>
    where
        P: Send + Sync + 'static,
        F: Fn(&S, &P) -> S + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.consumed {
            return Err(StoreError::SliceConsumed(self.name.clone()));
        }
        if !inner.types.insert(ty.clone()) {
            return Err(StoreError::DuplicateReducer {
                slice: self.name.clone(),
                action_type: ty,
            });
        }
        let reducer_ty = ty.clone();
        let erased: ReducerFn<S> = Arc::new(move |state: &S, payload: &Payload| {
            match payload.downcast_ref::<P>() {
                Some(p) => reducer(state, p),
                None => {
                    warn!(action_type = %reducer_ty, "payload type mismatch; reducer skipped");
                    state.clone()
                }
            }
        });
        inner.reducers.push((ty, erased));
        Ok(())
    }

    /// The selector over this slice's subtree. `None` until the slice is
    /// wired into an initialized store.
    pub fn selector(&self) -> Selector<T> {
        self.deferred.selector()
    }

    /// The slice name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand the reducer bundle to a store. Further `add_reducer` calls fail.
    pub fn registration(&self) -> SliceRegistration<S> {
        let mut inner = self.inner.lock();
        inner.consumed = true;
        let deferred = self.deferred.clone();
        SliceRegistration {
            name: self.name.clone(),
            reducers: std::mem::take(&mut inner.reducers),
            attach: Box::new(move |root: &Selector<S>| deferred.attach(root)),
        }
    }
}

/// Erased slice contents consumed by [`Store::new`](crate::Store::new).
pub struct SliceRegistration<S> {
    pub(crate) name: String,
    pub(crate) reducers: Vec<(ActionType, ReducerFn<S>)>,
    pub(crate) attach: Box<dyn FnOnce(&Selector<S>) -> Result<()> + Send>,
}
