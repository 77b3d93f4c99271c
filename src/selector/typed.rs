//! Typed surface over the erased selector graph.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, StoreError};

use super::graph::{EqFn, GraphShared, NodeId, SubscriberId, Value};

/// Equality predicate built from `PartialEq`.
///
/// The typed combinators install this by default: a combine function
/// rebuilds its output allocation every time, so identity comparison would
/// never gate anything.
fn partial_eq<T: PartialEq + Send + Sync + 'static>() -> EqFn {
    Arc::new(|a: &Value, b: &Value| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    })
}

fn custom_eq<T, F>(eq: F) -> EqFn
where
    T: Send + Sync + 'static,
    F: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    Arc::new(move |a: &Value, b: &Value| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(x), Some(y)) => eq(x, y),
            _ => false,
        }
    })
}

/// A handle to a derived-value DAG. Cheap to clone; all handles share the
/// same nodes.
#[derive(Clone)]
pub struct SelectorGraph {
    shared: Arc<GraphShared>,
}

impl SelectorGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        SelectorGraph {
            shared: Arc::new(GraphShared::new()),
        }
    }

    /// Register a source node (depth 0), optionally seeded with a value.
    pub fn source<T>(&self, name: &str, initial: Option<T>) -> Source<T>
    where
        T: PartialEq + Send + Sync + 'static,
    {
        let initial: Option<Value> = initial.map(|v| Arc::new(v) as Value);
        let id = self.shared.add_source(name, partial_eq::<T>(), initial);
        Source {
            selector: Selector {
                shared: Arc::clone(&self.shared),
                id,
                _marker: PhantomData,
            },
        }
    }

    /// Combine two selectors into a derived node.
    pub fn zip2<A, B, U, F>(
        &self,
        name: &str,
        a: &Selector<A>,
        b: &Selector<B>,
        f: F,
    ) -> Result<Selector<U>>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&A, &B) -> U + Send + Sync + 'static,
    {
        self.check_membership(&a.shared)?;
        self.check_membership(&b.shared)?;
        let combine = Arc::new(move |inputs: &[Value]| -> Value {
            let a = inputs[0]
                .downcast_ref::<A>()
                .expect("selector parent value type mismatch");
            let b = inputs[1]
                .downcast_ref::<B>()
                .expect("selector parent value type mismatch");
            Arc::new(f(a, b))
        });
        let id = self
            .shared
            .add_node(name, vec![a.id, b.id], combine, partial_eq::<U>())?;
        Ok(self.selector(id))
    }

    /// Combine three selectors into a derived node.
    pub fn zip3<A, B, C, U, F>(
        &self,
        name: &str,
        a: &Selector<A>,
        b: &Selector<B>,
        c: &Selector<C>,
        f: F,
    ) -> Result<Selector<U>>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        C: Send + Sync + 'static,
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&A, &B, &C) -> U + Send + Sync + 'static,
    {
        self.check_membership(&a.shared)?;
        self.check_membership(&b.shared)?;
        self.check_membership(&c.shared)?;
        let combine = Arc::new(move |inputs: &[Value]| -> Value {
            let a = inputs[0]
                .downcast_ref::<A>()
                .expect("selector parent value type mismatch");
            let b = inputs[1]
                .downcast_ref::<B>()
                .expect("selector parent value type mismatch");
            let c = inputs[2]
                .downcast_ref::<C>()
                .expect("selector parent value type mismatch");
            Arc::new(f(a, b, c))
        });
        let id = self
            .shared
            .add_node(name, vec![a.id, b.id, c.id], combine, partial_eq::<U>())?;
        Ok(self.selector(id))
    }

    /// Create a detached derived node whose single parent is wired in later.
    ///
    /// Until [`Deferred::attach`] runs, the node has no parents, depth 0 and
    /// no value. Used to declare a view before its data source exists — a
    /// slice builds its subtree selector this way and the store attaches it
    /// to the root at construction.
    pub fn deferred<P, T, F>(&self, name: &str, select: F) -> Deferred<P, T>
    where
        P: Send + Sync + 'static,
        T: PartialEq + Send + Sync + 'static,
        F: Fn(&P) -> T + Send + Sync + 'static,
    {
        let combine = Arc::new(move |inputs: &[Value]| -> Value {
            let p = inputs[0]
                .downcast_ref::<P>()
                .expect("selector parent value type mismatch");
            Arc::new(select(p))
        });
        let id = self
            .shared
            .add_node(name, Vec::new(), combine, partial_eq::<T>())
            .expect("constructing a parentless node cannot fail");
        Deferred {
            selector: self.selector(id),
            _parent: PhantomData,
        }
    }

    /// Run one incremental propagation pass over the whole graph.
    pub fn process_change(&self) {
        self.shared.process_change();
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.shared.node_count()
    }

    fn selector<T>(&self, id: NodeId) -> Selector<T> {
        Selector {
            shared: Arc::clone(&self.shared),
            id,
            _marker: PhantomData,
        }
    }

    fn check_membership(&self, other: &Arc<GraphShared>) -> Result<()> {
        if Arc::ptr_eq(&self.shared, other) {
            Ok(())
        } else {
            Err(StoreError::GraphMismatch)
        }
    }

    pub(crate) fn shared(&self) -> &Arc<GraphShared> {
        &self.shared
    }
}

impl Default for SelectorGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed read handle on one node of the graph.
pub struct Selector<T> {
    shared: Arc<GraphShared>,
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Selector {
            shared: Arc::clone(&self.shared),
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Selector<T> {
    /// The last published value. O(1); `None` until the node first computes.
    pub fn get(&self) -> Option<Arc<T>> {
        self.shared
            .get_value(self.id)
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Topological level of this node.
    pub fn depth(&self) -> usize {
        self.shared.depth(self.id)
    }

    /// Node name (auto-generated when none was given).
    pub fn name(&self) -> String {
        self.shared.name(self.id)
    }

    /// Subscribe to republications of this node's value.
    ///
    /// Delivery iterates a snapshot of the subscriber list, so unsubscribing
    /// mid-notification is safe, and a panicking subscriber is logged
    /// without blocking the rest. The subscription stays live until
    /// [`SelectorSubscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, f: F) -> SelectorSubscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let sub = self.shared.subscribe(
            self.id,
            Arc::new(move |v: &Value| {
                if let Some(typed) = v.downcast_ref::<T>() {
                    f(typed);
                }
            }),
        );
        SelectorSubscription {
            shared: Arc::clone(&self.shared),
            node: self.id,
            sub,
        }
    }

    /// Derive a new node from this one. Republication is gated on `PartialEq`
    /// of the derived value.
    pub fn map<U, F>(&self, name: &str, f: F) -> Result<Selector<U>>
    where
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.map_inner(name, f, partial_eq::<U>())
    }

    /// Derive a new node with a custom equality predicate.
    pub fn map_with<U, F, E>(&self, name: &str, f: F, eq: E) -> Result<Selector<U>>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
        E: Fn(&U, &U) -> bool + Send + Sync + 'static,
    {
        self.map_inner(name, f, custom_eq::<U, E>(eq))
    }

    fn map_inner<U, F>(&self, name: &str, f: F, eq: EqFn) -> Result<Selector<U>>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let combine = Arc::new(move |inputs: &[Value]| -> Value {
            let t = inputs[0]
                .downcast_ref::<T>()
                .expect("selector parent value type mismatch");
            Arc::new(f(t))
        });
        let id = self.shared.add_node(name, vec![self.id], combine, eq)?;
        Ok(Selector {
            shared: Arc::clone(&self.shared),
            id,
            _marker: PhantomData,
        })
    }

    /// Remove this node from the graph. Fails while it still has children.
    pub fn delete(self) -> crate::error::Result<()> {
        self.shared.delete(self.id)
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn graph_shared(&self) -> &Arc<GraphShared> {
        &self.shared
    }
}

/// A settable source node plus its read handle.
pub struct Source<T> {
    selector: Selector<T>,
}

impl<T: PartialEq + Send + Sync + 'static> Source<T> {
    /// Stage a new value; published by the next propagation pass.
    pub fn set(&self, value: T) {
        self.set_arc(Arc::new(value));
    }

    /// Stage an already-shared value.
    pub fn set_arc(&self, value: Arc<T>) {
        self.selector
            .shared
            .set_source(self.selector.id, value as Value);
    }

    /// The read handle for this source.
    pub fn selector(&self) -> Selector<T> {
        self.selector.clone()
    }
}

/// A derived node declared before its parent exists.
pub struct Deferred<P, T> {
    selector: Selector<T>,
    _parent: PhantomData<fn(P)>,
}

impl<P, T> Clone for Deferred<P, T> {
    fn clone(&self) -> Self {
        Deferred {
            selector: self.selector.clone(),
            _parent: PhantomData,
        }
    }
}

impl<P, T> Deferred<P, T>
where
    P: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Wire this node under its real parent. Recomputes depth and value
    /// immediately.
    pub fn attach(&self, parent: &Selector<P>) -> Result<()> {
        if !Arc::ptr_eq(&self.selector.shared, &parent.shared) {
            return Err(StoreError::GraphMismatch);
        }
        self.selector
            .shared
            .set_parents(self.selector.id, vec![parent.id])
    }

    /// The read handle for this node.
    pub fn selector(&self) -> Selector<T> {
        self.selector.clone()
    }
}

/// Active subscription on a selector node.
///
/// Dropping the handle does not unsubscribe; teardown is explicit, matching
/// the store observer surface.
pub struct SelectorSubscription {
    shared: Arc<GraphShared>,
    node: NodeId,
    sub: SubscriberId,
}

impl SelectorSubscription {
    /// Remove the subscription.
    pub fn unsubscribe(self) {
        self.shared.unsubscribe(self.node, self.sub);
    }
}
