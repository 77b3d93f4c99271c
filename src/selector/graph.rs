//! Erased selector-graph internals: node storage, depth bookkeeping, and the
//! incremental propagation pass.
//!
//! Values are stored type-erased (`Arc<dyn Any>`); the typed surface in
//! [`super::typed`] layers downcasts on top. Nodes live in a registry keyed
//! by id, with edges kept on both endpoints so reparenting and deletion can
//! fix up both sides.

use parking_lot::RwLock;
use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

use crate::error::{Result, StoreError};

/// Erased node value.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Pure combine function; arguments arrive in parent order.
pub(crate) type CombineFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Equality predicate gating republication.
pub(crate) type EqFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Erased subscriber callback.
pub(crate) type SubscriberFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Unique identifier for a selector node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Unique identifier for a subscriber within one node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub(crate) u64);

/// One vertex of the derived-value DAG.
struct Node {
    name: String,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    /// Topological level: `1 + max(parent depths)`, 0 for sources.
    depth: usize,
    /// Last published value.
    value: Option<Value>,
    /// Staged input for source nodes, consumed by the next `emit`.
    pending: Option<Value>,
    /// `None` marks a source node.
    combine: Option<CombineFn>,
    eq: EqFn,
    /// Registration order is notification order.
    subscribers: Vec<(SubscriberId, SubscriberFn)>,
}

impl Node {
    fn is_source(&self) -> bool {
        self.combine.is_none()
    }
}

/// Shared graph state behind every [`Selector`](super::typed::Selector) handle.
pub(crate) struct GraphShared {
    nodes: RwLock<HashMap<NodeId, Node>>,
    /// Source nodes, in registration order; seeds for each propagation pass.
    sources: RwLock<Vec<NodeId>>,
    next_node: AtomicU64,
    next_subscriber: AtomicU64,
}

impl GraphShared {
    pub(crate) fn new() -> Self {
        GraphShared {
            nodes: RwLock::new(HashMap::new()),
            sources: RwLock::new(Vec::new()),
            next_node: AtomicU64::new(1),
            next_subscriber: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> NodeId {
        NodeId(self.next_node.fetch_add(1, Ordering::SeqCst))
    }

    fn display_name(name: &str, id: NodeId) -> String {
        if name.is_empty() {
            format!("node#{}", id.0)
        } else {
            name.to_string()
        }
    }

    // --- Construction ---

    /// Register a source node (depth 0, no combine).
    pub(crate) fn add_source(&self, name: &str, eq: EqFn, initial: Option<Value>) -> NodeId {
        let id = self.alloc_id();
        let node = Node {
            name: Self::display_name(name, id),
            parents: Vec::new(),
            children: Vec::new(),
            depth: 0,
            value: initial,
            pending: None,
            combine: None,
            eq,
            subscribers: Vec::new(),
        };
        self.nodes.write().insert(id, node);
        self.sources.write().push(id);
        id
    }

    /// Register a derived node under the given parents.
    ///
    /// The value is computed immediately when every parent already has one.
    /// A freshly constructed node has no children, so no cycle is possible
    /// here; only [`set_parents`](Self::set_parents) needs the reachability
    /// check.
    pub(crate) fn add_node(
        &self,
        name: &str,
        parents: Vec<NodeId>,
        combine: CombineFn,
        eq: EqFn,
    ) -> Result<NodeId> {
        let id = self.alloc_id();
        {
            let mut nodes = self.nodes.write();
            for p in &parents {
                if !nodes.contains_key(p) {
                    return Err(StoreError::NodeDeleted);
                }
            }
            let depth = parents
                .iter()
                .map(|p| nodes[p].depth + 1)
                .max()
                .unwrap_or(0);
            for p in &parents {
                nodes.get_mut(p).expect("parent checked above").children.push(id);
            }
            let node = Node {
                name: Self::display_name(name, id),
                parents,
                children: Vec::new(),
                depth,
                value: None,
                pending: None,
                combine: Some(combine),
                eq,
                subscribers: Vec::new(),
            };
            nodes.insert(id, node);
        }
        self.recompute_value(id);
        Ok(id)
    }

    // --- Accessors ---

    pub(crate) fn get_value(&self, id: NodeId) -> Option<Value> {
        self.nodes.read().get(&id).and_then(|n| n.value.clone())
    }

    pub(crate) fn depth(&self, id: NodeId) -> usize {
        self.nodes.read().get(&id).map(|n| n.depth).unwrap_or(0)
    }

    pub(crate) fn name(&self, id: NodeId) -> String {
        self.nodes
            .read()
            .get(&id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("node#{}", id.0))
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    // --- Sources ---

    /// Stage a new value on a source node. Published by the next pass.
    pub(crate) fn set_source(&self, id: NodeId, value: Value) {
        if let Some(node) = self.nodes.write().get_mut(&id) {
            debug_assert!(node.is_source(), "set_source on derived node");
            node.pending = Some(value);
        }
    }

    // --- Subscriptions ---

    pub(crate) fn subscribe(&self, id: NodeId, f: SubscriberFn) -> SubscriberId {
        let sub = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::SeqCst));
        if let Some(node) = self.nodes.write().get_mut(&id) {
            node.subscribers.push((sub, f));
        }
        sub
    }

    pub(crate) fn unsubscribe(&self, id: NodeId, sub: SubscriberId) {
        if let Some(node) = self.nodes.write().get_mut(&id) {
            node.subscribers.retain(|(s, _)| *s != sub);
        }
    }

    // --- Evaluation ---

    /// Recompute one node's value and republish if it changed.
    ///
    /// Returns `false` when the node is missing, cannot compute (a parent has
    /// no value yet, or a source has nothing staged), or the new value is
    /// equal to the old one under the node's predicate. Subscribers are
    /// notified outside the registry lock, each isolated from the others.
    pub(crate) fn emit(&self, id: NodeId) -> bool {
        // Gather inputs under a short-lived lock; run the combine outside it.
        let (candidate, eq, prior) = {
            let mut nodes = self.nodes.write();
            let (parents, combine, eq, prior, pending) = match nodes.get_mut(&id) {
                Some(node) => (
                    node.parents.clone(),
                    node.combine.clone(),
                    Arc::clone(&node.eq),
                    node.value.clone(),
                    node.pending.take(),
                ),
                None => return false,
            };
            match combine {
                None => match pending {
                    Some(v) => (CandidateInput::Ready(v), eq, prior),
                    None => return false,
                },
                Some(combine) => {
                    // A detached node (no parents yet) has nothing to
                    // compute from.
                    if parents.is_empty() {
                        return false;
                    }
                    let mut inputs = Vec::with_capacity(parents.len());
                    for p in &parents {
                        match nodes.get(p).and_then(|pn| pn.value.clone()) {
                            Some(v) => inputs.push(v),
                            None => return false,
                        }
                    }
                    (CandidateInput::Compute(combine, inputs), eq, prior)
                }
            }
        };

        let new_value = match candidate {
            CandidateInput::Ready(v) => v,
            CandidateInput::Compute(combine, inputs) => combine(&inputs),
        };

        if let Some(ref old) = prior {
            if eq(old, &new_value) {
                return false;
            }
        }

        let subscribers = {
            let mut nodes = self.nodes.write();
            let node = match nodes.get_mut(&id) {
                Some(n) => n,
                None => return false,
            };
            node.value = Some(new_value.clone());
            node.subscribers.clone()
        };

        let name = self.name(id);
        for (_, sub) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| sub(&new_value))).is_err() {
                error!(node = %name, "selector subscriber panicked; continuing with remaining subscribers");
            }
        }
        true
    }

    /// Run one incremental propagation pass.
    ///
    /// Seeds the worklist with every source node, then repeatedly evaluates
    /// the lowest-depth queued node, enqueueing children of nodes that
    /// changed. Every parent of a node has strictly lower depth, so by the
    /// time a node is popped all of its parents have had their chance to
    /// emit; the visited set bounds each node to one evaluation per pass.
    pub(crate) fn process_change(&self) {
        let mut worklist: BinaryHeap<Reverse<(usize, NodeId)>> = BinaryHeap::new();
        {
            let sources = self.sources.read();
            for id in sources.iter() {
                worklist.push(Reverse((0, *id)));
            }
        }

        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(Reverse((_, id))) = worklist.pop() {
            if !visited.insert(id) {
                continue;
            }
            if self.emit(id) {
                let children: Vec<(usize, NodeId)> = {
                    let nodes = self.nodes.read();
                    match nodes.get(&id) {
                        Some(node) => node
                            .children
                            .iter()
                            .filter(|c| !visited.contains(c))
                            .map(|c| (nodes.get(c).map(|n| n.depth).unwrap_or(0), *c))
                            .collect(),
                        None => Vec::new(),
                    }
                };
                for entry in children {
                    worklist.push(Reverse(entry));
                }
            }
        }
    }

    /// Recompute a node's value in place without a propagation pass.
    ///
    /// Used right after construction and reparenting so `get()` reflects the
    /// new wiring immediately.
    fn recompute_value(&self, id: NodeId) {
        self.emit(id);
    }

    // --- Rewiring ---

    /// Detach a node from its current parents and attach it to new ones.
    ///
    /// Rejects wirings where a new parent is reachable from this node (that
    /// would close a cycle and break the depth bookkeeping). Depths of the
    /// node and everything downstream are recomputed, and the node's value
    /// is refreshed immediately.
    pub(crate) fn set_parents(&self, id: NodeId, new_parents: Vec<NodeId>) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            if !nodes.contains_key(&id) {
                return Err(StoreError::NodeDeleted);
            }
            for p in &new_parents {
                if !nodes.contains_key(p) {
                    return Err(StoreError::NodeDeleted);
                }
            }

            // Reachability check: walking child edges from `id` must not hit
            // any of the new parents.
            let targets: HashSet<NodeId> = new_parents.iter().copied().collect();
            let mut queue: VecDeque<NodeId> = VecDeque::from([id]);
            let mut seen: HashSet<NodeId> = HashSet::from([id]);
            while let Some(cur) = queue.pop_front() {
                if targets.contains(&cur) && cur != id {
                    return Err(StoreError::CycleDetected(nodes[&id].name.clone()));
                }
                if let Some(node) = nodes.get(&cur) {
                    for c in &node.children {
                        if seen.insert(*c) {
                            queue.push_back(*c);
                        }
                    }
                }
            }
            if targets.contains(&id) {
                return Err(StoreError::CycleDetected(nodes[&id].name.clone()));
            }

            // Detach from old parents.
            let old_parents = std::mem::take(&mut nodes.get_mut(&id).expect("checked").parents);
            for p in &old_parents {
                if let Some(parent) = nodes.get_mut(p) {
                    parent.children.retain(|c| *c != id);
                }
            }

            // Attach to new ones.
            for p in &new_parents {
                nodes.get_mut(p).expect("checked").children.push(id);
            }
            nodes.get_mut(&id).expect("checked").parents = new_parents;

            Self::refresh_depths(&mut *nodes, id);
        }

        self.recompute_value(id);
        Ok(())
    }

    /// Recompute depths for `start` and everything reachable below it.
    fn refresh_depths(nodes: &mut HashMap<NodeId, Node>, start: NodeId) {
        let mut queue: VecDeque<NodeId> = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            let (parents, old_depth) = match nodes.get(&id) {
                Some(n) => (n.parents.clone(), n.depth),
                None => continue,
            };
            let depth = parents
                .iter()
                .filter_map(|p| nodes.get(p).map(|n| n.depth + 1))
                .max()
                .unwrap_or(0);
            if depth != old_depth || id == start {
                if let Some(node) = nodes.get_mut(&id) {
                    node.depth = depth;
                    queue.extend(node.children.iter().copied());
                }
            }
        }
    }

    // --- Deletion ---

    /// Remove a node from the graph.
    ///
    /// Fails while the node still has children, preventing dangling edges.
    pub(crate) fn delete(&self, id: NodeId) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = match nodes.get(&id) {
            Some(n) => n,
            None => return Err(StoreError::NodeDeleted),
        };
        if !node.children.is_empty() {
            return Err(StoreError::NodeHasChildren(node.name.clone()));
        }
        let parents = node.parents.clone();
        for p in &parents {
            if let Some(parent) = nodes.get_mut(p) {
                parent.children.retain(|c| *c != id);
            }
        }
        nodes.remove(&id);
        self.sources.write().retain(|s| *s != id);
        Ok(())
    }
}

enum CandidateInput {
    Ready(Value),
    Compute(CombineFn, Vec<Value>),
}
