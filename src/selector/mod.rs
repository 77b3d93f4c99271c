//! Incremental derived-value graph.
//!
//! A DAG of selector nodes: sources hold raw values, derived nodes combine
//! their parents through pure functions. [`SelectorGraph::process_change`]
//! republishes only the affected portion of the graph, in depth order, with
//! each node evaluated at most once per pass and republication gated on the
//! node's equality predicate.

mod controller;
mod graph;
mod typed;

pub use controller::{ControllerHost, SelectorController};
pub use graph::NodeId;
pub use typed::{Deferred, Selector, SelectorGraph, SelectorSubscription, Source};
