//! The immutable task DAG a [`crate::scheduler::Scheduler`] executes.
//!
//! `ecs_jobs` doesn't know what a "system" is -- `ecs_systems` builds one
//! of these from a `Definition`'s conflict analysis (spec.md §4.6) and
//! resubmits it once per frame. The graph itself never changes between
//! submissions; only the per-run in-degree counters do.

/// A node's position in a [`TaskGraph`], stable for the graph's lifetime.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeIdx(pub(crate) u32);

impl NodeIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct Node {
    pub exclusive: bool,
    pub successors: Vec<NodeIdx>,
    pub in_degree: u32,
}

/// A directed acyclic graph of tasks, each a `F` run to completion on one
/// worker. Built once per runner via [`TaskGraphBuilder`] and submitted
/// fresh every frame; submission only clones the small per-run counters
/// derived from [`Node::in_degree`], not this structure.
pub struct TaskGraph<F> {
    pub(crate) nodes: Vec<Node>,
    pub(crate) tasks: Vec<F>,
    pub(crate) roots: Vec<NodeIdx>,
}

impl<F> TaskGraph<F> {
    pub fn builder() -> TaskGraphBuilder<F> {
        TaskGraphBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Accumulates nodes and edges before [`TaskGraphBuilder::build`] computes
/// in-degrees and the root set.
pub struct TaskGraphBuilder<F> {
    nodes: Vec<Node>,
    tasks: Vec<F>,
}

impl<F> Default for TaskGraphBuilder<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> TaskGraphBuilder<F> {
    pub fn new() -> Self {
        TaskGraphBuilder {
            nodes: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Adds a node for `task`. `exclusive` nodes are serialized against
    /// every other running task by the scheduler (spec.md §4.7).
    pub fn add_node(&mut self, task: F, exclusive: bool) -> NodeIdx {
        let idx = NodeIdx(self.nodes.len() as u32);
        self.nodes.push(Node {
            exclusive,
            successors: Vec::new(),
            in_degree: 0,
        });
        self.tasks.push(task);
        idx
    }

    /// Adds a direct dependency: `to` cannot start until `from` finishes.
    /// Callers are expected to pass an already-transitively-reduced edge
    /// set (`ecs_systems`'s graph builder does the reduction); this
    /// method does no cycle detection of its own -- a cyclic submission
    /// is a programmer error that surfaces as nodes never reaching
    /// `in_degree == 0`, caught by [`crate::scheduler::Scheduler::wait_help`]'s
    /// debug assertion instead.
    pub fn add_edge(&mut self, from: NodeIdx, to: NodeIdx) {
        self.nodes[from.index()].successors.push(to);
        self.nodes[to.index()].in_degree += 1;
    }

    pub fn build(self) -> TaskGraph<F> {
        let roots = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.in_degree == 0)
            .map(|(i, _)| NodeIdx(i as u32))
            .collect();
        TaskGraph {
            nodes: self.nodes,
            tasks: self.tasks,
            roots,
        }
    }
}
