//! A work-stealing task-graph scheduler: N worker threads executing a
//! DAG of closures, with exclusive-task serialization. Generic over the
//! task type so `ecs_systems` can submit boxed system invocations
//! without this crate knowing anything about components or worlds.

mod error;
mod graph;
mod scheduler;
mod worker_slot;

pub use error::JobsError;
pub use graph::{NodeIdx, TaskGraph, TaskGraphBuilder};
pub use scheduler::{Handle, Scheduler};
pub use worker_slot::current_worker;

/// One less than hardware concurrency, per spec.md §2's worker-count
/// default -- the main thread itself joins the pool via `wait_help`, so
/// this leaves exactly enough OS threads to keep every core busy.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1)
}

/// Walks `graph` in the topological order implied by its edges, on the
/// calling thread alone. Used for `RunnerFlags::SingleThreaded` (spec.md
/// §4.8), bypassing the scheduler entirely.
///
/// `ready` is drained FIFO, not LIFO: `graph.roots` and every successor
/// list are already in ascending `NodeIdx` order (`ecs_systems`'s graph
/// builder assigns indices by ascending `(order_key, priority,
/// registration_id)` and only ever draws edges from a lower index to a
/// higher one), so popping from the front is what keeps two or more
/// simultaneously-ready, non-conflicting nodes in logical order -- the
/// guarantee spec.md §4.6/§4.8 single-threaded mode exists to provide.
pub fn run_single_threaded<F: Fn()>(graph: &TaskGraph<F>) {
    worker_slot::set_current_worker(0);
    let mut in_degree: Vec<u32> = graph.nodes.iter().map(|n| n.in_degree).collect();
    let mut ready: std::collections::VecDeque<NodeIdx> = graph.roots.iter().copied().collect();

    while let Some(idx) = ready.pop_front() {
        (graph.tasks[idx.index()])();
        for &succ in &graph.nodes[idx.index()].successors {
            in_degree[succ.index()] -= 1;
            if in_degree[succ.index()] == 0 {
                ready.push_back(succ);
            }
        }
    }
}
