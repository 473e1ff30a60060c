//! A work-stealing scheduler that executes one [`TaskGraph`] at a time
//! across a pool of worker threads, per spec.md §4.7.
//!
//! Each worker owns a `crossbeam_deque::Worker` (a local chase-lev
//! deque); newly-ready nodes are published to a shared
//! [`crossbeam_deque::Injector`] and workers refill their local deque
//! from it in batches, falling back to stealing directly from a sibling
//! when the injector is also empty -- the canonical pattern documented
//! by `crossbeam-deque` itself, generalized here to a DAG with exclusive
//! nodes instead of a flat task pool.

use std::iter;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_deque::{Injector, Steal, Stealer, Worker as LocalDeque};
use crossbeam_utils::Backoff;
use tracing::{debug, trace};

use crate::error::JobsError;
use crate::graph::{NodeIdx, TaskGraph};
use crate::worker_slot::set_current_worker;

enum Gate {
    Idle,
    Shared(usize),
    Exclusive,
}

/// Serializes exclusive nodes against every other running task, per
/// spec.md §4.7: "waits for the running count to reach zero before
/// starting, and blocks new starts until it completes".
struct ExclusiveGate {
    state: Mutex<Gate>,
    cv: Condvar,
}

impl ExclusiveGate {
    fn new() -> Self {
        ExclusiveGate {
            state: Mutex::new(Gate::Idle),
            cv: Condvar::new(),
        }
    }

    fn enter(&self, exclusive: bool) {
        let mut state = self.state.lock().unwrap();
        loop {
            match (&*state, exclusive) {
                (Gate::Idle, false) => {
                    *state = Gate::Shared(1);
                    return;
                }
                (Gate::Idle, true) => {
                    *state = Gate::Exclusive;
                    return;
                }
                (Gate::Shared(n), false) => {
                    *state = Gate::Shared(n + 1);
                    return;
                }
                _ => state = self.cv.wait(state).unwrap(),
            }
        }
    }

    fn exit(&self, exclusive: bool) {
        let mut state = self.state.lock().unwrap();
        *state = match (&*state, exclusive) {
            (Gate::Shared(n), false) if *n > 1 => Gate::Shared(n - 1),
            _ => Gate::Idle,
        };
        self.cv.notify_all();
    }
}

struct RunState<F> {
    graph: Arc<TaskGraph<F>>,
    in_degree: Vec<AtomicUsize>,
    remaining: AtomicUsize,
    gate: ExclusiveGate,
}

/// A handle to one submitted run, returned by [`Scheduler::submit`].
pub struct Handle<F> {
    run: Arc<RunState<F>>,
}

struct Shared<F> {
    injector: Injector<NodeIdx>,
    stealers: Vec<Stealer<NodeIdx>>,
    shutdown: AtomicBool,
    current: Mutex<Option<Arc<RunState<F>>>>,
    current_cv: Condvar,
}

/// Pops the next runnable node: first from this worker's own local
/// deque (LIFO), then by refilling the local deque from the shared
/// injector, then by stealing a single node from a sibling worker.
fn find_task<F>(local: &LocalDeque<NodeIdx>, shared: &Shared<F>) -> Option<NodeIdx> {
    local.pop().or_else(|| {
        iter::repeat_with(|| {
            shared
                .injector
                .steal_batch_and_pop(local)
                .or_else(|| shared.stealers.iter().map(|s| s.steal()).collect())
        })
        .find(|s| !matches!(s, Steal::Retry))
        .and_then(|s| s.success())
    })
}

/// Runs ready nodes from `run` until every node in its graph has
/// completed, pushing newly-ready successors to the shared injector.
/// Used by both pool worker threads and the thread that calls
/// [`Scheduler::wait_help`].
fn drive<F: Fn() + Send + Sync>(local: &LocalDeque<NodeIdx>, shared: &Shared<F>, run: &RunState<F>) {
    let backoff = Backoff::new();
    while run.remaining.load(Ordering::Acquire) > 0 {
        match find_task(local, shared) {
            Some(idx) => {
                backoff.reset();
                let node = &run.graph.nodes[idx.index()];
                run.gate.enter(node.exclusive);
                trace!(node = idx.index(), exclusive = node.exclusive, "running task");
                (run.graph.tasks[idx.index()])();
                run.gate.exit(node.exclusive);

                for &succ in &node.successors {
                    let prev = run.in_degree[succ.index()].fetch_sub(1, Ordering::AcqRel);
                    if prev == 1 {
                        shared.injector.push(succ);
                    }
                }
                run.remaining.fetch_sub(1, Ordering::AcqRel);
            }
            None => {
                if run.remaining.load(Ordering::Acquire) == 0 {
                    return;
                }
                backoff.snooze();
            }
        }
    }
}

fn worker_loop<F: Fn() + Send + Sync>(id: usize, shared: Arc<Shared<F>>, local: LocalDeque<NodeIdx>) {
    set_current_worker(id);
    loop {
        let run = {
            let guard = shared
                .current_cv
                .wait_while(shared.current.lock().unwrap(), |run| {
                    run.is_none() && !shared.shutdown.load(Ordering::Acquire)
                })
                .unwrap();
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            guard.clone()
        };
        if let Some(run) = run {
            drive(&local, &shared, &run);
        }
    }
}

/// Executes task graphs across a fixed pool of worker threads. Holds one
/// run at a time: `submit` followed by `wait_help` is how `ecs_systems`'s
/// runner drives one frame.
pub struct Scheduler<F> {
    shared: Arc<Shared<F>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl<F: Fn() + Send + Sync + 'static> Scheduler<F> {
    /// `worker_count` additional OS threads are spawned; the thread that
    /// calls [`Scheduler::wait_help`] contributes a further worker, so a
    /// `worker_count` of zero still makes progress (single-threaded mode,
    /// per spec.md §4.8's `SingleThreaded` flag, should instead call
    /// [`crate::run_single_threaded`] and never touch a `Scheduler` at all).
    pub fn new(worker_count: usize) -> Result<Self, JobsError> {
        let locals: Vec<LocalDeque<NodeIdx>> = (0..worker_count).map(|_| LocalDeque::new_lifo()).collect();
        let stealers = locals.iter().map(LocalDeque::stealer).collect();

        let shared = Arc::new(Shared {
            injector: Injector::new(),
            stealers,
            shutdown: AtomicBool::new(false),
            current: Mutex::new(None),
            current_cv: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for (i, local) in locals.into_iter().enumerate() {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("ecs-job-worker-{}", i))
                .spawn(move || worker_loop(i, shared, local))
                .map_err(JobsError::PoolSpawn)?;
            handles.push(handle);
        }

        debug!(worker_count, "job scheduler started");
        Ok(Scheduler { shared, handles })
    }

    /// Copies `graph`'s per-run counters, seeds the ready queue with its
    /// roots, and wakes the pool. Only one run may be outstanding at a
    /// time; call [`Scheduler::wait_help`] before submitting again.
    pub fn submit(&self, graph: Arc<TaskGraph<F>>) -> Handle<F> {
        let in_degree = graph
            .nodes
            .iter()
            .map(|n| AtomicUsize::new(n.in_degree as usize))
            .collect();
        let run = Arc::new(RunState {
            remaining: AtomicUsize::new(graph.len()),
            in_degree,
            gate: ExclusiveGate::new(),
            graph: graph.clone(),
        });

        for &root in &graph.roots {
            self.shared.injector.push(root);
        }

        {
            let mut current = self.shared.current.lock().unwrap();
            debug_assert!(current.is_none(), "a previous run was never waited on");
            *current = Some(run.clone());
        }
        self.shared.current_cv.notify_all();

        Handle { run }
    }

    /// The calling thread joins the pool as an extra worker and blocks
    /// until every node in `handle`'s graph has run. Its worker slot is
    /// `worker_count()` -- the one past the spawned pool workers' `0..N`.
    pub fn wait_help(&self, handle: Handle<F>) {
        set_current_worker(self.handles.len());
        let local = LocalDeque::new_lifo();
        drive(&local, &self.shared, &handle.run);
        debug_assert_eq!(
            handle.run.remaining.load(Ordering::Acquire),
            0,
            "wait_help returned with nodes still pending -- submitted graph was not a DAG"
        );
        *self.shared.current.lock().unwrap() = None;
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl<F> Drop for Scheduler<F> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.current_cv.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn runs_a_linear_chain_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = TaskGraph::<Box<dyn Fn() + Send + Sync>>::builder();
        let o1 = order.clone();
        let a = builder.add_node(Box::new(move || o1.lock().unwrap().push(1)), false);
        let o2 = order.clone();
        let b = builder.add_node(Box::new(move || o2.lock().unwrap().push(2)), false);
        builder.add_edge(a, b);
        let graph = Arc::new(builder.build());

        let scheduler = Scheduler::new(2).unwrap();
        let handle = scheduler.submit(graph);
        scheduler.wait_help(handle);

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn independent_nodes_all_run_exactly_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut builder = TaskGraph::<Box<dyn Fn() + Send + Sync>>::builder();
        for _ in 0..8 {
            let c = counter.clone();
            builder.add_node(Box::new(move || { c.fetch_add(1, Ordering::SeqCst); }), false);
        }
        let graph = Arc::new(builder.build());

        let scheduler = Scheduler::new(3).unwrap();
        let handle = scheduler.submit(graph);
        scheduler.wait_help(handle);

        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn exclusive_node_never_overlaps_another() {
        let overlap = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let mut builder = TaskGraph::<Box<dyn Fn() + Send + Sync>>::builder();
        for exclusive in [false, false, true, false, false] {
            let overlap = overlap.clone();
            let active = active.clone();
            builder.add_node(
                Box::new(move || {
                    let n = active.fetch_add(1, Ordering::SeqCst) + 1;
                    if exclusive && n > 1 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    thread::yield_now();
                    active.fetch_sub(1, Ordering::SeqCst);
                }),
                exclusive,
            );
        }
        let graph = Arc::new(builder.build());

        let scheduler = Scheduler::new(4).unwrap();
        let handle = scheduler.submit(graph);
        scheduler.wait_help(handle);

        assert!(!overlap.load(Ordering::SeqCst));
    }
}
