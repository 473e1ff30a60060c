//! Per-frame glue: owns the compiled graph, the scheduler, and the
//! world, per spec.md §4.8.
//!
//! Grounded on the teacher's `StageExecutor::execute`'s
//! `pool.install(...)` sequencing (`src/system.rs`), generalized from
//! running rayon's own parallel iterators over one stage's systems to
//! submitting `ecs_jobs`'s task graph once per frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ecs_core::{Definition, World};
use ecs_jobs::{Scheduler, TaskGraph};

use crate::error::SystemsError;
use crate::graph::FrameGraph;
use crate::handle::WorldHandle;
use crate::registry::SystemRegistry;

/// Toggles on a `Runner`, per spec.md §6's runner configuration struct.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunnerFlags {
    /// Execute the frame graph via a plain topological walk on the
    /// calling thread instead of standing up a worker pool.
    pub single_threaded: bool,
    /// Log the compiled frame graph once at `Runner::create` time.
    pub dump_graph: bool,
    /// Record each frame's wall-clock duration, readable via
    /// `Runner::last_frame_duration`.
    pub record_stats: bool,
}

/// `Runner::create`'s configuration, per spec.md §6.
#[derive(Copy, Clone, Debug, Default)]
pub struct RunnerConfig {
    /// 0 selects `ecs_jobs::default_worker_count()`.
    pub worker_count: u16,
    pub flags: RunnerFlags,
}

type Task = Box<dyn Fn() + Send + Sync>;

/// Owns one world's per-frame execution: the precomputed system DAG, the
/// job scheduler driving it, and the world itself.
pub struct Runner {
    world: Box<World>,
    definition: Arc<Definition>,
    frame_graph: FrameGraph,
    job_graph: Arc<TaskGraph<Task>>,
    scheduler: Option<Scheduler<Task>>,
    single_threaded: bool,
    frame: Arc<AtomicU64>,
    record_stats: bool,
    last_frame_duration: Option<Duration>,
}

impl Runner {
    /// Precomputes the frame graph from `definition`, creates the world
    /// this runner drives, and (unless `single_threaded`) opens a worker
    /// pool. `registry` supplies the callback each graph node runs.
    pub fn create(
        definition: Arc<Definition>,
        registry: Arc<SystemRegistry>,
        config: RunnerConfig,
    ) -> Result<Self, SystemsError> {
        let frame_graph = FrameGraph::build(&definition);
        if config.flags.dump_graph {
            tracing::info!("frame graph:\n{}", frame_graph.describe(&definition));
        }

        let single_threaded = config.flags.single_threaded;
        let worker_count = if single_threaded {
            0
        } else if config.worker_count == 0 {
            ecs_jobs::default_worker_count()
        } else {
            config.worker_count as usize
        };

        // One command buffer per pool worker, plus one for whichever
        // thread calls `run_sync` (`wait_help`/`run_single_threaded`
        // always claims the next slot up, per `ecs_jobs::current_worker`).
        let world = Box::new(World::new(definition.clone(), worker_count + 1));

        let frame = Arc::new(AtomicU64::new(0));
        let job_graph = Arc::new(build_job_graph(
            &frame_graph,
            definition.clone(),
            registry,
            world.as_ref() as *const World,
            frame.clone(),
        ));

        let scheduler = if single_threaded {
            None
        } else {
            Some(Scheduler::new(worker_count).map_err(SystemsError::Jobs)?)
        };

        tracing::debug!(
            systems = frame_graph.len(),
            worker_count,
            single_threaded,
            "runner created"
        );

        Ok(Runner {
            world,
            definition,
            frame_graph,
            job_graph,
            scheduler,
            single_threaded,
            frame,
            record_stats: config.flags.record_stats,
            last_frame_duration: None,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    /// One tick: submits the frame graph, waits for completion, then
    /// flushes the command buffer, per spec.md §4.8. Returns control
    /// once the frame's structural mutations are all applied.
    pub fn run_sync(&mut self) {
        let start = self.record_stats.then(Instant::now);
        let frame_index = self.frame.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(frame = frame_index, "frame start");

        if self.single_threaded {
            ecs_jobs::run_single_threaded(&self.job_graph);
        } else {
            let scheduler = self
                .scheduler
                .as_ref()
                .expect("parallel runner always holds a scheduler");
            let handle = scheduler.submit(self.job_graph.clone());
            scheduler.wait_help(handle);
        }

        self.world.flush();
        self.last_frame_duration = start.map(|s| s.elapsed());
        tracing::trace!(frame = frame_index, "frame end");
    }

    pub fn last_frame_duration(&self) -> Option<Duration> {
        self.last_frame_duration
    }

    pub fn world_exit_requested(&self) -> bool {
        self.world.exit_requested()
    }

    pub fn world_exit_code(&self) -> i32 {
        self.world.exit_code()
    }
}

/// Builds the `ecs_jobs::TaskGraph` `Runner` submits every frame. Each
/// node's closure captures the world as a `usize`-cast raw pointer (to
/// stay `Send`) -- safe because it only ever runs while the owning
/// `Runner`, and therefore the `Box<World>` it points at, is alive, and
/// the box's heap address never moves once created.
fn build_job_graph(
    frame_graph: &FrameGraph,
    definition: Arc<Definition>,
    registry: Arc<SystemRegistry>,
    world_ptr: *const World,
    frame: Arc<AtomicU64>,
) -> TaskGraph<Task> {
    let world_addr = world_ptr as usize;
    let mut builder = TaskGraph::<Task>::builder();
    let mut node_idx = Vec::with_capacity(frame_graph.nodes.len());

    for node in &frame_graph.nodes {
        let system_id = node.system;
        let definition = definition.clone();
        let registry = registry.clone();
        let frame = frame.clone();

        let idx = builder.add_node(
            Box::new(move || {
                // SAFETY: see this function's doc comment.
                let world: &World = unsafe { &*(world_addr as *const World) };
                let worker = ecs_jobs::current_worker();
                let frame_index = frame.load(Ordering::Relaxed);
                let mut handle = WorldHandle::new(world, &definition, system_id, worker, frame_index);
                let callback = registry.callback(system_id);
                callback(&mut handle);
            }),
            node.exclusive,
        );
        node_idx.push(idx);
    }

    for (from, successors) in frame_graph.edges.iter().enumerate() {
        for &to in successors {
            builder.add_edge(node_idx[from], node_idx[to]);
        }
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SystemRegistryBuilder;
    use ecs_core::DefinitionBuilder;
    use std::sync::atomic::AtomicI32;
    use std::sync::Mutex;

    struct Position {
        x: f32,
        y: f32,
    }
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    struct Health(f32);

    fn build_def_and_registry() -> (Arc<Definition>, Arc<SystemRegistry>, ecs_core::ViewId, std::sync::Arc<Mutex<Vec<&'static str>>>) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut def_builder = DefinitionBuilder::new();
        def_builder.register_component::<Position>("Position").unwrap();
        def_builder.register_component::<Velocity>("Velocity").unwrap();
        let motion = def_builder
            .register_view("motion", |v| {
                v.write::<Position>();
                v.read::<Velocity>();
            })
            .unwrap();

        let mut systems = SystemRegistryBuilder::new(&mut def_builder);
        let o1 = order.clone();
        systems.register_system("integrate", 0, 0, false, &[motion], move |handle| {
            let mut it = handle.view_iter(motion);
            while it.walk() {
                let dx = it.read::<Velocity>().dx;
                it.write::<Position>().x += dx;
            }
            o1.lock().unwrap().push("integrate");
        });
        let o2 = order.clone();
        systems.register_system("log", 10, 0, false, &[motion], move |_handle| {
            o2.lock().unwrap().push("log");
        });
        let registry = systems.build();

        let def = def_builder.finalize();
        (Arc::new(def), Arc::new(registry), motion, order)
    }

    #[test]
    fn single_threaded_runs_every_system_once_per_frame() {
        let (def, registry, motion, order) = build_def_and_registry();
        let mut runner = Runner::create(
            def,
            registry,
            RunnerConfig {
                worker_count: 0,
                flags: RunnerFlags {
                    single_threaded: true,
                    ..Default::default()
                },
            },
        )
        .unwrap();

        let e = {
            let world = runner.world_mut();
            let pos_id = world.id_of::<Position>();
            let vel_id = world.id_of::<Velocity>();
            let buf = world.command_buffer(0);
            let e = buf.create_entity();
            buf.add_component(e, pos_id, Box::new(Position { x: 0.0, y: 0.0 }));
            buf.add_component(e, vel_id, Box::new(Velocity { dx: 1.0, dy: 0.0 }));
            e
        };
        runner.world_mut().flush();

        runner.run_sync();

        assert_eq!(*order.lock().unwrap(), vec!["integrate", "log"]);
        let world = runner.world();
        let mut it = world.view_iter(motion);
        assert!(it.jump(e));
        assert_eq!(it.read::<Position>().x, 1.0);
    }

    #[test]
    fn single_threaded_runs_independent_systems_in_ascending_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut def_builder = DefinitionBuilder::new();
        def_builder.register_component::<Position>("Position").unwrap();
        def_builder.register_component::<Velocity>("Velocity").unwrap();
        def_builder.register_component::<Health>("Health").unwrap();
        let write_pos = def_builder.register_view("write_pos", |v| { v.write::<Position>(); }).unwrap();
        let write_vel = def_builder.register_view("write_vel", |v| { v.write::<Velocity>(); }).unwrap();
        let write_health = def_builder.register_view("write_health", |v| { v.write::<Health>(); }).unwrap();

        let mut systems = SystemRegistryBuilder::new(&mut def_builder);
        // Three mutually non-conflicting systems, registered out of their
        // eventual logical order -- the frame graph still places them by
        // ascending `(order_key, priority, registration_id)`, and
        // single-threaded mode must walk them in that same order.
        let o1 = order.clone();
        systems.register_system("third", 30, 0, false, &[write_health], move |_h| {
            o1.lock().unwrap().push("third");
        });
        let o2 = order.clone();
        systems.register_system("first", 10, 0, false, &[write_vel], move |_h| {
            o2.lock().unwrap().push("first");
        });
        let o3 = order.clone();
        systems.register_system("second", 20, 0, false, &[write_pos], move |_h| {
            o3.lock().unwrap().push("second");
        });
        let registry = Arc::new(systems.build());
        let def = Arc::new(def_builder.finalize());

        let mut runner = Runner::create(
            def,
            registry,
            RunnerConfig {
                worker_count: 0,
                flags: RunnerFlags {
                    single_threaded: true,
                    ..Default::default()
                },
            },
        )
        .unwrap();
        runner.run_sync();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn parallel_runner_executes_independent_systems() {
        let counter = Arc::new(AtomicI32::new(0));
        let mut def_builder = DefinitionBuilder::new();
        def_builder.register_component::<Position>("Position").unwrap();
        def_builder.register_component::<Velocity>("Velocity").unwrap();
        let write_pos = def_builder.register_view("write_pos", |v| { v.write::<Position>(); }).unwrap();
        let write_vel = def_builder.register_view("write_vel", |v| { v.write::<Velocity>(); }).unwrap();

        let mut systems = SystemRegistryBuilder::new(&mut def_builder);
        let c1 = counter.clone();
        systems.register_system("a", 0, 0, false, &[write_pos], move |_h| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = counter.clone();
        systems.register_system("b", 0, 0, false, &[write_vel], move |_h| {
            c2.fetch_add(10, Ordering::SeqCst);
        });
        let registry = Arc::new(systems.build());
        let def = Arc::new(def_builder.finalize());

        let mut runner = Runner::create(def, registry, RunnerConfig::default()).unwrap();
        runner.run_sync();

        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }
}
