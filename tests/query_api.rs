use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ecs::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}
#[derive(Clone, Copy, Debug, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}
#[derive(Clone, Copy, Debug, PartialEq)]
struct Health(f32);

fn single_threaded_runner(
    build: impl FnOnce(&mut DefinitionBuilder, &mut SystemRegistryBuilder),
) -> Runner {
    let mut def = DefinitionBuilder::new();
    let mut systems = SystemRegistryBuilder::new(&mut def);
    build(&mut def, &mut systems);
    let registry = Arc::new(systems.build());
    let definition = Arc::new(def.finalize());
    Runner::create(
        definition,
        registry,
        RunnerConfig {
            worker_count: 0,
            flags: RunnerFlags {
                single_threaded: true,
                ..Default::default()
            },
        },
    )
    .unwrap()
}

// Scenario A -- basic iteration: a view over (write Position, read
// Velocity) only yields entities carrying both components.
#[test]
fn basic_iteration_excludes_entities_missing_a_component() {
    let mut def = DefinitionBuilder::new();
    def.register_component::<Position>("Position").unwrap();
    def.register_component::<Velocity>("Velocity").unwrap();
    let motion = def
        .register_view("motion", |v| {
            v.read::<Position>();
            v.write::<Velocity>();
        })
        .unwrap();
    let definition = def.finalize();

    let mut world = World::new(Arc::new(definition), 1);
    let pos = world.id_of::<Position>();
    let vel = world.id_of::<Velocity>();

    let buf = world.command_buffer(0);
    let e1 = buf.create_entity();
    buf.add_component(e1, pos, Box::new(Position { x: 1.0, y: 2.0 }));
    buf.add_component(e1, vel, Box::new(Velocity { dx: 10.0, dy: 20.0 }));

    let e2 = buf.create_entity();
    buf.add_component(e2, pos, Box::new(Position { x: 3.0, y: 4.0 }));

    let e3 = buf.create_entity();
    buf.add_component(e3, pos, Box::new(Position { x: 5.0, y: 6.0 }));
    buf.add_component(e3, vel, Box::new(Velocity { dx: 50.0, dy: 60.0 }));
    world.flush();

    let mut it = world.view_iter(motion);
    let mut seen = Vec::new();
    while it.walk() {
        seen.push(it.entity());
    }

    assert_eq!(seen, vec![e1, e3]);
    assert!(!seen.contains(&e2));
}

// Scenario B -- deferred destroy: a destroy recorded this frame is
// still visible to later systems in the same frame and only takes
// effect at flush.
#[test]
fn destroy_is_deferred_to_next_flush() {
    let destroyed_entity = Arc::new(std::sync::Mutex::new(None));
    let observed_during_frame = Arc::new(AtomicUsize::new(0));

    let d1 = destroyed_entity.clone();
    let o1 = observed_during_frame.clone();
    let mut runner = single_threaded_runner(|def, systems| {
        def.register_component::<Position>("Position").unwrap();
        let all = def.register_view("all", |v| v.read::<Position>()).unwrap();

        systems.register_system("destroyer", 0, 0, false, &[all], move |handle| {
            let mut it = handle.view_iter(all);
            if it.walk() {
                let e = it.entity();
                handle.commands().destroy_entity(e);
                *d1.lock().unwrap() = Some(e);
            }
        });
        systems.register_system("observer", 10, 0, false, &[all], move |handle| {
            let mut it = handle.view_iter(all);
            let mut count = 0;
            while it.walk() {
                count += 1;
            }
            o1.store(count, Ordering::SeqCst);
        });
    });

    let e1 = {
        let world = runner.world_mut();
        let pos = world.id_of::<Position>();
        let buf = world.command_buffer(0);
        let e = buf.create_entity();
        buf.add_component(e, pos, Box::new(Position { x: 0.0, y: 0.0 }));
        e
    };
    runner.world_mut().flush();

    runner.run_sync();

    assert_eq!(*destroyed_entity.lock().unwrap(), Some(e1));
    assert_eq!(observed_during_frame.load(Ordering::SeqCst), 1);
    assert!(!runner.world().is_alive(e1));

    runner.run_sync();
    assert_eq!(observed_during_frame.load(Ordering::SeqCst), 0);
}

// Scenario C -- add/remove round-trip: adding then removing a
// component within the same frame returns the entity to its original
// archetype once flushed.
#[test]
fn add_then_remove_round_trips_the_archetype() {
    let mut def = DefinitionBuilder::new();
    def.register_component::<Position>("Position").unwrap();
    def.register_component::<Velocity>("Velocity").unwrap();
    let has_velocity = def.register_view("has_velocity", |v| v.read::<Velocity>()).unwrap();
    let definition = def.finalize();

    let mut world = World::new(Arc::new(definition), 1);
    let pos = world.id_of::<Position>();
    let vel = world.id_of::<Velocity>();

    let buf = world.command_buffer(0);
    let e1 = buf.create_entity();
    buf.add_component(e1, pos, Box::new(Position { x: 1.0, y: 1.0 }));
    world.flush();

    // Same frame: add Velocity, then remove it again before the flush.
    let buf = world.command_buffer(0);
    buf.add_component(e1, vel, Box::new(Velocity { dx: 9.0, dy: 9.0 }));
    buf.remove_component(e1, vel);
    world.flush();

    assert!(world.is_alive(e1));
    let mut it = world.view_iter(has_velocity);
    let mut seen = Vec::new();
    while it.walk() {
        seen.push(it.entity());
    }
    assert!(seen.is_empty(), "entity should have landed back in its original archetype");
}

// Scenario D -- ordering with conflict: a system that writes Health
// must run before one that reads it, and the later system must
// observe the write within the same frame.
#[test]
fn conflicting_systems_run_in_order() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let l1 = log.clone();
    let l2 = log.clone();
    let mut runner = single_threaded_runner(|def, systems| {
        def.register_component::<Health>("Health").unwrap();
        let write_health = def.register_view("write_health", |v| v.write::<Health>()).unwrap();
        let read_health = def.register_view("read_health", |v| v.read::<Health>()).unwrap();

        systems.register_system("damage", 10, 0, false, &[write_health], move |handle| {
            let mut it = handle.view_iter(write_health);
            while it.walk() {
                it.write::<Health>().0 -= 5.0;
            }
            l1.lock().unwrap().push("damage");
        });
        systems.register_system("log_health", 20, 0, false, &[read_health], move |handle| {
            let mut it = handle.view_iter(read_health);
            while it.walk() {
                assert_eq!(it.read::<Health>().0, 95.0);
            }
            l2.lock().unwrap().push("log_health");
        });
    });

    {
        let world = runner.world_mut();
        let health = world.id_of::<Health>();
        let buf = world.command_buffer(0);
        let e = buf.create_entity();
        buf.add_component(e, health, Box::new(Health(100.0)));
    }
    runner.world_mut().flush();

    runner.run_sync();

    assert_eq!(*log.lock().unwrap(), vec!["damage", "log_health"]);
}

// Scenario E -- non-conflict parallelism: two systems that touch
// disjoint components both run to completion under the parallel
// scheduler with no coordination required from the caller.
#[test]
fn independent_systems_both_run_under_the_parallel_scheduler() {
    let total = Arc::new(AtomicUsize::new(0));

    let t1 = total.clone();
    let t2 = total.clone();
    let mut def = DefinitionBuilder::new();
    let mut systems = SystemRegistryBuilder::new(&mut def);
    def.register_component::<Position>("Position").unwrap();
    def.register_component::<Velocity>("Velocity").unwrap();
    let write_pos = def.register_view("write_pos", |v| v.write::<Position>()).unwrap();
    let write_vel = def.register_view("write_vel", |v| v.write::<Velocity>()).unwrap();
    systems.register_system("a", 0, 0, false, &[write_pos], move |_h| {
        t1.fetch_add(1, Ordering::SeqCst);
    });
    systems.register_system("b", 0, 0, false, &[write_vel], move |_h| {
        t2.fetch_add(1, Ordering::SeqCst);
    });
    let registry = Arc::new(systems.build());
    let definition = Arc::new(def.finalize());

    let mut runner = Runner::create(definition, registry, RunnerConfig::default()).unwrap();
    runner.run_sync();

    assert_eq!(total.load(Ordering::SeqCst), 2);
}

// Scenario F -- exclusive view: a system declaring an exclusive view
// gets ordering edges to every other system at its logical level, so
// nothing else overlaps it even though it shares no components.
#[test]
fn exclusive_system_serializes_against_unrelated_systems() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let l1 = log.clone();
    let l2 = log.clone();
    let l3 = log.clone();
    let mut runner = single_threaded_runner(|def, systems| {
        def.register_component::<Position>("Position").unwrap();
        def.register_component::<Velocity>("Velocity").unwrap();
        let write_pos = def.register_view("write_pos", |v| v.write::<Position>()).unwrap();
        let exclusive = def
            .register_view("exclusive_all", |v| {
                v.write::<Velocity>();
                v.exclusive();
            })
            .unwrap();

        systems.register_system("before", 10, 0, false, &[write_pos], move |_h| {
            l1.lock().unwrap().push("before");
        });
        systems.register_system("exclusive", 20, 0, true, &[exclusive], move |_h| {
            l2.lock().unwrap().push("exclusive");
        });
        systems.register_system("after", 30, 0, false, &[write_pos], move |_h| {
            l3.lock().unwrap().push("after");
        });
    });

    runner.run_sync();

    assert_eq!(*log.lock().unwrap(), vec!["before", "exclusive", "after"]);
}
