use ecs::prelude::*;

struct Position {
    x: f32,
    y: f32,
}
struct Velocity {
    dx: f32,
    dy: f32,
}

fn main() {
    let mut def = DefinitionBuilder::new();
    def.register_component::<Position>("Position").unwrap();
    def.register_component::<Velocity>("Velocity").unwrap();
    let motion = def
        .register_view("motion", |v| {
            v.write::<Position>();
            v.read::<Velocity>();
        })
        .unwrap();

    let mut systems = SystemRegistryBuilder::new(&mut def);
    systems.register_system("integrate", 0, 0, false, &[motion], move |handle| {
        let mut it = handle.view_iter(motion);
        while it.walk() {
            let dx = it.read::<Velocity>().dx;
            let dy = it.read::<Velocity>().dy;
            let pos = it.write::<Position>();
            pos.x += dx;
            pos.y += dy;
        }
    });
    let registry = std::sync::Arc::new(systems.build());
    let definition = std::sync::Arc::new(def.finalize());

    let mut runner = Runner::create(definition.clone(), registry, RunnerConfig::default())
        .expect("scheduler failed to start");

    {
        let world = runner.world_mut();
        let pos_id = world.id_of::<Position>();
        let vel_id = world.id_of::<Velocity>();
        for _ in 0..4 {
            let buf = world.command_buffer(0);
            let e = buf.create_entity();
            buf.add_component(e, pos_id, Box::new(Position { x: 1.0, y: 2.0 }));
            buf.add_component(e, vel_id, Box::new(Velocity { dx: 1.0, dy: 2.0 }));
        }
        world.flush();
    }

    runner.run_sync();
}
