//! The world: entity identity, component storage, deferred mutations,
//! and flush.
//!
//! Owns an `EntityAllocator` plus archetype storage, and exposes both a
//! direct mutation surface for single-threaded callers and a per-worker
//! command buffer for anything running concurrently with other systems.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bit_set::BitSet;
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::command::{Command, CommandBuffer};
use crate::component::{Component, ComponentId};
use crate::def::Definition;
use crate::entity::{EntityAllocator, EntityId};
use crate::storage::{Archetype, ArchetypeId, ArchetypeStore};
use crate::view::{ViewId, ViewIter};

struct EntityLocation {
    archetype: ArchetypeId,
    chunk: usize,
    row: usize,
}

/// Owns one ECS world's entities, storage, and per-worker command
/// buffers. Safe to share as `&World` across concurrently running
/// systems: reads of already-written components are unsynchronized, and
/// entity creation/destruction goes through the per-worker buffers
/// rather than the store directly, so no system ever needs `&mut World`.
pub struct World {
    definition: Arc<Definition>,
    allocator: Arc<Mutex<EntityAllocator>>,
    archetypes: ArchetypeStore,
    locations: FxHashMap<u32, EntityLocation>,
    view_cache: FxHashMap<ViewId, Vec<ArchetypeId>>,
    command_buffers: Vec<CommandBuffer>,
    global_entity: EntityId,
    exit_requested: AtomicBool,
    exit_code: Mutex<i32>,
}

impl World {
    /// Creates a world from a finalized definition, with one command
    /// buffer segment per worker (at least one, for single-threaded use).
    pub fn new(definition: Arc<Definition>, worker_count: usize) -> Self {
        let allocator = Arc::new(Mutex::new(EntityAllocator::new()));
        let worker_count = worker_count.max(1);
        let command_buffers = (0..worker_count)
            .map(|w| CommandBuffer::new(w, allocator.clone()))
            .collect();

        let global_entity = allocator.lock().create();

        let mut world = World {
            definition,
            allocator,
            archetypes: ArchetypeStore::new(),
            locations: FxHashMap::default(),
            view_cache: FxHashMap::default(),
            command_buffers,
            global_entity,
            exit_requested: AtomicBool::new(false),
            exit_code: Mutex::new(0),
        };
        world.append_row(global_entity, Vec::new());
        debug!(entity = %global_entity, "world created, global entity reserved");
        world
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    pub fn id_of<T: Component>(&self) -> ComponentId {
        self.definition.id_of::<T>()
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.allocator.lock().is_alive(id)
    }

    pub fn global_entity(&self) -> EntityId {
        self.global_entity
    }

    pub(crate) fn locate(&self, id: EntityId) -> Option<(ArchetypeId, usize, usize)> {
        if !self.is_alive(id) {
            return None;
        }
        self.locations
            .get(&id.index())
            .map(|loc| (loc.archetype, loc.chunk, loc.row))
    }

    pub(crate) fn archetype(&self, id: ArchetypeId) -> &Archetype {
        self.archetypes.archetype(id)
    }

    fn metas_of(&self) -> impl Fn(ComponentId) -> Arc<crate::component::ComponentMeta> {
        let definition = self.definition.clone();
        move |id| definition.registry.meta(id)
    }

    fn archetype_mask(archetype: &Archetype) -> BitSet {
        let mut mask = BitSet::new();
        for id in archetype.component_ids.iter() {
            mask.insert(id.index());
        }
        mask
    }

    /// Tests a freshly created archetype against every declared view,
    /// caching the match. Called once per archetype so the O(views ×
    /// components) match cost is paid once, not on every iteration.
    fn refresh_view_cache_for(&mut self, archetype_id: ArchetypeId) {
        let mask = Self::archetype_mask(self.archetypes.archetype(archetype_id));
        for view in self.definition.views() {
            if view.matches(&mask) {
                self.view_cache.entry(view.id()).or_default().push(archetype_id);
            }
        }
    }

    fn find_or_create_archetype(&mut self, components: Vec<ComponentId>) -> ArchetypeId {
        let metas_of = self.metas_of();
        let (id, is_new) = self.archetypes.find_or_create(components, metas_of);
        if is_new {
            trace!(archetype = id.index(), "new archetype created");
            self.refresh_view_cache_for(id);
        }
        id
    }

    fn append_row(&mut self, entity: EntityId, values: Vec<(ComponentId, Box<dyn Any + Send>)>) {
        let components: Vec<ComponentId> = values.iter().map(|(id, _)| *id).collect();
        let archetype_id = self.find_or_create_archetype(components);
        let metas_of = self.metas_of();
        let (chunk, row) = self.archetypes.append(archetype_id, metas_of, entity, values);
        self.set_location(entity, archetype_id, chunk, row);
    }

    fn set_location(&mut self, entity: EntityId, archetype: ArchetypeId, chunk: usize, row: usize) {
        self.locations.insert(entity.index(), EntityLocation { archetype, chunk, row });
    }

    /// Adds `extra` and drops `removed` from `id`'s archetype in one
    /// migration, updating both the moved entity's location and (if the
    /// source swap-remove displaced another row) that entity's location.
    /// Notifies the view cache if migration created a brand-new
    /// archetype.
    fn migrate(
        &mut self,
        id: EntityId,
        loc: (ArchetypeId, usize, usize),
        extra: Vec<(ComponentId, Box<dyn Any + Send>)>,
        removed: &[ComponentId],
    ) {
        let metas_of = self.metas_of();
        let (dest, chunk, row, swapped, is_new) =
            self.archetypes.move_between(loc.0, loc.1, loc.2, metas_of, extra, removed, id);
        if let Some(moved) = swapped {
            self.set_location(moved, loc.0, loc.1, loc.2);
        }
        self.set_location(id, dest, chunk, row);
        if is_new {
            trace!(archetype = dest.index(), "new archetype created via migration");
            self.refresh_view_cache_for(dest);
        }
    }

    // -- Direct mutation surface, for callers holding `&mut World`
    // outright: test setup, or application code running between frames
    // rather than from inside a system. --

    pub fn create_entity(&mut self) -> EntityId {
        let id = self.allocator.lock().create();
        self.append_row(id, Vec::new());
        id
    }

    /// No-op if `id` is already dead.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        if !self.allocator.lock().destroy(id) {
            return false;
        }
        if let Some(loc) = self.locations.remove(&id.index()) {
            if let Some(moved) = self.archetypes.remove(loc.archetype, loc.chunk, loc.row) {
                self.set_location(moved, loc.archetype, loc.chunk, loc.row);
            }
        }
        true
    }

    /// Panics if `id` is not alive -- callers are expected to check
    /// `is_alive` first if the entity's liveness isn't already known.
    pub fn add_component<T: Component>(&mut self, id: EntityId, value: T) {
        assert!(self.is_alive(id), "add_component on a dead entity");
        let component = self.id_of::<T>();
        let loc = self
            .locate(id)
            .expect("live entity missing a location");
        self.migrate(id, loc, vec![(component, Box::new(value))], &[]);
    }

    /// No-op (beyond the entity keeping its current archetype) if `id`
    /// does not carry `T`.
    pub fn remove_component<T: Component>(&mut self, id: EntityId) {
        assert!(self.is_alive(id), "remove_component on a dead entity");
        let component = self.id_of::<T>();
        let loc = self
            .locate(id)
            .expect("live entity missing a location");
        if !self.archetype(loc.0).has_component(component) {
            return;
        }
        self.migrate(id, loc, Vec::new(), &[component]);
    }

    // -- Views --

    pub fn view_iter(&self, view: ViewId) -> ViewIter<'_> {
        let spec = self.definition.view(view);
        let matched = self.view_cache.get(&view).map(|v| v.as_slice()).unwrap_or(&[]);
        ViewIter::new(self, spec, matched)
    }

    // -- Command buffers --

    pub fn command_buffer(&mut self, worker: usize) -> &mut CommandBuffer {
        &mut self.command_buffers[worker]
    }

    /// Aliases worker `worker`'s command buffer through a shared `&World`.
    ///
    /// A running system only ever holds a shared reference to the world,
    /// but still needs to append to its own command buffer. Safe because
    /// the scheduler hands each concurrently running task a distinct
    /// worker index, so two tasks never alias the same slot at once.
    /// Mirrors the same raw-pointer cast `ViewIter::write` uses to hand
    /// out a mutable column reference through a shared `&World`.
    pub fn command_buffer_for_worker(&self, worker: usize) -> &mut CommandBuffer {
        let ptr = &self.command_buffers[worker] as *const CommandBuffer as *mut CommandBuffer;
        unsafe { &mut *ptr }
    }

    pub fn worker_count(&self) -> usize {
        self.command_buffers.len()
    }

    // -- Teardown --

    pub fn request_teardown(&self, code: i32) {
        self.exit_requested.store(true, Ordering::SeqCst);
        *self.exit_code.lock() = code;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }

    pub fn exit_code(&self) -> i32 {
        *self.exit_code.lock()
    }

    fn combine(
        definition: &Definition,
        component: ComponentId,
        existing: Box<dyn Any + Send>,
        incoming: Box<dyn Any + Send>,
    ) -> Box<dyn Any + Send> {
        match &definition.registry.meta(component).combiner {
            Some(combiner) => combiner(existing, incoming),
            // No combiner registered: last write wins; the earlier value
            // is dropped here.
            None => incoming,
        }
    }

    /// Applies every buffered mutation, in a fixed order: destroys, then
    /// adds/removes grouped per entity (computing one archetype move
    /// each), then creates (appended directly into the archetype their
    /// accumulated adds determine), then arbitrary closures last so they
    /// can observe every structural change already applied this flush.
    /// Runs on the calling thread alone, with exclusive access to every
    /// table -- no worker is active during a flush.
    pub fn flush(&mut self) {
        enum Op {
            Add(ComponentId, Box<dyn Any + Send>),
            Remove(ComponentId),
        }

        let mut commands: Vec<Command> = Vec::new();
        for buffer in &mut self.command_buffers {
            commands.extend(buffer.drain());
        }

        let mut created: FxHashSet<EntityId> = FxHashSet::default();
        let mut destroy_list: Vec<EntityId> = Vec::new();
        let mut ops: FxHashMap<EntityId, Vec<Op>> = FxHashMap::default();
        let mut order: Vec<EntityId> = Vec::new();
        let mut closures: Vec<Box<dyn FnOnce(&mut World) + Send>> = Vec::new();

        let mut touch = |id: EntityId, ops: &mut FxHashMap<EntityId, Vec<Op>>, order: &mut Vec<EntityId>| {
            if !ops.contains_key(&id) {
                order.push(id);
            }
            ops.entry(id).or_default();
        };

        for command in commands {
            match command {
                Command::Create(id) => {
                    created.insert(id);
                    touch(id, &mut ops, &mut order);
                }
                Command::Destroy(id) => destroy_list.push(id),
                Command::Add(id, component, value) => {
                    touch(id, &mut ops, &mut order);
                    ops.get_mut(&id).unwrap().push(Op::Add(component, value));
                }
                Command::Remove(id, component) => {
                    touch(id, &mut ops, &mut order);
                    ops.get_mut(&id).unwrap().push(Op::Remove(component));
                }
                Command::Closure(f) => closures.push(f),
            }
        }

        // 1. Destroys.
        for id in destroy_list {
            self.destroy_entity(id);
        }

        // 2/3. Adds/removes grouped per entity, in first-touched order.
        // Entities created this frame are appended directly once their
        // final component set is known; pre-existing entities migrate.
        for id in order {
            let Some(entity_ops) = ops.remove(&id) else { continue };
            if !self.is_alive(id) {
                continue;
            }

            let mut final_adds: Vec<(ComponentId, Box<dyn Any + Send>)> = Vec::new();
            let mut final_removes: Vec<ComponentId> = Vec::new();
            for op in entity_ops {
                match op {
                    Op::Add(component, value) => {
                        final_removes.retain(|c| *c != component);
                        if let Some(existing) = final_adds.iter_mut().find(|(c, _)| *c == component) {
                            let old = std::mem::replace(&mut existing.1, Box::new(()));
                            existing.1 = Self::combine(&self.definition, component, old, value);
                        } else {
                            final_adds.push((component, value));
                        }
                    }
                    Op::Remove(component) => {
                        final_adds.retain(|(c, _)| *c != component);
                        if !final_removes.contains(&component) {
                            final_removes.push(component);
                        }
                    }
                }
            }

            if created.contains(&id) {
                self.append_row(id, final_adds);
            } else {
                let Some(loc) = self.locate(id) else { continue };
                self.migrate(id, loc, final_adds, &final_removes);
            }
        }

        // Entities created this frame that received no adds at all still
        // need a (empty-archetype) row.
        for id in created {
            if self.is_alive(id) && self.locate(id).is_none() {
                self.append_row(id, Vec::new());
            }
        }

        // 4. User-deferred closures run last, with full world access.
        for f in closures {
            f(self);
        }
    }
}
