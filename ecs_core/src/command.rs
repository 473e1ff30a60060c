//! Deferred world mutations, buffered per worker and replayed at flush.
//!
//! A system only ever sees a `&World`, never a `&mut World`, so any
//! structural change it wants -- create, destroy, add a component,
//! remove one -- has to go through a tagged entry here instead and wait
//! for the frame's flush. A closure variant covers anything the typed
//! entries don't.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::component::ComponentId;
use crate::entity::{EntityAllocator, EntityId};
use crate::world::World;

pub(crate) enum Command {
    Create(EntityId),
    Destroy(EntityId),
    Add(EntityId, ComponentId, Box<dyn Any + Send>),
    Remove(EntityId, ComponentId),
    Closure(Box<dyn FnOnce(&mut World) + Send>),
}

/// One worker's buffered mutations for the current frame.
///
/// Entity creation reserves an id immediately (from the shared allocator)
/// so later commands in the same frame -- issued from the same or a
/// different worker -- can reference it; no storage is touched until
/// flush.
pub struct CommandBuffer {
    worker: usize,
    allocator: Arc<Mutex<EntityAllocator>>,
    entries: Vec<Command>,
}

impl CommandBuffer {
    pub(crate) fn new(worker: usize, allocator: Arc<Mutex<EntityAllocator>>) -> Self {
        CommandBuffer {
            worker,
            allocator,
            entries: Vec::new(),
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Reserves a fresh id immediately; the row itself is allocated at
    /// flush, in the archetype determined by whatever `add` calls target
    /// this id before then.
    pub fn create_entity(&mut self) -> EntityId {
        let id = self.allocator.lock().create();
        self.entries.push(Command::Create(id));
        id
    }

    /// No-op at flush if `id` is not alive by the time destroys are
    /// processed.
    pub fn destroy_entity(&mut self, id: EntityId) {
        self.entries.push(Command::Destroy(id));
    }

    /// `value` must be the type registered for `component`; the world
    /// checks this at flush via the registry's `TypeId`.
    pub fn add_component(&mut self, id: EntityId, component: ComponentId, value: Box<dyn Any + Send>) {
        self.entries.push(Command::Add(id, component, value));
    }

    /// No-op at flush if `id` doesn't carry `component` once earlier
    /// commands in the frame have replayed.
    pub fn remove_component(&mut self, id: EntityId, component: ComponentId) {
        self.entries.push(Command::Remove(id, component));
    }

    /// Escape hatch for mutations the typed API doesn't cover; runs during
    /// flush with full `&mut World` access, after the structured commands
    /// from buffers with a lower worker index (and earlier entries within
    /// this buffer) have already replayed.
    pub fn defer(&mut self, f: impl FnOnce(&mut World) + Send + 'static) {
        self.entries.push(Command::Closure(Box::new(f)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.entries)
    }
}
