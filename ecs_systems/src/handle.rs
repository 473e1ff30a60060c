//! The handle a running system's callback receives, per spec.md §6's
//! "System callback" contract.
//!
//! Grounded on the teacher's `PreparedWorld` (`src/system.rs`): a
//! `*const World` plus the declared access set, asserted against on
//! every access. This version checks declared *views* rather than
//! declared *components* directly, since spec.md §4.1 scopes a system's
//! access to the `ViewId`s it registered with, not to bare component ids.

use ecs_core::{CommandBuffer, Definition, EntityId, SystemId, ViewId, ViewIter, World};

/// Passed by value to a system's callback for the duration of one call;
/// must not be retained past return (spec.md §6).
pub struct WorldHandle<'a> {
    world: &'a World,
    definition: &'a Definition,
    system: SystemId,
    worker: usize,
    frame: u64,
}

impl<'a> WorldHandle<'a> {
    pub(crate) fn new(
        world: &'a World,
        definition: &'a Definition,
        system: SystemId,
        worker: usize,
        frame: u64,
    ) -> Self {
        WorldHandle {
            world,
            definition,
            system,
            worker,
            frame,
        }
    }

    /// An iterator over `view`'s matching entities.
    ///
    /// # Panics
    /// Aborts with a diagnostic (a programmer error per spec.md §7) if
    /// `view` was not among the `ViewId`s this system declared at
    /// registration time.
    pub fn view_iter(&self, view: ViewId) -> ViewIter<'a> {
        let decl = self.definition.system(self.system);
        assert!(
            decl.views.contains(&view),
            "system `{}` accessed view {:?} it never declared",
            decl.name,
            view
        );
        self.world.view_iter(view)
    }

    /// This call's worker's command buffer. Mutations recorded here are
    /// invisible to any iterator until the frame's flush (spec.md §4.4).
    pub fn commands(&self) -> &mut CommandBuffer {
        self.world.command_buffer_for_worker(self.worker)
    }

    /// The reserved entity id that exists in every world (spec.md §6).
    pub fn entity_global(&self) -> EntityId {
        self.world.global_entity()
    }

    /// The current frame counter, incremented once per `Runner::run_sync`.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Sets the world's teardown flag; the runner observes this after
    /// the frame's flush and surfaces it through `Runner::exit_requested`
    /// (spec.md §4.7's "Failure" paragraph).
    pub fn request_teardown(&self, code: i32) {
        self.world.request_teardown(code);
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.world.is_alive(entity)
    }
}
