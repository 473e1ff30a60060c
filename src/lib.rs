//! Archetype-based entity component system with a parallel frame
//! scheduler.
//!
//! This crate is a thin facade over three crates that each own one
//! layer of the system:
//!
//! - [`ecs_core`] -- the single-threaded data model: component
//!   registry, entity allocator, archetype storage, deferred command
//!   buffer, and the view/iterator layer that reads it.
//! - [`ecs_jobs`] -- the work-stealing scheduler that runs a DAG of
//!   tasks across a worker pool, independent of anything ECS-specific.
//! - [`ecs_systems`] -- the system graph builder and per-frame
//!   [`ecs_systems::Runner`] that ties the two together.
//!
//! Most applications only need [`prelude`].

pub use ecs_core;
pub use ecs_jobs;
pub use ecs_systems;

pub use ecs_core::{
    AccessMode, Component, ComponentId, Definition, DefinitionBuilder, DefinitionError, EntityId,
    SystemDecl, SystemId, ViewId, ViewIter, ViewSpec, ViewSpecBuilder, World,
};
pub use ecs_jobs::JobsError;
pub use ecs_systems::{
    Runner, RunnerConfig, RunnerFlags, SystemCallback, SystemRegistry, SystemRegistryBuilder,
    SystemsError, WorldHandle,
};

/// Re-exports the types most applications need for `use ecs::prelude::*;`.
pub mod prelude {
    pub use crate::{
        Component, Definition, DefinitionBuilder, EntityId, Runner, RunnerConfig, RunnerFlags,
        SystemRegistryBuilder, ViewId, ViewSpecBuilder, World, WorldHandle,
    };
}
