//! Entity allocator, archetype storage, command buffer, and view/iterator
//! layer: the single-threaded data model one `World` owns.
//!
//! `ecs_core` has no notion of systems, scheduling, or worker threads --
//! that's `ecs_systems` and `ecs_jobs`. This crate only answers "what
//! does an entity have, and how do I walk the entities matching a
//! view", kept free of anything execution-related so it can be shared
//! by both a single-threaded caller and a parallel runner unchanged.

mod command;
mod component;
mod def;
mod entity;
mod error;
mod storage;
mod view;
mod world;

pub use component::{AccessMode, Component, ComponentId};
pub use def::{Definition, DefinitionBuilder, SystemDecl, SystemId};
pub use entity::EntityId;
pub use error::DefinitionError;
pub use view::{ViewId, ViewIter, ViewSpec, ViewSpecBuilder};
pub use world::World;

pub use command::CommandBuffer;

/// Re-exports the types most call sites need, for `use ecs_core::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AccessMode, Component, ComponentId, CommandBuffer, Definition, DefinitionBuilder,
        DefinitionError, EntityId, SystemId, ViewId, ViewIter, ViewSpec, ViewSpecBuilder, World,
    };
}
