//! Binds declared `SystemId`s (pure data, owned by `ecs_core::Definition`)
//! to the actual Rust closures that run when a system's task executes.
//!
//! `ecs_core::DefinitionBuilder::register_system` only ever records a
//! system's *declaration* -- spec.md draws the registry as data-only, and
//! leaves "the system callback" as an external interface (§6). This
//! module is the other half: a thin builder that proxies every
//! `register_system` call through to the same `DefinitionBuilder` while
//! keeping the callback alongside it, indexed by the same dense
//! `SystemId` the definition hands back.

use std::sync::Arc;

use ecs_core::{DefinitionBuilder, SystemId, ViewId};

use crate::handle::WorldHandle;

/// The callback a system runs with, per spec.md §6: `(world_handle) ->
/// ()`.
pub type SystemCallback = dyn Fn(&mut WorldHandle<'_>) + Send + Sync;

/// Accumulates system callbacks alongside a `DefinitionBuilder`. Built
/// once at startup, the same as the definition itself.
pub struct SystemRegistryBuilder<'a> {
    def: &'a mut DefinitionBuilder,
    callbacks: Vec<Arc<SystemCallback>>,
}

impl<'a> SystemRegistryBuilder<'a> {
    pub fn new(def: &'a mut DefinitionBuilder) -> Self {
        SystemRegistryBuilder {
            def,
            callbacks: Vec::new(),
        }
    }

    /// Registers a system's declaration (name, ordering, exclusivity,
    /// declared views) on the underlying definition and records the
    /// closure it runs with. Mirrors
    /// `ecs_core::DefinitionBuilder::register_system`'s signature with
    /// one addition: the callback.
    #[allow(clippy::too_many_arguments)]
    pub fn register_system(
        &mut self,
        name: &str,
        order_key: i64,
        priority: i32,
        exclusive: bool,
        views: &[ViewId],
        callback: impl Fn(&mut WorldHandle<'_>) + Send + Sync + 'static,
    ) -> SystemId {
        let id = self.def.register_system(name, order_key, priority, exclusive, views);
        debug_assert_eq!(id.index(), self.callbacks.len(), "system ids must stay dense");
        self.callbacks.push(Arc::new(callback));
        id
    }

    pub fn build(self) -> SystemRegistry {
        SystemRegistry {
            callbacks: self.callbacks,
        }
    }
}

/// The frozen set of system callbacks, indexed by `SystemId`. Shared
/// (immutable, `Arc`-able) the same way `ecs_core::Definition` is.
pub struct SystemRegistry {
    callbacks: Vec<Arc<SystemCallback>>,
}

impl SystemRegistry {
    pub fn callback(&self, id: SystemId) -> Arc<SystemCallback> {
        self.callbacks[id.index()].clone()
    }
}
