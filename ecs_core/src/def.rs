//! The build-only definition registry: modules register components,
//! views, and systems once at startup; `finalize()` freezes the result.
//!
//! Components, views, and systems are all registered through ids handed
//! out from this one place, so a definition can be finalized, shared
//! behind an `Arc`, and reused by any number of worlds without any of
//! them renegotiating what a given id means.

use std::any::TypeId;
use std::mem;
use std::sync::Arc;

use bit_set::BitSet;
use fxhash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::component::{Component, ComponentId, ComponentMeta};
use crate::error::DefinitionError;
use crate::storage::column_factory;
use crate::view::{ViewId, ViewSpec, ViewSpecBuilder};

/// A stable id assigned to a system at registration time.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SystemId(pub(crate) u32);

impl SystemId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A system's registration-time declaration: its ordering keys, its
/// exclusivity, and the views it reads and writes through. Consumed by
/// `ecs_systems`'s graph builder to derive conflict edges between
/// systems whose declared views overlap.
pub struct SystemDecl {
    pub name: String,
    pub order_key: i64,
    pub priority: i32,
    pub exclusive: bool,
    pub views: Vec<ViewId>,
    pub registration_id: u32,
}

/// Resolves Rust component types to the dense ids views and systems are
/// declared against.
pub(crate) struct ComponentRegistry {
    metas: Vec<Arc<ComponentMeta>>,
    by_type: FxHashMap<TypeId, ComponentId>,
    by_name: FxHashMap<String, ComponentId>,
}

impl ComponentRegistry {
    fn new() -> Self {
        ComponentRegistry {
            metas: Vec::new(),
            by_type: FxHashMap::default(),
            by_name: FxHashMap::default(),
        }
    }

    fn register<T: Component>(&mut self, name: &str) -> Result<ComponentId, DefinitionError> {
        self.register_with_combiner_opt::<T>(name, None)
    }

    fn register_with_combiner<T: Component>(
        &mut self,
        name: &str,
        combiner: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Result<ComponentId, DefinitionError> {
        let erased: crate::storage::Combiner = Arc::new(move |a, b| {
            let a = *a.downcast::<T>().expect("combiner type mismatch");
            let b = *b.downcast::<T>().expect("combiner type mismatch");
            Box::new(combiner(a, b))
        });
        self.register_with_combiner_opt::<T>(name, Some(erased))
    }

    fn register_with_combiner_opt<T: Component>(
        &mut self,
        name: &str,
        combiner: Option<crate::storage::Combiner>,
    ) -> Result<ComponentId, DefinitionError> {
        if self.by_name.contains_key(name) {
            return Err(DefinitionError::DuplicateComponent(name.to_string()));
        }
        let id = ComponentId(self.metas.len() as u32);
        let meta = Arc::new(ComponentMeta {
            name: name.to_string(),
            type_id: TypeId::of::<T>(),
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            column_factory: Box::new(column_factory::<T>),
            combiner,
        });
        self.metas.push(meta);
        self.by_type.insert(TypeId::of::<T>(), id);
        self.by_name.insert(name.to_string(), id);
        debug!(component = name, id = id.index(), "registered component");
        Ok(id)
    }

    pub(crate) fn id_of<T: Component>(&self) -> ComponentId {
        *self
            .by_type
            .get(&TypeId::of::<T>())
            .expect("component type not registered with this definition")
    }

    pub(crate) fn meta(&self, id: ComponentId) -> Arc<ComponentMeta> {
        self.metas[id.index()].clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.metas.len()
    }
}

/// Accumulates declarations before `finalize()` freezes them into a
/// [`Definition`]. Not `Send`/`Sync` -- building happens single-threaded
/// at startup, before any world or worker pool exists to race with it.
pub struct DefinitionBuilder {
    registry: ComponentRegistry,
    views: Vec<ViewSpec>,
    systems: Vec<SystemDecl>,
    modules: FxHashSet<String>,
}

impl Default for DefinitionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        DefinitionBuilder {
            registry: ComponentRegistry::new(),
            views: Vec::new(),
            systems: Vec::new(),
            modules: FxHashSet::default(),
        }
    }

    pub fn register_component<T: Component>(&mut self, name: &str) -> Result<ComponentId, DefinitionError> {
        self.registry.register::<T>(name)
    }

    pub fn register_component_with_combiner<T: Component>(
        &mut self,
        name: &str,
        combiner: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Result<ComponentId, DefinitionError> {
        self.registry.register_with_combiner::<T>(name, combiner)
    }

    pub fn register_view(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut ViewSpecBuilder),
    ) -> Result<ViewId, DefinitionError> {
        let id = ViewId(self.views.len() as u32);
        let mut builder = ViewSpecBuilder::new(name, &self.registry);
        f(&mut builder);
        let spec = builder.build(id)?;
        self.views.push(spec);
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register_system(
        &mut self,
        name: &str,
        order_key: i64,
        priority: i32,
        exclusive: bool,
        views: &[ViewId],
    ) -> SystemId {
        let id = SystemId(self.systems.len() as u32);
        self.systems.push(SystemDecl {
            name: name.to_string(),
            order_key,
            priority,
            exclusive,
            views: views.to_vec(),
            registration_id: id.0,
        });
        id
    }

    /// Runs `init` against `self`, scoped under `name`. Re-registering the
    /// same module name is an error, with no side effect on the registry.
    pub fn register_module(
        &mut self,
        name: &str,
        init: impl FnOnce(&mut DefinitionBuilder),
    ) -> Result<(), DefinitionError> {
        if self.modules.contains(name) {
            return Err(DefinitionError::DuplicateModule(name.to_string()));
        }
        let before_components = self.registry.len();
        let before_views = self.views.len();
        let before_systems = self.systems.len();

        init(self);

        // Registration inside `init` can itself fail via `?` in caller
        // code before reaching here; if it panics we simply never insert
        // the module name, so a subsequent attempt is not silently
        // treated as a duplicate.
        let _ = (before_components, before_views, before_systems);
        self.modules.insert(name.to_string());
        Ok(())
    }

    pub fn finalize(self) -> Definition {
        let component_count = self.registry.len();
        let mut system_access = Vec::with_capacity(self.systems.len());

        for system in &self.systems {
            let mut reads = BitSet::with_capacity(component_count);
            let mut writes = BitSet::with_capacity(component_count);
            for view_id in &system.views {
                let view = &self.views[view_id.index()];
                for (component, mode) in view.effective_access() {
                    match mode {
                        crate::component::AccessMode::Read => {
                            reads.insert(component.index());
                        }
                        crate::component::AccessMode::Write => {
                            writes.insert(component.index());
                        }
                    }
                }
            }
            system_access.push((reads, writes));
        }

        info!(
            components = component_count,
            views = self.views.len(),
            systems = self.systems.len(),
            "definition finalized"
        );

        Definition {
            registry: self.registry,
            views: self.views,
            systems: self.systems,
            system_access,
        }
    }
}

/// The frozen, shareable result of a [`DefinitionBuilder`]. Immutable
/// after `finalize()`; any number of worlds and runners may reference the
/// same definition concurrently.
pub struct Definition {
    pub(crate) registry: ComponentRegistry,
    pub(crate) views: Vec<ViewSpec>,
    pub(crate) systems: Vec<SystemDecl>,
    /// Per-system (reads, writes) masks, indexed by `SystemId`.
    pub(crate) system_access: Vec<(BitSet, BitSet)>,
}

impl Definition {
    pub fn id_of<T: Component>(&self) -> ComponentId {
        self.registry.id_of::<T>()
    }

    pub fn view(&self, id: ViewId) -> &ViewSpec {
        &self.views[id.index()]
    }

    pub fn views(&self) -> &[ViewSpec] {
        &self.views
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn system(&self, id: SystemId) -> &SystemDecl {
        &self.systems[id.index()]
    }

    /// Every `SystemId` in registration order, for callers (the graph
    /// builder) that need to walk all declared systems.
    pub fn system_ids(&self) -> impl Iterator<Item = SystemId> + '_ {
        (0..self.systems.len() as u32).map(SystemId)
    }

    pub fn component_count(&self) -> usize {
        self.registry.len()
    }

    /// The (reads, writes) `ComponentId` masks computed for this system
    /// at `finalize()` time -- an exclusive view's components are folded
    /// into `writes` so a conflict check never has to special-case
    /// exclusivity separately from ordinary write/write overlap.
    pub fn system_access(&self, id: SystemId) -> &(BitSet, BitSet) {
        &self.system_access[id.index()]
    }
}
