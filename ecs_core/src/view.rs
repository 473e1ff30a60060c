//! Declarative access specifications, compiled into archetype-matching
//! iterators.
//!
//! Grounded on the facade's `src/query.rs` (`View`, `Read<T>`, `Write<T>`,
//! `ArchetypeFilter`, `Query`, `ChunkView`), generalized from the
//! teacher's compile-time tuple views to runtime-declared [`ViewSpec`]s
//! the way `original_source/libs/ecs/include/ecs_def.h`'s
//! `ecs_def_view_name`/`ecs_def_system_views` address views by a small
//! integer id rather than by Rust type.

use bit_set::BitSet;
use fxhash::FxHashMap;

use crate::component::{AccessMode, Component, ComponentId};
use crate::def::ComponentRegistry;
use crate::error::DefinitionError;
use crate::storage::{ArchetypeId, Chunk, ColumnOps};
use crate::world::World;

/// A stable id assigned to a view at registration time.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ViewId(pub(crate) u32);

impl ViewId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named, immutable declaration of what components a system may touch
/// and in which mode.
pub struct ViewSpec {
    pub(crate) id: ViewId,
    pub(crate) name: String,
    pub(crate) required: Vec<ComponentId>,
    pub(crate) optional: Vec<ComponentId>,
    pub(crate) forbidden: Vec<ComponentId>,
    pub(crate) access: FxHashMap<ComponentId, AccessMode>,
    pub(crate) with_entities: bool,
    pub(crate) exclusive: bool,
    pub(crate) required_mask: BitSet,
    pub(crate) forbidden_mask: BitSet,
}

impl ViewSpec {
    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn access_mode(&self, component: ComponentId) -> Option<AccessMode> {
        self.access.get(&component).copied()
    }

    /// All components this view grants access to, each paired with its
    /// effective access mode -- an exclusive view upgrades every read to
    /// a write, per spec.md §4.6 step 1.
    pub(crate) fn effective_access(&self) -> impl Iterator<Item = (ComponentId, AccessMode)> + '_ {
        self.access.iter().map(move |(id, mode)| {
            let mode = if self.exclusive { AccessMode::Write } else { *mode };
            (*id, mode)
        })
    }

    pub(crate) fn matches(&self, archetype_mask: &BitSet) -> bool {
        self.required_mask.is_subset(archetype_mask) && self.forbidden_mask.is_disjoint(archetype_mask)
    }
}

/// Builds a [`ViewSpec`] against a fixed [`ComponentRegistry`], so typed
/// `.read::<T>()`/`.write::<T>()` calls can resolve `T` to its
/// [`ComponentId`] without the caller naming it directly.
pub struct ViewSpecBuilder<'a> {
    registry: &'a ComponentRegistry,
    name: String,
    required: Vec<ComponentId>,
    optional: Vec<ComponentId>,
    forbidden: Vec<ComponentId>,
    access: FxHashMap<ComponentId, AccessMode>,
    with_entities: bool,
    exclusive: bool,
}

impl<'a> ViewSpecBuilder<'a> {
    pub(crate) fn new(name: &str, registry: &'a ComponentRegistry) -> Self {
        ViewSpecBuilder {
            registry,
            name: name.to_string(),
            required: Vec::new(),
            optional: Vec::new(),
            forbidden: Vec::new(),
            access: FxHashMap::default(),
            with_entities: false,
            exclusive: false,
        }
    }

    pub fn read<T: Component>(&mut self) -> &mut Self {
        let id = self.registry.id_of::<T>();
        self.required.push(id);
        self.access.insert(id, AccessMode::Read);
        self
    }

    pub fn write<T: Component>(&mut self) -> &mut Self {
        let id = self.registry.id_of::<T>();
        self.required.push(id);
        self.access.insert(id, AccessMode::Write);
        self
    }

    pub fn optional_read<T: Component>(&mut self) -> &mut Self {
        let id = self.registry.id_of::<T>();
        self.optional.push(id);
        self.access.insert(id, AccessMode::Read);
        self
    }

    pub fn optional_write<T: Component>(&mut self) -> &mut Self {
        let id = self.registry.id_of::<T>();
        self.optional.push(id);
        self.access.insert(id, AccessMode::Write);
        self
    }

    pub fn without<T: Component>(&mut self) -> &mut Self {
        self.forbidden.push(self.registry.id_of::<T>());
        self
    }

    pub fn with_entities(&mut self) -> &mut Self {
        self.with_entities = true;
        self
    }

    pub fn exclusive(&mut self) -> &mut Self {
        self.exclusive = true;
        self
    }

    pub(crate) fn build(self, id: ViewId) -> Result<ViewSpec, DefinitionError> {
        if self.required.is_empty() && self.optional.is_empty() {
            return Err(DefinitionError::EmptyView(self.name));
        }
        let disjoint = self
            .required
            .iter()
            .chain(self.optional.iter())
            .all(|c| !self.forbidden.contains(c));
        if !disjoint {
            return Err(DefinitionError::NonDisjointView(self.name));
        }

        let mut required_mask = BitSet::new();
        for c in &self.required {
            required_mask.insert(c.index());
        }
        let mut forbidden_mask = BitSet::new();
        for c in &self.forbidden {
            forbidden_mask.insert(c.index());
        }

        Ok(ViewSpec {
            id,
            name: self.name,
            required: self.required,
            optional: self.optional,
            forbidden: self.forbidden,
            access: self.access,
            with_entities: self.with_entities,
            exclusive: self.exclusive,
            required_mask,
            forbidden_mask,
        })
    }
}

/// A cursor over archetypes matching a view. Single-threaded and
/// non-escaping: it borrows the world for its scope.
pub struct ViewIter<'a> {
    world: &'a World,
    spec: &'a ViewSpec,
    matched: &'a [ArchetypeId],
    archetype_cursor: usize,
    chunk_cursor: usize,
    row_cursor: isize,
    started: bool,
}

impl<'a> ViewIter<'a> {
    pub(crate) fn new(world: &'a World, spec: &'a ViewSpec, matched: &'a [ArchetypeId]) -> Self {
        ViewIter {
            world,
            spec,
            matched,
            archetype_cursor: 0,
            chunk_cursor: 0,
            row_cursor: -1,
            started: false,
        }
    }

    fn current_chunk(&self) -> Option<&Chunk> {
        let archetype_id = *self.matched.get(self.archetype_cursor)?;
        let archetype = self.world.archetype(archetype_id);
        archetype.chunks().get(self.chunk_cursor)
    }

    /// Advances the cursor by one row, crossing chunk and archetype
    /// boundaries as needed. Returns `false` once every matched archetype
    /// has been exhausted.
    pub fn walk(&mut self) -> bool {
        self.started = true;
        loop {
            if self.archetype_cursor >= self.matched.len() {
                return false;
            }
            let archetype_id = self.matched[self.archetype_cursor];
            let archetype = self.world.archetype(archetype_id);

            if self.chunk_cursor >= archetype.chunk_count() {
                self.archetype_cursor += 1;
                self.chunk_cursor = 0;
                self.row_cursor = -1;
                continue;
            }

            let chunk = &archetype.chunks()[self.chunk_cursor];
            self.row_cursor += 1;
            if self.row_cursor as usize >= chunk.len() {
                self.chunk_cursor += 1;
                self.row_cursor = -1;
                continue;
            }

            return true;
        }
    }

    /// Random access by entity id: repositions the cursor onto the row
    /// currently holding `entity`, if it is alive and matches this view.
    pub fn jump(&mut self, entity: crate::entity::EntityId) -> bool {
        let Some((archetype_id, chunk_index, row)) = self.world.locate(entity) else {
            return false;
        };
        let Some(pos) = self.matched.iter().position(|a| *a == archetype_id) else {
            return false;
        };
        self.started = true;
        self.archetype_cursor = pos;
        self.chunk_cursor = chunk_index;
        self.row_cursor = row as isize;
        true
    }

    fn require_started(&self) {
        assert!(self.started, "ViewIter::read/write called before walk/jump");
    }

    fn column_index(&self, component: ComponentId) -> usize {
        self.current_chunk()
            .and_then(|c| c.column_index(component))
            .expect("component not present on current row")
    }

    /// Returns a reference to `T` on the current row. Panics in debug
    /// builds if this view did not declare read (or write) access to `T`.
    pub fn read<T: Component>(&self) -> &T {
        self.require_started();
        let id = self.world.id_of::<T>();
        debug_assert!(
            self.spec.access_mode(id).is_some(),
            "view `{}` did not declare access to this component",
            self.spec.name
        );
        let col = self.column_index(id);
        let chunk = self.current_chunk().expect("walk/jump positioned past the end");
        let row = self.row_cursor as usize;
        chunk
            .column(col)
            .as_any()
            .downcast_ref::<crate::storage::Column<T>>()
            .expect("column type mismatch")
            .get(row)
    }

    /// Returns a mutable reference to `T` on the current row. Panics if
    /// this view only declared `Read` access to `T` -- writing through a
    /// read-only accessor is a programmer error per spec.md §7.
    pub fn write<T: Component>(&mut self) -> &mut T {
        self.require_started();
        let id = self.world.id_of::<T>();
        let mode = self.spec.access_mode(id);
        assert!(
            matches!(mode, Some(AccessMode::Write)),
            "view `{}` declared read-only access to a component written through `write`",
            self.spec.name
        );
        let col = self.column_index(id);
        let row = self.row_cursor as usize;
        let chunk = self.current_chunk().expect("walk/jump positioned past the end");

        // SAFETY: this view only reaches rows in archetypes it was
        // compiled against, and `write` already asserted the view
        // declared `Write` access to `T`. The scheduler never runs two
        // systems concurrently whose declared accesses to the same
        // component conflict (spec.md §4.6), so no other thread can be
        // reading or writing this column while this borrow is live; the
        // shared `&World` this iterator holds is therefore safe to cast
        // away here, the same way the teacher's `PreparedWorld` does
        // through a raw `*const World`.
        let column = unsafe {
            let ptr = chunk.column(col) as *const dyn ColumnOps as *mut dyn ColumnOps;
            &mut *ptr
        };
        column
            .as_any_mut()
            .downcast_mut::<crate::storage::Column<T>>()
            .expect("column type mismatch")
            .get_mut(row)
    }

    pub fn entity(&self) -> crate::entity::EntityId {
        self.require_started();
        let chunk = self.current_chunk().expect("walk/jump positioned past the end");
        chunk.entities()[self.row_cursor as usize]
    }

    /// Returns a reference to `T` on the current row, or `None` if the
    /// current archetype doesn't carry it -- the accessor for a view's
    /// `optional_read`/`optional_write` components, which spec.md §4.5
    /// describes as "possibly-null column pointers".
    pub fn read_optional<T: Component>(&self) -> Option<&T> {
        self.require_started();
        let id = self.world.id_of::<T>();
        debug_assert!(
            self.spec.access_mode(id).is_some(),
            "view `{}` did not declare access to this component",
            self.spec.name
        );
        let chunk = self.current_chunk().expect("walk/jump positioned past the end");
        let col = chunk.column_index(id)?;
        let row = self.row_cursor as usize;
        Some(
            chunk
                .column(col)
                .as_any()
                .downcast_ref::<crate::storage::Column<T>>()
                .expect("column type mismatch")
                .get(row),
        )
    }

    /// Mutable counterpart of [`ViewIter::read_optional`]. Panics if this
    /// view only declared `Read` access to `T` -- same rule as
    /// [`ViewIter::write`].
    pub fn write_optional<T: Component>(&mut self) -> Option<&mut T> {
        self.require_started();
        let id = self.world.id_of::<T>();
        let mode = self.spec.access_mode(id);
        assert!(
            matches!(mode, Some(AccessMode::Write)),
            "view `{}` declared read-only access to a component written through `write_optional`",
            self.spec.name
        );
        let chunk = self.current_chunk().expect("walk/jump positioned past the end");
        let col = chunk.column_index(id)?;
        let row = self.row_cursor as usize;

        // SAFETY: same reasoning as `ViewIter::write`.
        let column = unsafe {
            let ptr = chunk.column(col) as *const dyn ColumnOps as *mut dyn ColumnOps;
            &mut *ptr
        };
        Some(
            column
                .as_any_mut()
                .downcast_mut::<crate::storage::Column<T>>()
                .expect("column type mismatch")
                .get_mut(row),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::DefinitionBuilder;
    use crate::world::World;
    use std::sync::Arc;

    struct Position {
        x: f32,
    }
    struct Velocity {
        dx: f32,
    }

    #[test]
    fn optional_component_reads_none_when_archetype_lacks_it() {
        let mut b = DefinitionBuilder::new();
        b.register_component::<Position>("Position").unwrap();
        b.register_component::<Velocity>("Velocity").unwrap();
        let view = b
            .register_view("maybe_moving", |v| {
                v.read::<Position>();
                v.optional_read::<Velocity>();
            })
            .unwrap();
        let def = Arc::new(b.finalize());

        let mut world = World::new(def, 1);
        let pos_id = world.id_of::<Position>();
        let vel_id = world.id_of::<Velocity>();

        let buf = world.command_buffer(0);
        let still = buf.create_entity();
        buf.add_component(still, pos_id, Box::new(Position { x: 1.0 }));
        let moving = buf.create_entity();
        buf.add_component(moving, pos_id, Box::new(Position { x: 2.0 }));
        buf.add_component(moving, vel_id, Box::new(Velocity { dx: 5.0 }));
        world.flush();

        let mut it = world.view_iter(view);
        let mut seen_with_velocity = 0;
        let mut seen_without = 0;
        while it.walk() {
            match it.read_optional::<Velocity>() {
                Some(v) => {
                    assert_eq!(v.dx, 5.0);
                    seen_with_velocity += 1;
                }
                None => seen_without += 1,
            }
        }
        assert_eq!(seen_with_velocity, 1);
        assert_eq!(seen_without, 1);
    }
}
