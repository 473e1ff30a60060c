//! Archetype-based storage: entities sharing a component set are grouped
//! into one table, chunked into fixed-size SoA blocks.
//!
//! An archetype holds every entity with exactly one component set; a
//! query only ever has to look at the archetypes whose set is a
//! superset of what it asks for, never at entities one at a time.
//! Chunking keeps those column vectors cache-friendly and caps how much
//! a single migration or destroy has to move.

use std::any::Any;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::component::{Component, ComponentId, ComponentMeta};
use crate::entity::EntityId;

/// 16 KiB chunks, per the data model's storage layout.
pub const CHUNK_BYTES: usize = 16 * 1024;

fn chunk_capacity(row_bytes: usize) -> usize {
    (CHUNK_BYTES / row_bytes.max(1)).max(1)
}

/// Type-erased combiner: given the existing value and a newly-added one
/// (both boxed as their registered component type), produces the value
/// that should replace both.
pub type Combiner =
    Arc<dyn Fn(Box<dyn Any + Send>, Box<dyn Any + Send>) -> Box<dyn Any + Send> + Send + Sync>;

/// Type-erased operations every component column supports, so archetype
/// tables can hold a heterogeneous `Vec<Box<dyn ColumnOps>>` while each
/// column itself stays a plain, safely-dropped `Vec<T>`.
pub trait ColumnOps: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    fn push_any(&mut self, value: Box<dyn Any + Send>);
    /// Removes the value at `row` via `Vec::swap_remove`, handing it back
    /// boxed rather than dropping it.
    fn take_at(&mut self, row: usize) -> Box<dyn Any + Send>;
}

pub(crate) struct Column<T: Component> {
    data: Vec<T>,
}

impl<T: Component> Column<T> {
    fn new() -> Self {
        Column { data: Vec::new() }
    }

    pub(crate) fn get(&self, row: usize) -> &T {
        &self.data[row]
    }

    pub(crate) fn get_mut(&mut self, row: usize) -> &mut T {
        &mut self.data[row]
    }
}

impl<T: Component> ColumnOps for Column<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn push_any(&mut self, value: Box<dyn Any + Send>) {
        let value = *value
            .downcast::<T>()
            .expect("component type mismatch on archetype insert");
        self.data.push(value);
    }

    fn take_at(&mut self, row: usize) -> Box<dyn Any + Send> {
        Box::new(self.data.swap_remove(row))
    }
}

/// Builds a fresh, empty column for a component, type-erased behind
/// [`ColumnOps`]. Stored on [`ComponentMeta`] so the registry can hand an
/// archetype a column without the archetype ever naming the concrete type.
pub(crate) fn column_factory<T: Component>() -> Box<dyn ColumnOps> {
    Box::new(Column::<T>::new())
}

/// One 16 KiB block of a table: a dense entity-id column plus one
/// densely-packed column per component in the archetype's schema.
pub(crate) struct Chunk {
    schema: Arc<Vec<ComponentId>>,
    entities: Vec<EntityId>,
    columns: Vec<Box<dyn ColumnOps>>,
    capacity: usize,
}

impl Chunk {
    fn new(schema: Arc<Vec<ComponentId>>, metas: &[&ComponentMeta], capacity: usize) -> Self {
        let columns = metas.iter().map(|m| (m.column_factory)()).collect();
        Chunk {
            schema,
            entities: Vec::with_capacity(capacity),
            columns,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn is_full(&self) -> bool {
        self.entities.len() >= self.capacity
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub(crate) fn column_index(&self, id: ComponentId) -> Option<usize> {
        self.schema.iter().position(|c| *c == id)
    }

    pub(crate) fn column(&self, index: usize) -> &dyn ColumnOps {
        self.columns[index].as_ref()
    }

    /// Removes row `row`, swapping this chunk's own last row into its
    /// place. Returns the row's original values (tagged by component id)
    /// and, if another row was moved to fill the gap, the entity that now
    /// occupies `row`.
    fn swap_remove_row(
        &mut self,
        row: usize,
    ) -> (Vec<(ComponentId, Box<dyn Any + Send>)>, Option<EntityId>) {
        let last = self.entities.len() - 1;
        let removed_is_last = row == last;

        let values: Vec<(ComponentId, Box<dyn Any + Send>)> = self
            .schema
            .iter()
            .copied()
            .zip(self.columns.iter_mut())
            .map(|(id, col)| (id, col.take_at(row)))
            .collect();
        self.entities.swap_remove(row);

        let moved = if removed_is_last {
            None
        } else {
            Some(self.entities[row])
        };
        (values, moved)
    }
}

/// A small, dense id assigned the first time a component set is seen.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One table: all entities sharing an identical, canonicalized component set.
pub(crate) struct Archetype {
    pub id: ArchetypeId,
    /// Sorted, deduplicated -- the canonical form used both as the table's
    /// schema and as the archetype store's lookup key.
    pub component_ids: Arc<Vec<ComponentId>>,
    chunk_capacity: usize,
    chunks: Vec<Chunk>,
}

impl Archetype {
    fn new(id: ArchetypeId, component_ids: Vec<ComponentId>, metas: &[&ComponentMeta]) -> Self {
        let row_bytes: usize = metas.iter().map(|m| m.size).sum();
        Archetype {
            id,
            component_ids: Arc::new(component_ids),
            chunk_capacity: chunk_capacity(row_bytes),
            chunks: Vec::new(),
        }
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.component_ids.binary_search(&id).is_ok()
    }

    pub fn matches_required(&self, required: &[ComponentId]) -> bool {
        required.iter().all(|id| self.has_component(*id))
    }

    pub fn matches_forbidden(&self, forbidden: &[ComponentId]) -> bool {
        forbidden.iter().all(|id| !self.has_component(*id))
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Appends one row. `values` need not be supplied in schema order;
    /// every component in the archetype's schema must be present.
    fn append(
        &mut self,
        metas: &[&ComponentMeta],
        entity: EntityId,
        mut values: Vec<(ComponentId, Box<dyn Any + Send>)>,
    ) -> (usize, usize) {
        if self.chunks.is_empty() || self.chunks.last().unwrap().is_full() {
            self.chunks
                .push(Chunk::new(self.component_ids.clone(), metas, self.chunk_capacity));
        }
        let chunk_index = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_index];
        chunk.entities.push(entity);
        for (i, id) in self.component_ids.iter().enumerate() {
            let pos = values
                .iter()
                .position(|(vid, _)| vid == id)
                .expect("missing component value for archetype row");
            let (_, value) = values.remove(pos);
            chunk.columns[i].push_any(value);
        }
        (chunk_index, chunk.entities.len() - 1)
    }

    /// Drops the row at `(chunk_index, row)`, swapping the chunk's own
    /// last row into the vacated slot. Returns the entity that now
    /// occupies that slot, if any. Chunks before the table's last one can
    /// end up under-full after this; they simply fill back up as future
    /// appends land in them once they become the last chunk again.
    fn remove(&mut self, chunk_index: usize, row: usize) -> Option<EntityId> {
        let (values, moved) = self.chunks[chunk_index].swap_remove_row(row);
        drop(values);
        if self.chunks[chunk_index].is_empty() {
            self.chunks.remove(chunk_index);
        }
        moved
    }

    /// Removes the row at `(chunk_index, row)` and hands its values back,
    /// for migration into another archetype.
    fn take(
        &mut self,
        chunk_index: usize,
        row: usize,
    ) -> (Vec<(ComponentId, Box<dyn Any + Send>)>, Option<EntityId>) {
        let (values, moved) = self.chunks[chunk_index].swap_remove_row(row);
        if self.chunks[chunk_index].is_empty() {
            self.chunks.remove(chunk_index);
        }
        (values, moved)
    }
}

/// Groups entities by canonical component set into per-archetype tables.
pub(crate) struct ArchetypeStore {
    archetypes: Vec<Archetype>,
    by_components: FxHashMap<Vec<ComponentId>, ArchetypeId>,
}

impl ArchetypeStore {
    pub fn new() -> Self {
        ArchetypeStore {
            archetypes: Vec::new(),
            by_components: FxHashMap::default(),
        }
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    /// Canonicalizes `components` (sort + dedup) and returns the matching
    /// archetype, creating a new empty table if this is the first time the
    /// set has been seen. Returns `(id, is_new)` so callers can notify
    /// view caches of a freshly-created archetype.
    pub fn find_or_create(
        &mut self,
        components: Vec<ComponentId>,
        metas_of: impl Fn(ComponentId) -> Arc<ComponentMeta>,
    ) -> (ArchetypeId, bool) {
        let mut components = components;
        components.sort_unstable();
        components.dedup();

        if let Some(id) = self.by_components.get(&components) {
            return (*id, false);
        }

        let id = ArchetypeId(self.archetypes.len() as u32);
        let metas: Vec<Arc<ComponentMeta>> = components.iter().map(|c| metas_of(*c)).collect();
        let meta_refs: Vec<&ComponentMeta> = metas.iter().map(|m| m.as_ref()).collect();
        let archetype = Archetype::new(id, components.clone(), &meta_refs);
        self.archetypes.push(archetype);
        self.by_components.insert(components, id);
        (id, true)
    }

    pub fn append(
        &mut self,
        archetype: ArchetypeId,
        metas_of: impl Fn(ComponentId) -> Arc<ComponentMeta>,
        entity: EntityId,
        values: Vec<(ComponentId, Box<dyn Any + Send>)>,
    ) -> (usize, usize) {
        let arch = &mut self.archetypes[archetype.index()];
        let metas: Vec<Arc<ComponentMeta>> = arch.component_ids.iter().map(|c| metas_of(*c)).collect();
        let meta_refs: Vec<&ComponentMeta> = metas.iter().map(|m| m.as_ref()).collect();
        arch.append(&meta_refs, entity, values)
    }

    pub fn remove(&mut self, archetype: ArchetypeId, chunk_index: usize, row: usize) -> Option<EntityId> {
        self.archetypes[archetype.index()].remove(chunk_index, row)
    }

    /// Migrates one row from `from` to the archetype formed by adding
    /// `extra` components and dropping `removed` ones (creating that
    /// archetype if it doesn't exist yet). Returns the destination
    /// location and, if removing the source row moved another entity
    /// within its old table, that entity's id (so the caller can fix up
    /// its index entry).
    pub fn move_between(
        &mut self,
        from: ArchetypeId,
        from_chunk: usize,
        from_row: usize,
        metas_of: impl Fn(ComponentId) -> Arc<ComponentMeta>,
        extra: Vec<(ComponentId, Box<dyn Any + Send>)>,
        removed: &[ComponentId],
        entity: EntityId,
    ) -> (ArchetypeId, usize, usize, Option<EntityId>, bool) {
        let (mut carried, swapped) = self.archetypes[from.index()].take(from_chunk, from_row);
        carried.retain(|(id, _)| !removed.contains(id) && !extra.iter().any(|(eid, _)| eid == id));
        carried.extend(extra);

        let dest_components: Vec<ComponentId> = carried.iter().map(|(id, _)| *id).collect();
        let (dest_id, is_new) = self.find_or_create(dest_components, &metas_of);
        let (dest_chunk, dest_row) = self.append(dest_id, &metas_of, entity, carried);

        (dest_id, dest_chunk, dest_row, swapped, is_new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentMeta;
    use std::any::TypeId;

    fn meta_for<T: Component>(id: u32, name: &str) -> (ComponentId, Arc<ComponentMeta>) {
        (
            ComponentId(id),
            Arc::new(ComponentMeta {
                name: name.to_string(),
                type_id: TypeId::of::<T>(),
                size: std::mem::size_of::<T>(),
                align: std::mem::align_of::<T>(),
                column_factory: Box::new(column_factory::<T>),
                combiner: None,
            }),
        )
    }

    #[test]
    fn append_and_remove_round_trip() {
        let mut store = ArchetypeStore::new();
        let (pos_id, pos_meta) = meta_for::<u32>(0, "Pos");
        let metas_of = move |id: ComponentId| {
            assert_eq!(id, pos_id);
            pos_meta.clone()
        };

        let (arch, _) = store.find_or_create(vec![pos_id], &metas_of);
        let e0 = EntityId::new(0, std::num::Wrapping(1));
        let e1 = EntityId::new(1, std::num::Wrapping(1));
        let (c0, r0) = store.append(arch, &metas_of, e0, vec![(pos_id, Box::new(10u32))]);
        let (_, _) = store.append(arch, &metas_of, e1, vec![(pos_id, Box::new(20u32))]);

        let moved = store.remove(arch, c0, r0);
        assert_eq!(moved, Some(e1));
        assert_eq!(store.archetype(arch).chunks()[0].len(), 1);
    }

    #[test]
    fn chunk_capacity_respects_row_size() {
        assert_eq!(chunk_capacity(16), CHUNK_BYTES / 16);
        assert_eq!(chunk_capacity(0), CHUNK_BYTES);
    }
}
