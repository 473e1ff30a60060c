//! Entity identity: a recycled index paired with a generation counter.
//!
//! Indices are handed out in fixed-size blocks so a `World`'s allocator
//! never needs to rehash or move previously issued ids, and each slot's
//! generation increments on every reuse so stale references compare
//! unequal to their replacement.

use std::fmt;
use std::num::Wrapping;

pub type EntityIndex = u32;
pub type Generation = Wrapping<u32>;

/// A 64-bit entity handle: a reused index plus a reuse generation.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct EntityId {
    index: EntityIndex,
    generation: Generation,
}

impl EntityId {
    pub(crate) fn new(index: EntityIndex, generation: Generation) -> Self {
        EntityId { index, generation }
    }

    pub fn index(self) -> EntityIndex {
        self.index
    }

    pub(crate) fn generation(self) -> Generation {
        self.generation
    }

    /// Packs the id into the single 64-bit value described by the data model:
    /// index in the lower 32 bits, generation in the upper 32.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation.0) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        EntityId {
            index: bits as u32,
            generation: Wrapping((bits >> 32) as u32),
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Entity({}#{})", self.index, self.generation.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation.0)
    }
}

const BLOCK_SIZE: usize = 1024;

/// One fixed-size range of the index space, tracking liveness and free
/// slots for just that range.
#[derive(Debug)]
struct EntityBlock {
    start: EntityIndex,
    generations: Vec<Generation>,
    /// Once a slot's generation would wrap back to zero, it is retired:
    /// never handed out again, per the data model's wrap-handling rule.
    retired: Vec<bool>,
    free: Vec<EntityIndex>,
    len: usize,
}

impl EntityBlock {
    fn new(start: EntityIndex, len: usize) -> Self {
        EntityBlock {
            start,
            generations: Vec::with_capacity(len),
            retired: Vec::with_capacity(len),
            free: Vec::new(),
            len,
        }
    }

    fn local(&self, index: EntityIndex) -> usize {
        (index - self.start) as usize
    }

    fn in_range(&self, index: EntityIndex) -> bool {
        index >= self.start && index < self.start + self.len as EntityIndex
    }

    fn is_alive(&self, id: EntityId) -> Option<bool> {
        if !self.in_range(id.index) {
            return None;
        }
        let i = self.local(id.index);
        self.generations
            .get(i)
            .map(|g| *g == id.generation && !self.retired.get(i).copied().unwrap_or(false))
    }

    fn allocate(&mut self) -> Option<EntityId> {
        while let Some(index) = self.free.pop() {
            let i = self.local(index);
            if !self.retired[i] {
                return Some(EntityId::new(index, self.generations[i]));
            }
            // Slot was retired after a full generation wrap; skip it forever.
        }

        if self.generations.len() < self.len {
            let index = self.start + self.generations.len() as EntityIndex;
            self.generations.push(Wrapping(1));
            self.retired.push(false);
            Some(EntityId::new(index, Wrapping(1)))
        } else {
            None
        }
    }

    /// Frees `id`, returning whether it was alive. Bumps the slot's
    /// generation; if that bump wraps back to zero the slot is retired.
    fn free(&mut self, id: EntityId) -> Option<bool> {
        let alive = self.is_alive(id)?;
        if alive {
            let i = self.local(id.index);
            let next = self.generations[i] + Wrapping(1);
            self.generations[i] = next;
            if next.0 == 0 {
                self.retired[i] = true;
            } else {
                self.free.push(id.index);
            }
        }
        Some(alive)
    }
}

/// Hands out and recycles [`EntityId`]s for a single `World`.
///
/// Not thread-safe by itself: creation and destruction only ever happen
/// from the command buffer flush, which runs single-threaded.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    blocks: Vec<EntityBlock>,
    allocated: EntityIndex,
}

impl EntityAllocator {
    pub fn new() -> Self {
        EntityAllocator::default()
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.blocks
            .iter()
            .filter_map(|b| b.is_alive(id))
            .next()
            .unwrap_or(false)
    }

    /// Pops a free index from an existing block if any remain, else grows
    /// the index space by one block. O(1) amortized.
    pub fn create(&mut self) -> EntityId {
        if let Some(id) = self.blocks.iter_mut().rev().find_map(|b| b.allocate()) {
            return id;
        }

        let mut block = EntityBlock::new(self.allocated, BLOCK_SIZE);
        self.allocated += BLOCK_SIZE as EntityIndex;
        let id = block.allocate().expect("freshly grown block has capacity");
        self.blocks.push(block);
        id
    }

    /// Marks `id` as destroyed, bumping its generation. Returns whether it
    /// was alive beforehand (destroying a stale id is a documented no-op).
    pub fn destroy(&mut self, id: EntityId) -> bool {
        self.blocks
            .iter_mut()
            .find(|b| b.in_range(id.index()))
            .and_then(|b| b.free(id))
            .unwrap_or(false)
    }
}
