// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Archetypes: one contiguous store per exact component set, wired into
//! a graph of single-component deltas.
//!
//! This replaces the teacher crate's `TypeId`-keyed, single growable
//! `ComponentColumn` archetype with one keyed by sorted `EntityId`
//! signatures and backed by fixed-capacity [`Chunk`]s, while keeping the
//! teacher's sparse `component -> column index` map and its
//! `World::transitions` table — renamed here to `edges_add`/
//! `edges_remove` per this crate's graph terminology and split into two
//! maps (one per edge direction) instead of one `(archetype, type, bool)`
//! key, since each archetype already knows its own id.

use rustc_hash::FxHashMap;

use crate::chunk::{Chunk, CHUNK_CAPACITY};
use crate::component::ComponentInfo;
use crate::id::EntityId;
use crate::type_index::hash_signature;

pub type ArchetypeId = usize;

/// Where a row physically lives within an archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowLocation {
    pub chunk_index: u32,
    pub row_in_chunk: u32,
}

/// Result of removing a row: if another entity's row was relocated to
/// fill the gap (swap-remove), its new location and id are reported so
/// the caller can patch the entity index.
pub struct RemovedRow {
    pub moved_entity: Option<EntityId>,
    pub moved_to: Option<RowLocation>,
}

/// One archetype: a fixed component signature, its chunks, and its
/// single-component edges to neighboring archetypes.
pub struct Archetype {
    id: ArchetypeId,
    signature: Vec<EntityId>,
    signature_hash: u64,
    infos: Vec<ComponentInfo>,
    column_index: FxHashMap<EntityId, usize>,
    chunks: Vec<Chunk>,
    count: usize,
    /// component id -> archetype reached by adding that one component
    pub edges_add: FxHashMap<EntityId, ArchetypeId>,
    /// component id -> archetype reached by removing that one component
    pub edges_remove: FxHashMap<EntityId, ArchetypeId>,
}

impl Archetype {
    /// Build a new archetype. `signature` must already be sorted and
    /// `infos` must be parallel to it (same order, same length).
    pub fn new(id: ArchetypeId, signature: Vec<EntityId>, infos: Vec<ComponentInfo>) -> Self {
        debug_assert!(signature.windows(2).all(|w| w[0] < w[1]));
        debug_assert_eq!(signature.len(), infos.len());
        let column_index = signature
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let signature_hash = hash_signature(&signature);
        Archetype {
            id,
            signature,
            signature_hash,
            infos,
            column_index,
            chunks: Vec::new(),
            count: 0,
            edges_add: FxHashMap::default(),
            edges_remove: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn signature_hash(&self) -> u64 {
        self.signature_hash
    }

    /// The empty (root) archetype every world bootstraps with.
    pub fn empty(id: ArchetypeId) -> Self {
        Archetype::new(id, Vec::new(), Vec::new())
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[inline]
    pub fn signature(&self) -> &[EntityId] {
        &self.signature
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn has(&self, component: EntityId) -> bool {
        self.column_index.contains_key(&component)
    }

    pub fn column_of(&self, component: EntityId) -> Option<usize> {
        self.column_index.get(&component).copied()
    }

    pub fn component_info(&self, component: EntityId) -> Option<&ComponentInfo> {
        self.column_of(component).map(|i| &self.infos[i])
    }

    pub fn infos(&self) -> &[ComponentInfo] {
        &self.infos
    }

    /// Allocate a new row for `entity`, growing the chunk list if the
    /// last chunk is full or none exist yet. Returns the row's location;
    /// every column must be written by the caller before the row is
    /// considered valid.
    pub fn allocate_row(&mut self, entity: EntityId) -> RowLocation {
        if self.chunks.last().map(Chunk::is_full).unwrap_or(true) {
            self.chunks.push(Chunk::new(&self.infos));
        }
        let chunk_index = (self.chunks.len() - 1) as u32;
        let chunk = self.chunks.last_mut().unwrap();
        let row_in_chunk = chunk.push(entity) as u32;
        self.count += 1;
        RowLocation {
            chunk_index,
            row_in_chunk,
        }
    }

    pub fn column_ptr_mut(&mut self, loc: RowLocation, column: usize) -> *mut u8 {
        self.chunks[loc.chunk_index as usize].column_ptr_mut(column, loc.row_in_chunk as usize)
    }

    pub fn column_ptr(&self, loc: RowLocation, column: usize) -> *const u8 {
        self.chunks[loc.chunk_index as usize].column_ptr(column, loc.row_in_chunk as usize)
    }

    pub fn entity_at(&self, loc: RowLocation) -> EntityId {
        self.chunks[loc.chunk_index as usize].entity_at(loc.row_in_chunk as usize)
    }

    /// Remove the row at `loc` via swap-remove within its chunk.
    ///
    /// # Safety
    /// `loc` must address a currently occupied row in this archetype.
    pub unsafe fn remove_row(&mut self, loc: RowLocation) -> RemovedRow {
        self.remove_row_skip(loc, &[])
    }

    /// Same as [`Archetype::remove_row`], but columns listed in
    /// `skip_columns` are not dropped — their bytes were already copied
    /// out to another archetype by the caller (see
    /// [`World::migrate_entity`]) and must not be destructed twice.
    ///
    /// # Safety
    /// `loc` must address a currently occupied row in this archetype.
    pub unsafe fn remove_row_skip(&mut self, loc: RowLocation, skip_columns: &[usize]) -> RemovedRow {
        let chunk_idx = loc.chunk_index as usize;
        let row = loc.row_in_chunk as usize;
        let moved_in_chunk = self.chunks[chunk_idx].swap_remove_skip(row, skip_columns);
        self.count -= 1;

        match moved_in_chunk {
            Some(entity) => RemovedRow {
                moved_entity: Some(entity),
                moved_to: Some(loc),
            },
            None => RemovedRow {
                moved_entity: None,
                moved_to: None,
            },
        }
    }

    /// Pre-allocate chunk capacity for `additional` more rows, so a burst
    /// of `allocate_row` calls (e.g. `World::spawn_batch`) doesn't grow
    /// the chunk list one entity at a time.
    pub fn reserve_rows(&mut self, additional: usize) {
        let available = self
            .chunks
            .last()
            .map(|c| CHUNK_CAPACITY - c.len())
            .unwrap_or(0);
        let short = additional.saturating_sub(available);
        let extra_chunks = (short + CHUNK_CAPACITY - 1) / CHUNK_CAPACITY;
        for _ in 0..extra_chunks {
            self.chunks.push(Chunk::new(&self.infos));
        }
    }

    /// Copy one component's bytes from a row in `src` into a row in
    /// `self`. Used during migration for components shared by both
    /// archetypes' signatures.
    pub fn copy_component(
        &mut self,
        dst_loc: RowLocation,
        dst_col: usize,
        src: &Archetype,
        src_loc: RowLocation,
        src_col: usize,
    ) {
        let src_chunk = src.chunk(src_loc.chunk_index as usize);
        let dst_chunk = &mut self.chunks[dst_loc.chunk_index as usize];
        unsafe {
            dst_chunk.copy_from(
                dst_col,
                dst_loc.row_in_chunk as usize,
                src_chunk,
                src_col,
                src_loc.row_in_chunk as usize,
            )
        };
    }

    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Maximum addressable row across all chunks, for capacity planning.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * CHUNK_CAPACITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(id: EntityId) -> ComponentInfo {
        ComponentInfo {
            id,
            size: 4,
            align: 4,
            drop_fn: None,
        }
    }

    #[test]
    fn allocate_and_remove_row() {
        let comp = EntityId::from_raw(1, 0);
        let mut archetype = Archetype::new(0, vec![comp], vec![sized(comp)]);
        let e0 = EntityId::from_raw(10, 0);
        let e1 = EntityId::from_raw(11, 0);
        let loc0 = archetype.allocate_row(e0);
        unsafe { (archetype.column_ptr_mut(loc0, 0) as *mut u32).write(1) };
        let loc1 = archetype.allocate_row(e1);
        unsafe { (archetype.column_ptr_mut(loc1, 0) as *mut u32).write(2) };
        assert_eq!(archetype.count(), 2);

        let removed = unsafe { archetype.remove_row(loc0) };
        assert_eq!(removed.moved_entity, Some(e1));
        assert_eq!(archetype.count(), 1);
        assert_eq!(archetype.entity_at(loc0), e1);
    }

    #[test]
    fn empty_archetype_has_no_columns() {
        let archetype = Archetype::empty(0);
        assert!(archetype.signature().is_empty());
        assert_eq!(archetype.count(), 0);
    }

    #[test]
    fn chunk_rolls_over_at_capacity() {
        let comp = EntityId::from_raw(1, 0);
        let mut archetype = Archetype::new(0, vec![comp], vec![sized(comp)]);
        for i in 0..(CHUNK_CAPACITY + 1) {
            let e = EntityId::from_raw(i as u32, 0);
            archetype.allocate_row(e);
        }
        assert_eq!(archetype.chunk_count(), 2);
        assert_eq!(archetype.count(), CHUNK_CAPACITY + 1);
    }
}
