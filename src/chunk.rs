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

//! Fixed-capacity column-major storage block.
//!
//! A `Chunk` is the unit an [`crate::archetype::Archetype`] allocates rows
//! from. Capacity is a compile-time power of two so row indices can be
//! split into `(chunk_index, offset)` with a shift/mask instead of a
//! division, the same tradeoff the teacher crate's growable
//! `ComponentColumn` traded away for simplicity — this repository's
//! storage needs a stable row address for the query iterator to hand out
//! `&mut` references into, so capacity is fixed instead.

use crate::component::ComponentInfo;
use crate::id::EntityId;

/// Rows per chunk. Power of two so callers can derive chunk/offset with
/// bit operations if they choose to; the methods below just use div/rem.
pub const CHUNK_CAPACITY: usize = 4096;

/// One typed column: a flat byte buffer sized for `CHUNK_CAPACITY`
/// elements of `info.size` bytes each. Tag components (`info.size == 0`)
/// allocate no buffer at all.
struct Column {
    info: ComponentInfo,
    data: Vec<u8>,
}

impl Column {
    fn new(info: ComponentInfo) -> Self {
        let data = if info.size == 0 {
            Vec::new()
        } else {
            Vec::with_capacity(info.size * CHUNK_CAPACITY)
        };
        Column { info, data }
    }

    #[inline]
    fn byte_offset(&self, row: usize) -> usize {
        row * self.info.size
    }

    unsafe fn ptr_mut(&mut self, row: usize) -> *mut u8 {
        if self.info.size == 0 {
            return std::ptr::NonNull::dangling().as_ptr();
        }
        self.data.as_mut_ptr().add(self.byte_offset(row))
    }

    unsafe fn ptr(&self, row: usize) -> *const u8 {
        if self.info.size == 0 {
            return std::ptr::NonNull::dangling().as_ptr();
        }
        self.data.as_ptr().add(self.byte_offset(row))
    }

    /// Reserve room for one more element, growing the backing buffer.
    fn grow_for_push(&mut self) {
        if self.info.size != 0 {
            let needed = self.data.len() + self.info.size;
            if self.data.capacity() < needed {
                self.data.reserve(self.info.size * CHUNK_CAPACITY);
            }
            self.data.resize(needed, 0);
        }
    }

    /// Drop the value at `row` in place, if the component needs drop glue.
    unsafe fn drop_row(&mut self, row: usize) {
        if let Some(drop_fn) = self.info.drop_fn {
            let ptr = self.ptr_mut(row);
            drop_fn(ptr);
        }
    }

    /// Move the last live element's bytes into `row`'s slot, then shrink
    /// by one element. Caller has already dropped `row`'s old value.
    unsafe fn swap_remove_into(&mut self, row: usize, last: usize) {
        if self.info.size == 0 {
            return;
        }
        if row != last {
            let src = self.ptr(last);
            let dst = self.ptr_mut(row);
            std::ptr::copy_nonoverlapping(src, dst, self.info.size);
        }
        let new_len = self.data.len() - self.info.size;
        self.data.truncate(new_len);
    }
}

/// A single fixed-capacity storage block within an archetype.
///
/// Holds the entity handle for each live row plus one [`Column`] per
/// component in the archetype's signature, in the same order as the
/// signature.
pub struct Chunk {
    entities: Vec<EntityId>,
    columns: Vec<Column>,
}

impl Chunk {
    pub fn new(infos: &[ComponentInfo]) -> Self {
        Chunk {
            entities: Vec::with_capacity(CHUNK_CAPACITY),
            columns: infos.iter().copied().map(Column::new).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entities.len() >= CHUNK_CAPACITY
    }

    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn entity_at(&self, row: usize) -> EntityId {
        self.entities[row]
    }

    /// Append a new row, reserving space in every column. Returns the row
    /// index. Caller must immediately write every column's value for
    /// this row via [`Chunk::column_ptr_mut`] before the chunk is read.
    pub fn push(&mut self, entity: EntityId) -> usize {
        debug_assert!(!self.is_full());
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            column.grow_for_push();
        }
        row
    }

    /// Pointer to column `column_index`'s byte slot for `row`. Caller
    /// must know the column's component type to cast and write/read it.
    pub fn column_ptr_mut(&mut self, column_index: usize, row: usize) -> *mut u8 {
        unsafe { self.columns[column_index].ptr_mut(row) }
    }

    pub fn column_ptr(&self, column_index: usize, row: usize) -> *const u8 {
        unsafe { self.columns[column_index].ptr(row) }
    }

    /// Remove `row` via swap-remove: drops its values, moves the last
    /// row's bytes into its place, and shrinks by one. Returns the
    /// entity that used to occupy the last slot, if a swap occurred
    /// (the caller must patch that entity's recorded row).
    ///
    /// # Safety
    /// `row` must be a currently-occupied row index (`< self.len()`).
    pub unsafe fn swap_remove(&mut self, row: usize) -> Option<EntityId> {
        self.swap_remove_skip(row, &[])
    }

    /// Same as [`Chunk::swap_remove`], but skips the drop glue for the
    /// columns listed in `skip`. Used during archetype migration: a
    /// shared component's bytes are `memcpy`'d into the destination
    /// archetype before the source row is removed, so the source copy
    /// must not run its destructor (that would free/invalidate state the
    /// destination row now also owns). The byte-shuffling swap-remove
    /// still runs for every column regardless of `skip` — only the drop
    /// is skipped — so the chunk's layout stays consistent either way.
    ///
    /// # Safety
    /// `row` must be a currently-occupied row index (`< self.len()`).
    pub unsafe fn swap_remove_skip(&mut self, row: usize, skip: &[usize]) -> Option<EntityId> {
        let last = self.entities.len() - 1;
        for (index, column) in self.columns.iter_mut().enumerate() {
            if !skip.contains(&index) {
                column.drop_row(row);
            }
            column.swap_remove_into(row, last);
        }
        self.entities.swap_remove(row);
        if row != last {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Copy one row's raw bytes for a shared component from `src` to a
    /// freshly pushed row in `self`, by column index in each chunk.
    /// Used when migrating an entity between archetypes that share a
    /// sized component.
    ///
    /// # Safety
    /// `src_col`/`dst_col` must reference columns of identical layout
    /// (same component, hence same `size`); `src_row` must be occupied in
    /// `src`, `dst_row` must be a row freshly allocated in `self` (not yet
    /// written).
    pub unsafe fn copy_from(
        &mut self,
        dst_col: usize,
        dst_row: usize,
        src: &Chunk,
        src_col: usize,
        src_row: usize,
    ) {
        let size = self.columns[dst_col].info.size;
        if size == 0 {
            return;
        }
        let src_ptr = src.column_ptr(src_col, src_row);
        let dst_ptr = self.columns[dst_col].ptr_mut(dst_row);
        std::ptr::copy_nonoverlapping(src_ptr, dst_ptr, size);
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for row in 0..self.entities.len() {
            for column in &mut self.columns {
                unsafe { column.drop_row(row) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_info(id: EntityId) -> ComponentInfo {
        ComponentInfo {
            id,
            size: 0,
            align: 1,
            drop_fn: None,
        }
    }

    fn sized_info(id: EntityId) -> ComponentInfo {
        ComponentInfo {
            id,
            size: std::mem::size_of::<u32>(),
            align: std::mem::align_of::<u32>(),
            drop_fn: None,
        }
    }

    #[test]
    fn push_and_write_roundtrip() {
        let comp = EntityId::from_raw(1, 0);
        let mut chunk = Chunk::new(&[sized_info(comp)]);
        let e = EntityId::from_raw(10, 0);
        let row = chunk.push(e);
        unsafe {
            let ptr = chunk.column_ptr_mut(0, row) as *mut u32;
            ptr.write(42);
        }
        let value = unsafe { *(chunk.column_ptr(0, row) as *const u32) };
        assert_eq!(value, 42);
        assert_eq!(chunk.entity_at(row), e);
    }

    #[test]
    fn swap_remove_patches_last_row() {
        let comp = EntityId::from_raw(1, 0);
        let mut chunk = Chunk::new(&[sized_info(comp)]);
        let e0 = EntityId::from_raw(0, 0);
        let e1 = EntityId::from_raw(1, 0);
        let r0 = chunk.push(e0);
        unsafe { (chunk.column_ptr_mut(0, r0) as *mut u32).write(1) };
        let r1 = chunk.push(e1);
        unsafe { (chunk.column_ptr_mut(0, r1) as *mut u32).write(2) };

        let moved = unsafe { chunk.swap_remove(r0) };
        assert_eq!(moved, Some(e1));
        assert_eq!(chunk.len(), 1);
        let value = unsafe { *(chunk.column_ptr(0, 0) as *const u32) };
        assert_eq!(value, 2);
    }

    #[test]
    fn tag_column_never_allocates() {
        let comp = EntityId::from_raw(1, 0);
        let mut chunk = Chunk::new(&[tag_info(comp)]);
        let e = EntityId::from_raw(0, 0);
        let row = chunk.push(e);
        assert_eq!(row, 0);
        assert_eq!(chunk.len(), 1);
    }
}
