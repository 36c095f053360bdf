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

//! Generational liveness tracking and archetype-row lookup for plain
//! entity ids.
//!
//! Structured like a slot-per-index free list (the same shape as
//! `Entities`/`EntityMeta` in a Bevy-style ECS): every index ever handed
//! out keeps a slot recording its current generation, whether it's
//! alive, and — while alive — which archetype and row hold its data.
//! Despawning bumps the slot's generation and returns the index to the
//! free list, so a stale `EntityId` referencing an old generation is
//! rejected rather than silently aliasing whatever entity later reused
//! the index.

use crate::archetype::{ArchetypeId, RowLocation};
use crate::id::EntityId;

struct Slot {
    generation: u16,
    alive: bool,
    archetype: ArchetypeId,
    location: RowLocation,
}

impl Slot {
    fn dead(generation: u16) -> Self {
        Slot {
            generation,
            alive: false,
            archetype: 0,
            location: RowLocation {
                chunk_index: 0,
                row_in_chunk: 0,
            },
        }
    }
}

#[derive(Default)]
pub struct EntityIndex {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live_count: usize,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Pre-allocate slot-vec capacity for `additional` more never-before-
    /// seen entities, so a bulk spawn loop doesn't reallocate repeatedly.
    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }

    /// Allocate a new entity id, recycling a freed index and bumping its
    /// generation when one is available. The caller must follow up with
    /// [`EntityIndex::set_location`] once the entity's row is known.
    pub fn spawn(&mut self) -> EntityId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            self.live_count += 1;
            EntityId::from_raw(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                alive: true,
                archetype: 0,
                location: RowLocation {
                    chunk_index: 0,
                    row_in_chunk: 0,
                },
            });
            self.live_count += 1;
            EntityId::from_raw(index, 0)
        }
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        let index = id.raw_index() as usize;
        match self.slots.get(index) {
            Some(slot) => slot.alive && slot.generation == id.generation(),
            None => false,
        }
    }

    /// Mark `id` dead and recycle its index under a bumped generation.
    /// Returns `false` if `id` was already dead or stale.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let index = id.raw_index() as usize;
        let slot = &mut self.slots[index];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.live_count -= 1;
        self.free_list.push(index as u32);
        true
    }

    pub fn location(&self, id: EntityId) -> Option<(ArchetypeId, RowLocation)> {
        if !self.is_alive(id) {
            return None;
        }
        let slot = &self.slots[id.raw_index() as usize];
        Some((slot.archetype, slot.location))
    }

    /// Record where a live entity's row now lives. Panics if `id` is not
    /// alive — callers only set this right after allocating or migrating
    /// a row for an entity they've already checked is alive.
    pub fn set_location(&mut self, id: EntityId, archetype: ArchetypeId, location: RowLocation) {
        debug_assert!(self.is_alive(id));
        let slot = &mut self.slots[id.raw_index() as usize];
        slot.archetype = archetype;
        slot.location = location;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_then_despawn_then_recycle_bumps_generation() {
        let mut index = EntityIndex::new();
        let e0 = index.spawn();
        assert!(index.is_alive(e0));
        assert!(index.despawn(e0));
        assert!(!index.is_alive(e0));

        let e1 = index.spawn();
        assert_eq!(e1.raw_index(), e0.raw_index());
        assert_ne!(e1.generation(), e0.generation());
        assert!(index.is_alive(e1));
        assert!(!index.is_alive(e0));
    }

    #[test]
    fn despawning_twice_is_a_noop_the_second_time() {
        let mut index = EntityIndex::new();
        let e0 = index.spawn();
        assert!(index.despawn(e0));
        assert!(!index.despawn(e0));
    }

    #[test]
    fn location_roundtrip() {
        let mut index = EntityIndex::new();
        let e0 = index.spawn();
        let loc = RowLocation {
            chunk_index: 2,
            row_in_chunk: 5,
        };
        index.set_location(e0, 7, loc);
        assert_eq!(index.location(e0), Some((7, loc)));
    }
}
