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

//! Entity identifier encoding: plain handles, relationship pairs, wildcards.
//!
//! A single `u64` carries two shapes, discriminated by the high bit:
//! a plain `[generation:16 | index:32]` handle, or a pair
//! `[first:28 | second:28]` relationship key. Both shapes live in the
//! same numeric space so a pair can be stored as an ordinary component id
//! inside an archetype signature.

use std::fmt;

/// High bit marks a pair-shaped id.
const PAIR_FLAG: u64 = 1 << 63;

const PAIR_FIRST_SHIFT: u32 = 28;
const PAIR_HALF_MASK: u64 = 0x0FFF_FFFF; // 28 bits

const GEN_SHIFT: u32 = 32;
const GEN_MASK: u64 = 0xFFFF;
const INDEX_MASK: u64 = 0xFFFF_FFFF;

/// Entity handle: a plain generational index or a relationship pair.
///
/// Equality and hashing are purely numeric. Ordering is numeric with one
/// documented exception used only by the query matcher: two pair ids whose
/// `first` halves match compare equal if either `second` half is
/// [`EntityId::WILDCARD`]. Everywhere else ordering is total.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u64);

impl EntityId {
    /// Reserved id that matches either half of a pair during querying.
    ///
    /// Encoded as a plain-shaped handle whose raw index is exactly the
    /// pair-half mask (`0x0FFF_FFFF`) with generation zero, so the bit
    /// pattern survives `make_pair`'s 28-bit truncation unchanged: packing
    /// `WILDCARD` into a pair's second half always yields a second half
    /// bit-identical to `WILDCARD` itself. That identity is what
    /// `pair_second().is_wildcard()` (and `Ord`'s wildcard-pair exception)
    /// depends on — a wildcard sentinel that didn't survive the mask would
    /// never compare equal once packed into a pair. No real entity can ever
    /// be allocated this handle in practice (it's the index of the
    /// ~268-millionth concurrently-live entity at generation zero).
    pub const WILDCARD: EntityId = EntityId(PAIR_HALF_MASK);

    /// Placeholder used for "no entity" slots (e.g. unset relationship
    /// targets). Distinct from `WILDCARD`.
    pub const NONE: EntityId = EntityId(INDEX_MASK);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        EntityId(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Build a plain handle from a raw index and generation.
    #[inline]
    pub const fn from_raw(index: u32, generation: u16) -> Self {
        EntityId(((generation as u64) << GEN_SHIFT) | index as u64)
    }

    /// Pack two entity ids into a single pair id. `first` is conventionally
    /// the relationship kind, `second` the target.
    #[inline]
    pub fn make_pair(first: EntityId, second: EntityId) -> Self {
        let a = first.raw_index() as u64 & PAIR_HALF_MASK;
        let b = second.raw_index() as u64 & PAIR_HALF_MASK;
        EntityId(PAIR_FLAG | (a << PAIR_FIRST_SHIFT) | b)
    }

    #[inline]
    pub const fn is_pair(self) -> bool {
        self.0 & PAIR_FLAG != 0
    }

    /// First half (relationship kind) of a pair id, as a plain-shaped id
    /// with generation zero. Meaningless if `!self.is_pair()`.
    #[inline]
    pub const fn pair_first(self) -> EntityId {
        EntityId((self.0 >> PAIR_FIRST_SHIFT) & PAIR_HALF_MASK)
    }

    /// Second half (target) of a pair id, as a plain-shaped id with
    /// generation zero. Meaningless if `!self.is_pair()`.
    #[inline]
    pub const fn pair_second(self) -> EntityId {
        EntityId(self.0 & PAIR_HALF_MASK)
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        ((self.0 >> GEN_SHIFT) & GEN_MASK) as u16
    }

    #[inline]
    pub const fn with_generation(self, generation: u16) -> Self {
        EntityId((self.0 & !(GEN_MASK << GEN_SHIFT)) | ((generation as u64) << GEN_SHIFT))
    }

    /// Raw index: the low 32 bits for a plain id, or the 28-bit `second`
    /// half reinterpreted as an index for a pair id (used when a pair
    /// needs to be treated as "the entity whose bits these are" e.g. by
    /// the entity index during pair liveness checks).
    #[inline]
    pub const fn raw_index(self) -> u32 {
        if self.is_pair() {
            (self.0 & PAIR_HALF_MASK) as u32
        } else {
            (self.0 & INDEX_MASK) as u32
        }
    }

    #[inline]
    pub const fn is_wildcard(self) -> bool {
        self.0 == Self::WILDCARD.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "EntityId(*)")
        } else if self.is_pair() {
            write!(
                f,
                "EntityId(pair {:#x}, {:#x})",
                self.pair_first().raw_index(),
                self.pair_second().raw_index()
            )
        } else {
            write!(
                f,
                "EntityId(idx={}, gen={})",
                self.raw_index(),
                self.generation()
            )
        }
    }
}

/// Numeric total order, with the wildcard-pair exception documented on
/// [`EntityId`].
impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.is_pair() && other.is_pair() && self.pair_first() == other.pair_first() {
            let self_wild = self.pair_second().is_wildcard();
            let other_wild = other.pair_second().is_wildcard();
            if self_wild || other_wild {
                return std::cmp::Ordering::Equal;
            }
        }
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_roundtrip() {
        let id = EntityId::from_raw(42, 7);
        assert!(!id.is_pair());
        assert_eq!(id.raw_index(), 42);
        assert_eq!(id.generation(), 7);
    }

    #[test]
    fn with_generation_preserves_index() {
        let id = EntityId::from_raw(9, 1).with_generation(2);
        assert_eq!(id.raw_index(), 9);
        assert_eq!(id.generation(), 2);
    }

    #[test]
    fn pair_roundtrip() {
        let kind = EntityId::from_raw(3, 0);
        let target = EntityId::from_raw(99, 0);
        let pair = EntityId::make_pair(kind, target);
        assert!(pair.is_pair());
        assert_eq!(pair.pair_first().raw_index(), 3);
        assert_eq!(pair.pair_second().raw_index(), 99);
    }

    #[test]
    fn wildcard_equality_only_applies_to_pairs_with_same_first() {
        let kind = EntityId::from_raw(3, 0);
        let a = EntityId::make_pair(kind, EntityId::from_raw(1, 0));
        let b = EntityId::make_pair(kind, EntityId::WILDCARD);
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);

        let other_kind = EntityId::from_raw(4, 0);
        let c = EntityId::make_pair(other_kind, EntityId::from_raw(1, 0));
        assert_ne!(c.cmp(&b), std::cmp::Ordering::Equal);
    }

    #[test]
    fn plain_ids_order_numerically() {
        let a = EntityId::from_raw(1, 0);
        let b = EntityId::from_raw(2, 0);
        assert!(a < b);
    }
}
