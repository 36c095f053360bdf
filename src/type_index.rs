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

//! Canonical lookup from a component signature to an archetype.
//!
//! A signature's hash is the XOR of a strong per-id hash over its
//! members, so adding or removing a single component updates the hash in
//! O(1) without rehashing the rest of the set — the same incremental
//! hash the archetype graph needs when following an edge. XOR hashes can
//! collide for different sets, so each bucket keeps every archetype id
//! that ever hashed there and `find` falls back to a real signature
//! compare.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::archetype::{Archetype, ArchetypeId};
use crate::id::EntityId;

pub type SignatureHash = u64;

/// Avalanche a single id's bits (splitmix64 finalizer) so XOR-folding
/// many ids behaves like a real hash rather than cancelling out on
/// structured input.
#[inline]
fn element_hash(id: EntityId) -> u64 {
    let mut x = id.to_bits();
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    x
}

pub fn hash_signature(signature: &[EntityId]) -> SignatureHash {
    signature.iter().fold(0u64, |acc, &id| acc ^ element_hash(id))
}

/// Hash of `signature ∪ {id}`, given `signature`'s current hash.
/// `id` must not already be a member of `signature`.
pub fn hash_with_added(current: SignatureHash, id: EntityId) -> SignatureHash {
    current ^ element_hash(id)
}

/// Hash of `signature \ {id}`, given `signature`'s current hash. XOR is
/// its own inverse, so this is the same operation as adding.
pub fn hash_with_removed(current: SignatureHash, id: EntityId) -> SignatureHash {
    current ^ element_hash(id)
}

/// Hash-bucketed signature -> archetype lookup.
#[derive(Default)]
pub struct TypeIndex {
    buckets: FxHashMap<SignatureHash, SmallVec<[ArchetypeId; 2]>>,
}

impl TypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the archetype whose signature exactly equals `signature`,
    /// resolving hash collisions by comparing against `archetypes`.
    pub fn find(
        &self,
        hash: SignatureHash,
        signature: &[EntityId],
        archetypes: &[Archetype],
    ) -> Option<ArchetypeId> {
        let bucket = self.buckets.get(&hash)?;
        bucket
            .iter()
            .copied()
            .find(|&id| archetypes[id].signature() == signature)
    }

    pub fn insert(&mut self, hash: SignatureHash, archetype_id: ArchetypeId) {
        self.buckets.entry(hash).or_default().push(archetype_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_is_identity() {
        let a = EntityId::from_raw(1, 0);
        let b = EntityId::from_raw(2, 0);
        let base = hash_signature(&[a]);
        let added = hash_with_added(base, b);
        let removed = hash_with_removed(added, b);
        assert_eq!(base, removed);
    }

    #[test]
    fn order_independent() {
        let a = EntityId::from_raw(1, 0);
        let b = EntityId::from_raw(2, 0);
        let c = EntityId::from_raw(3, 0);
        assert_eq!(hash_signature(&[a, b, c]), hash_signature(&[c, a, b]));
    }
}
