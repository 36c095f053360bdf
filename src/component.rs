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

//! Component registration: components are themselves entities.
//!
//! Every Rust type used as a component gets exactly one component entity,
//! allocated lazily the first time the type is seen. `ComponentRegistry`
//! is the `TypeId -> EntityId` half of that; [`ComponentInfo`] is the
//! per-component-entity metadata (payload size, drop glue) the storage
//! layer needs to lay out chunk columns.

use std::any::TypeId;
use std::mem;

use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::id::EntityId;
use crate::world::World;

/// Maximum number of components supported by Bundle implementations
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Marker trait for components. Components must be `'static` (no borrowed
/// data) and movable across threads, same bound the teacher crate used.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

/// Storage-facing description of a component entity: how many bytes its
/// payload occupies in a chunk column (zero for tags) and how to drop an
/// in-place value when a row is removed.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    pub id: EntityId,
    pub size: usize,
    pub align: usize,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ComponentInfo {
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

unsafe fn drop_in_place_as<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

/// Lazily allocates and remembers one component entity per Rust type.
///
/// A pair's payload size is inherited from its second half if that half
/// is a sized component, otherwise the pair itself is a tag — the same
/// rule components have individually.
#[derive(Default)]
pub struct ComponentRegistry {
    type_to_id: FxHashMap<TypeId, EntityId>,
    infos: FxHashMap<EntityId, ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, id: EntityId) -> Option<&ComponentInfo> {
        self.infos.get(&id)
    }

    pub fn type_id_for(&self, type_id: TypeId) -> Option<EntityId> {
        self.type_to_id.get(&type_id).copied()
    }

    /// Record metadata for a component entity. `allocate` is only called
    /// the first time `type_id` is seen; subsequent calls return the
    /// already-registered id.
    pub fn register<T: Component>(
        &mut self,
        type_id: TypeId,
        mut allocate: impl FnMut() -> EntityId,
    ) -> EntityId {
        if let Some(&id) = self.type_to_id.get(&type_id) {
            return id;
        }
        let id = allocate();
        let info = ComponentInfo {
            id,
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>().max(1),
            drop_fn: if mem::needs_drop::<T>() {
                Some(drop_in_place_as::<T>)
            } else {
                None
            },
        };
        self.type_to_id.insert(type_id, id);
        self.infos.insert(id, info);
        id
    }

    /// Register a pair's payload info, inheriting size/align/drop from
    /// the second half when it carries data, else registering it as a
    /// zero-sized tag.
    pub fn register_pair_tag(&mut self, pair: EntityId) {
        self.infos.entry(pair).or_insert(ComponentInfo {
            id: pair,
            size: 0,
            align: 1,
            drop_fn: None,
        });
    }

    pub fn register_pair_with_payload(&mut self, pair: EntityId, payload: ComponentInfo) {
        self.infos.insert(
            pair,
            ComponentInfo {
                id: pair,
                ..payload
            },
        );
    }
}

/// Groups multiple components for spawning in one structural step.
///
/// Mirrors the teacher crate's tuple-based `Bundle` trait, but resolves
/// component identity through the world's registry (an `EntityId`, not a
/// `TypeId`) since component ids here are themselves entities.
pub trait Bundle: Send + Sync + 'static {
    /// Resolve (lazily registering if necessary) the component id for
    /// each element of the bundle, in declaration order.
    fn component_ids(world: &mut World) -> SmallVec<[EntityId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Write each component's bytes to its destination pointer.
    ///
    /// # Safety
    /// `ptrs[i]` must be valid, aligned, and large enough for the i-th
    /// bundle element, in the same order `component_ids` returned.
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            #[allow(unused_variables, unused_mut)]
            fn component_ids(world: &mut World) -> SmallVec<[EntityId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(world.component_id::<$T>()),*]
            }

            #[allow(non_snake_case, unused_variables, unused_mut)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i;
            }
        }
    };
}

impl_bundle!();
impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_has_zero_size() {
        struct Marker;
        let mut registry = ComponentRegistry::new();
        let mut next = 0u32;
        let id = registry.register::<Marker>(TypeId::of::<Marker>(), || {
            next += 1;
            EntityId::from_raw(next, 0)
        });
        assert!(registry.info(id).unwrap().is_tag());
    }

    #[test]
    fn registering_twice_returns_same_id() {
        struct Position(f32);
        let mut registry = ComponentRegistry::new();
        let mut next = 0u32;
        let mut alloc = || {
            next += 1;
            EntityId::from_raw(next, 0)
        };
        let a = registry.register::<Position>(TypeId::of::<Position>(), &mut alloc);
        let b = registry.register::<Position>(TypeId::of::<Position>(), &mut alloc);
        assert_eq!(a, b);
    }
}
