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

//! Query matcher: resolves a term list to the archetypes that satisfy it,
//! and iterates their chunks in archetype/chunk/row order.
//!
//! Matching walks each archetype's sorted signature against the query's
//! terms. Presence checks use a binary search keyed by [`EntityId`]'s
//! own `Ord` impl, so a wildcard term transparently matches any pair
//! sharing its relationship kind — the exception is already encoded once,
//! in `id.rs`, rather than re-implemented here.
//!
//! Caching follows the same incremental-rescan shape the teacher crate
//! used for its `QuerySignature -> CachedQueryResult` cache: archetypes
//! are never deleted, so a cached query only needs to test archetypes
//! created since it was last evaluated.

use std::any::TypeId;
use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;

use ahash::AHashMap;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::Archetype;
use crate::component::Component;
use crate::id::EntityId;
use crate::world::World;

/// How a single term constrains archetype membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    With,
    Without,
    Optional,
}

/// One clause of a query: a component/pair id and how it constrains a
/// match. `Or` groups are a separate, explicit clause variant rather
/// than a per-term op, since "satisfied if any member matches" composes
/// across several ids at once.
#[derive(Clone, Debug)]
pub enum Clause {
    Term(Term),
    Or(SmallVec<[Term; 4]>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Term {
    pub id: EntityId,
    pub op: Op,
}

impl Term {
    pub fn with(id: EntityId) -> Self {
        Term { id, op: Op::With }
    }

    pub fn without(id: EntityId) -> Self {
        Term {
            id,
            op: Op::Without,
        }
    }

    pub fn optional(id: EntityId) -> Self {
        Term {
            id,
            op: Op::Optional,
        }
    }
}

/// `0 = match, 1 = miss, -1 = reject`, matching the matcher's own
/// vocabulary so callers can distinguish "not a fit" from "forbidden
/// component present" if they need to (e.g. diagnostics).
pub type MatchCode = i8;

pub const MATCH: MatchCode = 0;
pub const MISS: MatchCode = 1;
pub const REJECT: MatchCode = -1;

/// True if `signature` (sorted) contains an id that satisfies `term_id`,
/// honoring the wildcard-pair equivalence built into `EntityId::cmp`.
fn signature_contains(signature: &[EntityId], term_id: EntityId) -> bool {
    signature.binary_search_by(|probe| probe.cmp(&term_id)).is_ok()
}

/// Evaluate one clause list against a sorted archetype signature.
pub fn match_archetype(signature: &[EntityId], clauses: &[Clause]) -> MatchCode {
    let mut result = MATCH;
    for clause in clauses {
        match clause {
            Clause::Term(term) => match term.op {
                Op::With => {
                    if !signature_contains(signature, term.id) {
                        return REJECT;
                    }
                }
                Op::Without => {
                    if signature_contains(signature, term.id) {
                        return REJECT;
                    }
                }
                Op::Optional => {}
            },
            Clause::Or(group) => {
                let satisfied = group.iter().any(|t| signature_contains(signature, t.id));
                if !satisfied {
                    result = MISS;
                }
            }
        }
    }
    result
}

fn hash_clauses(clauses: &[Clause]) -> u64 {
    let mut sortable: Vec<(EntityId, u8, Option<(EntityId, u8)>)> = clauses
        .iter()
        .map(|c| match c {
            Clause::Term(t) => (t.id, op_tag(t.op), None),
            Clause::Or(group) => {
                let first = group.first().copied().unwrap_or(Term::with(EntityId::NONE));
                (first.id, 3, group.get(1).map(|t| (t.id, op_tag(t.op))))
            }
        })
        .collect();
    sortable.sort_by_key(|(id, op, _)| (id.to_bits(), *op));
    let mut hasher = FxHasher::default();
    for entry in &sortable {
        entry.0.to_bits().hash(&mut hasher);
        entry.1.hash(&mut hasher);
        if let Some((id, op)) = entry.2 {
            id.to_bits().hash(&mut hasher);
            op.hash(&mut hasher);
        }
    }
    hasher.finish()
}

fn op_tag(op: Op) -> u8 {
    match op {
        Op::With => 0,
        Op::Without => 1,
        Op::Optional => 2,
    }
}

struct CachedMatch {
    matched: Vec<usize>,
    frontier: usize,
}

/// Caches query results by clause-list hash, extending the match set
/// incrementally as new archetypes are registered (the graph never
/// removes an archetype, so a cached result is always a valid prefix).
#[derive(Default)]
pub struct QueryMatcher {
    cache: RefCell<AHashMap<u64, CachedMatch>>,
}

impl QueryMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching_archetypes(&self, clauses: &[Clause], archetypes: &[Archetype]) -> Vec<usize> {
        let hash = hash_clauses(clauses);
        let mut cache = self.cache.borrow_mut();
        let entry = cache.entry(hash).or_insert_with(|| CachedMatch {
            matched: Vec::new(),
            frontier: 0,
        });
        for id in entry.frontier..archetypes.len() {
            if match_archetype(archetypes[id].signature(), clauses) == MATCH {
                entry.matched.push(id);
            }
        }
        entry.frontier = archetypes.len();
        entry.matched.clone()
    }

    /// Drop all cached results. Only needed if a caller wants to force a
    /// full re-match (e.g. after directly poking internal archetype
    /// state in a test); normal operation never requires this since the
    /// cache self-extends.
    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Number of distinct clause-lists with a cached match set.
    pub fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }
}

/// The n-th target of relationship kind `relation` on `signature`, in
/// signature order. `None` if fewer than `n + 1` such pairs exist.
pub fn nth_target(signature: &[EntityId], relation: EntityId, n: usize) -> Option<EntityId> {
    signature
        .iter()
        .filter(|id| id.is_pair() && id.pair_first() == relation)
        .nth(n)
        .map(|id| id.pair_second())
}

/// Per-component-type fetch used by the typed query API. `prepare` looks
/// up the column index once per archetype; `fetch` reads/writes a row.
pub trait QueryFetch<'w> {
    type Item;
    type State: Copy;

    fn component_id(world: &World) -> Option<EntityId>;
    fn prepare(archetype: &Archetype, component: EntityId) -> Option<Self::State>;
    /// # Safety
    /// `row` must be an occupied row of the archetype `state` was
    /// prepared from.
    unsafe fn fetch(archetype: &Archetype, state: Self::State, row: crate::archetype::RowLocation)
        -> Self::Item;
}

pub struct Read<T>(PhantomData<T>);
pub struct Write<T>(PhantomData<T>);

impl<'w, T: Component> QueryFetch<'w> for Read<T> {
    type Item = &'w T;
    type State = usize;

    fn component_id(world: &World) -> Option<EntityId> {
        world.component_id_of(TypeId::of::<T>())
    }

    fn prepare(archetype: &Archetype, component: EntityId) -> Option<Self::State> {
        archetype.column_of(component)
    }

    unsafe fn fetch(
        archetype: &Archetype,
        state: Self::State,
        row: crate::archetype::RowLocation,
    ) -> Self::Item {
        &*(archetype.column_ptr(row, state) as *const T)
    }
}

impl<'w, T: Component> QueryFetch<'w> for Write<T> {
    type Item = &'w mut T;
    type State = usize;

    fn component_id(world: &World) -> Option<EntityId> {
        world.component_id_of(TypeId::of::<T>())
    }

    fn prepare(archetype: &Archetype, component: EntityId) -> Option<Self::State> {
        archetype.column_of(component)
    }

    unsafe fn fetch(
        archetype: &Archetype,
        state: Self::State,
        row: crate::archetype::RowLocation,
    ) -> Self::Item {
        let ptr = archetype.column_ptr(row, state) as *mut T;
        &mut *ptr
    }
}

/// A built, ready-to-iterate query over one world.
pub struct Query<'w, F> {
    world: &'w World,
    clauses: Vec<Clause>,
    _marker: PhantomData<F>,
}

impl<'w, F> Query<'w, F>
where
    F: QueryFetchSet<'w>,
{
    pub fn new(world: &'w World, clauses: Vec<Clause>) -> Self {
        Query {
            world,
            clauses,
            _marker: PhantomData,
        }
    }

    pub fn iter(&self) -> QueryIter<'w, F> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("query_state").entered();
        let matched = self
            .world
            .query_matcher()
            .matching_archetypes(&self.clauses, self.world.archetypes());
        QueryIter {
            world: self.world,
            archetype_ids: matched,
            archetype_cursor: 0,
            chunk_cursor: 0,
            row_cursor: 0,
            state: None,
            current: None,
            _marker: PhantomData,
        }
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

/// Extra archetype-membership constraints layered onto a typed fetch set,
/// the `Filter` half of spec §6's `query::<(A,B,…), Filter>()` surface.
/// `()` contributes no clauses; [`With`]/[`Without`]/[`Optional`] contribute
/// one each, and tuples of up to four filters combine them.
pub trait QueryFilter {
    fn clauses(world: &World) -> Vec<Clause>;
}

impl QueryFilter for () {
    fn clauses(_world: &World) -> Vec<Clause> {
        Vec::new()
    }
}

/// Require `T`'s presence without fetching it (a `With` filter term).
pub struct With<T>(PhantomData<T>);
/// Require `T`'s absence (a `Without` filter term).
pub struct Without<T>(PhantomData<T>);
/// No constraint from `T`; present purely for symmetry with the other
/// filter markers — an absent type never excludes an archetype.
pub struct Optional<T>(PhantomData<T>);

impl<T: Component> QueryFilter for With<T> {
    fn clauses(world: &World) -> Vec<Clause> {
        match world.component_id_of(TypeId::of::<T>()) {
            Some(id) => vec![Clause::Term(Term::with(id))],
            None => vec![Clause::Term(Term::with(EntityId::NONE))],
        }
    }
}

impl<T: Component> QueryFilter for Without<T> {
    fn clauses(world: &World) -> Vec<Clause> {
        match world.component_id_of(TypeId::of::<T>()) {
            Some(id) => vec![Clause::Term(Term::without(id))],
            None => Vec::new(),
        }
    }
}

impl<T: Component> QueryFilter for Optional<T> {
    fn clauses(world: &World) -> Vec<Clause> {
        match world.component_id_of(TypeId::of::<T>()) {
            Some(id) => vec![Clause::Term(Term::optional(id))],
            None => Vec::new(),
        }
    }
}

macro_rules! impl_filter_tuple {
    ($($T:ident),+) => {
        impl<$($T: QueryFilter),+> QueryFilter for ($($T,)+) {
            fn clauses(world: &World) -> Vec<Clause> {
                let mut out = Vec::new();
                $(out.extend($T::clauses(world));)+
                out
            }
        }
    };
}

impl_filter_tuple!(A);
impl_filter_tuple!(A, B);
impl_filter_tuple!(A, B, C);
impl_filter_tuple!(A, B, C, D);

/// A fetch set: one or more `QueryFetch` implementors combined into a
/// single iteration item. Implemented for `Read<T>`/`Write<T>` and
/// tuples of up to four of them, mirroring the teacher crate's
/// `QueryFetch`/`QueryFetchMut` tuple arity.
pub trait QueryFetchSet<'w> {
    type Item;
    type State: Copy;

    fn component_ids(world: &World) -> Option<SmallVec<[EntityId; 4]>>;
    fn prepare(archetype: &Archetype, ids: &[EntityId]) -> Option<Self::State>;
    /// # Safety
    /// `row` must be an occupied row of the archetype `state` was
    /// prepared from.
    unsafe fn fetch(
        archetype: &Archetype,
        state: Self::State,
        row: crate::archetype::RowLocation,
    ) -> Self::Item;
}

impl<'w, A: QueryFetch<'w>> QueryFetchSet<'w> for A {
    type Item = A::Item;
    type State = A::State;

    fn component_ids(world: &World) -> Option<SmallVec<[EntityId; 4]>> {
        Some(SmallVec::from_buf_and_len([A::component_id(world)?, EntityId::NONE, EntityId::NONE, EntityId::NONE], 1))
    }

    fn prepare(archetype: &Archetype, ids: &[EntityId]) -> Option<Self::State> {
        A::prepare(archetype, ids[0])
    }

    unsafe fn fetch(
        archetype: &Archetype,
        state: Self::State,
        row: crate::archetype::RowLocation,
    ) -> Self::Item {
        A::fetch(archetype, state, row)
    }
}

macro_rules! impl_fetch_set_tuple {
    ($n:expr; $($T:ident => $idx:expr),+) => {
        impl<'w, $($T: QueryFetch<'w>),+> QueryFetchSet<'w> for ($($T,)+) {
            type Item = ($($T::Item,)+);
            type State = ($($T::State,)+);

            fn component_ids(world: &World) -> Option<SmallVec<[EntityId; 4]>> {
                let mut ids = SmallVec::new();
                $(ids.push($T::component_id(world)?);)+
                Some(ids)
            }

            fn prepare(archetype: &Archetype, ids: &[EntityId]) -> Option<Self::State> {
                Some(($($T::prepare(archetype, ids[$idx])?,)+))
            }

            unsafe fn fetch(
                archetype: &Archetype,
                state: Self::State,
                row: crate::archetype::RowLocation,
            ) -> Self::Item {
                ($($T::fetch(archetype, state.$idx, row),)+)
            }
        }
    };
}

impl_fetch_set_tuple!(2; A => 0, B => 1);
impl_fetch_set_tuple!(3; A => 0, B => 1, C => 2);
impl_fetch_set_tuple!(4; A => 0, B => 1, C => 2, D => 3);

/// Walks matched archetypes in order, then chunks within an archetype,
/// then rows within a chunk — the order spec'd for query iteration
/// stability. Holds raw pointers to archetypes (not references) the way
/// the teacher crate's `QueryIter` did, since the borrow spans multiple
/// `next()` calls and the archetype list itself is not mutated while a
/// query is alive (mutation only happens through the deferred command
/// buffer, per the world read-lock invariant).
pub struct QueryIter<'w, F: QueryFetchSet<'w>> {
    world: &'w World,
    archetype_ids: Vec<usize>,
    archetype_cursor: usize,
    chunk_cursor: usize,
    row_cursor: usize,
    state: Option<F::State>,
    current: Option<NonNull<Archetype>>,
    _marker: PhantomData<F>,
}

impl<'w, F: QueryFetchSet<'w>> Iterator for QueryIter<'w, F> {
    type Item = F::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let archetype_id = *self.archetype_ids.get(self.archetype_cursor)?;
                let archetype = &self.world.archetypes()[archetype_id];
                let ids = F::component_ids(self.world)?;
                self.state = F::prepare(archetype, &ids);
                self.current = Some(NonNull::from(archetype));
                self.chunk_cursor = 0;
                self.row_cursor = 0;
                if self.state.is_none() {
                    self.current = None;
                    self.archetype_cursor += 1;
                    continue;
                }
            }

            let archetype = unsafe { self.current.unwrap().as_ref() };
            if self.chunk_cursor >= archetype.chunk_count() {
                self.current = None;
                self.archetype_cursor += 1;
                continue;
            }

            let chunk = archetype.chunk(self.chunk_cursor);
            if self.row_cursor >= chunk.len() {
                self.chunk_cursor += 1;
                self.row_cursor = 0;
                continue;
            }

            let loc = crate::archetype::RowLocation {
                chunk_index: self.chunk_cursor as u32,
                row_in_chunk: self.row_cursor as u32,
            };
            self.row_cursor += 1;
            let state = self.state.unwrap();
            return Some(unsafe { F::fetch(archetype, state, loc) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_rejects_missing_component() {
        let comp = EntityId::from_raw(5, 0);
        let signature = [EntityId::from_raw(1, 0), EntityId::from_raw(2, 0)];
        let clauses = vec![Clause::Term(Term::with(comp))];
        assert_eq!(match_archetype(&signature, &clauses), REJECT);
    }

    #[test]
    fn without_rejects_present_component() {
        let comp = EntityId::from_raw(1, 0);
        let signature = [comp];
        let clauses = vec![Clause::Term(Term::without(comp))];
        assert_eq!(match_archetype(&signature, &clauses), REJECT);
    }

    #[test]
    fn wildcard_pair_matches_any_target() {
        let relation = EntityId::from_raw(9, 0);
        let target = EntityId::from_raw(42, 0);
        let pair = EntityId::make_pair(relation, target);
        let signature = [pair];
        let wildcard_term = EntityId::make_pair(relation, EntityId::WILDCARD);
        let clauses = vec![Clause::Term(Term::with(wildcard_term))];
        assert_eq!(match_archetype(&signature, &clauses), MATCH);
    }

    #[test]
    fn or_group_passes_when_any_member_present() {
        let a = EntityId::from_raw(1, 0);
        let b = EntityId::from_raw(2, 0);
        let signature = [b];
        let clauses = vec![Clause::Or(SmallVec::from_slice(&[
            Term::with(a),
            Term::with(b),
        ]))];
        assert_eq!(match_archetype(&signature, &clauses), MATCH);
    }

    #[test]
    fn nth_target_walks_signature_order() {
        let relation = EntityId::from_raw(9, 0);
        let t1 = EntityId::from_raw(10, 0);
        let t2 = EntityId::from_raw(20, 0);
        let mut signature = vec![
            EntityId::make_pair(relation, t1),
            EntityId::make_pair(relation, t2),
        ];
        signature.sort();
        assert_eq!(nth_target(&signature, relation, 0), Some(t1.min(t2)));
    }
}
