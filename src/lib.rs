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

//! Archetype ECS core.
//!
//! A data-oriented entity-component store: entities are grouped by their
//! exact component set into contiguous, column-major [`archetype::Archetype`]
//! tables, connected by a graph of single-component edges so that adding or
//! removing a component is a graph walk rather than a full rehash. Relationship
//! pairs ([`id::EntityId::make_pair`]) let two entities combine into one
//! component key, queried with wildcards through [`query::QueryMatcher`].
//! Structural edits issued while a [`query::Query`] is iterating are routed
//! through [`command::CommandBuffer`] instead of touching the graph directly.
//!
//! [`world::World`] is the facade: it owns the entity index, the archetype
//! graph, the component registry, and the query cache, and is the only type
//! most callers need to import.

pub mod archetype;
pub mod chunk;
pub mod command;
pub mod component;
pub mod entity_index;
pub mod error;
pub mod id;
pub mod query;
pub mod type_index;
pub mod world;

pub mod prelude;

pub use command::CommandBuffer;
pub use component::{Bundle, Component};
pub use error::{EcsError, Result};
pub use id::EntityId;
pub use query::{
    Clause, Op, Optional, Query, QueryFetchSet, QueryFilter, Read, Term, With, Without, Write,
};
pub use world::{World, WorldStats};

#[cfg(test)]
mod tests;
