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

//! Error types

use std::fmt;

use crate::id::EntityId;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Operation targeted an entity that is not alive (never spawned,
    /// already destroyed, or referenced with a stale generation).
    DeadEntity(EntityId),

    /// `get`/`set`/`unset` addressed a component the entity's archetype
    /// does not carry, or a pair whose payload type doesn't match the
    /// relationship's declared second half.
    ComponentMismatch { entity: EntityId, component: EntityId },

    /// Attempted to destroy an entity tagged `DoNotDelete`.
    ProtectedEntity(EntityId),

    /// Component/relationship registration failed (duplicate
    /// registration with a conflicting layout, or a malformed pair).
    RegistrationError(String),

    /// A single command inside a deferred merge failed to apply. The
    /// merge continues; this is collected and reported once the buffer
    /// finishes draining rather than aborting the rest of the batch.
    DeferredMergeFailure(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::DeadEntity(id) => write!(f, "entity is not alive: {id:?}"),
            EcsError::ComponentMismatch { entity, component } => write!(
                f,
                "entity {entity:?} does not carry component {component:?}"
            ),
            EcsError::ProtectedEntity(id) => {
                write!(f, "entity {id:?} is protected from destruction")
            }
            EcsError::RegistrationError(msg) => write!(f, "registration error: {msg}"),
            EcsError::DeferredMergeFailure(msg) => write!(f, "deferred merge failure: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
