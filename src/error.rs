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

//! Error types.
//!
//! Local failures (`InvalidHandle`, `MissingComponent`) are ordinary return
//! values and never unwind. Structural failures (`DuplicateRegistration`,
//! `DependencyCycle`) leave the world unchanged. `AllocationFailure` is the
//! only class that is allowed to escalate past the call that triggered it.

use std::fmt;

use crate::component::ComponentId;
use crate::entity::EntityHandle;
use crate::system::SystemId;

/// ECS error type.
#[derive(Debug, Clone, PartialEq)]
pub enum EcsError {
    /// The handle's generation does not match the registry.
    InvalidHandle(EntityHandle),

    /// The target entity has no component of the requested id.
    MissingComponent {
        entity: EntityHandle,
        component: ComponentId,
    },

    /// A component type id was registered twice.
    DuplicateRegistration(ComponentId),

    /// Registering a system or component dependency edge would create a cycle.
    DependencyCycle,

    /// The serialized stream is incompatible or corrupt (bad magic, bad version,
    /// hash mismatch, truncated).
    SerializationFormatError(String),

    /// On load, the stream references a component id with no registered loader.
    UnknownComponentId(ComponentId),

    /// Out of memory, or a request exceeded an internal capacity guard.
    AllocationFailure(String),

    /// A memory-budget ceiling was hit and compaction did not recover enough space.
    OutOfBudget,

    /// A system dependency referenced a system that was never registered.
    SystemNotFound(SystemId),

    /// A system id was registered twice.
    DuplicateSystem(SystemId),

    /// `set_parent` would create a cycle in the relationship forest.
    RelationshipCycle,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::InvalidHandle(h) => write!(f, "invalid entity handle: {h:?}"),
            EcsError::MissingComponent { entity, component } => {
                write!(f, "entity {entity:?} has no component {component:?}")
            }
            EcsError::DuplicateRegistration(id) => {
                write!(f, "component id {id:?} is already registered")
            }
            EcsError::DependencyCycle => write!(f, "edge would create a dependency cycle"),
            EcsError::SerializationFormatError(msg) => {
                write!(f, "serialization format error: {msg}")
            }
            EcsError::UnknownComponentId(id) => {
                write!(f, "component id {id:?} has no registered loader")
            }
            EcsError::AllocationFailure(msg) => write!(f, "allocation failure: {msg}"),
            EcsError::OutOfBudget => write!(f, "memory budget exceeded"),
            EcsError::SystemNotFound(id) => write!(f, "system {id:?} not found"),
            EcsError::DuplicateSystem(id) => write!(f, "system {id:?} already registered"),
            EcsError::RelationshipCycle => write!(f, "set_parent would create a cycle"),
        }
    }
}

impl std::error::Error for EcsError {}

pub type Result<T> = std::result::Result<T, EcsError>;
