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

//! Archetype ECS core: entity identity, columnar component storage, a typed
//! query engine, change tracking, component-order and system scheduling, and
//! world (de)serialization.
//!
//! `World` is the single entry point; every other module is reached through
//! it rather than constructed directly by a host application.

pub mod archetype;
pub mod bitset;
pub mod change;
pub mod component;
pub mod config;
pub mod dependency;
pub mod entity;
pub mod error;
pub mod pool;
pub mod query;
pub mod relationship;
pub mod schedule;
pub mod serialization;
pub mod simd;
pub mod system;
pub mod time;
pub mod world;

pub mod prelude;

pub use archetype::{Archetype, ArchetypeMask};
pub use component::{Component, ComponentId};
pub use config::WorldConfig;
pub use entity::EntityHandle;
pub use error::{EcsError, Result};
pub use query::{Added, Changed, Entity, Query, QueryMut, With, Without};
pub use world::World;

#[cfg(test)]
mod tests;
