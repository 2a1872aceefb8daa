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

//! Common imports for a host embedding the ECS:
//! ```
//! use ecs_core::prelude::*;
//! ```

pub use crate::change::{ChangeKind, ChangeRecord, SubscriptionToken};
pub use crate::component::{Component, ComponentId};
pub use crate::config::WorldConfig;
pub use crate::entity::EntityHandle;
pub use crate::error::{EcsError, Result};
pub use crate::query::{Added, Changed, Entity, Query, QueryMut, With, Without};
pub use crate::schedule::SystemScheduler;
pub use crate::serialization::{
    Format, SerializeOptions, StreamReader, StreamWriter, UnknownComponentPolicy, WorldSerializer,
};
pub use crate::system::{System, SystemAccess, SystemId};
pub use crate::time::{FixedTime, Time};
pub use crate::world::{EntityBuilder, Region, World};
