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

//! System trait and the access metadata the scheduler uses to decide which
//! systems may run concurrently.

use crate::error::Result;
use crate::World;

/// Dense id for a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub u32);

/// Declared read/write component sets for one system, keyed by the dense
/// [`crate::component::ComponentId`] space rather than `TypeId` so conflict
/// checks are mask intersections instead of per-type hash lookups.
#[derive(Debug, Clone, Default)]
pub struct SystemAccess {
    pub reads: crate::bitset::BitSet,
    pub writes: crate::bitset::BitSet,
}

impl SystemAccess {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn read(mut self, id: crate::component::ComponentId) -> Self {
        self.reads.set(id.index());
        self
    }

    pub fn write(mut self, id: crate::component::ComponentId) -> Self {
        self.writes.set(id.index());
        self
    }

    /// Two systems conflict if either writes something the other reads or
    /// writes.
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        self.writes.intersects(&other.writes)
            || self.writes.intersects(&other.reads)
            || self.reads.intersects(&other.writes)
    }
}

/// A unit of per-frame logic registered with the [`crate::schedule::SystemScheduler`].
///
/// `run` takes `&mut World`: the substrate enforces read/write isolation
/// between concurrently scheduled systems via per-pool locks (see
/// `pool.rs`/`schedule.rs`), not via a shared-reference system signature.
pub trait System: Send + Sync {
    fn access(&self) -> SystemAccess;

    fn name(&self) -> &'static str;

    fn run(&mut self, world: &mut World) -> Result<()>;
}

pub type BoxedSystem = Box<dyn System>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentId;

    #[test]
    fn write_write_conflicts() {
        let a = SystemAccess::empty().write(ComponentId(0));
        let b = SystemAccess::empty().write(ComponentId(0));
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn read_read_does_not_conflict() {
        let a = SystemAccess::empty().read(ComponentId(0));
        let b = SystemAccess::empty().read(ComponentId(0));
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn write_read_conflicts() {
        let a = SystemAccess::empty().write(ComponentId(1));
        let b = SystemAccess::empty().read(ComponentId(1));
        assert!(a.conflicts_with(&b));
    }
}
