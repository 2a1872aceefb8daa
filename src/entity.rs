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

//! Entity identifiers and the registry that allocates them.
//!
//! An [`EntityHandle`] is a dense index plus a generation counter. The handle
//! is valid only while `generations[index] == generation`; destruction bumps
//! the generation so outstanding handles are invalidated without scanning
//! anything that refers to them.

/// Opaque entity identity: `{index, generation}`, never reused without a
/// generation bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl EntityHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Where an entity currently lives within the archetype store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype_id: usize,
    pub row: usize,
}

/// Generational index allocator. Dense `generations[]` vector plus a free-list
/// stack of retired indices, per §4.1.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    generations: Vec<u32>,
    free_list: Vec<u32>,
    /// Indices permanently retired because their generation saturated `u32`.
    retired: rustc_hash::FxHashSet<u32>,
    live_count: usize,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new handle, reusing a freed index with a bumped generation
    /// when one is available.
    pub fn create(&mut self) -> EntityHandle {
        self.live_count += 1;
        loop {
            if let Some(index) = self.free_list.pop() {
                // An index whose generation saturated is retired permanently
                // rather than handed back out under an ambiguous id.
                if self.retired.contains(&index) {
                    continue;
                }
                let generation = self.generations[index as usize];
                return EntityHandle { index, generation };
            }
            let index = self.generations.len() as u32;
            self.generations.push(0);
            return EntityHandle {
                index,
                generation: 0,
            };
        }
    }

    /// Invalidates `handle` if it is currently valid. Idempotent: destroying
    /// an already-invalid handle is a no-op that returns `false`.
    pub fn destroy(&mut self, handle: EntityHandle) -> bool {
        if !self.is_valid(handle) {
            return false;
        }
        self.live_count -= 1;
        let slot = &mut self.generations[handle.index as usize];
        match slot.checked_add(1) {
            Some(next) => {
                *slot = next;
                self.free_list.push(handle.index);
            }
            None => {
                // Generation saturated: retire the index rather than reuse an
                // ambiguous id.
                self.retired.insert(handle.index);
            }
        }
        true
    }

    pub fn is_valid(&self, handle: EntityHandle) -> bool {
        self.generations
            .get(handle.index as usize)
            .is_some_and(|&gen| gen == handle.generation)
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn capacity(&self) -> usize {
        self.generations.len()
    }
}
