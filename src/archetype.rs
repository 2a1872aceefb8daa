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

//! Columnar archetype storage: one [`Archetype`] per distinct component mask,
//! each holding one [`ComponentColumn`] per present component id plus the
//! dense entity list in the same row order as the columns.

use rustc_hash::FxHashMap;

use crate::bitset::BitSet;
use crate::component::{ComponentId, ComponentInfo};
use crate::entity::EntityHandle;

/// A component mask. Two entities share an archetype iff their masks are
/// equal.
pub type ArchetypeMask = BitSet;

/// Type-erased, contiguous storage for one component across all rows of an
/// archetype. Backed by a `Vec<u8>` that grows geometrically; byte-level
/// bookkeeping (capacity accounting, fragmentation) is mirrored into the
/// world's per-type `ComponentPool` for budget enforcement.
pub struct ComponentColumn {
    data: Vec<u8>,
    item_size: usize,
    drop_fn: unsafe fn(*mut u8),
    /// Tick of the world's change counter at which each row was added.
    added_ticks: Vec<u32>,
    /// Tick of the world's change counter at which each row was last written.
    changed_ticks: Vec<u32>,
}

impl ComponentColumn {
    pub fn new(info: &ComponentInfo) -> Self {
        Self {
            data: Vec::new(),
            item_size: info.layout.size(),
            drop_fn: info.drop_fn,
            added_ticks: Vec::new(),
            changed_ticks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.added_ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves space for one more row and returns its index, stamping
    /// added/changed ticks with `tick`. Caller must immediately write the
    /// component bytes via `get_ptr_mut_untracked`.
    pub fn push_uninit(&mut self, tick: u32) -> usize {
        let row = self.len();
        self.data.resize(self.data.len() + self.item_size, 0);
        self.added_ticks.push(tick);
        self.changed_ticks.push(tick);
        row
    }

    pub fn get_ptr(&self, row: usize) -> *const u8 {
        &self.data[row * self.item_size]
    }

    pub fn get_ptr_mut(&mut self, row: usize, tick: u32) -> *mut u8 {
        self.changed_ticks[row] = tick;
        &mut self.data[row * self.item_size]
    }

    /// Like `get_ptr_mut` but does not bump the change tick — used by
    /// migration, which is relocating bytes rather than mutating a value.
    pub fn get_ptr_mut_untracked(&mut self, row: usize) -> *mut u8 {
        &mut self.data[row * self.item_size]
    }

    pub fn added_tick(&self, row: usize) -> u32 {
        self.added_ticks[row]
    }

    pub fn changed_tick(&self, row: usize) -> u32 {
        self.changed_ticks[row]
    }

    pub fn added_ticks_slice(&self) -> &[u32] {
        &self.added_ticks
    }

    pub fn changed_ticks_slice(&self) -> &[u32] {
        &self.changed_ticks
    }

    /// Removes `row` by swapping in the last row; returns `true` if a row
    /// was moved into `row`'s place (i.e. `row` was not already last).
    pub fn swap_remove(&mut self, row: usize) -> bool {
        let last = self.len() - 1;
        unsafe { (self.drop_fn)(self.get_ptr_mut_untracked(row)) };
        if row != last {
            let (lo, hi) = self.data.split_at_mut(last * self.item_size);
            lo[row * self.item_size..row * self.item_size + self.item_size]
                .copy_from_slice(&hi[..self.item_size]);
            self.added_ticks[row] = self.added_ticks[last];
            self.changed_ticks[row] = self.changed_ticks[last];
        }
        self.data.truncate(last * self.item_size);
        self.added_ticks.truncate(last);
        self.changed_ticks.truncate(last);
        row != last
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Exposes every row as a typed slice, stamping all rows' changed tick
    /// to `tick` since the caller may write through any element.
    ///
    /// # Safety
    /// `T`'s layout must match the [`crate::component::ComponentInfo`] this
    /// column was constructed from.
    pub unsafe fn as_slice_mut<T>(&mut self, tick: u32) -> &mut [T] {
        let len = self.len();
        for t in self.changed_ticks.iter_mut() {
            *t = tick;
        }
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr() as *mut T, len) }
    }
}

impl Drop for ComponentColumn {
    fn drop(&mut self) {
        for row in 0..self.len() {
            unsafe { (self.drop_fn)(self.get_ptr_mut_untracked(row)) };
        }
    }
}

/// One data-oriented bucket of entities sharing a component mask.
pub struct Archetype {
    pub(crate) mask: ArchetypeMask,
    columns: FxHashMap<ComponentId, ComponentColumn>,
    entities: Vec<EntityHandle>,
    entity_to_row: FxHashMap<EntityHandle, usize>,
}

impl Archetype {
    pub fn new(mask: ArchetypeMask) -> Self {
        Self {
            mask,
            columns: FxHashMap::default(),
            entities: Vec::new(),
            entity_to_row: FxHashMap::default(),
        }
    }

    pub fn mask(&self) -> &ArchetypeMask {
        &self.mask
    }

    pub fn ensure_column(&mut self, id: ComponentId, info: &ComponentInfo) {
        self.columns
            .entry(id)
            .or_insert_with(|| ComponentColumn::new(info));
    }

    pub fn column(&self, id: ComponentId) -> Option<&ComponentColumn> {
        self.columns.get(&id)
    }

    pub fn column_mut(&mut self, id: ComponentId) -> Option<&mut ComponentColumn> {
        self.columns.get_mut(&id)
    }

    pub fn columns_mut(&mut self) -> &mut FxHashMap<ComponentId, ComponentColumn> {
        &mut self.columns
    }

    pub fn entities(&self) -> &[EntityHandle] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn row_of(&self, entity: EntityHandle) -> Option<usize> {
        self.entity_to_row.get(&entity).copied()
    }

    /// Appends `entity` as a new row. Every present column must be pushed
    /// (uninitialized) by the caller immediately after.
    pub fn push_entity(&mut self, entity: EntityHandle) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        self.entity_to_row.insert(entity, row);
        row
    }

    /// Swap-removes `row` from the entity list and every column. Returns the
    /// handle of the entity that was swapped into `row`, if any (the caller
    /// must update that entity's location).
    pub fn remove_row(&mut self, row: usize) -> Option<EntityHandle> {
        let removed = self.entities.swap_remove(row);
        self.entity_to_row.remove(&removed);
        for column in self.columns.values_mut() {
            column.swap_remove(row);
        }
        if row < self.entities.len() {
            let moved = self.entities[row];
            self.entity_to_row.insert(moved, row);
            Some(moved)
        } else {
            None
        }
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.mask.contains(id.index())
    }

    pub fn component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.columns.keys().copied()
    }
}
