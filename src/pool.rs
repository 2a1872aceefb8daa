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

//! Per-component-type block allocator.
//!
//! Slots are identified by an arena index, never a raw pointer — per the
//! design notes, cross-references into the pool are ids into a map, not
//! addresses that could dangle across a chunk relocation. A shared
//! [`MemoryBudget`] is injected rather than read from a process-wide
//! singleton, so pools can be unit-tested in isolation.
//!
//! Each pool also carries its own [`parking_lot::RwLock`], independent of
//! the budget mutex: the budget lock protects allocation bookkeeping, the
//! access lock protects the component data a query or parallel system is
//! about to read or write through this pool's archetype columns. A query
//! takes a read guard on every component type it only reads and a write
//! guard on every component type it may mutate; two queries or scheduled
//! systems that touch the same component type block on each other instead
//! of racing.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::component::ComponentId;
use crate::error::{EcsError, Result};

const CHUNK_SLOTS: usize = 256;

/// Soft, shared upper bound on total component-pool byte usage across a
/// world. Pools consult it on growth and trigger compaction before failing.
#[derive(Debug, Default)]
pub struct MemoryBudget {
    inner: Mutex<BudgetState>,
}

#[derive(Debug, Default)]
struct BudgetState {
    limit_bytes: usize,
    used_bytes: usize,
}

impl MemoryBudget {
    pub fn new(limit_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BudgetState {
                limit_bytes,
                used_bytes: 0,
            }),
        })
    }

    pub fn set_limit(&self, limit_bytes: usize) {
        self.inner.lock().limit_bytes = limit_bytes;
    }

    pub fn used(&self) -> usize {
        self.inner.lock().used_bytes
    }

    pub fn limit(&self) -> usize {
        self.inner.lock().limit_bytes
    }

    /// Reserves `bytes` against the budget. `0` means unbounded.
    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut state = self.inner.lock();
        if state.limit_bytes != 0 && state.used_bytes + bytes > state.limit_bytes {
            return Err(EcsError::OutOfBudget);
        }
        state.used_bytes += bytes;
        Ok(())
    }

    fn release(&self, bytes: usize) {
        let mut state = self.inner.lock();
        state.used_bytes = state.used_bytes.saturating_sub(bytes);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub live: usize,
    pub bytes_used: usize,
    pub fragmentation: f32,
}

/// Chunked, free-list-backed slot allocator for one component type. Slot
/// identity is an arena index (`u32`), not a pointer.
pub struct ComponentPool {
    component_id: ComponentId,
    slot_size: usize,
    capacity: usize,
    live: usize,
    free_list: Vec<u32>,
    budget: Arc<MemoryBudget>,
    access: RwLock<()>,
}

impl ComponentPool {
    pub fn new(component_id: ComponentId, slot_size: usize, budget: Arc<MemoryBudget>) -> Self {
        Self {
            component_id,
            slot_size: slot_size.max(1),
            capacity: 0,
            live: 0,
            free_list: Vec::new(),
            budget,
            access: RwLock::new(()),
        }
    }

    pub fn component_id(&self) -> ComponentId {
        self.component_id
    }

    /// Acquires a read guard over this pool's component data. Held by a
    /// query for the duration of the pass it reads this component through.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.access.read()
    }

    /// Acquires a write guard over this pool's component data. Held by a
    /// query or parallel system for the duration of the pass it may mutate
    /// this component through.
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.access.write()
    }

    /// Allocates one slot, growing by a chunk if the free list is empty.
    pub fn alloc(&mut self) -> Result<u32> {
        if let Some(slot) = self.free_list.pop() {
            self.live += 1;
            return Ok(slot);
        }
        self.grow()?;
        let slot = self.free_list.pop().expect("grow() just added slots");
        self.live += 1;
        Ok(slot)
    }

    pub fn alloc_batch(&mut self, n: usize) -> Result<Vec<u32>> {
        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            slots.push(self.alloc()?);
        }
        Ok(slots)
    }

    pub fn free(&mut self, slot: u32) {
        debug_assert!((slot as usize) < self.capacity, "slot out of range");
        self.free_list.push(slot);
        self.live -= 1;
    }

    pub fn free_batch(&mut self, slots: &[u32]) {
        for &slot in slots {
            self.free(slot);
        }
    }

    /// Grows by one chunk, reserving the corresponding bytes against the
    /// shared budget. Does *not* compact on its own: compacting here would
    /// renumber live slots without telling the owning `World`, which is the
    /// only place that knows which archetype row holds which slot. Instead
    /// `World::alloc_slot` catches this error, runs `World::compact_pool`
    /// (which applies the returned remap to its own bookkeeping), and
    /// retries the allocation once before escalating, per the
    /// `OutOfBudget`/`AllocationFailure` recovery policy.
    fn grow(&mut self) -> Result<()> {
        let added_bytes = CHUNK_SLOTS * self.slot_size;
        self.budget.reserve(added_bytes).map_err(|_| {
            EcsError::AllocationFailure(format!(
                "component pool for {:?} exceeded memory budget while growing",
                self.component_id
            ))
        })?;
        let base = self.capacity as u32;
        self.free_list
            .extend((0..CHUNK_SLOTS as u32).map(|i| base + i));
        self.capacity += CHUNK_SLOTS;
        Ok(())
    }

    /// Consolidates the free list into a canonical form: live slots occupy
    /// `0..live`, and the budget is credited back for the capacity this
    /// freed. Returns the mapping from old slot index to new slot index for
    /// every slot that moved, so the caller can relocate its own bookkeeping
    /// (`World` keeps slot numbers per archetype row). Requires the caller
    /// to have suspended iteration over this pool.
    pub fn compact(&mut self) -> rustc_hash::FxHashMap<u32, u32> {
        let mut live_slots: Vec<u32> = (0..self.capacity as u32)
            .filter(|s| !self.free_list.contains(s))
            .collect();
        live_slots.sort_unstable();

        let mut mapping = rustc_hash::FxHashMap::default();
        for (new_idx, &old_idx) in live_slots.iter().enumerate() {
            if new_idx as u32 != old_idx {
                mapping.insert(old_idx, new_idx as u32);
            }
        }

        let freed_slots = self.capacity - live_slots.len();
        self.capacity = live_slots.len();
        self.free_list.clear();
        if freed_slots > 0 {
            self.budget.release(freed_slots * self.slot_size);
        }
        mapping
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            live: self.live,
            bytes_used: self.live * self.slot_size,
            fragmentation: if self.capacity == 0 {
                0.0
            } else {
                1.0 - (self.live as f32 / self.capacity as f32)
            },
        }
    }
}

impl Drop for ComponentPool {
    fn drop(&mut self) {
        self.budget.release(self.capacity * self.slot_size);
    }
}
