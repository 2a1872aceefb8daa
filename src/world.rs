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

//! Central entity/archetype store: the facade every other module reaches
//! through. Holds component storage (via [`Archetype`]), entity identity
//! (via [`EntityRegistry`]), the per-component-type memory accounting (via
//! [`ComponentPool`]), relationship edges, component update ordering, and
//! system scheduling.

use std::any::TypeId;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::archetype::{Archetype, ArchetypeMask};
use crate::change::{ChangeKind, ChangeTracker, SubscriptionToken};
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::config::WorldConfig;
use crate::dependency::DependencyGraph;
use crate::entity::{EntityHandle, EntityLocation, EntityRegistry};
use crate::error::{EcsError, Result};
use crate::pool::{ComponentPool, MemoryBudget, PoolStats};
use crate::query::{Query, QueryCache, QueryFetch, QueryFetchMut, QueryMut};
use crate::relationship::RelationshipGraph;
use crate::schedule::{SystemScheduler, SystemStats};
use crate::system::{BoxedSystem, SystemId};
use crate::time::{FixedTime, Time};

/// A component value not yet written into storage, captured by
/// [`EntityBuilder::with`] until [`EntityBuilder::build`] allocates a row.
struct PendingComponent {
    id: ComponentId,
    write: Box<dyn FnOnce(*mut u8)>,
}

/// An opaque tuple of integer coordinates attached to an entity at creation
/// time. The core carries it alongside the entity but never interprets it;
/// higher layers use it for spatial partitioning (e.g. interest management,
/// broad-phase culling) outside this crate's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region(pub i32, pub i32, pub i32);

/// Fluent entity construction: `world.spawn().with(Position{..}).build()?`.
pub struct EntityBuilder<'w> {
    world: &'w mut World,
    pending: Vec<PendingComponent>,
    region: Option<Region>,
}

impl<'w> EntityBuilder<'w> {
    pub fn with<T: Component>(mut self, value: T) -> Self {
        let id = self.world.components.register::<T>();
        self.pending.push(PendingComponent {
            id,
            write: Box::new(move |ptr: *mut u8| unsafe { std::ptr::write(ptr as *mut T, value) }),
        });
        self
    }

    /// Tags the entity with `region`, carried but not interpreted by the
    /// core. Overwrites any region set by an earlier call.
    pub fn in_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Allocates the row and writes every pending component.
    ///
    /// Returns `AllocationFailure`/`OutOfBudget` through the `Result` rather
    /// than panicking: the default budget (`World::new`) is unbounded, so
    /// this only triggers under an explicit `World::with_memory_limit` whose
    /// ceiling compaction could not recover enough space under.
    pub fn build(self) -> Result<EntityHandle> {
        let region = self.region;
        let handle = self.world.spawn_with_pending(self.pending)?;
        if let Some(region) = region {
            self.world.regions.insert(handle, region);
        }
        Ok(handle)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    pub used_bytes: usize,
    pub limit_bytes: usize,
    pub archetype_count: usize,
    pub entity_count: usize,
}

pub struct World {
    entities: EntityRegistry,
    components: ComponentRegistry,
    archetypes: Vec<Archetype>,
    archetype_by_mask: FxHashMap<ArchetypeMask, usize>,
    /// Indexed by `EntityHandle::index()`; valid only while `entities`
    /// reports the corresponding handle as live.
    locations: Vec<EntityLocation>,
    relationships: RelationshipGraph,
    dependencies: DependencyGraph,
    scheduler: SystemScheduler,
    memory_budget: Arc<MemoryBudget>,
    pools: FxHashMap<ComponentId, ComponentPool>,
    /// Per-(archetype, component) pool slot for each row, kept in lockstep
    /// with that column's own swap-remove so a despawn or migration frees
    /// the right slot from the right pool.
    pool_slots: FxHashMap<(usize, ComponentId), Vec<u32>>,
    tick: u32,
    query_cache: FxHashMap<TypeId, QueryCache>,
    changes: ChangeTracker,
    regions: FxHashMap<EntityHandle, Region>,
    time: Time,
    fixed_time: FixedTime,
    compact_every_ticks: Option<u32>,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// `limit_bytes == 0` means unbounded.
    pub fn with_memory_limit(limit_bytes: usize) -> Self {
        Self::with_config(WorldConfig {
            memory_budget_bytes: limit_bytes,
            ..WorldConfig::default()
        })
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let empty_mask = ArchetypeMask::with_capacity(64);
        let mut archetype_by_mask = FxHashMap::default();
        archetype_by_mask.insert(empty_mask.clone(), 0);
        let mut changes = ChangeTracker::new(config.change_tracking);
        changes.set_max_log_size(config.max_change_log_size);
        changes.set_max_log_age(config.max_change_log_age);
        Self {
            entities: EntityRegistry::new(),
            components: ComponentRegistry::new(),
            archetypes: vec![Archetype::new(empty_mask)],
            archetype_by_mask,
            locations: Vec::new(),
            relationships: RelationshipGraph::new(),
            dependencies: DependencyGraph::new(),
            scheduler: SystemScheduler::new(),
            memory_budget: MemoryBudget::new(config.memory_budget_bytes),
            pools: FxHashMap::default(),
            pool_slots: FxHashMap::default(),
            tick: 1,
            query_cache: FxHashMap::default(),
            changes,
            regions: FxHashMap::default(),
            time: Time::new(),
            fixed_time: FixedTime::new(config.fixed_timestep),
            compact_every_ticks: config.compact_every_ticks,
        }
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn increment_tick(&mut self) {
        if self.tick == u32::MAX {
            panic!("world tick overflow at {}", self.tick);
        }
        self.tick += 1;
    }

    // ===== entity lifecycle =====

    pub fn spawn(&mut self) -> EntityBuilder<'_> {
        EntityBuilder {
            world: self,
            pending: Vec::new(),
            region: None,
        }
    }

    fn spawn_with_pending(&mut self, pending: Vec<PendingComponent>) -> Result<EntityHandle> {
        let ids: Vec<ComponentId> = pending.iter().map(|p| p.id).collect();
        let archetype_id = self.get_or_create_archetype(&ids);

        let mut reserved: Vec<(ComponentId, u32)> = Vec::with_capacity(ids.len());
        for &id in &ids {
            match self.alloc_slot(id) {
                Ok(slot) => reserved.push((id, slot)),
                Err(err) => {
                    for (rid, rslot) in reserved {
                        self.pools.get_mut(&rid).unwrap().free(rslot);
                    }
                    return Err(err);
                }
            }
        }

        let handle = self.entities.create();
        let tick = self.tick;
        let row = self.archetypes[archetype_id].push_entity(handle);
        for (pending_component, (id, slot)) in pending.into_iter().zip(reserved) {
            self.pool_slots
                .entry((archetype_id, id))
                .or_default()
                .push(slot);
            let column = self.archetypes[archetype_id]
                .column_mut(id)
                .expect("column ensured when archetype was created");
            let pushed_row = column.push_uninit(tick);
            debug_assert_eq!(pushed_row, row);
            let ptr = column.get_ptr_mut_untracked(pushed_row);
            (pending_component.write)(ptr);
            self.changes.record_added(handle, id, tick);
        }

        self.ensure_location_capacity(handle.index() as usize + 1);
        self.locations[handle.index() as usize] = EntityLocation { archetype_id, row };
        Ok(handle)
    }

    pub fn is_alive(&self, entity: EntityHandle) -> bool {
        self.entities.is_valid(entity)
    }

    pub fn despawn(&mut self, entity: EntityHandle) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidHandle(entity));
        }
        let loc = self.locations[entity.index() as usize];
        let ids: Vec<ComponentId> = self.archetypes[loc.archetype_id].component_ids().collect();
        let freed = self.take_row_slots(loc.archetype_id, loc.row, &ids);
        let tick = self.tick;
        for &id in &ids {
            self.changes.record_removed(entity, id, tick);
        }

        let swapped = self.archetypes[loc.archetype_id].remove_row(loc.row);
        for (id, slot) in freed {
            if let Some(pool) = self.pools.get_mut(&id) {
                pool.free(slot);
            }
        }
        if let Some(moved) = swapped {
            self.locations[moved.index() as usize].row = loc.row;
        }

        self.relationships.remove_entity(entity);
        self.regions.remove(&entity);
        self.entities.destroy(entity);
        Ok(())
    }

    /// Region tagged at creation time via `EntityBuilder::in_region`, if any.
    pub fn region_of(&self, entity: EntityHandle) -> Option<Region> {
        self.regions.get(&entity).copied()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.live_count()
    }

    // ===== component access =====

    pub fn has_component<T: Component>(&self, entity: EntityHandle) -> bool {
        let Some(id) = self.components.id_of::<T>() else {
            return false;
        };
        self.entities.is_valid(entity)
            && self
                .locations
                .get(entity.index() as usize)
                .is_some_and(|loc| self.archetypes[loc.archetype_id].has_component(id))
    }

    pub fn get_component<T: Component>(&self, entity: EntityHandle) -> Option<&T> {
        if !self.entities.is_valid(entity) {
            return None;
        }
        let loc = *self.locations.get(entity.index() as usize)?;
        let id = self.components.id_of::<T>()?;
        let column = self.archetypes.get(loc.archetype_id)?.column(id)?;
        if loc.row >= column.len() {
            return None;
        }
        Some(unsafe { &*(column.get_ptr(loc.row) as *const T) })
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: EntityHandle) -> Option<&mut T> {
        if !self.entities.is_valid(entity) {
            return None;
        }
        let loc = *self.locations.get(entity.index() as usize)?;
        let id = self.components.id_of::<T>()?;
        let tick = self.tick;
        let column = self.archetypes.get_mut(loc.archetype_id)?.column_mut(id)?;
        if loc.row >= column.len() {
            return None;
        }
        let ptr = column.get_ptr_mut(loc.row, tick) as *mut T;
        self.changes.record_modified(entity, id, tick);
        Some(unsafe { &mut *ptr })
    }

    /// Adds `value` to `entity`, moving it to the archetype for its new
    /// component set. Overwrites in place if the component is already
    /// present, without a migration.
    pub fn add_component<T: Component>(&mut self, entity: EntityHandle, value: T) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidHandle(entity));
        }
        let loc = self.locations[entity.index() as usize];
        let id = self.components.register::<T>();

        if self.archetypes[loc.archetype_id].has_component(id) {
            let tick = self.tick;
            let col = self.archetypes[loc.archetype_id].column_mut(id).unwrap();
            let ptr = col.get_ptr_mut(loc.row, tick) as *mut T;
            unsafe { std::ptr::write(ptr, value) };
            self.changes.record_modified(entity, id, tick);
            return Ok(());
        }

        let mut ids: Vec<ComponentId> = self.archetypes[loc.archetype_id].component_ids().collect();
        ids.push(id);
        let new_archetype_id = self.get_or_create_archetype(&ids);
        let write: Box<dyn FnOnce(*mut u8)> =
            Box::new(move |ptr: *mut u8| unsafe { std::ptr::write(ptr as *mut T, value) });
        self.move_entity(entity, loc, new_archetype_id, Some((id, write)), None)
    }

    /// Removes `T` from `entity`, moving it to the archetype for its
    /// remaining component set. Errors if `entity` does not carry `T`.
    pub fn remove_component<T: Component>(&mut self, entity: EntityHandle) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidHandle(entity));
        }
        let loc = self.locations[entity.index() as usize];
        let id = self.components.register::<T>();
        if !self.archetypes[loc.archetype_id].has_component(id) {
            return Err(EcsError::MissingComponent {
                entity,
                component: id,
            });
        }
        let ids: Vec<ComponentId> = self.archetypes[loc.archetype_id]
            .component_ids()
            .filter(|&cid| cid != id)
            .collect();
        let new_archetype_id = self.get_or_create_archetype(&ids);
        self.move_entity(entity, loc, new_archetype_id, None, Some(id))
    }

    /// Moves `entity` from its current archetype to `new_archetype_id`,
    /// copying every shared component and writing `added` (if any). Frees
    /// the pool slot for `removed` (if any); relocates every other slot's
    /// bookkeeping to the new archetype.
    fn move_entity(
        &mut self,
        entity: EntityHandle,
        old_loc: EntityLocation,
        new_archetype_id: usize,
        added: Option<(ComponentId, Box<dyn FnOnce(*mut u8)>)>,
        removed: Option<ComponentId>,
    ) -> Result<()> {
        if old_loc.archetype_id == new_archetype_id {
            return Ok(());
        }
        let tick = self.tick;
        let old_ids: Vec<ComponentId> = self.archetypes[old_loc.archetype_id]
            .component_ids()
            .collect();
        let mut slots = self.take_row_slots(old_loc.archetype_id, old_loc.row, &old_ids);

        let mut new_slot = None;
        if let Some((id, _)) = &added {
            match self.alloc_slot(*id) {
                Ok(slot) => new_slot = Some(slot),
                Err(err) => {
                    for (id, slot) in slots {
                        self.put_row_slot(old_loc.archetype_id, id, slot);
                    }
                    return Err(err);
                }
            }
        }

        let new_row = self.archetypes[new_archetype_id].push_entity(entity);

        let new_ids: Vec<ComponentId> = self.archetypes[new_archetype_id]
            .component_ids()
            .collect();
        for &id in &new_ids {
            let src = self.archetypes[old_loc.archetype_id]
                .column(id)
                .map(|c| c.get_ptr(old_loc.row));
            let Some(src) = src else { continue };
            let item_size = self.archetypes[new_archetype_id]
                .column(id)
                .unwrap()
                .item_size();
            let new_col = self.archetypes[new_archetype_id].column_mut(id).unwrap();
            let dst_row = new_col.push_uninit(tick);
            debug_assert_eq!(dst_row, new_row);
            let dst = new_col.get_ptr_mut_untracked(dst_row);
            unsafe { std::ptr::copy_nonoverlapping(src, dst, item_size) };
        }

        slots.retain(|&(id, slot)| {
            if removed == Some(id) {
                if let Some(pool) = self.pools.get_mut(&id) {
                    pool.free(slot);
                }
                false
            } else {
                true
            }
        });
        for (id, slot) in slots {
            self.put_row_slot(new_archetype_id, id, slot);
        }

        if let (Some((id, write)), Some(slot)) = (added, new_slot) {
            self.put_row_slot(new_archetype_id, id, slot);
            let col = self.archetypes[new_archetype_id].column_mut(id).unwrap();
            let dst_row = col.push_uninit(tick);
            debug_assert_eq!(dst_row, new_row);
            let ptr = col.get_ptr_mut_untracked(dst_row);
            write(ptr);
            self.changes.record_added(entity, id, tick);
        }
        if let Some(id) = removed {
            self.changes.record_removed(entity, id, tick);
        }

        let swapped = self.archetypes[old_loc.archetype_id].remove_row(old_loc.row);
        if let Some(moved) = swapped {
            self.locations[moved.index() as usize].row = old_loc.row;
        }
        self.locations[entity.index() as usize] = EntityLocation {
            archetype_id: new_archetype_id,
            row: new_row,
        };
        Ok(())
    }

    // ===== pool slot bookkeeping =====

    /// Allocates a slot from the pool for `id`, retrying once via
    /// `compact_pool` if the pool is at its budget ceiling. Compaction only
    /// helps when the pool is fragmented (live slots scattered across more
    /// capacity than it needs); if it doesn't free enough room the original
    /// error is returned.
    fn alloc_slot(&mut self, id: ComponentId) -> Result<u32> {
        match self.try_alloc_slot(id) {
            Ok(slot) => Ok(slot),
            Err(_) => {
                self.compact_pool(id);
                self.try_alloc_slot(id)
            }
        }
    }

    fn try_alloc_slot(&mut self, id: ComponentId) -> Result<u32> {
        let item_size = self.components.info(id).map(|i| i.layout.size()).unwrap_or(1);
        let budget = self.memory_budget.clone();
        let pool = self
            .pools
            .entry(id)
            .or_insert_with(|| ComponentPool::new(id, item_size.max(1), budget));
        pool.alloc()
    }

    /// Consolidates the free list of the pool for `id` and relocates every
    /// `pool_slots` entry for that component to the new slot numbering.
    pub fn compact_pool(&mut self, id: ComponentId) {
        let Some(pool) = self.pools.get_mut(&id) else {
            return;
        };
        let mapping = pool.compact();
        if mapping.is_empty() {
            return;
        }
        for ((_, cid), slots) in self.pool_slots.iter_mut() {
            if *cid != id {
                continue;
            }
            for slot in slots.iter_mut() {
                if let Some(&new_slot) = mapping.get(slot) {
                    *slot = new_slot;
                }
            }
        }
    }

    /// Drops every empty, non-root archetype, keeping the rest in their
    /// relative order. Remaps `archetype_by_mask`, `pool_slots`, and every
    /// entity's `locations` entry to match, and clears the query cache since
    /// cached archetype indices would otherwise point past their old
    /// archetypes.
    pub fn compact_archetypes(&mut self) {
        let old_len = self.archetypes.len();
        let old_archetypes = std::mem::take(&mut self.archetypes);
        let mut mapping: FxHashMap<usize, usize> = FxHashMap::default();
        let mut new_archetypes = Vec::with_capacity(old_archetypes.len());
        for (old_idx, archetype) in old_archetypes.into_iter().enumerate() {
            if old_idx != 0 && archetype.is_empty() {
                continue;
            }
            let new_idx = new_archetypes.len();
            mapping.insert(old_idx, new_idx);
            new_archetypes.push(archetype);
        }
        self.archetypes = new_archetypes;
        if mapping.len() == old_len {
            return;
        }

        self.archetype_by_mask = self
            .archetypes
            .iter()
            .enumerate()
            .map(|(idx, a)| (a.mask().clone(), idx))
            .collect();

        let old_pool_slots = std::mem::take(&mut self.pool_slots);
        for ((old_archetype_id, component_id), slots) in old_pool_slots {
            if let Some(&new_id) = mapping.get(&old_archetype_id) {
                self.pool_slots.insert((new_id, component_id), slots);
            }
        }

        for loc in self.locations.iter_mut() {
            if let Some(&new_id) = mapping.get(&loc.archetype_id) {
                loc.archetype_id = new_id;
            }
        }

        self.query_cache.clear();
    }

    /// Runs a full compaction pass: every component pool, then archetypes.
    /// Safe to call between ticks; never called mid-iteration by the
    /// scheduler itself (see `run_systems`).
    pub fn compact(&mut self) {
        let ids: Vec<ComponentId> = self.pools.keys().copied().collect();
        for id in ids {
            self.compact_pool(id);
        }
        self.compact_archetypes();
    }

    /// Requests a compaction pass on the same terms as `compact`. Kept as a
    /// distinct name for callers that want to express "please reclaim
    /// fragmented memory" without implying every call triggers a pass (a
    /// future version could coalesce repeated requests within a tick).
    pub fn request_compaction(&mut self) {
        self.compact();
    }

    fn take_row_slots(
        &mut self,
        archetype_id: usize,
        row: usize,
        ids: &[ComponentId],
    ) -> Vec<(ComponentId, u32)> {
        let mut taken = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(slots) = self.pool_slots.get_mut(&(archetype_id, id)) {
                if row < slots.len() {
                    taken.push((id, slots.swap_remove(row)));
                }
            }
        }
        taken
    }

    fn put_row_slot(&mut self, archetype_id: usize, id: ComponentId, slot: u32) {
        self.pool_slots
            .entry((archetype_id, id))
            .or_default()
            .push(slot);
    }

    pub fn pool_stats(&self, id: ComponentId) -> Option<PoolStats> {
        self.pools.get(&id).map(|p| p.stats())
    }

    /// The component pool for `id`, if one has been allocated yet (it is
    /// lazily created by the first `alloc_slot` for that type). Used by the
    /// query engine and scheduler to take the pool's `RwLock` guard for the
    /// duration of a parallel pass, independent of `&World`'s own borrow.
    pub fn pool(&self, id: ComponentId) -> Option<&ComponentPool> {
        self.pools.get(&id)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            used_bytes: self.memory_budget.used(),
            limit_bytes: self.memory_budget.limit(),
            archetype_count: self.archetypes.len(),
            entity_count: self.entities.live_count(),
        }
    }

    // ===== archetype + component registry access =====

    fn get_or_create_archetype(&mut self, ids: &[ComponentId]) -> usize {
        let mut mask = ArchetypeMask::with_capacity(64);
        for &id in ids {
            mask.set(id.index());
        }
        if let Some(&idx) = self.archetype_by_mask.get(&mask) {
            return idx;
        }
        let mut archetype = Archetype::new(mask.clone());
        for &id in ids {
            let info = self
                .components
                .info(id)
                .expect("component id came from this world's registry");
            archetype.ensure_column(id, info);
        }
        self.archetypes.push(archetype);
        let idx = self.archetypes.len() - 1;
        self.archetype_by_mask.insert(mask, idx);
        idx
    }

    pub fn archetype(&self, id: usize) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    pub fn archetype_mut(&mut self, id: usize) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id)
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn component_registry(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn component_registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.components
    }

    fn ensure_location_capacity(&mut self, len: usize) {
        if self.locations.len() < len {
            self.locations.resize(
                len,
                EntityLocation {
                    archetype_id: 0,
                    row: 0,
                },
            );
        }
    }

    // ===== queries =====

    pub(crate) fn query_cache_lookup(
        &mut self,
        key: TypeId,
        matches_fn: impl Fn(&Archetype, &ComponentRegistry) -> bool,
    ) -> Vec<usize> {
        let total = self.archetypes.len();
        let archetypes = &self.archetypes;
        let registry = &self.components;
        let cache = self.query_cache.entry(key).or_default();
        if cache.seen_archetypes < total {
            for idx in cache.seen_archetypes..total {
                if matches_fn(&archetypes[idx], registry) {
                    cache.matches.push(idx);
                }
            }
            cache.seen_archetypes = total;
        }
        cache.matches.clone()
    }

    pub fn query<'w, Q>(&'w mut self) -> Query<'w, Q>
    where
        Q: QueryFetch<'w> + 'static,
    {
        let matched = crate::query::resolve_matches::<Q>(self);
        Query::new(&*self, matched)
    }

    pub fn query_mut<'w, Q>(&'w mut self) -> QueryMut<'w, Q>
    where
        Q: QueryFetchMut<'w> + 'static,
    {
        let matched = crate::query::resolve_matches_mut::<Q>(self);
        QueryMut::new(self, matched)
    }

    // ===== change tracking =====

    pub fn subscribe_changes(
        &mut self,
        component: ComponentId,
        kinds: &[ChangeKind],
        frequency: Option<u32>,
        budget: Option<u32>,
        callback: Box<dyn FnMut(&[crate::change::ChangeRecord]) + Send + Sync>,
    ) -> SubscriptionToken {
        self.changes.subscribe(component, kinds, frequency, budget, callback)
    }

    pub fn unsubscribe_changes(&mut self, token: SubscriptionToken) -> bool {
        self.changes.unsubscribe(token)
    }

    /// Dispatches accumulated change records to due subscribers. Called by
    /// the scheduler after each system.
    pub fn drain_changes(&mut self) {
        let tick = self.tick;
        self.changes.drain_pending(tick);
    }

    pub fn change_log_len(&self) -> usize {
        self.changes.log_len()
    }

    // ===== raw component access (serialization) =====

    /// Snapshot of every live entity, in archetype/row order.
    pub fn all_entities(&self) -> Vec<EntityHandle> {
        self.archetypes
            .iter()
            .flat_map(|a| a.entities().iter().copied())
            .collect()
    }

    pub fn component_ids_of(&self, entity: EntityHandle) -> Vec<ComponentId> {
        let Some(loc) = self.locations.get(entity.index() as usize) else {
            return Vec::new();
        };
        self.archetypes[loc.archetype_id].component_ids().collect()
    }

    /// Raw bytes of `entity`'s `id` component, sized by the component's own
    /// layout. Used by the serializer, which holds the type-erased
    /// `SerdeHooks` needed to interpret them.
    pub fn raw_component_bytes(&self, entity: EntityHandle, id: ComponentId) -> Option<&[u8]> {
        let loc = *self.locations.get(entity.index() as usize)?;
        let column = self.archetypes.get(loc.archetype_id)?.column(id)?;
        if loc.row >= column.len() {
            return None;
        }
        let size = self.components.info(id)?.layout.size();
        Some(unsafe { std::slice::from_raw_parts(column.get_ptr(loc.row), size) })
    }

    /// Spawns an entity from already-serialized raw component bytes (one
    /// slice per id, each exactly that component's layout size). Used by
    /// `WorldSerializer::load`.
    pub fn spawn_raw(&mut self, components: Vec<(ComponentId, Vec<u8>)>) -> Result<EntityHandle> {
        let pending = components
            .into_iter()
            .map(|(id, bytes)| PendingComponent {
                id,
                write: Box::new(move |ptr: *mut u8| unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len())
                }),
            })
            .collect();
        self.spawn_with_pending(pending)
    }

    /// Attaches a component to `entity` from already-encoded bytes, without
    /// static type information. Overwrites in place if already present
    /// (emitting `Modified`); otherwise migrates archetypes (emitting
    /// `Added`). Used by the deserializer, which only has `ComponentId`s and
    /// raw bytes to work with.
    pub fn attach_raw(&mut self, entity: EntityHandle, id: ComponentId, bytes: Vec<u8>) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidHandle(entity));
        }
        let loc = self.locations[entity.index() as usize];
        if self.archetypes[loc.archetype_id].has_component(id) {
            let tick = self.tick;
            let col = self.archetypes[loc.archetype_id].column_mut(id).unwrap();
            let ptr = col.get_ptr_mut(loc.row, tick);
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
            self.changes.record_modified(entity, id, tick);
            return Ok(());
        }
        let mut ids: Vec<ComponentId> = self.archetypes[loc.archetype_id].component_ids().collect();
        ids.push(id);
        let new_archetype_id = self.get_or_create_archetype(&ids);
        let write: Box<dyn FnOnce(*mut u8)> = Box::new(move |ptr: *mut u8| unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len())
        });
        self.move_entity(entity, loc, new_archetype_id, Some((id, write)), None)
    }

    /// Detaches `id` from `entity` without static type information. A no-op
    /// if the entity does not carry that component (matching the raw-store
    /// contract, unlike the typed `remove_component` convenience above).
    pub fn detach_raw(&mut self, entity: EntityHandle, id: ComponentId) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidHandle(entity));
        }
        let loc = self.locations[entity.index() as usize];
        if !self.archetypes[loc.archetype_id].has_component(id) {
            return Ok(());
        }
        let ids: Vec<ComponentId> = self.archetypes[loc.archetype_id]
            .component_ids()
            .filter(|&cid| cid != id)
            .collect();
        let new_archetype_id = self.get_or_create_archetype(&ids);
        self.move_entity(entity, loc, new_archetype_id, None, Some(id))
    }

    /// Destroys every live entity and drops every archetype but the empty
    /// root. Used by the serializer before a destructive load.
    pub fn clear(&mut self) {
        for entity in self.all_entities() {
            let _ = self.despawn(entity);
        }
        self.query_cache.clear();
    }

    // ===== relationships =====

    pub fn set_parent(&mut self, child: EntityHandle, parent: EntityHandle) -> Result<()> {
        self.relationships.set_parent(child, parent)
    }

    pub fn remove_parent(&mut self, child: EntityHandle) -> Option<EntityHandle> {
        self.relationships.remove_parent(child)
    }

    pub fn parent_of(&self, child: EntityHandle) -> Option<EntityHandle> {
        self.relationships.parent_of(child)
    }

    pub fn children_of(&self, parent: EntityHandle) -> &[EntityHandle] {
        self.relationships.children_of(parent)
    }

    // ===== component update ordering =====

    pub fn declare_component_order(
        &mut self,
        dependent: ComponentId,
        dependency: ComponentId,
    ) -> Result<()> {
        self.dependencies.add_edge(dependent, dependency)
    }

    pub fn component_update_order(&self) -> Result<Vec<ComponentId>> {
        self.dependencies.topological_order()
    }

    // ===== systems =====

    pub fn register_system(&mut self, system: BoxedSystem, after: &[SystemId]) -> Result<SystemId> {
        self.scheduler.register(system, after)
    }

    pub fn system_stats(&self, id: SystemId) -> Option<SystemStats> {
        self.scheduler.stats(id)
    }

    pub fn system_count(&self) -> usize {
        self.scheduler.system_count()
    }

    pub fn run_systems(&mut self, dt: f32) -> Result<()> {
        self.time.update();
        self.run_systems_at(dt)
    }

    #[cfg(feature = "parallel")]
    pub fn run_systems_parallel(&mut self, dt: f32, threads: usize) -> Result<()> {
        self.time.update();
        let mut scheduler = std::mem::take(&mut self.scheduler);
        let result = scheduler.update_parallel(self, dt, threads);
        self.scheduler = scheduler;
        self.maybe_auto_compact();
        result
    }

    fn run_systems_at(&mut self, dt: f32) -> Result<()> {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        let result = scheduler.update(self, dt);
        self.scheduler = scheduler;
        self.maybe_auto_compact();
        result
    }

    /// Accumulates `self.time`'s delta into the fixed-step counter and runs
    /// the scheduler once per whole step that accumulated, at the
    /// configured `fixed_timestep` Hz. Call once per variable-rate frame
    /// alongside (or instead of) `run_systems`.
    pub fn run_fixed_systems(&mut self) -> Result<()> {
        self.time.update();
        let steps = self.fixed_time.tick(self.time.delta());
        let dt = self.fixed_time.timestep_seconds();
        for _ in 0..steps {
            self.run_systems_at(dt)?;
        }
        Ok(())
    }

    pub fn time(&self) -> &Time {
        &self.time
    }

    pub fn fixed_time(&self) -> &FixedTime {
        &self.fixed_time
    }

    fn maybe_auto_compact(&mut self) {
        if let Some(every) = self.compact_every_ticks {
            if every > 0 && self.tick % every == 0 {
                self.compact();
            }
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
