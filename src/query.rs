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

//! Query engine: resolves a compile-time access pattern against the
//! current archetype set.
//!
//! Unlike a `TypeId`-keyed lookup, every fetch here goes through the
//! world's [`ComponentRegistry`] once to turn `T` into a dense
//! [`ComponentId`], then matches/reads using that id. Per-query-type match
//! results are cached in `World` and only rescanned when new archetypes
//! have appeared since.

use std::any::TypeId;
use std::marker::PhantomData;

use smallvec::{smallvec, SmallVec};

use crate::archetype::Archetype;
use crate::component::{Component, ComponentRegistry};
use crate::entity::EntityHandle;
use crate::World;

const MAX_QUERY_COMPONENTS: usize = 8;
pub(crate) type IdList = SmallVec<[crate::component::ComponentId; MAX_QUERY_COMPONENTS]>;

/// One persistent query's match cache: the archetype ids that satisfied it
/// last time, plus how many archetypes existed when that was computed.
#[derive(Default)]
pub(crate) struct QueryCache {
    pub matches: Vec<usize>,
    pub seen_archetypes: usize,
}

/// Shared read/write/filter contract implemented for `&T`, `&mut T`,
/// `With<T>`, `Without<T>`, `Entity`, `Changed<T>`, `Added<T>`, and tuples of
/// up to four of the above.
pub unsafe trait QueryFetch<'w> {
    type Item;
    type State;

    fn component_ids(registry: &ComponentRegistry) -> IdList;

    fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
        Self::component_ids(registry)
            .iter()
            .all(|id| archetype.has_component(*id))
    }

    fn prepare(archetype: &'w Archetype, registry: &ComponentRegistry, since_tick: u32) -> Option<Self::State>;

    /// # Safety
    /// `row` must be in bounds for the archetype used to build `state`.
    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item>;
}

pub unsafe trait QueryFetchMut<'w> {
    type Item;
    type State;

    fn component_ids(registry: &ComponentRegistry) -> IdList;

    fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
        Self::component_ids(registry)
            .iter()
            .all(|id| archetype.has_component(*id))
    }

    fn prepare(
        archetype: &'w mut Archetype,
        registry: &ComponentRegistry,
        since_tick: u32,
        current_tick: u32,
    ) -> Option<Self::State>;

    /// # Safety
    /// `row` must be in bounds for the archetype used to build `state`.
    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item>;
}

unsafe impl<'w, T: Component> QueryFetch<'w> for &'w T {
    type Item = &'w T;
    type State = *const crate::archetype::ComponentColumn;

    fn component_ids(registry: &ComponentRegistry) -> IdList {
        match registry.id_of::<T>() {
            Some(id) => smallvec![id],
            None => smallvec![],
        }
    }

    fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
        registry
            .id_of::<T>()
            .is_some_and(|id| archetype.has_component(id))
    }

    fn prepare(archetype: &'w Archetype, registry: &ComponentRegistry, _since_tick: u32) -> Option<Self::State> {
        let id = registry.id_of::<T>()?;
        Some(archetype.column(id)? as *const _)
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        let column = unsafe { &**state };
        if row >= column.len() {
            return None;
        }
        Some(unsafe { &*(column.get_ptr(row) as *const T) })
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for &'w T {
    type Item = &'w T;
    type State = *const crate::archetype::ComponentColumn;

    fn component_ids(registry: &ComponentRegistry) -> IdList {
        <&T as QueryFetch>::component_ids(registry)
    }

    fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
        <&T as QueryFetch>::matches(archetype, registry)
    }

    fn prepare(
        archetype: &'w mut Archetype,
        registry: &ComponentRegistry,
        _since_tick: u32,
        _current_tick: u32,
    ) -> Option<Self::State> {
        let id = registry.id_of::<T>()?;
        Some(archetype.column(id)? as *const _)
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        let column = unsafe { &**state };
        if row >= column.len() {
            return None;
        }
        Some(unsafe { &*(column.get_ptr(row) as *const T) })
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for &'w mut T {
    type Item = &'w mut T;
    type State = (*mut crate::archetype::ComponentColumn, u32);

    fn component_ids(registry: &ComponentRegistry) -> IdList {
        match registry.id_of::<T>() {
            Some(id) => smallvec![id],
            None => smallvec![],
        }
    }

    fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
        registry
            .id_of::<T>()
            .is_some_and(|id| archetype.has_component(id))
    }

    fn prepare(
        archetype: &'w mut Archetype,
        registry: &ComponentRegistry,
        _since_tick: u32,
        current_tick: u32,
    ) -> Option<Self::State> {
        let id = registry.id_of::<T>()?;
        let column = archetype.column_mut(id)? as *mut _;
        Some((column, current_tick))
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        let (column_ptr, tick) = *state;
        let column = unsafe { &mut *column_ptr };
        if row >= column.len() {
            return None;
        }
        Some(unsafe { &mut *(column.get_ptr_mut(row, tick) as *mut T) })
    }
}

/// Requires `T` present without binding data.
pub struct With<T>(PhantomData<T>);
/// Requires `T` absent.
pub struct Without<T>(PhantomData<T>);
/// Binds the iterated entity's handle.
pub struct Entity;
/// Matches rows whose `T` column was written since the query's last run.
pub struct Changed<T>(PhantomData<T>);
/// Matches rows whose `T` column was added since the query's last run.
pub struct Added<T>(PhantomData<T>);

macro_rules! filter_only_impls {
    ($name:ident, $match_fn:ident) => {
        unsafe impl<'w, T: Component> QueryFetch<'w> for $name<T> {
            type Item = ();
            type State = ();

            fn component_ids(_registry: &ComponentRegistry) -> IdList {
                smallvec![]
            }

            fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
                $match_fn::<T>(archetype, registry)
            }

            fn prepare(_archetype: &'w Archetype, _registry: &ComponentRegistry, _since_tick: u32) -> Option<Self::State> {
                Some(())
            }

            unsafe fn fetch(_state: &Self::State, _row: usize) -> Option<Self::Item> {
                Some(())
            }
        }

        unsafe impl<'w, T: Component> QueryFetchMut<'w> for $name<T> {
            type Item = ();
            type State = ();

            fn component_ids(_registry: &ComponentRegistry) -> IdList {
                smallvec![]
            }

            fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
                $match_fn::<T>(archetype, registry)
            }

            fn prepare(
                _archetype: &'w mut Archetype,
                _registry: &ComponentRegistry,
                _since_tick: u32,
                _current_tick: u32,
            ) -> Option<Self::State> {
                Some(())
            }

            unsafe fn fetch(_state: &mut Self::State, _row: usize) -> Option<Self::Item> {
                Some(())
            }
        }
    };
}

fn with_matches<T: Component>(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
    registry
        .id_of::<T>()
        .is_some_and(|id| archetype.has_component(id))
}

fn without_matches<T: Component>(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
    match registry.id_of::<T>() {
        Some(id) => !archetype.has_component(id),
        None => true,
    }
}

filter_only_impls!(With, with_matches);
filter_only_impls!(Without, without_matches);

unsafe impl<'w> QueryFetch<'w> for Entity {
    type Item = EntityHandle;
    type State = *const [EntityHandle];

    fn component_ids(_registry: &ComponentRegistry) -> IdList {
        smallvec![]
    }

    fn matches(_archetype: &Archetype, _registry: &ComponentRegistry) -> bool {
        true
    }

    fn prepare(archetype: &'w Archetype, _registry: &ComponentRegistry, _since_tick: u32) -> Option<Self::State> {
        Some(archetype.entities() as *const _)
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        unsafe { &**state }.get(row).copied()
    }
}

unsafe impl<'w> QueryFetchMut<'w> for Entity {
    type Item = EntityHandle;
    type State = *const [EntityHandle];

    fn component_ids(_registry: &ComponentRegistry) -> IdList {
        smallvec![]
    }

    fn matches(_archetype: &Archetype, _registry: &ComponentRegistry) -> bool {
        true
    }

    fn prepare(
        archetype: &'w mut Archetype,
        _registry: &ComponentRegistry,
        _since_tick: u32,
        _current_tick: u32,
    ) -> Option<Self::State> {
        Some(archetype.entities() as *const _)
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        unsafe { &**state }.get(row).copied()
    }
}

macro_rules! tick_filter_impl {
    ($name:ident, $ticks_fn:ident) => {
        unsafe impl<'w, T: Component> QueryFetch<'w> for $name<T> {
            type Item = ();
            type State = (*const [u32], u32);

            fn component_ids(_registry: &ComponentRegistry) -> IdList {
                smallvec![]
            }

            fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
                with_matches::<T>(archetype, registry)
            }

            fn prepare(archetype: &'w Archetype, registry: &ComponentRegistry, since_tick: u32) -> Option<Self::State> {
                let id = registry.id_of::<T>()?;
                let column = archetype.column(id)?;
                Some(($ticks_fn(column), since_tick))
            }

            unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
                let (ticks, since) = *state;
                let ticks = unsafe { &*ticks };
                if row < ticks.len() && ticks[row] > since {
                    Some(())
                } else {
                    None
                }
            }
        }

        unsafe impl<'w, T: Component> QueryFetchMut<'w> for $name<T> {
            type Item = ();
            type State = (*const [u32], u32);

            fn component_ids(_registry: &ComponentRegistry) -> IdList {
                smallvec![]
            }

            fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
                with_matches::<T>(archetype, registry)
            }

            fn prepare(
                archetype: &'w mut Archetype,
                registry: &ComponentRegistry,
                since_tick: u32,
                _current_tick: u32,
            ) -> Option<Self::State> {
                let id = registry.id_of::<T>()?;
                let column = archetype.column(id)?;
                Some(($ticks_fn(column), since_tick))
            }

            unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
                let (ticks, since) = *state;
                let ticks = unsafe { &*ticks };
                if row < ticks.len() && ticks[row] > since {
                    Some(())
                } else {
                    None
                }
            }
        }
    };
}

fn changed_ticks_ptr(column: &crate::archetype::ComponentColumn) -> *const [u32] {
    column.changed_ticks_slice() as *const _
}

fn added_ticks_ptr(column: &crate::archetype::ComponentColumn) -> *const [u32] {
    column.added_ticks_slice() as *const _
}

tick_filter_impl!(Changed, changed_ticks_ptr);
tick_filter_impl!(Added, added_ticks_ptr);

macro_rules! impl_tuple_query {
    ($($T:ident),+) => {
        unsafe impl<'w, $($T: QueryFetch<'w>),+> QueryFetch<'w> for ($($T,)+) {
            type Item = ($($T::Item,)+);
            type State = ($($T::State,)+);

            fn component_ids(registry: &ComponentRegistry) -> IdList {
                let mut ids = IdList::new();
                $(ids.extend($T::component_ids(registry));)+
                ids
            }

            fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
                $($T::matches(archetype, registry))&&+
            }

            #[allow(non_snake_case)]
            fn prepare(archetype: &'w Archetype, registry: &ComponentRegistry, since_tick: u32) -> Option<Self::State> {
                $(let $T = $T::prepare(archetype, registry, since_tick)?;)+
                Some(($($T,)+))
            }

            #[allow(non_snake_case)]
            unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
                let ($($T,)+) = state;
                Some(($(unsafe { $T::fetch($T, row)? },)+))
            }
        }

        unsafe impl<'w, $($T: QueryFetchMut<'w>),+> QueryFetchMut<'w> for ($($T,)+) {
            type Item = ($($T::Item,)+);
            type State = ($($T::State,)+);

            fn component_ids(registry: &ComponentRegistry) -> IdList {
                let mut ids = IdList::new();
                $(ids.extend($T::component_ids(registry));)+
                ids
            }

            fn matches(archetype: &Archetype, registry: &ComponentRegistry) -> bool {
                $($T::matches(archetype, registry))&&+
            }

            #[allow(non_snake_case)]
            fn prepare(
                archetype: &'w mut Archetype,
                registry: &ComponentRegistry,
                since_tick: u32,
                current_tick: u32,
            ) -> Option<Self::State> {
                let ptr = archetype as *mut Archetype;
                $(let $T = $T::prepare(unsafe { &mut *ptr }, registry, since_tick, current_tick)?;)+
                Some(($($T,)+))
            }

            #[allow(non_snake_case)]
            unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
                let ($($T,)+) = state;
                Some(($(unsafe { $T::fetch($T, row)? },)+))
            }
        }
    };
}

impl_tuple_query!(A);
impl_tuple_query!(A, B);
impl_tuple_query!(A, B, C);
impl_tuple_query!(A, B, C, D);

/// Read-only query over the world.
pub struct Query<'w, Q> {
    world: &'w World,
    matched: Vec<usize>,
    _phantom: PhantomData<Q>,
}

impl<'w, Q: QueryFetch<'w> + 'static> Query<'w, Q> {
    pub fn new(world: &'w World, matched: Vec<usize>) -> Self {
        Self {
            world,
            matched,
            _phantom: PhantomData,
        }
    }

    pub fn iter(&self) -> QueryIter<'w, Q> {
        QueryIter {
            world: self.world,
            matches: self.matched.clone(),
            archetype_index: 0,
            entity_index: 0,
            since_tick: 0,
            state: None,
        }
    }

    pub fn count(&self) -> usize {
        self.matched
            .iter()
            .filter_map(|&id| self.world.archetype(id))
            .map(|a| a.len())
            .sum()
    }
}

pub struct QueryIter<'w, Q: QueryFetch<'w>> {
    world: &'w World,
    matches: Vec<usize>,
    archetype_index: usize,
    entity_index: usize,
    since_tick: u32,
    state: Option<Q::State>,
}

impl<'w, Q: QueryFetch<'w>> Iterator for QueryIter<'w, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state.is_none() {
                let arch_id = *self.matches.get(self.archetype_index)?;
                let archetype = self.world.archetype(arch_id)?;
                self.entity_index = 0;
                self.state = Q::prepare(archetype, self.world.component_registry(), self.since_tick);
                if self.state.is_none() {
                    self.archetype_index += 1;
                    continue;
                }
            }
            let arch_id = self.matches[self.archetype_index];
            let archetype = self.world.archetype(arch_id)?;
            if self.entity_index >= archetype.len() {
                self.state = None;
                self.archetype_index += 1;
                continue;
            }
            let row = self.entity_index;
            self.entity_index += 1;
            if let Some(item) = unsafe { Q::fetch(self.state.as_ref().unwrap(), row) } {
                return Some(item);
            }
        }
    }
}

/// Mutating query over the world.
pub struct QueryMut<'w, Q> {
    world: &'w mut World,
    matched: Vec<usize>,
    since_tick: u32,
    _phantom: PhantomData<Q>,
}

impl<'w, Q: QueryFetchMut<'w> + 'static> QueryMut<'w, Q> {
    pub fn new(world: &'w mut World, matched: Vec<usize>) -> Self {
        Self {
            world,
            matched,
            since_tick: 0,
            _phantom: PhantomData,
        }
    }

    pub fn since(mut self, tick: u32) -> Self {
        self.since_tick = tick;
        self
    }

    pub fn iter(&'w mut self) -> QueryIterMut<'w, Q> {
        let current_tick = self.world.tick();
        QueryIterMut {
            world: self.world,
            matches: &self.matched,
            archetype_index: 0,
            entity_index: 0,
            since_tick: self.since_tick,
            current_tick,
            state: None,
        }
    }

    /// Iterates matched archetypes in parallel, one archetype per task; each
    /// archetype's rows run sequentially within that task. Disjoint
    /// archetypes alone rule out column aliasing between tasks, but not a
    /// concurrent call from another query or a scheduled system over the
    /// same component type — so this also takes a write guard on every
    /// component id `Q` touches, for the whole call, via the pool's
    /// `RwLock` (see [`crate::pool::ComponentPool`]).
    #[cfg(feature = "parallel")]
    pub fn par_for_each<F>(&mut self, func: F)
    where
        F: Fn(Q::Item) + Send + Sync,
        Q::Item: Send,
    {
        use rayon::prelude::*;

        let since_tick = self.since_tick;
        let current_tick = self.world.tick();
        let registry_ptr = self.world.component_registry() as *const ComponentRegistry as usize;
        let world_ptr = self.world as *mut World as usize;

        let world_for_locks: &World = unsafe { &*(world_ptr as *const World) };
        let ids = Q::component_ids(world_for_locks.component_registry());
        let _guards: Vec<_> = ids
            .iter()
            .filter_map(|&id| world_for_locks.pool(id))
            .map(|pool| pool.write())
            .collect();

        self.matched.par_iter().for_each(|&arch_id| {
            let world: &mut World = unsafe { &mut *(world_ptr as *mut World) };
            let registry: &ComponentRegistry = unsafe { &*(registry_ptr as *const ComponentRegistry) };
            if let Some(archetype) = world.archetype_mut(arch_id) {
                let len = archetype.len();
                if let Some(mut state) = Q::prepare(archetype, registry, since_tick, current_tick) {
                    for row in 0..len {
                        if let Some(item) = unsafe { Q::fetch(&mut state, row) } {
                            func(item);
                        }
                    }
                }
            }
        });
    }
}

/// SIMD-batched mutation over a single-component query's matched rows.
impl<'w, T> QueryMut<'w, &'w mut T>
where
    T: Component + Copy,
{
    /// Applies `f` to fixed-width, contiguous batches of `T` within each
    /// matched archetype's column, choosing the batch width
    /// [`crate::simd::chunk_size`] reports for the platform. Trailing rows
    /// that don't fill a full batch are dropped from the SIMD pass; callers
    /// needing every row should also run a scalar `iter()` pass or keep
    /// batch-sized archetypes.
    pub fn for_each_simd<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut [T]),
    {
        let Some(id) = self.world.component_registry().id_of::<T>() else {
            return;
        };
        let current_tick = self.world.tick();
        for &arch_id in &self.matched {
            let Some(archetype) = self.world.archetype_mut(arch_id) else {
                continue;
            };
            let Some(column) = archetype.column_mut(id) else {
                continue;
            };
            if column.is_empty() {
                continue;
            }
            // SAFETY: `id` was resolved from the registry for `T`, so the
            // column's backing storage was allocated with `T`'s layout.
            let slice: &mut [T] = unsafe { column.as_slice_mut(current_tick) };
            for chunk in crate::simd::chunks(slice) {
                f(chunk);
            }
        }
    }
}

pub struct QueryIterMut<'w, Q: QueryFetchMut<'w>> {
    world: &'w mut World,
    matches: &'w [usize],
    archetype_index: usize,
    entity_index: usize,
    since_tick: u32,
    current_tick: u32,
    state: Option<Q::State>,
}

impl<'w, Q: QueryFetchMut<'w>> Iterator for QueryIterMut<'w, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state.is_none() {
                let arch_id = *self.matches.get(self.archetype_index)?;
                // SAFETY: archetypes named in `matches` are distinct, so
                // reborrowing `world` mutably here per archetype never
                // aliases a live borrow from a previous iteration (that
                // state has already been dropped by setting it to `None`).
                let world: &mut World = unsafe { &mut *(self.world as *mut World) };
                let registry: &ComponentRegistry =
                    unsafe { &*(world.component_registry() as *const ComponentRegistry) };
                let archetype = world.archetype_mut(arch_id)?;
                self.entity_index = 0;
                self.state = Q::prepare(
                    unsafe { &mut *(archetype as *mut Archetype) },
                    registry,
                    self.since_tick,
                    self.current_tick,
                );
                if self.state.is_none() {
                    self.archetype_index += 1;
                    continue;
                }
            }
            let arch_id = self.matches[self.archetype_index];
            let len = self
                .world
                .archetype(arch_id)
                .map(|a| a.len())
                .unwrap_or(0);
            if self.entity_index >= len {
                self.state = None;
                self.archetype_index += 1;
                continue;
            }
            let row = self.entity_index;
            self.entity_index += 1;
            if let Some(item) = unsafe { Q::fetch(self.state.as_mut().unwrap(), row) } {
                return Some(item);
            }
        }
    }
}

pub(crate) fn resolve_matches<'w, Q: QueryFetch<'w> + 'static>(world: &mut World) -> Vec<usize> {
    world.query_cache_lookup(TypeId::of::<Q>(), |archetype, registry| {
        Q::matches(archetype, registry)
    })
}

pub(crate) fn resolve_matches_mut<'w, Q: QueryFetchMut<'w> + 'static>(world: &mut World) -> Vec<usize> {
    world.query_cache_lookup(TypeId::of::<Q>(), |archetype, registry| {
        Q::matches(archetype, registry)
    })
}
