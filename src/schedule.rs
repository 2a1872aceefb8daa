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

//! Per-frame system scheduling.
//!
//! Systems are kept in a dependency graph of explicit `after` edges. The
//! graph is re-topologically-sorted whenever a system is registered and the
//! sort is cached; `update_parallel` groups the sorted order into levels
//! where no system has a transitive `after` edge onto another system in the
//! same level.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::component::ComponentId;
use crate::error::{EcsError, Result};
use crate::system::{BoxedSystem, SystemId};
use crate::World;

/// Running timing stats for one registered system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStats {
    pub invocations: u64,
    pub last: Duration,
    pub total: Duration,
}

impl SystemStats {
    pub fn average(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total / self.invocations as u32
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.invocations += 1;
        self.last = elapsed;
        self.total += elapsed;
    }
}

struct SystemEntry {
    id: SystemId,
    name: &'static str,
    system: BoxedSystem,
    after: Vec<SystemId>,
    stats: SystemStats,
}

/// Sequences registered systems each tick, tracking `after` ordering
/// constraints and per-system timing.
#[derive(Default)]
pub struct SystemScheduler {
    entries: Vec<SystemEntry>,
    name_to_id: FxHashMap<&'static str, SystemId>,
    cached_order: Option<Vec<SystemId>>,
    cached_levels: Option<Vec<Vec<SystemId>>>,
}

impl SystemScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `system`, ordered after every id in `after`. Fails with
    /// `SystemNotFound` if an `after` id was never registered, or
    /// `DependencyCycle` if the new edges would create one.
    pub fn register(&mut self, system: BoxedSystem, after: &[SystemId]) -> Result<SystemId> {
        for &dep in after {
            if !self.entries.iter().any(|e| e.id == dep) {
                return Err(EcsError::SystemNotFound(dep));
            }
        }
        let id = SystemId(self.entries.len() as u32);
        let name = system.name();
        if self.name_to_id.contains_key(name) {
            return Err(EcsError::DuplicateSystem(id));
        }
        self.entries.push(SystemEntry {
            id,
            name,
            system,
            after: after.to_vec(),
            stats: SystemStats::default(),
        });
        self.name_to_id.insert(name, id);
        self.invalidate();
        if self.topological_order().is_err() {
            // Roll back: the edge just added introduced a cycle.
            let bad = self.entries.pop().unwrap();
            self.name_to_id.remove(bad.name);
            self.invalidate();
            return Err(EcsError::DependencyCycle);
        }
        Ok(id)
    }

    fn invalidate(&mut self) {
        self.cached_order = None;
        self.cached_levels = None;
    }

    fn topological_order(&mut self) -> Result<&[SystemId]> {
        if self.cached_order.is_none() {
            self.cached_order = Some(self.compute_topological_order()?);
        }
        Ok(self.cached_order.as_deref().unwrap())
    }

    fn compute_topological_order(&self) -> Result<Vec<SystemId>> {
        let count = self.entries.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (idx, entry) in self.entries.iter().enumerate() {
            in_degree[idx] = entry.after.len();
            for &dep in &entry.after {
                dependents[dep.0 as usize].push(idx);
            }
        }

        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(idx) = queue.pop_front() {
            order.push(self.entries[idx].id);
            for &next in &dependents[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != count {
            return Err(EcsError::DependencyCycle);
        }
        Ok(order)
    }

    /// Groups the topological order into levels: every system in a level has
    /// no transitive `after` edge onto another system in the same level, so
    /// the level's systems may run concurrently.
    fn levels(&mut self) -> Result<&[Vec<SystemId>]> {
        if self.cached_levels.is_none() {
            let order = self.topological_order()?.to_vec();
            let mut level_of: FxHashMap<SystemId, usize> = FxHashMap::default();
            let mut levels: Vec<Vec<SystemId>> = Vec::new();
            for id in order {
                let entry = self.entries.iter().find(|e| e.id == id).unwrap();
                let level = entry
                    .after
                    .iter()
                    .map(|dep| level_of.get(dep).copied().unwrap_or(0) + 1)
                    .max()
                    .unwrap_or(0);
                if levels.len() <= level {
                    levels.push(Vec::new());
                }
                levels[level].push(id);
                level_of.insert(id, level);
            }
            self.cached_levels = Some(levels);
        }
        Ok(self.cached_levels.as_deref().unwrap())
    }

    pub fn stats(&self, id: SystemId) -> Option<SystemStats> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.stats)
    }

    pub fn system_count(&self) -> usize {
        self.entries.len()
    }

    /// Runs every registered system once, in topological order. A system
    /// that returns an error is logged and skipped; the rest of the tick
    /// still runs.
    pub fn update(&mut self, world: &mut World, _dt: f32) -> Result<()> {
        let order = self.topological_order()?.to_vec();
        for id in order {
            let entry = self
                .entries
                .iter_mut()
                .find(|e| e.id == id)
                .expect("id came from this scheduler's own topological order");
            let start = Instant::now();
            if let Err(err) = entry.system.run(world) {
                #[cfg(feature = "profiling")]
                tracing::warn!(system = entry.name, error = %err, "system tick failed");
                #[cfg(not(feature = "profiling"))]
                let _ = err;
            }
            entry.stats.record(start.elapsed());
            world.drain_changes();
        }
        Ok(())
    }

    /// Runs systems level-by-level, executing every system within a level
    /// concurrently on up to `threads` worker threads. Levels themselves run
    /// in sequence.
    ///
    /// Soundness: within one level no system has a transitive `after` edge
    /// onto another, and `register` only accepts graphs that stay acyclic.
    /// Disjointness of each system's declared read/write set is not needed
    /// for correctness — each system takes a read or write guard (per its
    /// declared [`crate::system::SystemAccess`]) on every component pool it
    /// touches, so two systems in the same level that both want the same
    /// component simply block on each other rather than racing. Guards for
    /// one system are acquired in ascending `ComponentId` order (write
    /// before read is irrelevant once sorted by id; what matters is that
    /// every system acquires in the same global order) so two systems with
    /// crossed read/write dependencies on a pair of components can't
    /// deadlock on each other.
    #[cfg(feature = "parallel")]
    pub fn update_parallel(&mut self, world: &mut World, _dt: f32, threads: usize) -> Result<()> {
        use rayon::prelude::*;

        let levels = self.levels()?.to_vec();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map_err(|e| EcsError::AllocationFailure(e.to_string()))?;

        let world_ptr = world as *mut World as usize;
        let entries_ptr = self.entries.as_mut_ptr() as usize;

        for level in levels {
            pool.install(|| {
                level.par_iter().for_each(|&id| {
                    let idx = id.0 as usize;
                    // SAFETY: every id in `level` indexes a distinct entry
                    // (levels are built from the per-system topological
                    // position, one id per entry), so no two closures here
                    // touch the same `SystemEntry`. Aliasing `world` across
                    // closures is sound because each one only reaches
                    // component data it has taken a lock for, below.
                    let entry = unsafe { &mut *(entries_ptr as *mut SystemEntry).add(idx) };
                    let world_ref: &World = unsafe { &*(world_ptr as *const World) };
                    let world: &mut World = unsafe { &mut *(world_ptr as *mut World) };

                    let access = entry.system.access();
                    let mut lock_indices: Vec<usize> =
                        access.reads.ones().chain(access.writes.ones()).collect();
                    lock_indices.sort_unstable();
                    lock_indices.dedup();
                    let _guards: Vec<_> = lock_indices
                        .into_iter()
                        .filter_map(|i| world_ref.pool(ComponentId(i as u32)).map(|p| (i, p)))
                        .map(|(i, p)| {
                            if access.writes.contains(i) {
                                Guard::Write(p.write())
                            } else {
                                Guard::Read(p.read())
                            }
                        })
                        .collect();

                    let start = Instant::now();
                    if let Err(_err) = entry.system.run(world) {
                        #[cfg(feature = "profiling")]
                        tracing::warn!(system = entry.name, "system tick failed");
                    }
                    entry.stats.record(start.elapsed());
                });
            });
        }
        Ok(())
    }
}

#[cfg(feature = "parallel")]
enum Guard<'a> {
    Read(parking_lot::RwLockReadGuard<'a, ()>),
    Write(parking_lot::RwLockWriteGuard<'a, ()>),
}
