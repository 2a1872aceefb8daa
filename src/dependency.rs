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

//! Component-level update-ordering graph.
//!
//! Distinct from system scheduling in `schedule.rs`: this declares that a
//! component of type `A` should be considered updated only after a
//! component of type `B`, for systems that want to honor such an ordering
//! while iterating. Edges are pairs of dense `ComponentId`s stored in an
//! adjacency map — never pointers — so the graph can be cycle-checked with
//! an explicit search rather than by walking live references.

use rustc_hash::FxHashMap;

use crate::component::ComponentId;
use crate::error::{EcsError, Result};

#[derive(Default)]
pub struct DependencyGraph {
    /// edges[dependent] = the set of ids `dependent` must be updated after.
    edges: FxHashMap<ComponentId, Vec<ComponentId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `dependent` updates after `dependency`. Rejected with
    /// `DependencyCycle` if the edge would make the graph cyclic; the graph
    /// is left unchanged in that case.
    pub fn add_edge(&mut self, dependent: ComponentId, dependency: ComponentId) -> Result<()> {
        if dependent == dependency {
            return Err(EcsError::DependencyCycle);
        }
        self.edges.entry(dependent).or_default().push(dependency);
        if self.topological_order().is_err() {
            let list = self.edges.get_mut(&dependent).unwrap();
            list.pop();
            if list.is_empty() {
                self.edges.remove(&dependent);
            }
            return Err(EcsError::DependencyCycle);
        }
        Ok(())
    }

    fn has_cycle_from(
        &self,
        start: ComponentId,
        visiting: &mut rustc_hash::FxHashSet<ComponentId>,
        visited: &mut rustc_hash::FxHashSet<ComponentId>,
    ) -> bool {
        if visited.contains(&start) {
            return false;
        }
        if !visiting.insert(start) {
            return true;
        }
        if let Some(deps) = self.edges.get(&start) {
            for &dep in deps {
                if self.has_cycle_from(dep, visiting, visited) {
                    return true;
                }
            }
        }
        visiting.remove(&start);
        visited.insert(start);
        false
    }

    /// Returns component ids in a legal update order (dependencies before
    /// dependents). Errors with `DependencyCycle` if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<ComponentId>> {
        let mut all: Vec<ComponentId> = self.edges.keys().copied().collect();
        for deps in self.edges.values() {
            for &d in deps {
                if !all.contains(&d) {
                    all.push(d);
                }
            }
        }

        let mut visited = rustc_hash::FxHashSet::default();
        let mut visiting = rustc_hash::FxHashSet::default();
        for &id in &all {
            if self.has_cycle_from(id, &mut visiting, &mut visited) {
                return Err(EcsError::DependencyCycle);
            }
        }

        // Kahn's algorithm for a deterministic order once acyclicity is
        // known.
        let mut in_degree: FxHashMap<ComponentId, usize> =
            all.iter().map(|&id| (id, 0)).collect();
        for deps in self.edges.values() {
            for _ in deps {
                // dependency -> dependent edge count is tracked below by
                // inverting the map; here we just ensure every dependent has
                // an in-degree entry for each of its dependencies.
            }
        }
        // dependent depends on N dependencies => in_degree(dependent) = N
        for (&dependent, deps) in &self.edges {
            in_degree.insert(dependent, deps.len());
        }

        let mut queue: std::collections::VecDeque<ComponentId> = all
            .iter()
            .copied()
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(all.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for (&dependent, deps) in &self.edges {
                if deps.contains(&id) {
                    let degree = in_degree.get_mut(&dependent).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        Ok(order)
    }

    /// The sub-order of components reachable to or from `cid`.
    pub fn order_touching(&self, cid: ComponentId) -> Result<Vec<ComponentId>> {
        let mut reachable = rustc_hash::FxHashSet::default();
        reachable.insert(cid);
        let mut frontier = vec![cid];
        while let Some(id) = frontier.pop() {
            if let Some(deps) = self.edges.get(&id) {
                for &d in deps {
                    if reachable.insert(d) {
                        frontier.push(d);
                    }
                }
            }
            for (&dependent, deps) in &self.edges {
                if deps.contains(&id) && reachable.insert(dependent) {
                    frontier.push(dependent);
                }
            }
        }
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|id| reachable.contains(id))
            .collect())
    }
}
