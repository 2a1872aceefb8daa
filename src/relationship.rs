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

//! Parent/child edges between entities, kept as a forest (no entity is its
//! own ancestor). Edges are stored as ids in two maps, never as live
//! references, so `set_parent` can check ancestry with a plain walk instead
//! of tracing pointers.

use rustc_hash::FxHashMap;

use crate::entity::EntityHandle;
use crate::error::{EcsError, Result};

#[derive(Default)]
pub struct RelationshipGraph {
    parent_of: FxHashMap<EntityHandle, EntityHandle>,
    children_of: FxHashMap<EntityHandle, Vec<EntityHandle>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-parents `child` under `parent`. Rejected with `RelationshipCycle`
    /// if `parent` is `child` or a descendant of `child`.
    pub fn set_parent(&mut self, child: EntityHandle, parent: EntityHandle) -> Result<()> {
        if child == parent || self.is_descendant(parent, child) {
            return Err(EcsError::RelationshipCycle);
        }
        self.remove_parent(child);
        self.parent_of.insert(child, parent);
        self.children_of.entry(parent).or_default().push(child);
        Ok(())
    }

    /// True if `candidate` is `ancestor`'s descendant (or `ancestor` itself).
    fn is_descendant(&self, candidate: EntityHandle, ancestor: EntityHandle) -> bool {
        let mut current = candidate;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parent_of.get(&current) {
                Some(&next) => current = next,
                None => return false,
            }
        }
    }

    pub fn remove_parent(&mut self, child: EntityHandle) -> Option<EntityHandle> {
        let parent = self.parent_of.remove(&child)?;
        if let Some(children) = self.children_of.get_mut(&parent) {
            children.retain(|&c| c != child);
        }
        Some(parent)
    }

    pub fn parent_of(&self, child: EntityHandle) -> Option<EntityHandle> {
        self.parent_of.get(&child).copied()
    }

    pub fn children_of(&self, parent: EntityHandle) -> &[EntityHandle] {
        self.children_of
            .get(&parent)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drops every edge touching `entity`, as either parent or child. Called
    /// when `entity` is destroyed so the forest never references a dead
    /// handle.
    pub fn remove_entity(&mut self, entity: EntityHandle) {
        self.remove_parent(entity);
        if let Some(children) = self.children_of.remove(&entity) {
            for child in children {
                self.parent_of.remove(&child);
            }
        }
    }
}
