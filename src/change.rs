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

//! Change tracking: records component add/modify/remove events into a
//! ring-bounded log and fans them out to frequency-gated reactive
//! subscribers.
//!
//! Subscriptions live in a registry keyed by an opaque [`SubscriptionToken`],
//! in place of shared/weak listener pointers: the registry is the sole owner
//! of each callback, and `unsubscribe` removes the entry outright rather than
//! relying on a handle's drop glue.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::component::ComponentId;
use crate::entity::EntityHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    fn slot(self) -> usize {
        match self {
            ChangeKind::Added => 0,
            ChangeKind::Modified => 1,
            ChangeKind::Removed => 2,
        }
    }

    pub fn code(self) -> u8 {
        self.slot() as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChangeKind::Added),
            1 => Some(ChangeKind::Modified),
            2 => Some(ChangeKind::Removed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeRecord {
    pub entity: EntityHandle,
    pub component: ComponentId,
    pub kind: ChangeKind,
    pub tick: u32,
}

/// Names a registry entry in [`ChangeTracker`]. Opaque and non-reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscription {
    component: ComponentId,
    kinds: [bool; 3],
    /// Minimum ticks between dispatches. `None` means every drain.
    frequency: Option<u32>,
    last_dispatch_tick: u32,
    pending: VecDeque<ChangeRecord>,
    callback: Box<dyn FnMut(&[ChangeRecord]) + Send + Sync>,
    /// Remaining dispatches before this subscription unregisters itself.
    /// `None` means unbounded.
    budget: Option<u32>,
}

/// Records structural/value change events and dispatches them to subscribers
/// at their declared cadence.
pub struct ChangeTracker {
    enabled: bool,
    log: VecDeque<ChangeRecord>,
    max_log_size: usize,
    max_log_age: Option<u32>,
    subscriptions: FxHashMap<SubscriptionToken, Subscription>,
    next_token: u64,
}

impl ChangeTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            log: VecDeque::new(),
            max_log_size: usize::MAX,
            max_log_age: None,
            subscriptions: FxHashMap::default(),
            next_token: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_max_log_size(&mut self, max: usize) {
        self.max_log_size = max;
        self.trim(self.log.back().map(|r| r.tick).unwrap_or(0));
    }

    pub fn set_max_log_age(&mut self, max_age_ticks: Option<u32>) {
        self.max_log_age = max_age_ticks;
    }

    pub fn record_added(&mut self, entity: EntityHandle, component: ComponentId, tick: u32) {
        self.record(ChangeRecord {
            entity,
            component,
            kind: ChangeKind::Added,
            tick,
        });
    }

    pub fn record_modified(&mut self, entity: EntityHandle, component: ComponentId, tick: u32) {
        self.record(ChangeRecord {
            entity,
            component,
            kind: ChangeKind::Modified,
            tick,
        });
    }

    pub fn record_removed(&mut self, entity: EntityHandle, component: ComponentId, tick: u32) {
        self.record(ChangeRecord {
            entity,
            component,
            kind: ChangeKind::Removed,
            tick,
        });
    }

    fn record(&mut self, record: ChangeRecord) {
        if !self.enabled {
            return;
        }
        for sub in self.subscriptions.values_mut() {
            if sub.component == record.component && sub.kinds[record.kind.slot()] {
                sub.pending.push_back(record);
            }
        }
        self.log.push_back(record);
        self.trim(record.tick);
    }

    fn trim(&mut self, current_tick: u32) {
        while self.log.len() > self.max_log_size {
            self.log.pop_front();
        }
        if let Some(max_age) = self.max_log_age {
            while let Some(front) = self.log.front() {
                if current_tick.saturating_sub(front.tick) > max_age {
                    self.log.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Registers a reactive subscriber for `component`, triggered on any of
    /// `kinds`. `frequency` is the minimum number of ticks between
    /// dispatches; `None` dispatches on every `drain_pending` call that has
    /// pending records. `budget` caps the number of dispatches this
    /// subscription will ever receive — the instant its budget reaches
    /// zero, `drain_pending` unregisters it. `None` means unbounded.
    pub fn subscribe(
        &mut self,
        component: ComponentId,
        kinds: &[ChangeKind],
        frequency: Option<u32>,
        budget: Option<u32>,
        callback: Box<dyn FnMut(&[ChangeRecord]) + Send + Sync>,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        let mut mask = [false; 3];
        for &k in kinds {
            mask[k.slot()] = true;
        }
        self.subscriptions.insert(
            token,
            Subscription {
                component,
                kinds: mask,
                frequency,
                last_dispatch_tick: 0,
                pending: VecDeque::new(),
                callback,
                budget,
            },
        );
        token
    }

    /// Removes the subscription immediately. Idempotent: unsubscribing an
    /// unknown token returns `false`.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        self.subscriptions.remove(&token).is_some()
    }

    /// Dispatches accumulated records to every subscriber whose declared
    /// frequency indicates it is due at `tick`, then unregisters any
    /// subscription whose invocation budget has just run out. Called by the
    /// scheduler after each system. Removal happens in a second pass since a
    /// subscription can't be dropped out of the map while `drain_pending`
    /// is still holding a `values_mut()` borrow into it.
    pub fn drain_pending(&mut self, tick: u32) {
        let mut exhausted = Vec::new();
        for (&token, sub) in self.subscriptions.iter_mut() {
            let due = match sub.frequency {
                Some(interval) => tick.saturating_sub(sub.last_dispatch_tick) >= interval,
                None => true,
            };
            if due && !sub.pending.is_empty() {
                let records: Vec<ChangeRecord> = sub.pending.drain(..).collect();
                (sub.callback)(&records);
                sub.last_dispatch_tick = tick;
                if let Some(budget) = sub.budget.as_mut() {
                    *budget = budget.saturating_sub(1);
                    if *budget == 0 {
                        exhausted.push(token);
                    }
                }
            }
        }
        for token in exhausted {
            self.subscriptions.remove(&token);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
