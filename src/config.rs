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

//! World configuration surface: the recognized settings a host passes to
//! `World::with_config`, collected in one place instead of scattered
//! constructor parameters.

/// Settings consulted by [`crate::World::with_config`].
#[derive(Debug, Clone, Copy)]
pub struct WorldConfig {
    /// Soft upper bound on total component-pool bytes. `0` means unbounded.
    pub memory_budget_bytes: usize,
    /// When `false`, the caller asserts single-threaded access; the world
    /// skips registering for `update_parallel` scheduling (callers should
    /// not invoke it under this setting).
    pub thread_safe: bool,
    /// Whether structural mutations append to the change-record log.
    pub change_tracking: bool,
    /// Whether serialization passes emit `tracing` spans (requires the
    /// `profiling` feature to have any effect).
    pub serialization_profiling: bool,
    /// Oldest age, in ticks, a change record may reach before being trimmed.
    /// `None` disables age-based trimming.
    pub max_change_log_age: Option<u32>,
    /// Largest number of records the change log retains; oldest are trimmed
    /// first.
    pub max_change_log_size: usize,
    /// Frequency, in Hz, `World::run_fixed_systems` accumulates toward. Has
    /// no effect unless the host calls `run_fixed_systems`.
    pub fixed_timestep: u32,
    /// Run `World::compact` automatically every `n` ticks inside
    /// `run_systems`/`run_systems_parallel`. `None` leaves compaction
    /// entirely to an explicit `World::request_compaction` call.
    pub compact_every_ticks: Option<u32>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 0,
            thread_safe: true,
            change_tracking: true,
            serialization_profiling: false,
            max_change_log_age: None,
            max_change_log_size: usize::MAX,
            fixed_timestep: 60,
            compact_every_ticks: None,
        }
    }
}
