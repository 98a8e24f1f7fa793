/*
 * Copyright 2025 table-compaction
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Compaction planning and commit for snapshot-based tables.
//!
//! [`Compaction`] ties the pieces together: the planner picks fragment and
//! delete-heavy data files of the head snapshot and bins them into
//! [`CompactionTask`](file_selection::CompactionTask)s, executors rewrite
//! each task and report back over a channel, and the commit coordinator
//! swaps the inputs of every prepared task for its outputs in one atomic
//! snapshot.

pub mod common;
pub mod compaction;
pub mod config;
pub mod error;
pub mod executor;
pub mod file_selection;
pub mod runtime;
pub mod spec;
pub mod table;
pub mod test_utils;

pub use compaction::{CommitOutcome, Compaction, CompactionBuilder, CompactionPlan};
pub use config::CompactionConfig;
pub use error::{CompactionError, Result};
pub use executor::CompactionExecutor;
pub use table::{MemoryTable, Table, TableReader, TableWriter};
