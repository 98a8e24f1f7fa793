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

//! Execution state of compaction tasks.
//!
//! ```text
//! Init -> Scheduled -> Executing -> Prepared -> Committed
//!   |         |            |           |
//!   |         +-> Failed <-+-----------+ (Prepared -> Failed only on commit validation)
//!   +---------+------------+-----------+-> Abandoned
//! ```
//!
//! The planner creates runtimes in `Init`. Executors drive them up to
//! `Prepared` or `Failed` (see [`tracker`]); the commit coordinator moves
//! prepared tasks to `Committed` or downgrades them to `Failed`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SerializationError;
use crate::spec::{ContentFile, PartitionKey, TaskId};
use crate::{CompactionError, Result};

pub mod tracker;

pub use tracker::{TaskOutput, TaskReport, TaskRuntimeTracker};

/// Runtimes of one plan, keyed by the partition of their task.
pub type TaskRuntimesByPartition = BTreeMap<PartitionKey, Vec<TaskRuntime>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Init,
    Scheduled,
    Executing,
    Prepared,
    Committed,
    Failed,
    Abandoned,
}

impl TaskStatus {
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Init, Scheduled)
                | (Scheduled, Executing)
                | (Executing, Prepared)
                | (Prepared, Committed)
                | (Scheduled | Executing | Prepared, Failed)
                | (Init | Scheduled | Executing | Prepared, Abandoned)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Committed | TaskStatus::Failed | TaskStatus::Abandoned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRuntime {
    task_id: TaskId,
    status: TaskStatus,
    planned_time: u64,
    scheduled_time: Option<u64>,
    executing_time: Option<u64>,
    prepared_time: Option<u64>,
    report_time: Option<u64>,
    commit_time: Option<u64>,
    /// Encoded [`ContentFile`]s produced by the rewrite.
    target_files: Vec<Vec<u8>>,
    new_file_size: u64,
    new_file_count: usize,
    cost_time_ms: u64,
    fail_reason: Option<String>,
}

impl TaskRuntime {
    pub fn new(task_id: TaskId, planned_time: u64) -> Self {
        Self {
            task_id,
            status: TaskStatus::Init,
            planned_time,
            scheduled_time: None,
            executing_time: None,
            prepared_time: None,
            report_time: None,
            commit_time: None,
            target_files: vec![],
            new_file_size: 0,
            new_file_count: 0,
            cost_time_ms: 0,
            fail_reason: None,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn planned_time(&self) -> u64 {
        self.planned_time
    }

    pub fn scheduled_time(&self) -> Option<u64> {
        self.scheduled_time
    }

    pub fn executing_time(&self) -> Option<u64> {
        self.executing_time
    }

    pub fn prepared_time(&self) -> Option<u64> {
        self.prepared_time
    }

    pub fn report_time(&self) -> Option<u64> {
        self.report_time
    }

    pub fn commit_time(&self) -> Option<u64> {
        self.commit_time
    }

    pub fn target_files(&self) -> &[Vec<u8>] {
        &self.target_files
    }

    pub fn new_file_size(&self) -> u64 {
        self.new_file_size
    }

    pub fn new_file_count(&self) -> usize {
        self.new_file_count
    }

    pub fn cost_time_ms(&self) -> u64 {
        self.cost_time_ms
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(CompactionError::IllegalTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn schedule(&mut self, now: u64) -> Result<()> {
        self.transition(TaskStatus::Scheduled)?;
        self.scheduled_time = Some(now);
        Ok(())
    }

    pub fn start_executing(&mut self, now: u64) -> Result<()> {
        self.transition(TaskStatus::Executing)?;
        self.executing_time = Some(now);
        Ok(())
    }

    /// Attaches the rewrite output and moves the task to `Prepared`.
    pub fn prepare(&mut self, output: TaskOutput, now: u64) -> Result<()> {
        self.transition(TaskStatus::Prepared)?;
        self.prepared_time = Some(now);
        self.report_time = Some(output.report_time);
        self.new_file_count = output.target_files.len();
        self.target_files = output.target_files;
        self.new_file_size = output.new_file_size;
        self.cost_time_ms = output.cost_time_ms;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: u64) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.fail_reason = Some(reason.into());
        self.report_time = Some(now);
        Ok(())
    }

    pub fn abandon(&mut self) -> Result<()> {
        self.transition(TaskStatus::Abandoned)
    }

    pub(crate) fn mark_committed(&mut self, now: u64) -> Result<()> {
        self.transition(TaskStatus::Committed)?;
        self.commit_time = Some(now);
        Ok(())
    }

    /// Decodes the attached output files.
    pub fn decode_target_files(
        &self,
    ) -> std::result::Result<Vec<ContentFile>, SerializationError> {
        self.target_files
            .iter()
            .enumerate()
            .map(|(index, bytes)| {
                ContentFile::decode(bytes).map_err(|source| SerializationError {
                    task_id: self.task_id.clone(),
                    index,
                    source,
                })
            })
            .collect()
    }
}
