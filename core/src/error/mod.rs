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

use thiserror::Error;

use crate::runtime::TaskStatus;
use crate::spec::{PartitionKey, SnapshotId, TaskId};

#[derive(Error, Debug)]
pub enum CompactionError {
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Conflict(#[from] CommitConflictError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Illegal transition for task {task_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl CompactionError {
    /// Returns true if the error means the table moved on and the caller should re-plan.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CompactionError::Conflict(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("scan of snapshot {0} yielded no files")]
    EmptyInput(SnapshotId),

    #[error("table has no current snapshot")]
    NoSnapshot,
}

/// Task-level validation failure. The task is excluded from the commit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task {task_id} is prepared but has no output files")]
    MissingOutput { task_id: TaskId },

    #[error("task {task_id} of partition {expected} produced {path} in partition {actual}")]
    PartitionMismatch {
        task_id: TaskId,
        path: String,
        expected: PartitionKey,
        actual: PartitionKey,
    },
}

#[derive(Error, Debug)]
#[error("cannot decode output file {index} of task {task_id}: {source}")]
pub struct SerializationError {
    pub task_id: TaskId,
    pub index: usize,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("commit based on snapshot {base_snapshot_id} conflicts with head {current_snapshot_id:?}: {reason}")]
pub struct CommitConflictError {
    pub base_snapshot_id: SnapshotId,
    pub current_snapshot_id: Option<SnapshotId>,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rewrite transaction rejected: {0}")]
pub struct TransactionError(pub String);

pub type Result<T> = std::result::Result<T, CompactionError>;
