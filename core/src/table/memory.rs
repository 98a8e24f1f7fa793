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

//! In-memory snapshot table.
//!
//! Keeps the full snapshot history and the live file set of every snapshot.
//! All mutations go through a single async mutex, so rewrite transactions on
//! one table are serialized and each one is validated against the head it
//! actually observes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures::StreamExt;
use futures::lock::Mutex;
use itertools::Itertools;
use uuid::Uuid;

use super::{FileScanTaskStream, RewriteFiles, Table, TableReader, TableWriter, TransactionHandle};
use crate::common::current_time_ms;
use crate::error::{CommitConflictError, TransactionError};
use crate::spec::{
    DataFile, DeleteFile, FileScanTask, Operation, Snapshot, SnapshotId, SnapshotSummary,
};
use crate::Result;

#[derive(Debug, Clone)]
struct LiveFile<F> {
    file: F,
    sequence_number: i64,
}

#[derive(Debug, Clone, Default)]
struct LiveFiles {
    data_files: BTreeMap<String, LiveFile<DataFile>>,
    delete_files: BTreeMap<String, LiveFile<DeleteFile>>,
}

impl LiveFiles {
    fn contains_path(&self, path: &str) -> bool {
        self.data_files.contains_key(path) || self.delete_files.contains_key(path)
    }

    fn plan_files(&self) -> Vec<FileScanTask> {
        self.data_files
            .values()
            .map(|data| {
                let deletes = self
                    .delete_files
                    .values()
                    .filter(|delete| {
                        delete.file.applies_to(
                            delete.sequence_number,
                            &data.file,
                            data.sequence_number,
                        )
                    })
                    .map(|delete| delete.file.clone())
                    .collect_vec();
                FileScanTask::new(data.file.clone(), deletes)
            })
            .collect()
    }
}

#[derive(Debug)]
struct SnapshotEntry {
    snapshot: Snapshot,
    files: LiveFiles,
}

#[derive(Debug, Default)]
struct TableState {
    snapshots: HashMap<SnapshotId, SnapshotEntry>,
    head: Option<SnapshotId>,
    last_snapshot_id: i64,
    last_sequence_number: i64,
    injected_failure: Option<String>,
}

impl TableState {
    fn head_files(&self) -> LiveFiles {
        self.head
            .and_then(|id| self.snapshots.get(&id))
            .map(|entry| entry.files.clone())
            .unwrap_or_default()
    }

    /// Returns true if `ancestor` is `snapshot_id` or one of its parents.
    fn is_ancestor_of(&self, ancestor: SnapshotId, snapshot_id: SnapshotId) -> bool {
        let mut current = Some(snapshot_id);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self
                .snapshots
                .get(&id)
                .and_then(|entry| entry.snapshot.parent_snapshot_id);
        }
        false
    }

    fn commit_snapshot(
        &mut self,
        operation: Operation,
        files: LiveFiles,
        mut summary: SnapshotSummary,
    ) -> SnapshotId {
        self.last_snapshot_id += 1;
        let snapshot_id = SnapshotId(self.last_snapshot_id);
        summary.total_data_files = files.data_files.len();
        summary.total_delete_files = files.delete_files.len();

        let snapshot = Snapshot {
            snapshot_id,
            parent_snapshot_id: self.head,
            sequence_number: self.last_sequence_number,
            timestamp_ms: current_time_ms(),
            operation,
            summary,
        };
        self.snapshots
            .insert(snapshot_id, SnapshotEntry { snapshot, files });
        self.head = Some(snapshot_id);
        snapshot_id
    }

    fn conflict(&self, base_snapshot_id: SnapshotId, reason: String) -> CommitConflictError {
        CommitConflictError {
            base_snapshot_id,
            current_snapshot_id: self.head,
            reason,
        }
    }

    /// Checks a rewrite against the current head. See [`MemoryTable`] for the rules.
    fn validate_rewrite(
        &self,
        base_snapshot_id: SnapshotId,
        rewrite: &RewriteFiles,
        head_files: &LiveFiles,
    ) -> std::result::Result<(), CommitConflictError> {
        let Some(head) = self.head else {
            return Err(self.conflict(base_snapshot_id, "table has no snapshot".to_owned()));
        };
        if !self.is_ancestor_of(base_snapshot_id, head) {
            return Err(self.conflict(
                base_snapshot_id,
                "base snapshot is not an ancestor of the current head".to_owned(),
            ));
        }

        for path in rewrite
            .remove_data_files
            .iter()
            .map(|file| &file.path)
            .chain(rewrite.remove_delete_files.iter().map(|file| &file.path))
        {
            if !head_files.contains_path(path) {
                return Err(self.conflict(
                    base_snapshot_id,
                    format!("file {} is no longer live", path),
                ));
            }
        }

        if head != base_snapshot_id {
            let base_sequence_number = self
                .snapshots
                .get(&base_snapshot_id)
                .map(|entry| entry.snapshot.sequence_number)
                .unwrap_or_default();
            let new_delete = head_files
                .delete_files
                .values()
                .filter(|delete| delete.sequence_number > base_sequence_number)
                .find(|delete| {
                    rewrite
                        .remove_data_files
                        .iter()
                        .any(|data| delete.file.may_apply_to(data))
                });
            if let Some(delete) = new_delete {
                return Err(self.conflict(
                    base_snapshot_id,
                    format!(
                        "delete file {} was added after the base snapshot and applies to rewritten data",
                        delete.file.path
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// Table kept entirely in memory.
///
/// A rewrite based on snapshot `B` is accepted only if:
/// - `B` is the head or an ancestor of the head,
/// - every file it removes is still live in the head,
/// - no delete file committed after `B` applies to a data file it removes.
///
/// Otherwise the rewrite fails with a [`CommitConflictError`] and the table
/// is unchanged.
#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    state: Mutex<TableState>,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(TableState::default()),
        }
    }

    /// Appends files in a new snapshot. Every file gets the new sequence number.
    pub async fn append(
        &self,
        data_files: Vec<DataFile>,
        delete_files: Vec<DeleteFile>,
    ) -> Result<SnapshotId> {
        let mut state = self.state.lock().await;
        let mut files = state.head_files();

        let sequence_number = state.last_sequence_number + 1;
        let summary = SnapshotSummary {
            added_data_files: data_files.len(),
            added_delete_files: delete_files.len(),
            ..Default::default()
        };
        for file in data_files {
            if files.contains_path(&file.path) {
                return Err(TransactionError(format!("file {} already exists", file.path)).into());
            }
            files.data_files.insert(file.path.clone(), LiveFile {
                file,
                sequence_number,
            });
        }
        for file in delete_files {
            if files.contains_path(&file.path) {
                return Err(TransactionError(format!("file {} already exists", file.path)).into());
            }
            files.delete_files.insert(file.path.clone(), LiveFile {
                file,
                sequence_number,
            });
        }

        state.last_sequence_number = sequence_number;
        let snapshot_id = state.commit_snapshot(Operation::Append, files, summary);
        tracing::debug!("Table {} appended snapshot {}", self.name, snapshot_id);
        Ok(snapshot_id)
    }

    /// Makes the next [`TableWriter::apply`] fail with a [`TransactionError`],
    /// simulating a storage fault.
    pub async fn inject_apply_failure(&self, message: impl Into<String>) {
        self.state.lock().await.injected_failure = Some(message.into());
    }

    pub async fn snapshot(&self, snapshot_id: SnapshotId) -> Option<Snapshot> {
        let state = self.state.lock().await;
        state
            .snapshots
            .get(&snapshot_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Snapshots from the head back to the first one.
    pub async fn history(&self) -> Vec<Snapshot> {
        let state = self.state.lock().await;
        let mut history = vec![];
        let mut current = state.head;
        while let Some(entry) = current.and_then(|id| state.snapshots.get(&id)) {
            history.push(entry.snapshot.clone());
            current = entry.snapshot.parent_snapshot_id;
        }
        history
    }

    /// Live data and delete files of the head snapshot, ordered by path.
    pub async fn live_files(&self) -> (Vec<DataFile>, Vec<DeleteFile>) {
        let files = self.state.lock().await.head_files();
        (
            files.data_files.into_values().map(|f| f.file).collect(),
            files.delete_files.into_values().map(|f| f.file).collect(),
        )
    }
}

impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl TableReader for MemoryTable {
    async fn current_snapshot_id(&self) -> Result<Option<SnapshotId>> {
        Ok(self.state.lock().await.head)
    }

    async fn scan(&self, snapshot_id: SnapshotId) -> Result<FileScanTaskStream> {
        let state = self.state.lock().await;
        let entry = state.snapshots.get(&snapshot_id).ok_or_else(|| {
            TransactionError(format!("snapshot {} does not exist", snapshot_id))
        })?;
        let tasks = entry.files.plan_files();
        Ok(futures::stream::iter(tasks.into_iter().map(Ok)).boxed())
    }
}

#[async_trait]
impl TableWriter for MemoryTable {
    async fn begin_rewrite(&self, base_snapshot_id: SnapshotId) -> Result<TransactionHandle> {
        let mut state = self.state.lock().await;
        if !state.snapshots.contains_key(&base_snapshot_id) {
            return Err(TransactionError(format!(
                "base snapshot {} does not exist",
                base_snapshot_id
            ))
            .into());
        }
        Ok(TransactionHandle {
            transaction_id: Uuid::new_v4(),
            base_snapshot_id,
        })
    }

    async fn apply(&self, handle: TransactionHandle, rewrite: RewriteFiles) -> Result<SnapshotId> {
        let mut state = self.state.lock().await;
        if !state.snapshots.contains_key(&handle.base_snapshot_id) {
            return Err(TransactionError(format!(
                "transaction {} is based on unknown snapshot {}",
                handle.transaction_id, handle.base_snapshot_id
            ))
            .into());
        }
        if let Some(message) = state.injected_failure.take() {
            return Err(TransactionError(message).into());
        }
        if rewrite.is_empty() {
            return Err(TransactionError("rewrite has no files".to_owned()).into());
        }

        let mut files = state.head_files();
        if let Err(conflict) = state.validate_rewrite(handle.base_snapshot_id, &rewrite, &files) {
            tracing::warn!("Table {} rejected rewrite: {}", self.name, conflict);
            return Err(conflict.into());
        }

        for file in &rewrite.remove_data_files {
            files.data_files.remove(&file.path);
        }
        for file in &rewrite.remove_delete_files {
            files.delete_files.remove(&file.path);
        }

        let sequence_number = state.last_sequence_number + 1;
        for file in &rewrite.add_data_files {
            if files.contains_path(&file.path) {
                return Err(TransactionError(format!("file {} already exists", file.path)).into());
            }
            files.data_files.insert(file.path.clone(), LiveFile {
                file: file.clone(),
                sequence_number,
            });
        }
        for file in &rewrite.add_delete_files {
            if files.contains_path(&file.path) {
                return Err(TransactionError(format!("file {} already exists", file.path)).into());
            }
            files.delete_files.insert(file.path.clone(), LiveFile {
                file: file.clone(),
                sequence_number,
            });
        }

        let summary = SnapshotSummary {
            added_data_files: rewrite.add_data_files.len(),
            added_delete_files: rewrite.add_delete_files.len(),
            removed_data_files: rewrite.remove_data_files.len(),
            removed_delete_files: rewrite.remove_delete_files.len(),
            ..Default::default()
        };
        state.last_sequence_number = sequence_number;
        let snapshot_id = state.commit_snapshot(Operation::Rewrite, files, summary);
        tracing::info!(
            "Table {} committed rewrite snapshot {} on base {}",
            self.name,
            snapshot_id,
            handle.base_snapshot_id
        );
        Ok(snapshot_id)
    }
}
