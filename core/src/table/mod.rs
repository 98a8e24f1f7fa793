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

//! Collaborator interfaces to the table format.
//!
//! The engine reads a snapshot through [`TableReader`] and publishes a
//! rewrite through [`TableWriter`]. The writer owns the table's head pointer;
//! a rewrite is validated against the base snapshot recorded in its
//! [`TransactionHandle`] and either produces exactly one new snapshot or
//! fails with [`CompactionError::Conflict`](crate::CompactionError::Conflict).

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::Result;
use crate::spec::{ContentFile, DataFile, DeleteFile, FileScanTask, SnapshotId};

pub mod memory;

pub use memory::MemoryTable;

pub type FileScanTaskStream = BoxStream<'static, Result<FileScanTask>>;

#[async_trait]
pub trait TableReader: Send + Sync {
    async fn current_snapshot_id(&self) -> Result<Option<SnapshotId>>;

    /// Plans the data files of `snapshot_id` together with their applicable
    /// delete files. The stream is finite and may be requested again.
    async fn scan(&self, snapshot_id: SnapshotId) -> Result<FileScanTaskStream>;
}

#[async_trait]
pub trait TableWriter: Send + Sync {
    async fn begin_rewrite(&self, base_snapshot_id: SnapshotId) -> Result<TransactionHandle>;

    /// Atomically replaces `rewrite.remove_*` with `rewrite.add_*`. Consumes
    /// the handle whether or not the transaction succeeds.
    async fn apply(&self, handle: TransactionHandle, rewrite: RewriteFiles) -> Result<SnapshotId>;
}

pub trait Table: TableReader + TableWriter {
    fn name(&self) -> &str;
}

/// Single-use: `apply` takes the handle by value.
#[derive(Debug, PartialEq, Eq)]
pub struct TransactionHandle {
    pub transaction_id: Uuid,
    pub base_snapshot_id: SnapshotId,
}

/// File-level delta of one rewrite transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteFiles {
    pub remove_data_files: Vec<DataFile>,
    pub remove_delete_files: Vec<DeleteFile>,
    pub add_data_files: Vec<DataFile>,
    pub add_delete_files: Vec<DeleteFile>,
}

impl RewriteFiles {
    pub fn add_file(&mut self, file: ContentFile) {
        match file {
            ContentFile::Data(file) => self.add_data_files.push(file),
            ContentFile::Delete(file) => self.add_delete_files.push(file),
        }
    }

    pub fn removed_files_count(&self) -> usize {
        self.remove_data_files.len() + self.remove_delete_files.len()
    }

    pub fn added_files_count(&self) -> usize {
        self.add_data_files.len() + self.add_delete_files.len()
    }

    pub fn removed_bytes(&self) -> u64 {
        self.remove_data_files
            .iter()
            .map(|file| file.file_size_in_bytes)
            .chain(
                self.remove_delete_files
                    .iter()
                    .map(|file| file.file_size_in_bytes),
            )
            .sum()
    }

    pub fn added_bytes(&self) -> u64 {
        self.add_data_files
            .iter()
            .map(|file| file.file_size_in_bytes)
            .chain(
                self.add_delete_files
                    .iter()
                    .map(|file| file.file_size_in_bytes),
            )
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.removed_files_count() == 0 && self.added_files_count() == 0
    }
}
