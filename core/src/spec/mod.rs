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

//! Table format model shared by planning and commit.
//!
//! Files are identified by path. A [`FileScanTask`] pairs one live data file
//! with the delete files that apply to it as of the scanned snapshot.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SnapshotId(pub i64);

impl Display for SnapshotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partition value of a file, rendered as a string (e.g. `dt=2025-01-01`).
///
/// Unpartitioned tables put every file under the empty key.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn unpartitioned() -> Self {
        Self::default()
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_unpartitioned() {
            write!(f, "<unpartitioned>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataFile {
    pub path: String,
    pub partition: PartitionKey,
    pub file_size_in_bytes: u64,
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeleteKind {
    /// Rows matching the values of these fields are deleted.
    Equality { equality_ids: Vec<i32> },
    /// Rows are deleted by (file, position). When `referenced_data_file` is
    /// set the delete file only targets that data file.
    Positional { referenced_data_file: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeleteFile {
    pub path: String,
    pub partition: PartitionKey,
    pub file_size_in_bytes: u64,
    pub record_count: u64,
    pub kind: DeleteKind,
}

impl DeleteFile {
    pub fn is_equality(&self) -> bool {
        matches!(self.kind, DeleteKind::Equality { .. })
    }

    pub fn is_positional(&self) -> bool {
        matches!(self.kind, DeleteKind::Positional { .. })
    }

    /// Whether this delete file can target rows of `data_file`, ignoring
    /// sequence numbers.
    pub fn may_apply_to(&self, data_file: &DataFile) -> bool {
        if self.partition != data_file.partition {
            return false;
        }
        match &self.kind {
            DeleteKind::Equality { .. } => true,
            DeleteKind::Positional {
                referenced_data_file,
            } => referenced_data_file
                .as_ref()
                .is_none_or(|path| *path == data_file.path),
        }
    }

    /// Whether this delete file applies to a data file, given the sequence
    /// numbers both were committed with. Equality deletes only apply to
    /// strictly older data; positional deletes also apply to data committed
    /// in the same snapshot.
    pub fn applies_to(
        &self,
        delete_sequence_number: i64,
        data_file: &DataFile,
        data_sequence_number: i64,
    ) -> bool {
        if !self.may_apply_to(data_file) {
            return false;
        }
        match self.kind {
            DeleteKind::Equality { .. } => delete_sequence_number > data_sequence_number,
            DeleteKind::Positional { .. } => delete_sequence_number >= data_sequence_number,
        }
    }
}

/// A file of either content type, as produced by a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "content", rename_all = "snake_case")]
pub enum ContentFile {
    Data(DataFile),
    Delete(DeleteFile),
}

impl ContentFile {
    pub fn path(&self) -> &str {
        match self {
            ContentFile::Data(file) => &file.path,
            ContentFile::Delete(file) => &file.path,
        }
    }

    pub fn partition(&self) -> &PartitionKey {
        match self {
            ContentFile::Data(file) => &file.partition,
            ContentFile::Delete(file) => &file.partition,
        }
    }

    pub fn file_size_in_bytes(&self) -> u64 {
        match self {
            ContentFile::Data(file) => file.file_size_in_bytes,
            ContentFile::Delete(file) => file.file_size_in_bytes,
        }
    }

    pub fn encode(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<DataFile> for ContentFile {
    fn from(file: DataFile) -> Self {
        ContentFile::Data(file)
    }
}

impl From<DeleteFile> for ContentFile {
    fn from(file: DeleteFile) -> Self {
        ContentFile::Delete(file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileScanTask {
    pub data_file: DataFile,
    pub deletes: Vec<DeleteFile>,
}

impl FileScanTask {
    pub fn new(data_file: DataFile, deletes: Vec<DeleteFile>) -> Self {
        Self { data_file, deletes }
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.data_file.partition
    }

    pub fn delete_file_count(&self) -> usize {
        self.deletes.len()
    }

    pub fn delete_files_size(&self) -> u64 {
        self.deletes.iter().map(|file| file.file_size_in_bytes).sum()
    }

    /// Upper bound of the bytes this task adds to a compaction group. Shared
    /// delete files are counted once per data file here and deduplicated
    /// inside the group.
    pub fn weight(&self) -> u64 {
        self.data_file.file_size_in_bytes + self.delete_files_size()
    }
}

/// Identifies a compaction task inside one plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub partition: PartitionKey,
    pub sequence: u32,
    pub plan_timestamp: u64,
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.plan_timestamp, self.partition, self.sequence
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Append,
    Rewrite,
}

/// Immutable snapshot metadata. Live files are owned by the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub parent_snapshot_id: Option<SnapshotId>,
    pub sequence_number: i64,
    pub timestamp_ms: u64,
    pub operation: Operation,
    pub summary: SnapshotSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub added_data_files: usize,
    pub added_delete_files: usize,
    pub removed_data_files: usize,
    pub removed_delete_files: usize,
    pub total_data_files: usize,
    pub total_delete_files: usize,
}
