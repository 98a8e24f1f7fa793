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

use futures::TryStreamExt;

use crate::Result;
use crate::spec::{FileScanTask, SnapshotId};
use crate::table::TableReader;

pub mod analyzer;
pub mod classifier;
pub mod grouper;
pub mod packer;

pub use analyzer::{SnapshotAnalyzer, SnapshotStats};
pub use classifier::{Classification, FileClassifier, SelectedTask, SelectionReason};
pub use grouper::{CompactionTask, Grouping, TaskGrouper, group_by_partition};
pub use packer::{ListPacker, Packing};

/// File selection service responsible for reading the files a plan starts from.
pub struct FileSelector;

impl FileSelector {
    /// Collects every scan task of `snapshot_id`.
    pub async fn scan_data_files<R>(reader: &R, snapshot_id: SnapshotId) -> Result<Vec<FileScanTask>>
    where R: TableReader + ?Sized {
        reader.scan(snapshot_id).await?.try_collect().await
    }
}
