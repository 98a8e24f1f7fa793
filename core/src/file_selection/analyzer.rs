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

use std::collections::HashSet;

use super::classifier::{FileClassifier, SelectionReason};
use crate::spec::FileScanTask;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub total_data_files: usize,
    pub total_data_bytes: u64,
    /// Distinct delete files attached to any data file.
    pub total_delete_files: usize,
    pub fragment_files_count: usize,
    pub delete_heavy_files_count: usize,
    pub files_with_deletes_count: usize,
}

impl SnapshotStats {
    /// Whether planning against this snapshot would select anything.
    pub fn has_candidates(&self) -> bool {
        self.fragment_files_count + self.delete_heavy_files_count > 0
    }
}

pub struct SnapshotAnalyzer;

impl SnapshotAnalyzer {
    pub fn analyze(tasks: &[FileScanTask], classifier: &FileClassifier) -> SnapshotStats {
        let mut stats = SnapshotStats::default();
        let mut delete_paths = HashSet::new();

        for task in tasks {
            stats.total_data_files += 1;
            stats.total_data_bytes += task.data_file.file_size_in_bytes;

            if !task.deletes.is_empty() {
                stats.files_with_deletes_count += 1;
            }
            delete_paths.extend(task.deletes.iter().map(|file| file.path.as_str()));

            match classifier.select(task) {
                Some(SelectionReason::Fragment) => stats.fragment_files_count += 1,
                Some(SelectionReason::DeleteHeavy) => stats.delete_heavy_files_count += 1,
                None => {}
            }
        }

        stats.total_delete_files = delete_paths.len();
        stats
    }
}
