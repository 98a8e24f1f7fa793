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

//! Splits a snapshot's scan tasks into rewrite candidates and files to leave alone.

use crate::config::CompactionConfig;
use crate::spec::FileScanTask;

/// Why a data file was picked for rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// The data file is small compared to the target size.
    Fragment,
    /// The data file is well sized but reading it costs too many deletes.
    DeleteHeavy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTask {
    pub task: FileScanTask,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub fragment: Vec<SelectedTask>,
    pub skip: Vec<FileScanTask>,
}

impl Classification {
    pub fn fragment_count(&self) -> usize {
        self.fragment
            .iter()
            .filter(|selected| selected.reason == SelectionReason::Fragment)
            .count()
    }

    pub fn delete_heavy_count(&self) -> usize {
        self.fragment
            .iter()
            .filter(|selected| selected.reason == SelectionReason::DeleteHeavy)
            .count()
    }
}

/// Threshold-based classifier. Pure and order preserving.
#[derive(Debug, Clone)]
pub struct FileClassifier {
    pub fragment_threshold_bytes: u64,
    pub max_delete_file_count: usize,
    pub max_delete_file_size_bytes: u64,
}

impl FileClassifier {
    pub fn new(
        fragment_threshold_bytes: u64,
        max_delete_file_count: usize,
        max_delete_file_size_bytes: u64,
    ) -> Self {
        Self {
            fragment_threshold_bytes,
            max_delete_file_count,
            max_delete_file_size_bytes,
        }
    }

    pub fn from_config(config: &CompactionConfig) -> Self {
        Self::new(
            config.fragment_threshold_bytes(),
            config.max_delete_file_count,
            config.max_delete_file_size_bytes,
        )
    }

    pub fn select(&self, task: &FileScanTask) -> Option<SelectionReason> {
        if task.data_file.file_size_in_bytes <= self.fragment_threshold_bytes {
            Some(SelectionReason::Fragment)
        } else if task.delete_file_count() > self.max_delete_file_count
            || task.delete_files_size() > self.max_delete_file_size_bytes
        {
            Some(SelectionReason::DeleteHeavy)
        } else {
            None
        }
    }

    pub fn classify(&self, file_scan_tasks: Vec<FileScanTask>) -> Classification {
        let mut classification = Classification::default();
        for task in file_scan_tasks {
            match self.select(&task) {
                Some(reason) => classification
                    .fragment
                    .push(SelectedTask { task, reason }),
                None => classification.skip.push(task),
            }
        }
        classification
    }
}

impl std::fmt::Display for FileClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FileClassifier[fragment<={}B, deletes>{} or >{}B]",
            self.fragment_threshold_bytes,
            self.max_delete_file_count,
            self.max_delete_file_size_bytes
        )
    }
}
