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

//! Bins candidate scan tasks into size-bounded compaction tasks, one
//! partition at a time.

use std::collections::BTreeMap;

use super::packer::ListPacker;
use crate::spec::{DataFile, DeleteFile, FileScanTask, PartitionKey, TaskId};

/// A unit of rewrite work: a set of data files from one partition together
/// with every delete file applying to them.
///
/// Delete files are deduplicated by path. `input_size_bytes` is the sum of
/// the data files and the deduplicated delete files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionTask {
    pub task_id: TaskId,
    pub partition: PartitionKey,
    pub file_scan_tasks: Vec<FileScanTask>,
    pub delete_files: Vec<DeleteFile>,
    pub input_size_bytes: u64,
}

impl CompactionTask {
    pub fn new(task_id: TaskId, file_scan_tasks: Vec<FileScanTask>) -> Self {
        let mut delete_files = BTreeMap::new();
        for task in &file_scan_tasks {
            for delete_file in &task.deletes {
                delete_files
                    .entry(delete_file.path.clone())
                    .or_insert_with(|| delete_file.clone());
            }
        }
        let delete_files: Vec<DeleteFile> = delete_files.into_values().collect();

        let input_size_bytes = file_scan_tasks
            .iter()
            .map(|task| task.data_file.file_size_in_bytes)
            .chain(delete_files.iter().map(|file| file.file_size_in_bytes))
            .sum();

        Self {
            partition: task_id.partition.clone(),
            task_id,
            file_scan_tasks,
            delete_files,
            input_size_bytes,
        }
    }

    pub fn data_files(&self) -> impl Iterator<Item = &DataFile> {
        self.file_scan_tasks.iter().map(|task| &task.data_file)
    }

    pub fn data_file_count(&self) -> usize {
        self.file_scan_tasks.len()
    }

    pub fn input_files_count(&self) -> usize {
        self.file_scan_tasks.len() + self.delete_files.len()
    }

    pub fn position_delete_files(&self) -> impl Iterator<Item = &DeleteFile> {
        self.delete_files.iter().filter(|file| file.is_positional())
    }

    pub fn equality_delete_files(&self) -> impl Iterator<Item = &DeleteFile> {
        self.delete_files.iter().filter(|file| file.is_equality())
    }
}

#[derive(Debug, Default)]
pub struct Grouping {
    pub tasks: BTreeMap<PartitionKey, Vec<CompactionTask>>,
    /// Scan tasks too large to fit any group on their own.
    pub oversized: Vec<FileScanTask>,
}

impl Grouping {
    pub fn task_count(&self) -> usize {
        self.tasks.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone)]
pub struct TaskGrouper {
    pub max_group_size_bytes: u64,
    /// Advisory number of tasks per partition. Zero disables even sizing.
    pub desired_task_count_hint: usize,
}

impl TaskGrouper {
    pub fn new(max_group_size_bytes: u64, desired_task_count_hint: usize) -> Self {
        Self {
            max_group_size_bytes,
            desired_task_count_hint,
        }
    }

    pub fn group(
        &self,
        fragments_by_partition: BTreeMap<PartitionKey, Vec<FileScanTask>>,
        plan_timestamp: u64,
    ) -> Grouping {
        let mut grouping = Grouping::default();

        for (partition, mut files) in fragments_by_partition {
            // Scan order is unspecified; ties in weight are broken by path.
            files.sort_by(|a, b| {
                b.weight()
                    .cmp(&a.weight())
                    .then_with(|| a.data_file.path.cmp(&b.data_file.path))
            });
            let packer = ListPacker::new(self.bin_capacity(&files));
            let packing = packer.pack(files, FileScanTask::weight);

            if !packing.oversized.is_empty() {
                tracing::warn!(
                    "Partition {} has {} file(s) larger than the max group size {}B, leaving them out of the plan",
                    partition,
                    packing.oversized.len(),
                    self.max_group_size_bytes
                );
                grouping.oversized.extend(packing.oversized);
            }

            let tasks: Vec<CompactionTask> = packing
                .bins
                .into_iter()
                .filter(|bin| !bin.is_empty())
                .enumerate()
                .map(|(sequence, bin)| {
                    let task_id = TaskId {
                        partition: partition.clone(),
                        sequence: sequence as u32,
                        plan_timestamp,
                    };
                    CompactionTask::new(task_id, bin)
                })
                .collect();

            if !tasks.is_empty() {
                grouping.tasks.insert(partition, tasks);
            }
        }

        grouping
    }

    /// Capacity of a single group for this partition. Spreads the partition
    /// evenly over `desired_task_count_hint` groups, but never below the
    /// heaviest placeable file nor above `max_group_size_bytes`.
    fn bin_capacity(&self, files: &[FileScanTask]) -> u64 {
        if self.desired_task_count_hint == 0 {
            return self.max_group_size_bytes;
        }

        let placeable = files
            .iter()
            .map(FileScanTask::weight)
            .filter(|&weight| weight <= self.max_group_size_bytes);
        let (total, heaviest) =
            placeable.fold((0u64, 0u64), |(total, heaviest), weight| {
                (total + weight, heaviest.max(weight))
            });

        total
            .div_ceil(self.desired_task_count_hint as u64)
            .max(heaviest)
            .min(self.max_group_size_bytes)
    }
}

/// Buckets scan tasks by partition key. An unpartitioned table yields a
/// single entry under [`PartitionKey::unpartitioned`].
pub fn group_by_partition<I>(files: I) -> BTreeMap<PartitionKey, Vec<FileScanTask>>
where I: IntoIterator<Item = FileScanTask> {
    let mut partitioned: BTreeMap<PartitionKey, Vec<FileScanTask>> = BTreeMap::new();
    for file in files {
        partitioned
            .entry(file.partition().clone())
            .or_default()
            .push(file);
    }
    partitioned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestFileBuilder;

    fn files(partition: &str, sizes: &[u64]) -> Vec<FileScanTask> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                TestFileBuilder::new(&format!("{}_{}.parquet", partition, i))
                    .partition(partition)
                    .size(*size)
                    .build()
            })
            .collect()
    }

    #[test]
    fn test_group_respects_max_group_size() {
        let grouper = TaskGrouper::new(1000, 0);
        let grouping = grouper.group(
            group_by_partition(files("p=1", &[600, 500, 400, 300, 200])),
            42,
        );

        let tasks = &grouping.tasks[&PartitionKey::new("p=1")];
        // Greedy on the sorted sizes: [600] [500, 400] [300, 200]
        assert_eq!(tasks.len(), 3);
        for task in tasks {
            assert!(task.input_size_bytes <= 1000);
        }
        let total: usize = tasks.iter().map(CompactionTask::data_file_count).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_group_ignores_scan_order() {
        let grouper = TaskGrouper::new(200, 0);
        let forward = files("p=1", &[100, 100, 100]);
        let mut reversed = forward.clone();
        reversed.reverse();

        let paths = |input: Vec<FileScanTask>| -> Vec<Vec<String>> {
            grouper.group(group_by_partition(input), 0).tasks[&PartitionKey::new("p=1")]
                .iter()
                .map(|task| task.data_files().map(|file| file.path.clone()).collect())
                .collect()
        };
        let expected = vec![
            vec!["p=1_0.parquet".to_owned(), "p=1_1.parquet".to_owned()],
            vec!["p=1_2.parquet".to_owned()],
        ];
        assert_eq!(paths(forward), expected);
        assert_eq!(paths(reversed), expected);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let grouper = TaskGrouper::new(250, 0);
        let mut input = files("p=1", &[200, 200, 200]);
        input.extend(files("p=2", &[200, 200]));
        let grouping = grouper.group(group_by_partition(input), 7);

        let mut ids: Vec<_> = grouping
            .tasks
            .values()
            .flatten()
            .map(|task| task.task_id.to_string())
            .collect();
        assert_eq!(ids.len(), 5);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        assert!(ids.contains(&"7-p=2-1".to_owned()));
    }

    #[test]
    fn test_partitions_never_mix() {
        let grouper = TaskGrouper::new(10_000, 0);
        let mut input = files("p=1", &[100, 100]);
        input.extend(files("p=2", &[100]));
        input.extend(files("", &[100]));
        let grouping = grouper.group(group_by_partition(input), 0);

        assert_eq!(grouping.tasks.len(), 3);
        for (partition, tasks) in &grouping.tasks {
            for task in tasks {
                assert_eq!(&task.partition, partition);
                assert!(task.data_files().all(|file| &file.partition == partition));
            }
        }
        assert!(
            grouping
                .tasks
                .contains_key(&PartitionKey::unpartitioned())
        );
    }

    #[test]
    fn test_empty_partition_yields_no_tasks() {
        let grouper = TaskGrouper::new(1000, 0);
        let mut input = BTreeMap::new();
        input.insert(PartitionKey::new("p=1"), vec![]);
        let grouping = grouper.group(input, 0);
        assert!(grouping.tasks.is_empty());
        assert_eq!(grouping.task_count(), 0);
    }

    #[test]
    fn test_oversized_file_is_left_out() {
        let grouper = TaskGrouper::new(1000, 0);
        let grouping = grouper.group(group_by_partition(files("p=1", &[5000, 100])), 0);

        assert_eq!(grouping.oversized.len(), 1);
        assert_eq!(grouping.oversized[0].data_file.file_size_in_bytes, 5000);
        assert_eq!(grouping.task_count(), 1);
    }

    #[test]
    fn test_hint_spreads_groups_evenly() {
        let input = files("p=1", &[100; 8]);

        let grouping = TaskGrouper::new(10_000, 0).group(group_by_partition(input.clone()), 0);
        assert_eq!(grouping.task_count(), 1);

        let grouping = TaskGrouper::new(10_000, 4).group(group_by_partition(input.clone()), 0);
        assert_eq!(grouping.task_count(), 4);
        for task in grouping.tasks.values().flatten() {
            assert_eq!(task.data_file_count(), 2);
        }

        // The hint never pushes the capacity above the hard bound.
        let grouping = TaskGrouper::new(300, 1).group(group_by_partition(input), 0);
        assert_eq!(grouping.task_count(), 3);
    }

    #[test]
    fn test_shared_delete_files_are_deduplicated() {
        let shared = TestFileBuilder::equality_delete("shared_eq.parquet", "", 50);
        let input = vec![
            TestFileBuilder::new("a.parquet")
                .size(100)
                .with_delete(shared.clone())
                .build(),
            TestFileBuilder::new("b.parquet")
                .size(100)
                .with_delete(shared)
                .with_positional_delete_of_size(10)
                .build(),
        ];
        let grouping = TaskGrouper::new(10_000, 0).group(group_by_partition(input), 0);
        let task = &grouping.tasks[&PartitionKey::unpartitioned()][0];

        assert_eq!(task.delete_files.len(), 2);
        assert_eq!(task.equality_delete_files().count(), 1);
        assert_eq!(task.position_delete_files().count(), 1);
        assert_eq!(task.input_size_bytes, 100 + 100 + 50 + 10);
        assert_eq!(task.input_files_count(), 4);
    }
}
