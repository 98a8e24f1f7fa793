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

//! Turns one snapshot's scan into a [`CompactionPlan`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::CompactionConfig;
use crate::error::PlanningError;
use crate::file_selection::{
    CompactionTask, FileClassifier, SelectedTask, TaskGrouper, group_by_partition,
};
use crate::runtime::{TaskRuntime, TaskRuntimesByPartition};
use crate::spec::{FileScanTask, PartitionKey, SnapshotId, TaskId};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub scanned_data_files: usize,
    pub fragment_files: usize,
    pub delete_heavy_files: usize,
    pub skipped_files: usize,
    /// Selected files that exceed the max group size on their own.
    pub oversized_files: usize,
    pub task_count: usize,
    pub total_input_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CompactionPlan {
    /// Snapshot the scan was read from. Commit validates against it.
    pub base_snapshot_id: SnapshotId,
    pub plan_timestamp: u64,
    pub tasks: BTreeMap<PartitionKey, Vec<CompactionTask>>,
    /// Delete file path -> paths of every scanned data file it applies to.
    pub delete_references: HashMap<String, BTreeSet<String>>,
    pub stats: PlanStats,
}

impl CompactionPlan {
    pub fn task_count(&self) -> usize {
        self.tasks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &CompactionTask> {
        self.tasks.values().flatten()
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&CompactionTask> {
        self.tasks
            .get(&task_id.partition)?
            .iter()
            .find(|task| &task.task_id == task_id)
    }

    /// One runtime in `Init` per task, keyed like the plan.
    pub fn init_runtimes(&self) -> TaskRuntimesByPartition {
        self.tasks
            .iter()
            .map(|(partition, tasks)| {
                let runtimes = tasks
                    .iter()
                    .map(|task| TaskRuntime::new(task.task_id.clone(), self.plan_timestamp))
                    .collect();
                (partition.clone(), runtimes)
            })
            .collect()
    }
}

pub struct CompactionPlanner {
    classifier: FileClassifier,
    max_group_size_bytes: u64,
}

impl CompactionPlanner {
    pub fn new(config: &CompactionConfig) -> Self {
        Self {
            classifier: FileClassifier::from_config(config),
            max_group_size_bytes: config.max_group_size_bytes,
        }
    }

    pub fn plan(
        &self,
        file_scan_tasks: Vec<FileScanTask>,
        base_snapshot_id: SnapshotId,
        desired_task_count_hint: usize,
        plan_timestamp: u64,
    ) -> Result<CompactionPlan> {
        if file_scan_tasks.is_empty() {
            return Err(PlanningError::EmptyInput(base_snapshot_id).into());
        }

        let mut delete_references: HashMap<String, BTreeSet<String>> = HashMap::new();
        for task in &file_scan_tasks {
            for delete_file in &task.deletes {
                delete_references
                    .entry(delete_file.path.clone())
                    .or_default()
                    .insert(task.data_file.path.clone());
            }
        }

        let scanned_data_files = file_scan_tasks.len();
        let classification = self.classifier.classify(file_scan_tasks);
        let fragment_files = classification.fragment_count();
        let delete_heavy_files = classification.delete_heavy_count();
        let skipped_files = classification.skip.len();

        let selected = classification
            .fragment
            .into_iter()
            .map(|SelectedTask { task, .. }| task);
        let grouping = TaskGrouper::new(self.max_group_size_bytes, desired_task_count_hint)
            .group(group_by_partition(selected), plan_timestamp);

        let stats = PlanStats {
            scanned_data_files,
            fragment_files,
            delete_heavy_files,
            skipped_files,
            oversized_files: grouping.oversized.len(),
            task_count: grouping.task_count(),
            total_input_bytes: grouping
                .tasks
                .values()
                .flatten()
                .map(|task| task.input_size_bytes)
                .sum(),
        };

        tracing::info!(
            "Planned {} compaction task(s) over {} partition(s) on snapshot {} with {}: {:?}",
            stats.task_count,
            grouping.tasks.len(),
            base_snapshot_id,
            self.classifier,
            stats
        );

        Ok(CompactionPlan {
            base_snapshot_id,
            plan_timestamp,
            tasks: grouping.tasks,
            delete_references,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompactionError;
    use crate::runtime::TaskStatus;
    use crate::test_utils::TestFileBuilder;

    fn config(max_group_size_bytes: u64) -> CompactionConfig {
        CompactionConfig::builder()
            .target_file_size_bytes(1000)
            .fragment_ratio(0.5)
            .max_delete_file_count(2)
            .max_delete_file_size_bytes(3000)
            .max_group_size_bytes(max_group_size_bytes)
            .build()
            .unwrap()
    }

    fn membership(plan: &CompactionPlan) -> Vec<(PartitionKey, BTreeSet<String>)> {
        plan.tasks()
            .map(|task| {
                (
                    task.partition.clone(),
                    task.data_files().map(|file| file.path.clone()).collect(),
                )
            })
            .collect()
    }

    fn scan() -> Vec<FileScanTask> {
        let shared = TestFileBuilder::equality_delete("p=1/eq.parquet", "p=1", 50);
        vec![
            TestFileBuilder::new("p=1/a.parquet")
                .partition("p=1")
                .size(300)
                .with_delete(shared.clone())
                .build(),
            TestFileBuilder::new("p=1/b.parquet")
                .partition("p=1")
                .size(200)
                .with_delete(shared)
                .build(),
            TestFileBuilder::new("p=1/big.parquet")
                .partition("p=1")
                .size(900)
                .build(),
            TestFileBuilder::new("p=2/c.parquet")
                .partition("p=2")
                .size(400)
                .build(),
            TestFileBuilder::new("p=2/heavy.parquet")
                .partition("p=2")
                .size(900)
                .with_equality_deletes(3)
                .build(),
        ]
    }

    #[test]
    fn test_plan() {
        let plan = CompactionPlanner::new(&config(10_000))
            .plan(scan(), SnapshotId(7), 0, 42)
            .unwrap();

        assert_eq!(plan.base_snapshot_id, SnapshotId(7));
        assert_eq!(plan.task_count(), 2);
        assert_eq!(plan.stats, PlanStats {
            scanned_data_files: 5,
            fragment_files: 3,
            delete_heavy_files: 1,
            skipped_files: 1,
            oversized_files: 0,
            task_count: 2,
            // p=1: 300 + 200 + 50 shared delete; p=2: 400 + 900 + 3 * 100
            total_input_bytes: 550 + 1600,
        });

        let p1 = &plan.tasks[&PartitionKey::new("p=1")];
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].delete_files.len(), 1);
        assert_eq!(
            plan.delete_references["p=1/eq.parquet"],
            BTreeSet::from(["p=1/a.parquet".to_owned(), "p=1/b.parquet".to_owned()])
        );
    }

    #[test]
    fn test_plan_partition_isolation() {
        let plan = CompactionPlanner::new(&config(10_000))
            .plan(scan(), SnapshotId(1), 0, 1)
            .unwrap();
        for (partition, tasks) in &plan.tasks {
            for task in tasks {
                assert_eq!(&task.partition, partition);
                assert!(task.data_files().all(|file| &file.partition == partition));
                assert!(task.delete_files.iter().all(|file| &file.partition == partition));
            }
        }
    }

    #[test]
    fn test_plan_respects_max_group_size() {
        let files = (0..20)
            .map(|i| {
                TestFileBuilder::new(&format!("f{}.parquet", i))
                    .size(100 + i * 10)
                    .build()
            })
            .collect();
        let plan = CompactionPlanner::new(&config(700))
            .plan(files, SnapshotId(1), 0, 1)
            .unwrap();

        assert!(plan.task_count() > 1);
        assert!(plan.tasks().all(|task| task.input_size_bytes <= 700));
        assert_eq!(
            plan.tasks().map(CompactionTask::data_file_count).sum::<usize>(),
            20
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = CompactionPlanner::new(&config(600));
        let first = planner.plan(scan(), SnapshotId(1), 2, 1).unwrap();
        let second = planner.plan(scan(), SnapshotId(1), 2, 2).unwrap();

        assert_eq!(membership(&first), membership(&second));
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn test_plan_does_not_depend_on_scan_order() {
        let files: Vec<FileScanTask> = ["a.parquet", "b.parquet", "c.parquet"]
            .iter()
            .map(|path| TestFileBuilder::new(path).size(100).build())
            .collect();
        let mut reversed = files.clone();
        reversed.reverse();

        let planner = CompactionPlanner::new(&config(200));
        let forward = planner.plan(files, SnapshotId(1), 0, 1).unwrap();
        let backward = planner.plan(reversed, SnapshotId(1), 0, 1).unwrap();

        assert_eq!(forward.task_count(), 2);
        assert_eq!(membership(&forward), membership(&backward));
    }

    #[test]
    fn test_plan_without_candidates() {
        let files = vec![TestFileBuilder::new("large.parquet").size(5000).build()];
        let plan = CompactionPlanner::new(&config(10_000))
            .plan(files, SnapshotId(3), 0, 1)
            .unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.stats.skipped_files, 1);
        assert!(plan.init_runtimes().is_empty());
    }

    #[test]
    fn test_plan_empty_input() {
        let err = CompactionPlanner::new(&config(10_000))
            .plan(vec![], SnapshotId(3), 0, 1)
            .unwrap_err();
        assert!(matches!(
            err,
            CompactionError::Planning(PlanningError::EmptyInput(SnapshotId(3)))
        ));
    }

    #[test]
    fn test_init_runtimes() {
        let plan = CompactionPlanner::new(&config(10_000))
            .plan(scan(), SnapshotId(1), 0, 9)
            .unwrap();
        let runtimes = plan.init_runtimes();

        assert_eq!(runtimes.values().map(Vec::len).sum::<usize>(), plan.task_count());
        for runtime in runtimes.values().flatten() {
            assert_eq!(runtime.status(), TaskStatus::Init);
            assert_eq!(runtime.planned_time(), 9);
            assert!(plan.task(runtime.task_id()).is_some());
        }
    }
}
