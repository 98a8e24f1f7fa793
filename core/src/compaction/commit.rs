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

//! Publishes the outputs of prepared tasks as one rewrite snapshot.
//!
//! Only `Prepared` runtimes take part. Each of them is decoded and validated
//! on its own; a broken task is downgraded to `Failed` and left out while the
//! rest of the plan still commits. The surviving tasks are applied in a single
//! table transaction against the plan's base snapshot, so either all of their
//! inputs are replaced by all of their outputs or nothing changes.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use super::planner::CompactionPlan;
use crate::Result;
use crate::common::{CompactionMetricsRecorder, current_time_ms};
use crate::error::ValidationError;
use crate::runtime::{TaskRuntimesByPartition, TaskStatus};
use crate::spec::{ContentFile, DataFile, DeleteFile, PartitionKey, SnapshotId, TaskId};
use crate::table::{RewriteFiles, TableWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No prepared task survived validation; the table was not touched.
    NoOp,
    Committed {
        snapshot_id: SnapshotId,
        committed_tasks: Vec<TaskId>,
        failed_tasks: Vec<TaskId>,
        removed_data_files: usize,
        removed_delete_files: usize,
        added_data_files: usize,
        added_delete_files: usize,
    },
}

impl CommitOutcome {
    pub fn snapshot_id(&self) -> Option<SnapshotId> {
        match self {
            CommitOutcome::NoOp => None,
            CommitOutcome::Committed { snapshot_id, .. } => Some(*snapshot_id),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, CommitOutcome::NoOp)
    }
}

/// Position of a runtime inside [`TaskRuntimesByPartition`].
type RuntimeSlot = (PartitionKey, usize);

pub struct CommitCoordinator<'a, W: ?Sized> {
    writer: &'a W,
    metrics: &'a CompactionMetricsRecorder,
}

impl<'a, W> CommitCoordinator<'a, W>
where W: TableWriter + ?Sized
{
    pub fn new(writer: &'a W, metrics: &'a CompactionMetricsRecorder) -> Self {
        Self { writer, metrics }
    }

    /// Commits every `Prepared` runtime of `plan`.
    ///
    /// On conflict or transaction failure the error is returned and
    /// `runtimes` is left exactly as it was passed in.
    pub async fn commit(
        &self,
        plan: &CompactionPlan,
        runtimes: &mut TaskRuntimesByPartition,
    ) -> Result<CommitOutcome> {
        let mut included: Vec<(RuntimeSlot, Vec<ContentFile>)> = vec![];
        let mut rejected: Vec<(RuntimeSlot, String)> = vec![];

        for (partition, partition_runtimes) in &*runtimes {
            for (index, runtime) in partition_runtimes.iter().enumerate() {
                if runtime.status() != TaskStatus::Prepared {
                    continue;
                }
                let slot = (partition.clone(), index);
                let task_id = runtime.task_id();
                let Some(task) = plan.task(task_id) else {
                    tracing::warn!("Prepared task {} is not part of the plan, skipping", task_id);
                    continue;
                };

                let files = match runtime.decode_target_files() {
                    Ok(files) => files,
                    Err(e) => {
                        tracing::warn!("Excluding task {} from commit: {}", task_id, e);
                        rejected.push((slot, e.to_string()));
                        continue;
                    }
                };
                match Self::validate_outputs(task_id, &task.partition, &files) {
                    Ok(()) => included.push((slot, files)),
                    Err(e) => {
                        tracing::warn!("Excluding task {} from commit: {}", task_id, e);
                        rejected.push((slot, e.to_string()));
                    }
                }
            }
        }

        let now = current_time_ms();
        if included.is_empty() {
            let failed = Self::fail_rejected(runtimes, rejected, now)?;
            self.metrics.record_failed_tasks(failed.len());
            tracing::info!(
                "Nothing to commit for plan on snapshot {} ({} task(s) rejected)",
                plan.base_snapshot_id,
                failed.len()
            );
            return Ok(CommitOutcome::NoOp);
        }

        let rewrite = Self::build_rewrite(plan, runtimes, &included);
        tracing::info!(
            "Committing {} task(s) on base snapshot {}: removing {} file(s) ({}B), adding {} file(s) ({}B)",
            included.len(),
            plan.base_snapshot_id,
            rewrite.removed_files_count(),
            rewrite.removed_bytes(),
            rewrite.added_files_count(),
            rewrite.added_bytes()
        );

        let start = Instant::now();
        let snapshot_id = match self.apply(plan.base_snapshot_id, rewrite.clone()).await {
            Ok(snapshot_id) => snapshot_id,
            Err(e) => {
                if e.is_conflict() {
                    self.metrics.record_commit_conflict();
                    tracing::warn!(
                        "Compaction commit on base snapshot {} conflicted: {}",
                        plan.base_snapshot_id,
                        e
                    );
                } else {
                    self.metrics.record_commit_failure();
                    tracing::error!(
                        "Compaction commit on base snapshot {} failed: {}",
                        plan.base_snapshot_id,
                        e
                    );
                }
                return Err(e);
            }
        };
        self.metrics
            .record_commit_duration(start.elapsed().as_secs_f64() * 1000.0);

        let now = current_time_ms();
        let failed_tasks = Self::fail_rejected(runtimes, rejected, now)?;
        let mut committed_tasks = Vec::with_capacity(included.len());
        for ((partition, index), _) in &included {
            if let Some(runtime) = runtimes
                .get_mut(partition)
                .and_then(|partition_runtimes| partition_runtimes.get_mut(*index))
            {
                runtime.mark_committed(now)?;
                committed_tasks.push(runtime.task_id().clone());
            }
        }

        self.metrics.record_commit_success(
            rewrite.removed_files_count(),
            rewrite.removed_bytes(),
            rewrite.added_files_count(),
        );
        self.metrics.record_failed_tasks(failed_tasks.len());
        tracing::info!(
            "Committed snapshot {} with {} task(s), {} task(s) failed",
            snapshot_id,
            committed_tasks.len(),
            failed_tasks.len()
        );

        Ok(CommitOutcome::Committed {
            snapshot_id,
            committed_tasks,
            failed_tasks,
            removed_data_files: rewrite.remove_data_files.len(),
            removed_delete_files: rewrite.remove_delete_files.len(),
            added_data_files: rewrite.add_data_files.len(),
            added_delete_files: rewrite.add_delete_files.len(),
        })
    }

    /// Outputs must exist and stay in the partition of their task.
    fn validate_outputs(
        task_id: &TaskId,
        partition: &PartitionKey,
        files: &[ContentFile],
    ) -> std::result::Result<(), ValidationError> {
        if files.is_empty() {
            return Err(ValidationError::MissingOutput {
                task_id: task_id.clone(),
            });
        }
        match files.iter().find(|file| file.partition() != partition) {
            Some(file) => Err(ValidationError::PartitionMismatch {
                task_id: task_id.clone(),
                path: file.path().to_owned(),
                expected: partition.clone(),
                actual: file.partition().clone(),
            }),
            None => Ok(()),
        }
    }

    async fn apply(&self, base_snapshot_id: SnapshotId, rewrite: RewriteFiles) -> Result<SnapshotId> {
        let handle = self.writer.begin_rewrite(base_snapshot_id).await?;
        self.writer.apply(handle, rewrite).await
    }

    /// Unions the inputs and outputs of the included tasks.
    ///
    /// A delete file is kept live while some data file it applies to at the
    /// base snapshot is not removed by this rewrite.
    fn build_rewrite(
        plan: &CompactionPlan,
        runtimes: &TaskRuntimesByPartition,
        included: &[(RuntimeSlot, Vec<ContentFile>)],
    ) -> RewriteFiles {
        let mut remove_data: BTreeMap<&str, &DataFile> = BTreeMap::new();
        let mut remove_delete: BTreeMap<&str, &DeleteFile> = BTreeMap::new();
        let mut add: BTreeMap<&str, &ContentFile> = BTreeMap::new();

        for ((partition, index), outputs) in included {
            let Some(task) = runtimes
                .get(partition)
                .and_then(|partition_runtimes| partition_runtimes.get(*index))
                .and_then(|runtime| plan.task(runtime.task_id()))
            else {
                continue;
            };
            for data_file in task.data_files() {
                remove_data.insert(&data_file.path, data_file);
            }
            for delete_file in &task.delete_files {
                remove_delete.insert(&delete_file.path, delete_file);
            }
            for output in outputs {
                add.entry(output.path()).or_insert(output);
            }
        }

        let removed_data_paths: BTreeSet<&str> = remove_data.keys().copied().collect();
        remove_delete.retain(|path, _| {
            let still_referenced = plan.delete_references.get(*path).is_some_and(|referenced| {
                referenced
                    .iter()
                    .any(|data_path| !removed_data_paths.contains(data_path.as_str()))
            });
            if still_referenced {
                tracing::debug!("Keeping delete file {} still referenced by live data", path);
            }
            !still_referenced
        });

        let mut rewrite = RewriteFiles {
            remove_data_files: remove_data.into_values().cloned().collect(),
            remove_delete_files: remove_delete.into_values().cloned().collect(),
            ..Default::default()
        };
        for file in add.into_values() {
            rewrite.add_file(file.clone());
        }
        rewrite
    }

    fn fail_rejected(
        runtimes: &mut TaskRuntimesByPartition,
        rejected: Vec<(RuntimeSlot, String)>,
        now: u64,
    ) -> Result<Vec<TaskId>> {
        let mut failed = Vec::with_capacity(rejected.len());
        for ((partition, index), reason) in rejected {
            if let Some(runtime) = runtimes
                .get_mut(&partition)
                .and_then(|partition_runtimes| partition_runtimes.get_mut(index))
            {
                runtime.fail(reason, now)?;
                failed.push(runtime.task_id().clone());
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mixtrics::registry::noop::NoopMetricsRegistry;

    use super::*;
    use crate::CompactionError;
    use crate::common::Metrics;
    use crate::compaction::CompactionPlanner;
    use crate::config::CompactionConfig;
    use crate::file_selection::FileSelector;
    use crate::runtime::{TaskOutput, TaskRuntime};
    use crate::table::{MemoryTable, TableReader};
    use crate::test_utils::TestFileBuilder;

    fn recorder() -> CompactionMetricsRecorder {
        CompactionMetricsRecorder::new(
            Arc::new(Metrics::new(Box::new(NoopMetricsRegistry))),
            "test".to_owned(),
        )
    }

    async fn plan(table: &MemoryTable) -> CompactionPlan {
        let config = CompactionConfig::builder()
            .target_file_size_bytes(1000)
            .fragment_ratio(0.5)
            .build()
            .unwrap();
        let snapshot_id = table.current_snapshot_id().await.unwrap().unwrap();
        let files = FileSelector::scan_data_files(table, snapshot_id)
            .await
            .unwrap();
        CompactionPlanner::new(&config)
            .plan(files, snapshot_id, 0, 1)
            .unwrap()
    }

    fn prepare(runtime: &mut TaskRuntime, output: TaskOutput) {
        runtime.schedule(1).unwrap();
        runtime.start_executing(2).unwrap();
        runtime.prepare(output, 3).unwrap();
    }

    /// Prepares every runtime with one merged output file per task.
    fn prepare_all(plan: &CompactionPlan) -> TaskRuntimesByPartition {
        let mut runtimes = plan.init_runtimes();
        for runtime in runtimes.values_mut().flatten() {
            let task = plan.task(runtime.task_id()).unwrap();
            let merged = TestFileBuilder::data_file(
                &format!("merged-{}.parquet", task.task_id),
                task.partition.as_str(),
                task.input_size_bytes,
            );
            prepare(runtime, TaskOutput::from_files(&[merged.into()], 3, 1).unwrap());
        }
        runtimes
    }

    fn live_paths(files: &(Vec<DataFile>, Vec<DeleteFile>)) -> BTreeSet<String> {
        files
            .0
            .iter()
            .map(|file| file.path.clone())
            .chain(files.1.iter().map(|file| file.path.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_commit_replaces_inputs() {
        let table = MemoryTable::new("t");
        table
            .append(
                vec![
                    TestFileBuilder::data_file("a.parquet", "", 100),
                    TestFileBuilder::data_file("b.parquet", "", 200),
                ],
                vec![],
            )
            .await
            .unwrap();
        table
            .append(vec![], vec![
                TestFileBuilder::equality_delete("eq.parquet", "", 10),
                TestFileBuilder::positional_delete("pos.parquet", "", "a.parquet", 10),
            ])
            .await
            .unwrap();

        let plan = plan(&table).await;
        assert_eq!(plan.task_count(), 1);
        let mut runtimes = prepare_all(&plan);

        let recorder = recorder();
        let outcome = CommitCoordinator::new(&table, &recorder)
            .commit(&plan, &mut runtimes)
            .await
            .unwrap();

        let CommitOutcome::Committed {
            snapshot_id,
            committed_tasks,
            failed_tasks,
            removed_data_files,
            removed_delete_files,
            added_data_files,
            added_delete_files,
        } = outcome
        else {
            panic!("expected a commit");
        };
        assert_eq!(table.current_snapshot_id().await.unwrap(), Some(snapshot_id));
        assert_eq!(committed_tasks.len(), 1);
        assert!(failed_tasks.is_empty());
        assert_eq!(
            (removed_data_files, removed_delete_files, added_data_files, added_delete_files),
            (2, 2, 1, 0)
        );

        let live = table.live_files().await;
        assert_eq!(live.0.len(), 1);
        assert!(live.0[0].path.starts_with("merged-"));
        assert!(live.1.is_empty());
        assert!(
            runtimes
                .values()
                .flatten()
                .all(|runtime| runtime.status() == TaskStatus::Committed
                    && runtime.commit_time().is_some())
        );
    }

    #[tokio::test]
    async fn test_commit_excludes_broken_tasks() {
        let table = MemoryTable::new("t");
        table
            .append(
                ["p=1", "p=2", "p=3"]
                    .iter()
                    .flat_map(|partition| {
                        (0..2).map(move |i| {
                            TestFileBuilder::data_file(
                                &format!("{}/{}.parquet", partition, i),
                                partition,
                                100,
                            )
                        })
                    })
                    .collect(),
                vec![],
            )
            .await
            .unwrap();
        let before = live_paths(&table.live_files().await);

        let plan = plan(&table).await;
        assert_eq!(plan.task_count(), 3);
        let mut runtimes = prepare_all(&plan);

        // p=1 reports garbage bytes, p=2 reports no files at all.
        let broken = TaskOutput {
            target_files: vec![b"not a file".to_vec()],
            new_file_size: 0,
            report_time: 3,
            cost_time_ms: 1,
        };
        for (partition, output) in [
            ("p=1", broken),
            ("p=2", TaskOutput::from_files(&[], 3, 1).unwrap()),
        ] {
            let runtime = &mut runtimes.get_mut(&PartitionKey::new(partition)).unwrap()[0];
            *runtime = TaskRuntime::new(runtime.task_id().clone(), 1);
            prepare(runtime, output);
        }

        let recorder = recorder();
        let outcome = CommitCoordinator::new(&table, &recorder)
            .commit(&plan, &mut runtimes)
            .await
            .unwrap();

        let CommitOutcome::Committed {
            committed_tasks,
            failed_tasks,
            ..
        } = outcome
        else {
            panic!("expected a commit");
        };
        assert_eq!(committed_tasks.len(), 1);
        assert_eq!(committed_tasks[0].partition, PartitionKey::new("p=3"));
        assert_eq!(failed_tasks.len(), 2);

        for partition in ["p=1", "p=2"] {
            let runtime = &runtimes[&PartitionKey::new(partition)][0];
            assert_eq!(runtime.status(), TaskStatus::Failed);
            assert!(runtime.fail_reason().is_some());
        }

        // Only p=3 was rewritten.
        let after = live_paths(&table.live_files().await);
        for path in &before {
            assert_eq!(after.contains(path), !path.starts_with("p=3/"), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_commit_rejects_output_in_foreign_partition() {
        let table = MemoryTable::new("t");
        table
            .append(
                ["p=1", "p=2"]
                    .iter()
                    .flat_map(|partition| {
                        (0..2).map(move |i| {
                            TestFileBuilder::data_file(
                                &format!("{}/{}.parquet", partition, i),
                                partition,
                                100,
                            )
                        })
                    })
                    .collect(),
                vec![],
            )
            .await
            .unwrap();

        let plan = plan(&table).await;
        let mut runtimes = prepare_all(&plan);
        let stray = TestFileBuilder::data_file("p=2/stray.parquet", "p=2", 200);
        let runtime = &mut runtimes.get_mut(&PartitionKey::new("p=1")).unwrap()[0];
        *runtime = TaskRuntime::new(runtime.task_id().clone(), 1);
        prepare(runtime, TaskOutput::from_files(&[stray.into()], 3, 1).unwrap());

        let recorder = recorder();
        let outcome = CommitCoordinator::new(&table, &recorder)
            .commit(&plan, &mut runtimes)
            .await
            .unwrap();

        let CommitOutcome::Committed {
            committed_tasks,
            failed_tasks,
            ..
        } = outcome
        else {
            panic!("expected a commit");
        };
        assert_eq!(committed_tasks.len(), 1);
        assert_eq!(committed_tasks[0].partition, PartitionKey::new("p=2"));
        assert_eq!(failed_tasks.len(), 1);

        let runtime = &runtimes[&PartitionKey::new("p=1")][0];
        assert_eq!(runtime.status(), TaskStatus::Failed);
        assert!(runtime.fail_reason().unwrap().contains("p=2/stray.parquet"));

        let (live_data, _) = table.live_files().await;
        let live: BTreeSet<&str> = live_data.iter().map(|file| file.path.as_str()).collect();
        assert!(live.contains("p=1/0.parquet"));
        assert!(live.contains("p=1/1.parquet"));
        assert!(!live.contains("p=2/stray.parquet"));
    }

    #[tokio::test]
    async fn test_commit_without_prepared_tasks() {
        let table = MemoryTable::new("t");
        let base = table
            .append(
                vec![
                    TestFileBuilder::data_file("a.parquet", "", 100),
                    TestFileBuilder::data_file("b.parquet", "", 100),
                ],
                vec![],
            )
            .await
            .unwrap();

        let plan = plan(&table).await;
        let mut runtimes = plan.init_runtimes();
        for runtime in runtimes.values_mut().flatten() {
            runtime.schedule(1).unwrap();
            runtime.start_executing(2).unwrap();
            runtime.fail("worker crashed", 3).unwrap();
        }

        let recorder = recorder();
        let outcome = CommitCoordinator::new(&table, &recorder)
            .commit(&plan, &mut runtimes)
            .await
            .unwrap();
        assert!(outcome.is_noop());
        assert_eq!(table.current_snapshot_id().await.unwrap(), Some(base));
        assert_eq!(table.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_conflict_leaves_everything_untouched() {
        let table = MemoryTable::new("t");
        table
            .append(
                vec![
                    TestFileBuilder::data_file("a.parquet", "", 100),
                    TestFileBuilder::data_file("b.parquet", "", 100),
                ],
                vec![],
            )
            .await
            .unwrap();
        let plan = plan(&table).await;
        let mut runtimes = prepare_all(&plan);

        // A concurrent writer deletes rows from a file the plan rewrites.
        table
            .append(vec![], vec![TestFileBuilder::positional_delete(
                "late.parquet",
                "",
                "a.parquet",
                10,
            )])
            .await
            .unwrap();
        let head = table.current_snapshot_id().await.unwrap();
        let before = runtimes.clone();

        let recorder = recorder();
        let err = CommitCoordinator::new(&table, &recorder)
            .commit(&plan, &mut runtimes)
            .await
            .unwrap_err();

        assert!(err.is_conflict(), "{}", err);
        assert_eq!(runtimes, before);
        assert_eq!(table.current_snapshot_id().await.unwrap(), head);
    }

    #[tokio::test]
    async fn test_commit_transaction_failure() {
        let table = MemoryTable::new("t");
        table
            .append(
                vec![
                    TestFileBuilder::data_file("a.parquet", "", 100),
                    TestFileBuilder::data_file("b.parquet", "", 100),
                ],
                vec![],
            )
            .await
            .unwrap();
        let plan = plan(&table).await;
        let mut runtimes = prepare_all(&plan);
        let before = runtimes.clone();
        table.inject_apply_failure("disk full").await;

        let recorder = recorder();
        let err = CommitCoordinator::new(&table, &recorder)
            .commit(&plan, &mut runtimes)
            .await
            .unwrap_err();

        assert!(matches!(err, CompactionError::Transaction(_)), "{}", err);
        assert_eq!(runtimes, before);
        assert_eq!(table.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_keeps_delete_still_referenced() {
        let table = MemoryTable::new("t");
        table
            .append(
                vec![
                    TestFileBuilder::data_file("small_a.parquet", "", 100),
                    TestFileBuilder::data_file("small_b.parquet", "", 100),
                    TestFileBuilder::data_file("large.parquet", "", 900),
                ],
                vec![],
            )
            .await
            .unwrap();
        table
            .append(vec![], vec![TestFileBuilder::equality_delete(
                "shared_eq.parquet",
                "",
                10,
            )])
            .await
            .unwrap();

        let plan = plan(&table).await;
        assert_eq!(plan.tasks().next().unwrap().data_file_count(), 2);
        let mut runtimes = prepare_all(&plan);

        let recorder = recorder();
        let outcome = CommitCoordinator::new(&table, &recorder)
            .commit(&plan, &mut runtimes)
            .await
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed {
            removed_data_files: 2,
            removed_delete_files: 0,
            ..
        }));

        // The delete still masks rows of the untouched large file.
        let snapshot_id = table.current_snapshot_id().await.unwrap().unwrap();
        let scan = FileSelector::scan_data_files(&table, snapshot_id)
            .await
            .unwrap();
        let large = scan
            .iter()
            .find(|task| task.data_file.path == "large.parquet")
            .unwrap();
        assert_eq!(large.deletes.len(), 1);
        assert_eq!(large.deletes[0].path, "shared_eq.parquet");
    }
}
