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

//! Entry point of the engine: plan against the table head, run the plan on
//! an executor and commit the prepared results.

use std::sync::Arc;

use mixtrics::metrics::BoxedRegistry;
use mixtrics::registry::noop::NoopMetricsRegistry;
use tokio::sync::mpsc;

use crate::common::{CompactionMetricsRecorder, Metrics, current_time_ms};
use crate::config::CompactionConfig;
use crate::error::PlanningError;
use crate::executor::{CompactionExecutor, dispatch_tasks};
use crate::file_selection::{FileClassifier, FileSelector, SnapshotAnalyzer, SnapshotStats};
use crate::runtime::{TaskRuntimeTracker, TaskRuntimesByPartition};
use crate::table::Table;
use crate::{CompactionError, Result};

pub mod commit;
pub mod planner;

pub use commit::{CommitCoordinator, CommitOutcome};
pub use planner::{CompactionPlan, CompactionPlanner, PlanStats};

/// Builder for [`Compaction`].
pub struct CompactionBuilder {
    table: Arc<dyn Table>,

    config: Option<CompactionConfig>,
    registry: Option<BoxedRegistry>,
}

impl CompactionBuilder {
    pub fn new(table: Arc<dyn Table>) -> Self {
        Self {
            table,

            config: None,
            registry: None,
        }
    }

    pub fn with_config(mut self, config: CompactionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Compaction> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Box::new(NoopMetricsRegistry));
        let metrics = CompactionMetricsRecorder::new(
            Arc::new(Metrics::new(registry)),
            self.table.name().to_owned(),
        );

        Ok(Compaction {
            table: self.table,
            config: Arc::new(config),
            metrics,
        })
    }
}

/// Compaction of a single table.
///
/// Planning is pure and can run any number of times. Commit is optimistic:
/// if the table moved on in a way that touches the planned files, the commit
/// fails with [`CompactionError::Conflict`] and the caller decides whether to
/// plan again.
pub struct Compaction {
    table: Arc<dyn Table>,
    config: Arc<CompactionConfig>,
    metrics: CompactionMetricsRecorder,
}

impl Compaction {
    pub fn builder(table: Arc<dyn Table>) -> CompactionBuilder {
        CompactionBuilder::new(table)
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// File statistics of the current head snapshot.
    pub async fn analyze(&self) -> Result<SnapshotStats> {
        let snapshot_id = self
            .table
            .current_snapshot_id()
            .await?
            .ok_or(PlanningError::NoSnapshot)?;
        let files = FileSelector::scan_data_files(self.table.as_ref(), snapshot_id).await?;
        Ok(SnapshotAnalyzer::analyze(
            &files,
            &FileClassifier::from_config(&self.config),
        ))
    }

    /// Plans a compaction of the current head snapshot.
    pub async fn plan(&self, desired_task_count_hint: usize) -> Result<CompactionPlan> {
        let snapshot_id = self
            .table
            .current_snapshot_id()
            .await?
            .ok_or(PlanningError::NoSnapshot)?;
        let files = FileSelector::scan_data_files(self.table.as_ref(), snapshot_id).await?;

        let plan = CompactionPlanner::new(&self.config).plan(
            files,
            snapshot_id,
            desired_task_count_hint,
            current_time_ms(),
        )?;
        self.metrics.record_plan(plan.task_count());
        Ok(plan)
    }

    pub async fn commit(
        &self,
        plan: &CompactionPlan,
        runtimes: &mut TaskRuntimesByPartition,
    ) -> Result<CommitOutcome> {
        CommitCoordinator::new(self.table.as_ref(), &self.metrics)
            .commit(plan, runtimes)
            .await
    }

    /// Plans, runs every task on `executor` and commits whatever got prepared.
    /// A table without files compacts to [`CommitOutcome::NoOp`].
    pub async fn compact(
        &self,
        executor: Arc<dyn CompactionExecutor>,
        desired_task_count_hint: usize,
    ) -> Result<CommitOutcome> {
        let plan = match self.plan(desired_task_count_hint).await {
            Ok(plan) => plan,
            Err(CompactionError::Planning(PlanningError::EmptyInput(snapshot_id))) => {
                tracing::info!(
                    "Table {} has no files at snapshot {}, nothing to compact",
                    self.table.name(),
                    snapshot_id
                );
                return Ok(CommitOutcome::NoOp);
            }
            Err(e) => return Err(e),
        };
        if plan.is_empty() {
            return Ok(CommitOutcome::NoOp);
        }

        let mut tracker = TaskRuntimeTracker::for_plan(&plan);
        let (sender, receiver) = mpsc::unbounded_channel();
        let handles = dispatch_tasks(
            executor,
            plan.tasks().cloned().collect(),
            self.config.target_file_size_bytes,
            sender,
        );
        tracker.drain(receiver).await;
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Compaction worker of table {} aborted: {}", self.table.name(), e);
            }
        }

        self.commit(&plan, tracker.runtimes_by_partition_mut()).await
    }
}
