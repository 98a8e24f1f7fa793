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

//! Applies execution reports to task runtimes.
//!
//! Executors never touch runtimes directly: they send [`TaskReport`]s over a
//! channel and the tracker folds them into the runtimes of the plan.

use tokio::sync::mpsc::UnboundedReceiver;

use super::{TaskRuntime, TaskRuntimesByPartition};
use crate::Result;
use crate::common::current_time_ms;
use crate::compaction::CompactionPlan;
use crate::spec::{ContentFile, TaskId};

/// Output of a finished rewrite, with files already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub target_files: Vec<Vec<u8>>,
    pub new_file_size: u64,
    pub report_time: u64,
    pub cost_time_ms: u64,
}

impl TaskOutput {
    pub fn from_files(
        files: &[ContentFile],
        report_time: u64,
        cost_time_ms: u64,
    ) -> std::result::Result<Self, serde_json::Error> {
        let target_files = files
            .iter()
            .map(ContentFile::encode)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            target_files,
            new_file_size: files.iter().map(ContentFile::file_size_in_bytes).sum(),
            report_time,
            cost_time_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Scheduled { task_id: TaskId },
    Executing { task_id: TaskId },
    Prepared { task_id: TaskId, output: TaskOutput },
    Failed { task_id: TaskId, reason: String },
}

impl TaskReport {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskReport::Scheduled { task_id }
            | TaskReport::Executing { task_id }
            | TaskReport::Prepared { task_id, .. }
            | TaskReport::Failed { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskRuntimeTracker {
    runtimes: TaskRuntimesByPartition,
}

impl TaskRuntimeTracker {
    pub fn new(runtimes: TaskRuntimesByPartition) -> Self {
        Self { runtimes }
    }

    pub fn for_plan(plan: &CompactionPlan) -> Self {
        Self::new(plan.init_runtimes())
    }

    pub fn runtime(&self, task_id: &TaskId) -> Option<&TaskRuntime> {
        self.runtimes
            .get(&task_id.partition)?
            .iter()
            .find(|runtime| runtime.task_id() == task_id)
    }

    fn runtime_mut(&mut self, task_id: &TaskId) -> Option<&mut TaskRuntime> {
        self.runtimes
            .get_mut(&task_id.partition)?
            .iter_mut()
            .find(|runtime| runtime.task_id() == task_id)
    }

    /// Applies one report. Reports for tasks outside the plan are dropped.
    pub fn apply(&mut self, report: TaskReport) -> Result<()> {
        let now = current_time_ms();
        let Some(runtime) = self.runtime_mut(report.task_id()) else {
            tracing::warn!(
                "Ignoring report for unknown compaction task {}",
                report.task_id()
            );
            return Ok(());
        };

        match report {
            TaskReport::Scheduled { .. } => runtime.schedule(now),
            TaskReport::Executing { .. } => runtime.start_executing(now),
            TaskReport::Prepared { output, .. } => runtime.prepare(output, now),
            TaskReport::Failed { reason, .. } => {
                tracing::warn!("Compaction task {} failed: {}", runtime.task_id(), reason);
                runtime.fail(reason, now)
            }
        }
    }

    /// Applies reports until every sender is dropped. A report that does not
    /// fit the task's current state is logged and skipped.
    pub async fn drain(&mut self, mut receiver: UnboundedReceiver<TaskReport>) {
        while let Some(report) = receiver.recv().await {
            if let Err(e) = self.apply(report) {
                tracing::warn!("Dropping compaction task report: {}", e);
            }
        }
    }

    pub fn runtimes_by_partition(&self) -> &TaskRuntimesByPartition {
        &self.runtimes
    }

    pub fn runtimes_by_partition_mut(&mut self) -> &mut TaskRuntimesByPartition {
        &mut self.runtimes
    }

    pub fn into_runtimes(self) -> TaskRuntimesByPartition {
        self.runtimes
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::runtime::TaskStatus;
    use crate::spec::PartitionKey;
    use crate::test_utils::TestFileBuilder;

    fn task_id(partition: &str, sequence: u32) -> TaskId {
        TaskId {
            partition: PartitionKey::new(partition),
            sequence,
            plan_timestamp: 100,
        }
    }

    fn tracker() -> TaskRuntimeTracker {
        let mut runtimes = TaskRuntimesByPartition::new();
        runtimes.insert(PartitionKey::new("p=1"), vec![
            TaskRuntime::new(task_id("p=1", 0), 100),
            TaskRuntime::new(task_id("p=1", 1), 100),
        ]);
        runtimes.insert(PartitionKey::new("p=2"), vec![TaskRuntime::new(
            task_id("p=2", 0),
            100,
        )]);
        TaskRuntimeTracker::new(runtimes)
    }

    fn prepared(task_id: TaskId) -> TaskReport {
        let file: ContentFile = TestFileBuilder::data_file("out.parquet", "p=1", 10).into();
        TaskReport::Prepared {
            task_id,
            output: TaskOutput::from_files(&[file], 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_apply_reports() {
        let mut tracker = tracker();
        let id = task_id("p=1", 1);
        tracker
            .apply(TaskReport::Scheduled {
                task_id: id.clone(),
            })
            .unwrap();
        tracker
            .apply(TaskReport::Executing {
                task_id: id.clone(),
            })
            .unwrap();
        tracker.apply(prepared(id.clone())).unwrap();

        assert_eq!(tracker.runtime(&id).unwrap().status(), TaskStatus::Prepared);
        assert_eq!(
            tracker.runtime(&task_id("p=1", 0)).unwrap().status(),
            TaskStatus::Init
        );

        // Out of order: prepared before scheduled.
        assert!(tracker.apply(prepared(task_id("p=2", 0))).is_err());
        // Unknown tasks are ignored.
        assert!(tracker.apply(prepared(task_id("p=3", 0))).is_ok());
    }

    #[tokio::test]
    async fn test_drain_until_senders_close() {
        let mut tracker = tracker();
        let (sender, receiver) = mpsc::unbounded_channel();

        let id = task_id("p=2", 0);
        let worker = {
            let sender = sender.clone();
            let id = id.clone();
            tokio::spawn(async move {
                sender
                    .send(TaskReport::Scheduled {
                        task_id: id.clone(),
                    })
                    .unwrap();
                sender
                    .send(TaskReport::Executing {
                        task_id: id.clone(),
                    })
                    .unwrap();
                sender
                    .send(TaskReport::Failed {
                        task_id: id,
                        reason: "oom".to_owned(),
                    })
                    .unwrap();
            })
        };
        drop(sender);

        tracker.drain(receiver).await;
        worker.await.unwrap();

        let runtime = tracker.runtime(&id).unwrap();
        assert_eq!(runtime.status(), TaskStatus::Failed);
        assert_eq!(runtime.fail_reason(), Some("oom"));
    }
}
