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

//! Contract of the workers that rewrite file contents.
//!
//! The engine never calls into a worker and then waits on it inline. Tasks
//! are handed out with [`dispatch_tasks`], which runs each one on its own
//! tokio task and reports progress as [`TaskReport`] messages; the
//! [`TaskRuntimeTracker`](crate::runtime::TaskRuntimeTracker) applies them.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::{CompactionError, Result};
use crate::common::current_time_ms;
use crate::file_selection::CompactionTask;
use crate::runtime::{TaskOutput, TaskReport};
use crate::spec::ContentFile;

pub mod mock;

pub use mock::MockExecutor;

#[async_trait]
pub trait CompactionExecutor: Send + Sync + 'static {
    async fn rewrite_files(&self, request: RewriteFilesRequest) -> Result<RewriteFilesResponse>;
}

#[derive(Debug, Clone)]
pub struct RewriteFilesRequest {
    pub task: CompactionTask,
    pub target_file_size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteFilesResponse {
    /// New data files plus any delete files the rewrite had to emit.
    pub output_files: Vec<ContentFile>,
    pub stat: RewriteFilesStat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteFilesStat {
    pub input_files_count: usize,
    pub input_total_bytes: u64,
    pub output_files_count: usize,
    pub output_total_bytes: u64,
}

/// Runs every task on `executor` in the background and streams its progress
/// to `sender`. Returns the join handles of the spawned workers.
pub fn dispatch_tasks(
    executor: Arc<dyn CompactionExecutor>,
    tasks: Vec<CompactionTask>,
    target_file_size_bytes: u64,
    sender: UnboundedSender<TaskReport>,
) -> Vec<JoinHandle<()>> {
    tasks
        .into_iter()
        .map(|task| {
            let executor = executor.clone();
            let sender = sender.clone();
            tokio::spawn(async move {
                let task_id = task.task_id.clone();
                let send = |report: TaskReport| {
                    if sender.send(report).is_err() {
                        tracing::debug!("Report receiver for task {} is gone", task_id);
                    }
                };

                send(TaskReport::Scheduled {
                    task_id: task_id.clone(),
                });
                send(TaskReport::Executing {
                    task_id: task_id.clone(),
                });

                let start = Instant::now();
                let result = executor
                    .rewrite_files(RewriteFilesRequest {
                        task,
                        target_file_size_bytes,
                    })
                    .await
                    .and_then(|response| {
                        TaskOutput::from_files(
                            &response.output_files,
                            current_time_ms(),
                            start.elapsed().as_millis() as u64,
                        )
                        .map_err(|e| CompactionError::Execution(e.to_string()))
                    });

                match result {
                    Ok(output) => send(TaskReport::Prepared {
                        task_id: task_id.clone(),
                        output,
                    }),
                    Err(e) => send(TaskReport::Failed {
                        task_id: task_id.clone(),
                        reason: e.to_string(),
                    }),
                }
            })
        })
        .collect()
}
