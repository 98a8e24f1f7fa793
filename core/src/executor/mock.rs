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

use uuid::Uuid;

use super::*;
use crate::CompactionError;
use crate::spec::{DataFile, DeleteFile, DeleteKind, PartitionKey};

/// Executor that fabricates output files instead of reading data.
///
/// Input data bytes are spread over `ceil(bytes / target_file_size_bytes)`
/// new data files. Optionally emits one positional delete file per output
/// data file, and can be told to fail or to return nothing for some partitions.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    pub write_position_deletes: bool,
    pub failing_partitions: HashSet<PartitionKey>,
    pub empty_output_partitions: HashSet<PartitionKey>,
}

impl MockExecutor {
    pub fn with_position_deletes(mut self) -> Self {
        self.write_position_deletes = true;
        self
    }

    pub fn fail_partition(mut self, partition: PartitionKey) -> Self {
        self.failing_partitions.insert(partition);
        self
    }

    pub fn empty_output_for(mut self, partition: PartitionKey) -> Self {
        self.empty_output_partitions.insert(partition);
        self
    }
}

#[async_trait]
impl CompactionExecutor for MockExecutor {
    async fn rewrite_files(&self, request: RewriteFilesRequest) -> Result<RewriteFilesResponse> {
        let task = &request.task;
        if self.failing_partitions.contains(&task.partition) {
            return Err(CompactionError::Execution(format!(
                "mock failure for task {}",
                task.task_id
            )));
        }

        let input_files_count = task.input_files_count();
        let input_total_bytes = task.input_size_bytes;
        if self.empty_output_partitions.contains(&task.partition) {
            return Ok(RewriteFilesResponse {
                output_files: vec![],
                stat: RewriteFilesStat {
                    input_files_count,
                    input_total_bytes,
                    ..Default::default()
                },
            });
        }

        let data_bytes: u64 = task.data_files().map(|file| file.file_size_in_bytes).sum();
        let record_count: u64 = task.data_files().map(|file| file.record_count).sum();
        let file_count = data_bytes
            .div_ceil(request.target_file_size_bytes.max(1))
            .max(1);

        let dir = if task.partition.is_unpartitioned() {
            "data".to_owned()
        } else {
            format!("data/{}", task.partition.as_str())
        };

        let mut output_files = vec![];
        for i in 0..file_count {
            // Spread the remainder over the first files.
            let size = data_bytes / file_count + u64::from(i < data_bytes % file_count);
            let records = record_count / file_count + u64::from(i < record_count % file_count);
            let data_file = DataFile {
                path: format!("{}/{}-compacted.parquet", dir, Uuid::new_v4()),
                partition: task.partition.clone(),
                file_size_in_bytes: size,
                record_count: records,
            };
            if self.write_position_deletes {
                output_files.push(ContentFile::Delete(DeleteFile {
                    path: format!("{}/{}-pos-deletes.parquet", dir, Uuid::new_v4()),
                    partition: task.partition.clone(),
                    file_size_in_bytes: 64,
                    record_count: 1,
                    kind: DeleteKind::Positional {
                        referenced_data_file: Some(data_file.path.clone()),
                    },
                }));
            }
            output_files.push(ContentFile::Data(data_file));
        }

        Ok(RewriteFilesResponse {
            stat: RewriteFilesStat {
                input_files_count,
                input_total_bytes,
                output_files_count: output_files.len(),
                output_total_bytes: output_files.iter().map(ContentFile::file_size_in_bytes).sum(),
            },
            output_files,
        })
    }
}
