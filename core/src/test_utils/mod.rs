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

//! Builders for hand-made table files used by unit and integration tests.

use crate::spec::{DataFile, DeleteFile, DeleteKind, FileScanTask, PartitionKey};

const DEFAULT_FILE_SIZE: u64 = 1024;
const DEFAULT_DELETE_FILE_SIZE: u64 = 100;

/// Builds a [`FileScanTask`] around a single data file.
///
/// ```ignore
/// let task = TestFileBuilder::new("a.parquet")
///     .partition("p=1")
///     .size(400)
///     .with_equality_deletes(2)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestFileBuilder {
    path: String,
    partition: PartitionKey,
    size: u64,
    deletes: Vec<DeleteFile>,
    equality_delete_count: usize,
    positional_delete_sizes: Vec<u64>,
}

impl TestFileBuilder {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            partition: PartitionKey::unpartitioned(),
            size: DEFAULT_FILE_SIZE,
            deletes: vec![],
            equality_delete_count: 0,
            positional_delete_sizes: vec![],
        }
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn partition(mut self, partition: &str) -> Self {
        self.partition = PartitionKey::new(partition);
        self
    }

    /// Attaches `count` small equality delete files private to this file.
    pub fn with_equality_deletes(mut self, count: usize) -> Self {
        self.equality_delete_count += count;
        self
    }

    /// Attaches a positional delete file that targets this data file.
    pub fn with_positional_delete_of_size(mut self, size: u64) -> Self {
        self.positional_delete_sizes.push(size);
        self
    }

    /// Attaches an existing delete file, e.g. one shared between data files.
    pub fn with_delete(mut self, delete_file: DeleteFile) -> Self {
        self.deletes.push(delete_file);
        self
    }

    pub fn build(self) -> FileScanTask {
        let partition = self.partition.as_str().to_owned();
        let mut deletes = self.deletes;
        for i in 0..self.equality_delete_count {
            deletes.push(Self::equality_delete(
                &format!("{}_eq_{}.parquet", self.path, i),
                &partition,
                DEFAULT_DELETE_FILE_SIZE,
            ));
        }
        for (i, size) in self.positional_delete_sizes.into_iter().enumerate() {
            deletes.push(Self::positional_delete(
                &format!("{}_pos_{}.parquet", self.path, i),
                &partition,
                &self.path,
                size,
            ));
        }

        FileScanTask::new(Self::data_file(&self.path, &partition, self.size), deletes)
    }

    pub fn data_file(path: &str, partition: &str, size: u64) -> DataFile {
        DataFile {
            path: path.to_owned(),
            partition: PartitionKey::new(partition),
            file_size_in_bytes: size,
            record_count: size.div_ceil(10),
        }
    }

    pub fn equality_delete(path: &str, partition: &str, size: u64) -> DeleteFile {
        DeleteFile {
            path: path.to_owned(),
            partition: PartitionKey::new(partition),
            file_size_in_bytes: size,
            record_count: size.div_ceil(10),
            kind: DeleteKind::Equality {
                equality_ids: vec![1],
            },
        }
    }

    pub fn positional_delete(
        path: &str,
        partition: &str,
        referenced_data_file: &str,
        size: u64,
    ) -> DeleteFile {
        DeleteFile {
            path: path.to_owned(),
            partition: PartitionKey::new(partition),
            file_size_in_bytes: size,
            record_count: size.div_ceil(10),
            kind: DeleteKind::Positional {
                referenced_data_file: Some(referenced_data_file.to_owned()),
            },
        }
    }
}
