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

use std::collections::BTreeSet;
use std::sync::{Arc, Once};

use rand::Rng;
use table_compaction_core::CompactionConfig;
use table_compaction_core::spec::{DataFile, DeleteFile, SnapshotId};
use table_compaction_core::table::MemoryTable;
use table_compaction_core::test_utils::TestFileBuilder;
use tracing_subscriber::EnvFilter;

pub const DATA_FILES_PER_PARTITION: usize = 10;
pub const EQUALITY_DELETES_PER_PARTITION: usize = 5;
pub const MAX_FRAGMENT_SIZE: u64 = 1000;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Every data file up to [`MAX_FRAGMENT_SIZE`] bytes is a fragment.
pub fn fragment_config() -> CompactionConfig {
    CompactionConfig::builder()
        .target_file_size_bytes(1_000_000)
        .fragment_ratio(0.001)
        .build()
        .unwrap()
}

/// Files written into one partition of a [`FragmentedTable`].
#[derive(Debug, Default)]
pub struct PartitionFiles {
    pub data_files: Vec<DataFile>,
    pub equality_deletes: Vec<DeleteFile>,
    pub positional_deletes: Vec<DeleteFile>,
}

pub struct FragmentedTable {
    pub table: Arc<MemoryTable>,
    pub head: SnapshotId,
    pub files: Vec<(String, PartitionFiles)>,
}

impl FragmentedTable {
    /// Appends [`DATA_FILES_PER_PARTITION`] small data files per partition,
    /// then [`EQUALITY_DELETES_PER_PARTITION`] equality deletes and a
    /// positional delete for every other data file. An empty partition name
    /// means an unpartitioned table.
    pub async fn build(partitions: &[&str]) -> Self {
        let table = Arc::new(MemoryTable::new("db.fragmented"));
        let mut files = vec![];

        for partition in partitions {
            let prefix = if partition.is_empty() {
                "data".to_owned()
            } else {
                format!("data/{}", partition)
            };
            let data_files = (0..DATA_FILES_PER_PARTITION)
                .map(|i| {
                    TestFileBuilder::data_file(
                        &format!("{}/data-{}.parquet", prefix, i),
                        partition,
                        rand::rng().random_range(100..=MAX_FRAGMENT_SIZE),
                    )
                })
                .collect::<Vec<_>>();
            let equality_deletes = (0..EQUALITY_DELETES_PER_PARTITION)
                .map(|i| {
                    TestFileBuilder::equality_delete(
                        &format!("{}/eq-delete-{}.parquet", prefix, i),
                        partition,
                        rand::rng().random_range(10..=100),
                    )
                })
                .collect::<Vec<_>>();
            let positional_deletes = data_files
                .iter()
                .step_by(2)
                .enumerate()
                .map(|(i, data_file)| {
                    TestFileBuilder::positional_delete(
                        &format!("{}/pos-delete-{}.parquet", prefix, i),
                        partition,
                        &data_file.path,
                        rand::rng().random_range(10..=100),
                    )
                })
                .collect::<Vec<_>>();
            files.push(((*partition).to_owned(), PartitionFiles {
                data_files,
                equality_deletes,
                positional_deletes,
            }));
        }

        table
            .append(
                files
                    .iter()
                    .flat_map(|(_, files)| files.data_files.clone())
                    .collect(),
                vec![],
            )
            .await
            .unwrap();
        let head = table
            .append(
                vec![],
                files
                    .iter()
                    .flat_map(|(_, files)| {
                        files
                            .equality_deletes
                            .iter()
                            .chain(&files.positional_deletes)
                            .cloned()
                    })
                    .collect(),
            )
            .await
            .unwrap();

        Self { table, head, files }
    }

    pub fn data_paths(&self) -> BTreeSet<String> {
        self.files
            .iter()
            .flat_map(|(_, files)| files.data_files.iter().map(|file| file.path.clone()))
            .collect()
    }

    pub fn delete_paths(&self) -> BTreeSet<String> {
        self.files
            .iter()
            .flat_map(|(_, files)| {
                files
                    .equality_deletes
                    .iter()
                    .chain(&files.positional_deletes)
                    .map(|file| file.path.clone())
            })
            .collect()
    }
}

/// Paths of the live data files and live delete files at the table head.
pub async fn live_paths(table: &MemoryTable) -> (BTreeSet<String>, BTreeSet<String>) {
    let (data_files, delete_files) = table.live_files().await;
    (
        data_files.into_iter().map(|file| file.path).collect(),
        delete_files.into_iter().map(|file| file.path).collect(),
    )
}
