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

use std::collections::HashMap;
use std::str::FromStr;

use derive_builder::Builder;
use serde::Deserialize;

use crate::{CompactionError, Result};

pub const DEFAULT_TARGET_FILE_SIZE_BYTES: u64 = 128 * 1024 * 1024;
pub const DEFAULT_FRAGMENT_RATIO: f64 = 0.125;
pub const DEFAULT_MAX_DELETE_FILE_COUNT: usize = 16;
pub const DEFAULT_MAX_DELETE_FILE_SIZE_BYTES: u64 = 32 * 1024 * 1024;
pub const DEFAULT_MAX_GROUP_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

pub const TARGET_FILE_SIZE_BYTES_KEY: &str = "compaction.target-file-size-bytes";
pub const FRAGMENT_RATIO_KEY: &str = "compaction.fragment-ratio";
pub const MAX_DELETE_FILE_COUNT_KEY: &str = "compaction.max-delete-file-count";
pub const MAX_DELETE_FILE_SIZE_BYTES_KEY: &str = "compaction.max-delete-file-size-bytes";
pub const MAX_GROUP_SIZE_BYTES_KEY: &str = "compaction.max-group-size-bytes";

/// Planning parameters for one table.
///
/// A data file is a fragment when its size is at most
/// `target_file_size_bytes * fragment_ratio`. Larger files are still selected
/// when their delete files exceed `max_delete_file_count` or
/// `max_delete_file_size_bytes`. No compaction task reads more than
/// `max_group_size_bytes`.
#[derive(Builder, Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    #[builder(default = "DEFAULT_TARGET_FILE_SIZE_BYTES")]
    pub target_file_size_bytes: u64,
    #[builder(default = "DEFAULT_FRAGMENT_RATIO")]
    pub fragment_ratio: f64,
    #[builder(default = "DEFAULT_MAX_DELETE_FILE_COUNT")]
    pub max_delete_file_count: usize,
    #[builder(default = "DEFAULT_MAX_DELETE_FILE_SIZE_BYTES")]
    pub max_delete_file_size_bytes: u64,
    #[builder(default = "DEFAULT_MAX_GROUP_SIZE_BYTES")]
    pub max_group_size_bytes: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            target_file_size_bytes: DEFAULT_TARGET_FILE_SIZE_BYTES,
            fragment_ratio: DEFAULT_FRAGMENT_RATIO,
            max_delete_file_count: DEFAULT_MAX_DELETE_FILE_COUNT,
            max_delete_file_size_bytes: DEFAULT_MAX_DELETE_FILE_SIZE_BYTES,
            max_group_size_bytes: DEFAULT_MAX_GROUP_SIZE_BYTES,
        }
    }
}

impl CompactionConfig {
    pub fn builder() -> CompactionConfigBuilder {
        CompactionConfigBuilder::default()
    }

    /// Largest data file size still considered a fragment.
    pub fn fragment_threshold_bytes(&self) -> u64 {
        (self.target_file_size_bytes as f64 * self.fragment_ratio) as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_file_size_bytes == 0 {
            return Err(CompactionError::Config(
                "target_file_size_bytes must be positive".to_owned(),
            ));
        }
        if !(self.fragment_ratio > 0.0 && self.fragment_ratio <= 1.0) {
            return Err(CompactionError::Config(format!(
                "fragment_ratio must be in (0, 1], got {}",
                self.fragment_ratio
            )));
        }
        if self.max_group_size_bytes == 0 {
            return Err(CompactionError::Config(
                "max_group_size_bytes must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Builds a config from string table properties, falling back to the
    /// defaults for absent keys. Unknown keys are ignored.
    pub fn from_table_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = parse_property(properties, TARGET_FILE_SIZE_BYTES_KEY)? {
            config.target_file_size_bytes = value;
        }
        if let Some(value) = parse_property(properties, FRAGMENT_RATIO_KEY)? {
            config.fragment_ratio = value;
        }
        if let Some(value) = parse_property(properties, MAX_DELETE_FILE_COUNT_KEY)? {
            config.max_delete_file_count = value;
        }
        if let Some(value) = parse_property(properties, MAX_DELETE_FILE_SIZE_BYTES_KEY)? {
            config.max_delete_file_size_bytes = value;
        }
        if let Some(value) = parse_property(properties, MAX_GROUP_SIZE_BYTES_KEY)? {
            config.max_group_size_bytes = value;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_property<T>(properties: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    properties
        .get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                CompactionError::Config(format!("invalid value {:?} for {}: {}", raw, key, e))
            })
        })
        .transpose()
}
