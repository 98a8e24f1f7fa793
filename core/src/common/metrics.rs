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

use std::sync::Arc;

use mixtrics::metrics::{BoxedCounterVec, BoxedHistogramVec, BoxedRegistry, Buckets};

pub struct Metrics {
    pub compaction_plan_counter: BoxedCounterVec,
    pub compaction_planned_tasks_count: BoxedCounterVec,

    pub compaction_commit_counter: BoxedCounterVec,
    pub compaction_commit_conflict_counter: BoxedCounterVec,
    pub compaction_commit_failed_counter: BoxedCounterVec,
    pub compaction_commit_duration: BoxedHistogramVec,

    pub compaction_failed_tasks_count: BoxedCounterVec,
    pub compaction_rewritten_files_count: BoxedCounterVec,
    pub compaction_rewritten_bytes: BoxedCounterVec,
    pub compaction_added_files_count: BoxedCounterVec,
}

impl Metrics {
    pub fn new(registry: BoxedRegistry) -> Self {
        let compaction_plan_counter = registry.register_counter_vec(
            "compaction_plan_counter".into(),
            "table-compaction total plan counts".into(),
            &["table_name"],
        );

        let compaction_planned_tasks_count = registry.register_counter_vec(
            "compaction_planned_tasks_count".into(),
            "table-compaction planned task counts".into(),
            &["table_name"],
        );

        let compaction_commit_counter = registry.register_counter_vec(
            "compaction_commit_counter".into(),
            "table-compaction successful commit counts".into(),
            &["table_name"],
        );

        let compaction_commit_conflict_counter = registry.register_counter_vec(
            "compaction_commit_conflict_counter".into(),
            "table-compaction commit conflict counts".into(),
            &["table_name"],
        );

        let compaction_commit_failed_counter = registry.register_counter_vec(
            "compaction_commit_failed_counter".into(),
            "table-compaction commit failure counts".into(),
            &["table_name"],
        );

        // 1ms 10ms 100ms 1s 10s
        let compaction_commit_duration = registry.register_histogram_vec_with_buckets(
            "compaction_commit_duration".into(),
            "table-compaction commit duration in milliseconds".into(),
            &["table_name"],
            Buckets::exponential(1.0, 10.0, 5),
        );

        let compaction_failed_tasks_count = registry.register_counter_vec(
            "compaction_failed_tasks_count".into(),
            "table-compaction tasks excluded from a commit as failed".into(),
            &["table_name"],
        );

        let compaction_rewritten_files_count = registry.register_counter_vec(
            "compaction_rewritten_files_count".into(),
            "table-compaction removed input files count".into(),
            &["table_name"],
        );

        let compaction_rewritten_bytes = registry.register_counter_vec(
            "compaction_rewritten_bytes".into(),
            "table-compaction removed input bytes".into(),
            &["table_name"],
        );

        let compaction_added_files_count = registry.register_counter_vec(
            "compaction_added_files_count".into(),
            "table-compaction added output files count".into(),
            &["table_name"],
        );

        Self {
            compaction_plan_counter,
            compaction_planned_tasks_count,
            compaction_commit_counter,
            compaction_commit_conflict_counter,
            compaction_commit_failed_counter,
            compaction_commit_duration,
            compaction_failed_tasks_count,
            compaction_rewritten_files_count,
            compaction_rewritten_bytes,
            compaction_added_files_count,
        }
    }
}

/// Records compaction metrics for one table.
#[derive(Clone)]
pub struct CompactionMetricsRecorder {
    metrics: Arc<Metrics>,
    table_name: String,
}

impl CompactionMetricsRecorder {
    pub fn new(metrics: Arc<Metrics>, table_name: String) -> Self {
        Self {
            metrics,
            table_name,
        }
    }

    fn label_vec(&self) -> [std::borrow::Cow<'static, str>; 1] {
        [self.table_name.clone().into()]
    }

    pub fn record_plan(&self, task_count: usize) {
        let label_vec = self.label_vec();

        self.metrics
            .compaction_plan_counter
            .counter(&label_vec)
            .increase(1);
        if task_count > 0 {
            self.metrics
                .compaction_planned_tasks_count
                .counter(&label_vec)
                .increase(task_count as u64);
        }
    }

    pub fn record_commit_success(
        &self,
        removed_files: usize,
        removed_bytes: u64,
        added_files: usize,
    ) {
        let label_vec = self.label_vec();

        self.metrics
            .compaction_commit_counter
            .counter(&label_vec)
            .increase(1);
        self.metrics
            .compaction_rewritten_files_count
            .counter(&label_vec)
            .increase(removed_files as u64);
        self.metrics
            .compaction_rewritten_bytes
            .counter(&label_vec)
            .increase(removed_bytes);
        self.metrics
            .compaction_added_files_count
            .counter(&label_vec)
            .increase(added_files as u64);
    }

    pub fn record_commit_conflict(&self) {
        self.metrics
            .compaction_commit_conflict_counter
            .counter(&self.label_vec())
            .increase(1);
    }

    pub fn record_commit_failure(&self) {
        self.metrics
            .compaction_commit_failed_counter
            .counter(&self.label_vec())
            .increase(1);
    }

    pub fn record_commit_duration(&self, duration_ms: f64) {
        self.metrics
            .compaction_commit_duration
            .histogram(&self.label_vec())
            .record(duration_ms);
    }

    pub fn record_failed_tasks(&self, count: usize) {
        if count > 0 {
            self.metrics
                .compaction_failed_tasks_count
                .counter(&self.label_vec())
                .increase(count as u64);
        }
    }
}
