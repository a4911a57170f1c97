// Copyright 2014 The Prometheus Authors
// Copyright 2016 PingCAP, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! The external process collector (spec.md §4.9, feature `process`): CPU
//! time, resident set size, open file descriptors, and start time, probed
//! from `/proc` at every gather and reported as constant-metric readings.

use std::collections::HashMap;

use crate::collector::{Collector, Opts};
use crate::desc::{Desc, MetricKind};
use crate::proto::{Metric, MetricFamily, MetricType, MetricValue};

/// Reports the calling process's own resource usage on every `collect`.
/// Unchecked: `describe` returns nothing, since the descriptors below are
/// cheap to rebuild and never vary at runtime.
pub struct ProcessCollector {
    namespace: String,
    const_labels: HashMap<String, String>,
}

impl ProcessCollector {
    pub fn new(namespace: impl Into<String>) -> Self {
        ProcessCollector {
            namespace: namespace.into(),
            const_labels: HashMap::new(),
        }
    }

    pub fn with_const_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.const_labels = labels;
        self
    }

    fn desc(&self, name: &str, help: &str, kind: MetricKind) -> Option<Desc> {
        let opts = Opts::new(name.to_owned(), help.to_owned())
            .namespace(self.namespace.clone())
            .const_labels(self.const_labels.clone());
        opts.describe(kind).ok()
    }

    fn gauge_family(&self, name: &str, help: &str, value: f64) -> Option<MetricFamily> {
        let desc = self.desc(name, help, MetricKind::Gauge)?;
        Some(MetricFamily {
            name: desc.fq_name,
            help: desc.help,
            metric_type: MetricType::Gauge,
            metrics: vec![Metric {
                labels: desc.const_label_pairs,
                value: MetricValue::Gauge { value },
            }],
        })
    }

    fn counter_family(&self, name: &str, help: &str, value: f64) -> Option<MetricFamily> {
        let desc = self.desc(name, help, MetricKind::Counter)?;
        Some(MetricFamily {
            name: desc.fq_name,
            help: desc.help,
            metric_type: MetricType::Counter,
            metrics: vec![Metric {
                labels: desc.const_label_pairs,
                value: MetricValue::Counter {
                    value,
                    created_timestamp_seconds: None,
                    exemplar: None,
                },
            }],
        })
    }
}

impl Collector for ProcessCollector {
    fn describe(&self) -> Vec<Desc> {
        Vec::new()
    }

    #[cfg(all(target_os = "linux", feature = "process"))]
    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        let Ok(me) = procfs::process::Process::myself() else {
            return families;
        };

        if let Ok(stat) = me.stat() {
            let ticks_per_second = procfs::ticks_per_second();
            let cpu_seconds =
                (stat.utime + stat.stime) as f64 / ticks_per_second as f64;
            if let Some(f) = self.counter_family(
                "process_cpu_seconds_total",
                "Total user and system CPU time spent, in seconds.",
                cpu_seconds,
            ) {
                families.push(f);
            }

            let page_size = procfs::page_size();
            let rss_bytes = stat.rss as f64 * page_size as f64;
            if let Some(f) =
                self.gauge_family("process_resident_memory_bytes", "Resident memory size, in bytes.", rss_bytes)
            {
                families.push(f);
            }

            if let Ok(boot_time) = procfs::boot_time_secs() {
                let start_time =
                    boot_time as f64 + stat.starttime as f64 / ticks_per_second as f64;
                if let Some(f) = self.gauge_family(
                    "process_start_time_seconds",
                    "Start time of the process since unix epoch, in seconds.",
                    start_time,
                ) {
                    families.push(f);
                }
            }
        }

        if let Ok(fds) = me.fd_count() {
            if let Some(f) = self.gauge_family(
                "process_open_fds",
                "Number of open file descriptors.",
                fds as f64,
            ) {
                families.push(f);
            }
        }

        families
    }

    #[cfg(not(all(target_os = "linux", feature = "process")))]
    fn collect(&self) -> Vec<MetricFamily> {
        Vec::new()
    }
}

#[cfg(all(test, target_os = "linux", feature = "process"))]
mod tests {
    use super::*;

    #[test]
    fn test_process_collector_reports_something() {
        let c = ProcessCollector::new("myapp");
        let families = c.collect();
        assert!(!families.is_empty());
    }
}
