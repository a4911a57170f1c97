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

//! The abstract, wire-independent metric family representation described
//! in spec.md §6. Plain Rust structs rather than a generated-protobuf
//! message: there is no `.proto` schema compiled into this crate (see
//! DESIGN.md), so `encoding::text` and `encoding::binary` both serialize
//! these types directly.

use crate::exemplar::Exemplar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramBucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
    pub exemplar: Option<Exemplar>,
}

/// One span of consecutive populated bucket indices in a native histogram,
/// with the delta-encoded per-bucket counts that follow it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketSpan {
    pub offset: i32,
    pub deltas: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeHistogramData {
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: u64,
    pub positive_spans: Vec<BucketSpan>,
    pub negative_spans: Vec<BucketSpan>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramValue {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub buckets: Vec<HistogramBucket>,
    pub native: Option<NativeHistogramData>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryQuantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryValue {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub quantiles: Vec<SummaryQuantile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter {
        value: f64,
        created_timestamp_seconds: Option<f64>,
        exemplar: Option<Exemplar>,
    },
    Gauge {
        value: f64,
    },
    Histogram(HistogramValue),
    Summary(SummaryValue),
    Untyped {
        value: f64,
    },
}

impl MetricValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter { .. } => MetricType::Counter,
            MetricValue::Gauge { .. } => MetricType::Gauge,
            MetricValue::Histogram(_) => MetricType::Histogram,
            MetricValue::Summary(_) => MetricType::Summary,
            MetricValue::Untyped { .. } => MetricType::Untyped,
        }
    }
}

/// A single labelled reading, ready to be merged into a `MetricFamily`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Sorted by label name.
    pub labels: Vec<(String, String)>,
    pub value: MetricValue,
}

/// One fully-qualified name plus all of its labelled series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub metrics: Vec<Metric>,
}
