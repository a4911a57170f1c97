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

//! Fixed-bucket ("classic") and exponential ("native") histograms
//! (spec.md §4.4): a hot/cold double-buffered counter engine that never
//! blocks an observer, plus an optional sparse exponential bucket layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::atomic::AtomicCount;
use crate::collector::{Collector, Metric as MetricTrait, Opts};
use crate::desc::{Desc, MetricKind};
use crate::error::{Error, Result};
use crate::exemplar::Exemplar;
use crate::proto::{
    BucketSpan, HistogramBucket, HistogramValue, Metric as ProtoMetric, MetricFamily,
    MetricValue, NativeHistogramData,
};
use crate::value::make_label_pairs;
use crate::vec::{MetricVec, MetricVecBuilder, VecOpts};

pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// `linearBuckets(start, width, count)` (spec.md §8 scenario 1).
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>> {
    if count == 0 {
        return Err(Error::Msg("linear_buckets needs a positive count".into()));
    }
    let mut buckets = Vec::with_capacity(count);
    let mut v = start;
    for _ in 0..count {
        buckets.push(v);
        v += width;
    }
    Ok(buckets)
}

/// `exponentialBuckets(start, factor, count)` (spec.md §8 scenario 2).
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>> {
    if count == 0 {
        return Err(Error::Msg(
            "exponential_buckets needs a positive count".into(),
        ));
    }
    if start <= 0.0 {
        return Err(Error::Msg(
            "exponential_buckets start must be positive".into(),
        ));
    }
    if factor <= 1.0 {
        return Err(Error::Msg(
            "exponential_buckets factor must be greater than 1".into(),
        ));
    }
    let mut buckets = Vec::with_capacity(count);
    let mut v = start;
    for _ in 0..count {
        buckets.push(v);
        v *= factor;
    }
    Ok(buckets)
}

/// Configuration for the native (sparse, exponential) bucket layer.
#[derive(Debug, Clone)]
pub struct NativeConfig {
    /// The requested per-bucket growth factor. The smallest `schema` with
    /// `2^(2^-schema) <= bucket_factor` is used.
    pub bucket_factor: f64,
    pub zero_threshold: f64,
    pub max_zero_threshold: f64,
    pub max_buckets: usize,
    pub min_reset_duration: std::time::Duration,
}

impl Default for NativeConfig {
    fn default() -> Self {
        NativeConfig {
            bucket_factor: 1.1,
            zero_threshold: 2.0f64.powi(-128),
            max_zero_threshold: 1e-3,
            max_buckets: 160,
            min_reset_duration: std::time::Duration::from_secs(0),
        }
    }
}

fn schema_for_factor(factor: f64) -> i32 {
    // base = 2^(2^-schema) <= factor; find the largest schema (finest
    // resolution) satisfying that, clamped to the conventional [-4, 8] range.
    for schema in (-4..=8).rev() {
        let base = 2f64.powf(2f64.powi(-schema));
        if base <= factor {
            return schema;
        }
    }
    -4
}

fn native_bucket_index(v: f64, schema: i32) -> i32 {
    let base = 2f64.powf(2f64.powi(-schema));
    v.abs().log(base).ceil() as i32
}

#[derive(Default)]
struct NativeBuckets {
    schema: i32,
    zero_threshold: f64,
    zero_count: u64,
    positive: HashMap<i32, u64>,
    negative: HashMap<i32, u64>,
    last_reset: Option<Instant>,
}

struct NativeState {
    config: NativeConfig,
    buckets: Mutex<NativeBuckets>,
}

impl NativeState {
    fn new(config: NativeConfig) -> Self {
        let schema = schema_for_factor(config.bucket_factor);
        let zero_threshold = config.zero_threshold;
        NativeState {
            config,
            buckets: Mutex::new(NativeBuckets {
                schema,
                zero_threshold,
                zero_count: 0,
                positive: HashMap::new(),
                negative: HashMap::new(),
                last_reset: None,
            }),
        }
    }

    fn observe(&self, v: f64) {
        let mut b = self.buckets.lock();
        if v.abs() <= b.zero_threshold || v.is_nan() {
            b.zero_count += 1;
            return;
        }
        let idx = native_bucket_index(v, b.schema);
        if v > 0.0 {
            *b.positive.entry(idx).or_insert(0) += 1;
        } else {
            *b.negative.entry(idx).or_insert(0) += 1;
        }
        self.enforce_budget(&mut b);
    }

    /// Bucket-budget enforcement, in the documented order: reset, then
    /// widen the zero threshold, then halve the schema.
    fn enforce_budget(&self, b: &mut NativeBuckets) {
        if b.positive.len() + b.negative.len() <= self.config.max_buckets {
            return;
        }

        let reset_elapsed = match b.last_reset {
            None => true,
            Some(t) => t.elapsed() >= self.config.min_reset_duration,
        };
        if reset_elapsed && !self.config.min_reset_duration.is_zero() {
            b.positive.clear();
            b.negative.clear();
            b.zero_count = 0;
            b.last_reset = Some(Instant::now());
            return;
        }

        while b.positive.len() + b.negative.len() > self.config.max_buckets {
            if b.zero_threshold < self.config.max_zero_threshold {
                b.zero_threshold *= 2.0;
                let folded: Vec<i32> = b
                    .positive
                    .keys()
                    .copied()
                    .filter(|&idx| native_index_upper_bound(idx, b.schema) <= b.zero_threshold)
                    .collect();
                for idx in folded {
                    if let Some(c) = b.positive.remove(&idx) {
                        b.zero_count += c;
                    }
                }
                let folded: Vec<i32> = b
                    .negative
                    .keys()
                    .copied()
                    .filter(|&idx| native_index_upper_bound(idx, b.schema) <= b.zero_threshold)
                    .collect();
                for idx in folded {
                    if let Some(c) = b.negative.remove(&idx) {
                        b.zero_count += c;
                    }
                }
            } else if b.schema > -4 {
                b.schema -= 1;
                b.positive = halve_schema(&b.positive);
                b.negative = halve_schema(&b.negative);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> NativeHistogramData {
        let b = self.buckets.lock();
        NativeHistogramData {
            schema: b.schema,
            zero_threshold: b.zero_threshold,
            zero_count: b.zero_count,
            positive_spans: spans_from_map(&b.positive),
            negative_spans: spans_from_map(&b.negative),
        }
    }
}

fn native_index_upper_bound(idx: i32, schema: i32) -> f64 {
    let base = 2f64.powf(2f64.powi(-schema));
    base.powi(idx)
}

fn halve_schema(map: &HashMap<i32, u64>) -> HashMap<i32, u64> {
    let mut out = HashMap::new();
    for (idx, count) in map {
        let merged = idx.div_euclid(2);
        *out.entry(merged).or_insert(0) += count;
    }
    out
}

/// Encodes a sparse `index -> count` map as spans of consecutive indices
/// with per-bucket deltas from the previous bucket's count, as the wire
/// format requires.
fn spans_from_map(map: &HashMap<i32, u64>) -> Vec<BucketSpan> {
    if map.is_empty() {
        return Vec::new();
    }
    let mut indices: Vec<i32> = map.keys().copied().collect();
    indices.sort_unstable();

    let mut spans = Vec::new();
    let mut deltas = Vec::new();
    let mut span_start = indices[0];
    let mut prev_idx = indices[0] - 1;
    let mut prev_count: i64 = 0;

    for idx in indices {
        if idx != prev_idx + 1 {
            spans.push(BucketSpan {
                offset: span_start,
                deltas: std::mem::take(&mut deltas),
            });
            span_start = idx;
            prev_count = 0;
        }
        let count = map[&idx] as i64;
        deltas.push(count - prev_count);
        prev_count = count;
        prev_idx = idx;
    }
    spans.push(BucketSpan {
        offset: span_start,
        deltas,
    });
    spans
}

struct Counts {
    sum_bits: AtomicU64,
    count: AtomicU64,
    buckets: Vec<AtomicU64>,
}

impl Counts {
    fn new(n_buckets: usize) -> Self {
        Counts {
            sum_bits: AtomicU64::new(0.0f64.to_bits()),
            count: AtomicU64::new(0),
            buckets: (0..n_buckets).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn add_sum(&self, v: f64) {
        let mut cur = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let new = f64::from_bits(cur) + v;
            match self.sum_bits.compare_exchange_weak(
                cur,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    fn reset(&self) {
        self.sum_bits.store(0.0f64.to_bits(), Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        for b in &self.buckets {
            b.store(0, Ordering::Relaxed);
        }
    }
}

struct HistogramCore {
    desc: Desc,
    label_pairs: Vec<(String, String)>,
    upper_bounds: Vec<f64>,
    counts: [Counts; 2],
    /// Bit 63 selects the hot side; the low 63 bits are a monotonic count of
    /// every `observe` that has ever announced itself. A single `fetch_add`
    /// both reads the current hot side and announces arrival in the same
    /// atomic step, so there is no window in which an observer can read one
    /// side and be attributed to the other. `write` claims the next flip
    /// with `fetch_add(1 << 63)`; the low bits of the value it gets back are
    /// exactly the announcement count as of that flip.
    count_and_hot_idx: AtomicCount,
    /// The announcement count as of the previous flip, so `write` can
    /// compute how many observations landed on `old_idx` between the last
    /// two flips. Guarded by the same lock that serializes flips.
    write_state: Mutex<u64>,
    exemplars: Mutex<Vec<Option<Exemplar>>>,
    native: Option<NativeState>,
}

const HOT_IDX_BIT: u64 = 1 << 63;
const STARTED_MASK: u64 = HOT_IDX_BIT - 1;

impl HistogramCore {
    fn new(desc: Desc, label_pairs: Vec<(String, String)>, opts: &HistogramOpts) -> Result<Self> {
        let mut upper_bounds = opts.buckets.clone();
        if upper_bounds.is_empty() && opts.native.is_none() {
            upper_bounds = DEFAULT_BUCKETS.to_vec();
        }
        for w in upper_bounds.windows(2) {
            if w[0] >= w[1] {
                return Err(Error::Msg(
                    "histogram buckets must be strictly increasing".into(),
                ));
            }
        }
        let n = upper_bounds.len();
        Ok(HistogramCore {
            desc,
            label_pairs,
            upper_bounds,
            counts: [Counts::new(n), Counts::new(n)],
            count_and_hot_idx: AtomicCount::new(0),
            write_state: Mutex::new(0),
            exemplars: Mutex::new(vec![None; n + 1]),
            native: opts.native.clone().map(NativeState::new),
        })
    }

    fn bucket_index(&self, v: f64) -> usize {
        if v.is_nan() {
            return self.upper_bounds.len();
        }
        self.upper_bounds.partition_point(|&b| b < v)
    }

    fn observe(&self, v: f64) {
        let announced = self.count_and_hot_idx.fetch_add(1, Ordering::AcqRel);
        let idx = (announced >> 63) as usize;
        let hot = &self.counts[idx];

        let bucket = self.bucket_index(v);
        if bucket < hot.buckets.len() {
            hot.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        }
        hot.add_sum(v);
        hot.count.fetch_add(1, Ordering::Release);

        if let Some(native) = &self.native {
            native.observe(v);
        }
    }

    fn observe_with_exemplar(&self, v: f64, exemplar: Exemplar) {
        self.observe(v);
        let bucket = self.bucket_index(v).min(self.upper_bounds.len());
        let mut exemplars = self.exemplars.lock();
        exemplars[bucket] = Some(exemplar);
    }

    /// Flips hot/cold, waits for in-flight observers on the now-cold side
    /// to finish, and returns a consistent snapshot of that side before
    /// merging it back into the new hot side.
    fn write(&self) -> HistogramValue {
        let mut prev_total = self.write_state.lock();

        // A single fetch_add both flips the hot bit and reads, atomically,
        // the announcement count as of the flip: any observe() ordered
        // before this in the atomic's modification order is counted in
        // `total_before`, any observe() ordered after already sees
        // `new_idx`. There is no gap in which an observer's side and its
        // announcement can disagree.
        let old = self.count_and_hot_idx.fetch_add(HOT_IDX_BIT, Ordering::AcqRel);
        let old_idx = (old >> 63) as usize;
        let new_idx = 1 - old_idx;
        let total_before = old & STARTED_MASK;
        let target = total_before.wrapping_sub(*prev_total);
        *prev_total = total_before;

        // Every observe() that announced old_idx is now known by count; wait
        // for its bucket/sum/count update to land too.
        while self.counts[old_idx].count.load(Ordering::Acquire) != target {
            std::hint::spin_loop();
        }

        let cold = &self.counts[old_idx];
        let sample_sum = f64::from_bits(cold.sum_bits.load(Ordering::Relaxed));
        let sample_count = cold.count.load(Ordering::Relaxed);
        let raw_buckets: Vec<u64> = cold
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();

        let exemplars = self.exemplars.lock().clone();

        let mut cumulative = 0u64;
        let mut buckets = Vec::with_capacity(self.upper_bounds.len() + 1);
        for (i, &upper_bound) in self.upper_bounds.iter().enumerate() {
            cumulative += raw_buckets[i];
            buckets.push(HistogramBucket {
                upper_bound,
                cumulative_count: cumulative,
                exemplar: exemplars[i].clone(),
            });
        }
        if let Some(inf_exemplar) = exemplars.last().cloned().flatten() {
            buckets.push(HistogramBucket {
                upper_bound: f64::INFINITY,
                cumulative_count: sample_count,
                exemplar: Some(inf_exemplar),
            });
        }

        // Merge cold into the new hot side, then reset cold for reuse.
        let hot = &self.counts[new_idx];
        hot.add_sum(sample_sum);
        hot.count.fetch_add(sample_count, Ordering::AcqRel);
        for (i, &c) in raw_buckets.iter().enumerate() {
            hot.buckets[i].fetch_add(c, Ordering::Relaxed);
        }

        cold.reset();

        HistogramValue {
            sample_count,
            sample_sum,
            buckets,
            native: self.native.as_ref().map(NativeState::snapshot),
        }
    }

    fn metric(&self) -> ProtoMetric {
        ProtoMetric {
            labels: self.label_pairs.clone(),
            value: MetricValue::Histogram(self.write()),
        }
    }

    fn collect(&self) -> MetricFamily {
        MetricFamily {
            name: self.desc.fq_name.clone(),
            help: self.desc.help.clone(),
            metric_type: crate::proto::MetricType::Histogram,
            metrics: vec![self.metric()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistogramOpts {
    pub common: Opts,
    pub buckets: Vec<f64>,
    pub native: Option<NativeConfig>,
}

impl HistogramOpts {
    pub fn new<S: Into<String>>(name: S, help: S) -> Self {
        HistogramOpts {
            common: Opts::new(name.into(), help.into()),
            buckets: Vec::new(),
            native: None,
        }
    }

    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.common = self.common.namespace(namespace.into());
        self
    }

    pub fn subsystem<S: Into<String>>(mut self, subsystem: S) -> Self {
        self.common = self.common.subsystem(subsystem.into());
        self
    }

    pub fn variable_labels(mut self, labels: Vec<String>) -> Self {
        self.common = self.common.variable_labels(labels);
        self
    }

    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn native(mut self, config: NativeConfig) -> Self {
        self.native = Some(config);
        self
    }
}

impl VecOpts for HistogramOpts {
    fn variable_labels(&self) -> &[String] {
        &self.common.variable_labels
    }

    fn build_desc(&self, kind: MetricKind) -> Result<Desc> {
        if !self.buckets.is_empty() && self.native.is_some() {
            // Both variants may coexist, but classic buckets then must be
            // supplied explicitly — which they are here.
        }
        self.common.describe(kind)
    }
}

#[derive(Clone)]
pub struct Histogram {
    core: Arc<HistogramCore>,
}

impl Histogram {
    pub fn with_opts(opts: HistogramOpts) -> Result<Self> {
        let desc = opts.common.describe(MetricKind::Histogram)?;
        let label_pairs = make_label_pairs(&desc, &[]);
        Ok(Histogram {
            core: Arc::new(HistogramCore::new(desc, label_pairs, &opts)?),
        })
    }

    #[inline]
    pub fn observe(&self, v: f64) {
        self.core.observe(v);
    }

    pub fn observe_with_exemplar(&self, v: f64, exemplar: Exemplar) {
        self.core.observe_with_exemplar(v, exemplar);
    }

    pub fn desc(&self) -> &Desc {
        &self.core.desc
    }
}

impl MetricTrait for Histogram {
    fn metric(&self) -> ProtoMetric {
        self.core.metric()
    }
}

impl Collector for Histogram {
    fn describe(&self) -> Vec<Desc> {
        vec![self.core.desc.clone()]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.core.collect()]
    }
}

#[derive(Clone)]
pub struct HistogramVecBuilder;

impl MetricVecBuilder for HistogramVecBuilder {
    type P = HistogramOpts;
    type M = Histogram;

    fn build(&self, opts: &HistogramOpts, label_values: &[&str]) -> Result<Histogram> {
        let desc = opts.common.describe(MetricKind::Histogram)?;
        let label_pairs = make_label_pairs(&desc, label_values);
        Ok(Histogram {
            core: Arc::new(HistogramCore::new(desc, label_pairs, opts)?),
        })
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Histogram
    }
}

#[derive(Clone)]
pub struct HistogramVec {
    inner: MetricVec<HistogramVecBuilder>,
}

impl HistogramVec {
    pub fn new(opts: HistogramOpts) -> Result<Self> {
        Ok(HistogramVec {
            inner: MetricVec::create(HistogramVecBuilder, opts)?,
        })
    }

    pub fn with_label_values(&self, label_values: &[&str]) -> Result<Histogram> {
        self.inner.get_or_create_with_label_values(label_values)
    }

    pub fn with(&self, labels: &HashMap<&str, &str>) -> Result<Histogram> {
        self.inner.get_or_create_with_labels(labels)
    }

    pub fn remove_label_values(&self, label_values: &[&str]) -> Result<bool> {
        self.inner.delete_with_label_values(label_values)
    }

    pub fn reset(&self) {
        self.inner.reset();
    }
}

impl Collector for HistogramVec {
    fn describe(&self) -> Vec<Desc> {
        self.inner.describe()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.inner.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_buckets() {
        let b = linear_buckets(-15.0, 5.0, 6).unwrap();
        assert_eq!(b, vec![-15.0, -10.0, -5.0, 0.0, 5.0, 10.0]);
    }

    #[test]
    fn test_exponential_buckets() {
        let b = exponential_buckets(100.0, 1.2, 3).unwrap();
        assert!((b[0] - 100.0).abs() < 1e-9);
        assert!((b[1] - 120.0).abs() < 1e-9);
        assert!((b[2] - 144.0).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_observe_and_write() {
        let h = Histogram::with_opts(
            HistogramOpts::new("http_latency_seconds", "latency").buckets(vec![0.1, 1.0]),
        )
        .unwrap();
        h.observe(0.05);
        h.observe(0.5);
        h.observe(2.0);

        let families = h.collect();
        let m = &families[0].metrics[0];
        match &m.value {
            MetricValue::Histogram(hv) => {
                assert_eq!(hv.sample_count, 3);
                assert_eq!(hv.buckets[0].cumulative_count, 1);
                assert_eq!(hv.buckets[1].cumulative_count, 2);
                assert!((hv.sample_sum - 2.55).abs() < 1e-9);
            }
            _ => panic!("expected histogram value"),
        }
    }

    #[test]
    fn test_histogram_concurrent_observe() {
        let h = Histogram::with_opts(HistogramOpts::new("concurrent", "help")).unwrap();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let h = &h;
                s.spawn(move || {
                    for _ in 0..1000 {
                        h.observe(1.0);
                    }
                });
            }
        });
        let families = h.collect();
        match &families[0].metrics[0].value {
            MetricValue::Histogram(hv) => assert_eq!(hv.sample_count, 8000),
            _ => panic!("expected histogram value"),
        }
    }

    #[test]
    fn test_native_histogram_basic() {
        let h = Histogram::with_opts(
            HistogramOpts::new("native_hist", "help").native(NativeConfig {
                bucket_factor: 1.1,
                ..Default::default()
            }),
        )
        .unwrap();
        h.observe(0.0);
        h.observe(1.0);
        h.observe(2.0);
        h.observe(3.0);

        let families = h.collect();
        match &families[0].metrics[0].value {
            MetricValue::Histogram(hv) => {
                let native = hv.native.as_ref().unwrap();
                assert_eq!(native.zero_count, 1);
                assert!(!native.positive_spans.is_empty());
            }
            _ => panic!("expected histogram value"),
        }
    }

    #[test]
    fn test_nan_goes_to_inf_bucket() {
        let h =
            Histogram::with_opts(HistogramOpts::new("nan_hist", "help").buckets(vec![1.0, 2.0]))
                .unwrap();
        h.observe(f64::NAN);
        let families = h.collect();
        match &families[0].metrics[0].value {
            MetricValue::Histogram(hv) => {
                assert_eq!(hv.sample_count, 1);
                assert_eq!(hv.buckets[0].cumulative_count, 0);
                assert_eq!(hv.buckets[1].cumulative_count, 0);
            }
            _ => panic!("expected histogram value"),
        }
    }
}
