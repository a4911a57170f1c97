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

//! Rank-based quantile estimation over a sliding time window (spec.md
//! §4.5): a ring of windowed streams, a hot/cold observation buffer, and a
//! background compaction that `observe` never waits on.
//!
//! Each windowed stream is a Cormode–Korn–Muthukrishnan–Srivastava (CKMS)
//! targeted-quantile sketch — the same biased-quantile algorithm the
//! upstream Go client's `beorn7/perks/quantile` package implements for
//! `Summary`. A sketch keeps a bounded list of `(value, g, delta)` samples
//! rather than the full observation history; `g`/`delta` bound how far a
//! sample's true rank can be from its position in the list, and periodic
//! compression merges adjacent samples whenever doing so still keeps that
//! band within the epsilon requested for each objective quantile. Queries
//! are therefore approximate, bounded by the configured epsilon, not exact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::atomic::AtomicF64;
use crate::collector::{Collector, Metric as MetricTrait, Opts};
use crate::desc::{Desc, MetricKind};
use crate::error::{Error, Result};
use crate::proto::{Metric as ProtoMetric, MetricFamily, MetricValue, SummaryQuantile, SummaryValue};
use crate::value::make_label_pairs;
use crate::vec::{MetricVec, MetricVecBuilder, VecOpts};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_AGE_BUCKETS: usize = 10;
pub const DEFAULT_BUF_CAP: usize = 500;

#[derive(Debug, Clone)]
pub struct SummaryOpts {
    pub common: Opts,
    /// Sorted `(quantile, epsilon)` pairs.
    pub objectives: Vec<(f64, f64)>,
    pub max_age: Duration,
    pub age_buckets: usize,
    pub buf_cap: usize,
}

impl SummaryOpts {
    pub fn new<S: Into<String>>(name: S, help: S) -> Self {
        SummaryOpts {
            common: Opts::new(name.into(), help.into()),
            objectives: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            buf_cap: DEFAULT_BUF_CAP,
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

    pub fn variable_label<S: Into<String>>(mut self, name: S) -> Self {
        self.common = self.common.variable_label(name.into());
        self
    }

    pub fn objectives(mut self, objectives: Vec<(f64, f64)>) -> Self {
        self.objectives = objectives;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn age_buckets(mut self, age_buckets: usize) -> Self {
        self.age_buckets = age_buckets;
        self
    }

    pub fn buf_cap(mut self, buf_cap: usize) -> Self {
        self.buf_cap = buf_cap;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.age_buckets == 0 {
            return Err(Error::Msg("age_buckets must be at least 1".into()));
        }
        for &(q, _) in &self.objectives {
            if !(0.0..1.0).contains(&q) {
                return Err(Error::Msg(format!("objective quantile {q} not in (0, 1)")));
            }
        }
        Ok(())
    }
}

impl VecOpts for SummaryOpts {
    fn variable_labels(&self) -> &[String] {
        &self.common.variable_labels
    }

    fn build_desc(&self, kind: MetricKind) -> Result<Desc> {
        self.common.describe(kind)
    }
}

#[derive(Clone)]
struct CkmsSample {
    value: f64,
    g: f64,
    delta: f64,
}

/// Bounded-memory CKMS targeted-quantile sketch. `insert`/`insert_all` are
/// cheap (an append to `buffer`); the expensive merge-and-compress pass
/// happens in `flush`, run lazily on a batch boundary or right before a
/// query needs an up-to-date view.
struct CkmsStream {
    objectives: Vec<(f64, f64)>,
    samples: Vec<CkmsSample>,
    buffer: Vec<f64>,
    observed: f64,
}

/// Buffered observations are merged into `samples` once this many have
/// accumulated, bounding the buffer's own memory between flushes.
const CKMS_FLUSH_BATCH: usize = 128;

impl CkmsStream {
    fn new(objectives: Vec<(f64, f64)>) -> Self {
        CkmsStream {
            objectives,
            samples: Vec::new(),
            buffer: Vec::new(),
            observed: 0.0,
        }
    }

    /// `f(rank)`: the tightest `g + delta` band allowed at `rank` across
    /// every targeted `(quantile, epsilon)` pair.
    fn invariant(&self, rank: f64) -> f64 {
        self.objectives
            .iter()
            .map(|&(q, eps)| {
                if q * self.observed <= rank {
                    (2.0 * eps * rank) / q
                } else {
                    (2.0 * eps * (self.observed - rank)) / (1.0 - q)
                }
            })
            .fold(f64::INFINITY, f64::min)
    }

    fn insert_all(&mut self, values: Vec<f64>) {
        self.buffer.extend(values);
        if self.buffer.len() >= CKMS_FLUSH_BATCH {
            self.flush();
        }
    }

    /// Merges buffered observations into `samples` in sorted order, giving
    /// each new sample `g=1` and a `delta` from the invariant at its
    /// insertion rank (0 for the sketch's current global min/max), then
    /// compresses.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        self.buffer.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let incoming = std::mem::take(&mut self.buffer);
        let n_incoming = incoming.len();

        let mut merged = Vec::with_capacity(self.samples.len() + n_incoming);
        let mut i = 0usize;
        let mut rank = 0.0f64;

        for (k, v) in incoming.into_iter().enumerate() {
            while i < self.samples.len() && self.samples[i].value < v {
                rank += self.samples[i].g;
                merged.push(self.samples[i].clone());
                i += 1;
            }
            self.observed += 1.0;
            let is_boundary = merged.is_empty() || (i == self.samples.len() && k == n_incoming - 1);
            let (g, delta) = if is_boundary {
                (1.0, 0.0)
            } else {
                (1.0, (self.invariant(rank) - 1.0).max(0.0))
            };
            merged.push(CkmsSample { value: v, g, delta });
        }
        while i < self.samples.len() {
            merged.push(self.samples[i].clone());
            i += 1;
        }
        self.samples = merged;
        self.compress();
    }

    /// Standard CKMS compression: walking from the tail backward, fold a
    /// sample into its successor whenever the combined band still fits the
    /// invariant at that rank.
    fn compress(&mut self) {
        if self.samples.len() < 2 {
            return;
        }
        let mut r = self.observed - 1.0;
        let mut xi = self.samples.len() - 1;
        let mut x = self.samples[xi].clone();

        let mut i = self.samples.len() as isize - 2;
        while i >= 0 {
            let idx = i as usize;
            let c = self.samples[idx].clone();
            if c.g + x.g + x.delta <= self.invariant(r) {
                x.g += c.g;
                self.samples[xi] = x.clone();
                self.samples.remove(idx);
                xi -= 1;
            } else {
                x = c;
                xi = idx;
            }
            r -= c.g;
            i -= 1;
        }
    }

    /// Estimates the value at quantile `q`. Flushes any buffered
    /// observations first so the query reflects everything inserted so far.
    fn query(&mut self, q: f64) -> f64 {
        self.flush();
        if self.samples.is_empty() {
            return 0.0;
        }
        let rank = (q * self.observed).ceil();
        let threshold = rank + self.invariant(rank) / 2.0;
        let mut cumulative = 0.0f64;
        for sample in &self.samples {
            cumulative += sample.g;
            if cumulative + sample.delta > threshold {
                return sample.value;
            }
        }
        self.samples.last().unwrap().value
    }
}

/// Merges the (already bounded) sample lists of every active window into
/// one sketch, re-running compression over the combined list. Bounded
/// memory: the result's size is the sum of each window's already-compressed
/// sample count, never the raw observation count.
fn merge_streams(objectives: Vec<(f64, f64)>, streams: &mut [WindowedStream]) -> CkmsStream {
    let mut samples = Vec::new();
    let mut observed = 0.0;
    for s in streams.iter_mut() {
        s.stream.flush();
        observed += s.stream.observed;
        samples.extend(s.stream.samples.iter().cloned());
    }
    samples.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());
    let mut merged = CkmsStream {
        objectives,
        samples,
        buffer: Vec::new(),
        observed,
    };
    merged.compress();
    merged
}

struct WindowedStream {
    stream: CkmsStream,
    expiry: Instant,
}

struct RingState {
    streams: Vec<WindowedStream>,
    head: usize,
    flush_in_progress: bool,
}

struct HotBuf {
    values: Vec<f64>,
    expiry: Instant,
}

struct SummaryCore {
    desc: Desc,
    label_pairs: Vec<(String, String)>,
    objectives: Vec<(f64, f64)>,
    stream_duration: Duration,
    buf_cap: usize,
    hot: Mutex<HotBuf>,
    sum: AtomicF64,
    count: AtomicU64,
    ring: Mutex<RingState>,
    flush_cv: Condvar,
}

fn now_plus(d: Duration) -> Instant {
    Instant::now() + d
}

impl SummaryCore {
    fn new(desc: Desc, label_pairs: Vec<(String, String)>, opts: &SummaryOpts) -> Result<Self> {
        opts.validate()?;
        let stream_duration = opts.max_age / opts.age_buckets as u32;
        let mut objectives = opts.objectives.clone();
        objectives.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let streams = (0..opts.age_buckets)
            .map(|_| WindowedStream {
                stream: CkmsStream::new(objectives.clone()),
                expiry: now_plus(stream_duration),
            })
            .collect();

        Ok(SummaryCore {
            desc,
            label_pairs,
            objectives,
            stream_duration,
            buf_cap: opts.buf_cap,
            hot: Mutex::new(HotBuf {
                values: Vec::with_capacity(opts.buf_cap),
                expiry: now_plus(stream_duration),
            }),
            sum: AtomicF64::new(0.0),
            count: AtomicU64::new(0),
            ring: Mutex::new(RingState {
                streams,
                head: 0,
                flush_in_progress: false,
            }),
            flush_cv: Condvar::new(),
        })
    }

    fn observe(self: &Arc<Self>, v: f64) {
        let now = Instant::now();
        let mut hot = self.hot.lock();
        if now > hot.expiry {
            self.swap_and_flush(&mut hot, true);
        }
        hot.values.push(v);
        self.sum.add(v);
        self.count.fetch_add(1, Ordering::Relaxed);
        if hot.values.len() >= self.buf_cap {
            self.swap_and_flush(&mut hot, true);
        }
    }

    /// Swaps `hotBuf` for a fresh buffer and hands the drained values off
    /// to the ring, either on a background thread (the routine path, so
    /// `observe` never blocks on compaction) or inline (the snapshot
    /// path, which needs the drain to have happened before it reads the
    /// ring).
    fn swap_and_flush(self: &Arc<Self>, hot: &mut HotBuf, background: bool) {
        let cold = std::mem::replace(&mut hot.values, Vec::with_capacity(self.buf_cap));
        hot.expiry = now_plus(self.stream_duration);
        if cold.is_empty() {
            return;
        }
        if background {
            {
                let mut ring = self.ring.lock();
                ring.flush_in_progress = true;
            }
            let core = Arc::clone(self);
            std::thread::spawn(move || core.drain(cold));
        } else {
            self.drain(cold);
        }
    }

    fn drain(&self, cold: Vec<f64>) {
        let mut ring = self.ring.lock();
        ring.flush_in_progress = true;
        let now = Instant::now();
        self.advance_ring_locked(&mut ring, now);
        let head = ring.head;
        ring.streams[head].stream.insert_all(cold);
        ring.flush_in_progress = false;
        self.flush_cv.notify_all();
    }

    fn advance_ring_locked(&self, ring: &mut RingState, now: Instant) {
        let n = ring.streams.len();
        for _ in 0..n {
            if ring.streams[ring.head].expiry > now {
                break;
            }
            ring.head = (ring.head + 1) % n;
            ring.streams[ring.head].stream = CkmsStream::new(self.objectives.clone());
            ring.streams[ring.head].expiry = now + self.stream_duration;
        }
    }

    /// Drains the hot buffer synchronously, then waits out any
    /// concurrently in-flight background compaction, so the merged view
    /// it builds reflects every observation completed before this call.
    fn write(self: &Arc<Self>) -> SummaryValue {
        {
            let mut hot = self.hot.lock();
            if !hot.values.is_empty() {
                self.swap_and_flush(&mut hot, false);
            }
        }

        let mut ring = self.ring.lock();
        while ring.flush_in_progress {
            self.flush_cv.wait(&mut ring);
        }
        let now = Instant::now();
        self.advance_ring_locked(&mut ring, now);
        let mut merged = merge_streams(self.objectives.clone(), &mut ring.streams);
        drop(ring);

        let sample_count = self.count.load(Ordering::Relaxed);
        let sample_sum = self.sum.get();
        let quantiles = self
            .objectives
            .iter()
            .map(|&(q, _)| SummaryQuantile {
                quantile: q,
                value: merged.query(q),
            })
            .collect();

        SummaryValue {
            sample_count,
            sample_sum,
            quantiles,
        }
    }

    fn metric(self: &Arc<Self>) -> ProtoMetric {
        ProtoMetric {
            labels: self.label_pairs.clone(),
            value: MetricValue::Summary(self.write()),
        }
    }
}

#[derive(Clone)]
pub struct Summary {
    core: Arc<SummaryCore>,
}

impl Summary {
    pub fn with_opts(opts: SummaryOpts) -> Result<Self> {
        let desc = opts.common.describe(MetricKind::Summary)?;
        let label_pairs = make_label_pairs(&desc, &[]);
        Ok(Summary {
            core: Arc::new(SummaryCore::new(desc, label_pairs, &opts)?),
        })
    }

    #[inline]
    pub fn observe(&self, v: f64) {
        self.core.observe(v);
    }

    pub fn desc(&self) -> &Desc {
        &self.core.desc
    }
}

impl MetricTrait for Summary {
    fn metric(&self) -> ProtoMetric {
        self.core.metric()
    }
}

impl Collector for Summary {
    fn describe(&self) -> Vec<Desc> {
        vec![self.core.desc.clone()]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![MetricFamily {
            name: self.core.desc.fq_name.clone(),
            help: self.core.desc.help.clone(),
            metric_type: crate::proto::MetricType::Summary,
            metrics: vec![self.metric()],
        }]
    }
}

#[derive(Clone)]
pub struct SummaryVecBuilder;

impl MetricVecBuilder for SummaryVecBuilder {
    type P = SummaryOpts;
    type M = Summary;

    fn build(&self, opts: &SummaryOpts, label_values: &[&str]) -> Result<Summary> {
        let desc = opts.common.describe(MetricKind::Summary)?;
        let label_pairs = make_label_pairs(&desc, label_values);
        Ok(Summary {
            core: Arc::new(SummaryCore::new(desc, label_pairs, opts)?),
        })
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Summary
    }
}

#[derive(Clone)]
pub struct SummaryVec {
    inner: MetricVec<SummaryVecBuilder>,
}

impl SummaryVec {
    pub fn new(opts: SummaryOpts) -> Result<Self> {
        Ok(SummaryVec {
            inner: MetricVec::create(SummaryVecBuilder, opts)?,
        })
    }

    pub fn with_label_values(&self, label_values: &[&str]) -> Result<Summary> {
        self.inner.get_or_create_with_label_values(label_values)
    }

    pub fn with(&self, labels: &HashMap<&str, &str>) -> Result<Summary> {
        self.inner.get_or_create_with_labels(labels)
    }

    pub fn remove_label_values(&self, label_values: &[&str]) -> Result<bool> {
        self.inner.delete_with_label_values(label_values)
    }

    pub fn reset(&self) {
        self.inner.reset();
    }
}

impl Collector for SummaryVec {
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
    fn test_summary_basic_quantiles() {
        let s = Summary::with_opts(
            SummaryOpts::new("latency", "help").objectives(vec![(0.5, 0.05), (0.9, 0.01)]),
        )
        .unwrap();
        for v in 1..=100 {
            s.observe(v as f64);
        }
        let families = s.collect();
        match &families[0].metrics[0].value {
            MetricValue::Summary(sv) => {
                assert_eq!(sv.sample_count, 100);
                assert_eq!(sv.sample_sum, (1..=100).sum::<i64>() as f64);
                let median = sv.quantiles.iter().find(|q| q.quantile == 0.5).unwrap();
                assert!((median.value - 50.0).abs() <= 5.0);
            }
            _ => panic!("expected summary value"),
        }
    }

    #[test]
    fn test_summary_flush_on_buf_cap() {
        let s = Summary::with_opts(SummaryOpts::new("s", "help").buf_cap(4)).unwrap();
        for v in 0..10 {
            s.observe(v as f64);
        }
        let families = s.collect();
        match &families[0].metrics[0].value {
            MetricValue::Summary(sv) => assert_eq!(sv.sample_count, 10),
            _ => panic!("expected summary value"),
        }
    }

    #[test]
    fn test_summary_vec() {
        let opts = SummaryOpts::new("s", "help").variable_label("route");
        let sv = SummaryVec::new(opts).unwrap();
        sv.with_label_values(&["/a"]).unwrap().observe(1.0);
        sv.with_label_values(&["/b"]).unwrap().observe(2.0);
        assert_eq!(sv.collect()[0].metrics.len(), 2);
    }
}
