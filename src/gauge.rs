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

//! A point-in-time value that can move in either direction (spec.md §4.3):
//! `set`/`add`/`sub`/`inc`/`dec`, plus `set_to_current_time`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::collector::{Collector, Metric as MetricTrait, Opts};
use crate::desc::Desc;
use crate::error::Result;
use crate::proto::{Metric as ProtoMetric, MetricFamily};
use crate::value::{Value, ValueType};
use crate::vec::{MetricVec, MetricVecBuilder};

#[derive(Clone)]
pub struct Gauge {
    value: Arc<Value>,
}

impl Gauge {
    pub fn new<S: Into<String>>(name: S, help: S) -> Result<Self> {
        Self::with_opts(Opts::new(name.into(), help.into()))
    }

    pub fn with_opts(opts: Opts) -> Result<Self> {
        let value = Value::new(&opts, ValueType::Gauge, 0.0, &[])?;
        Ok(Gauge {
            value: Arc::new(value),
        })
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.get()
    }

    #[inline]
    pub fn set(&self, v: f64) {
        self.value.set(v);
    }

    #[inline]
    pub fn add(&self, v: f64) {
        self.value.add(v);
    }

    #[inline]
    pub fn sub(&self, v: f64) {
        self.value.add(-v);
    }

    #[inline]
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    #[inline]
    pub fn dec(&self) {
        self.value.add(-1.0);
    }

    /// Sets the gauge to the current Unix time, in fractional seconds.
    pub fn set_to_current_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.value.set(now.as_secs_f64());
    }

    pub fn desc(&self) -> &Desc {
        &self.value.desc
    }
}

impl MetricTrait for Gauge {
    fn metric(&self) -> ProtoMetric {
        self.value.metric()
    }
}

impl Collector for Gauge {
    fn describe(&self) -> Vec<Desc> {
        vec![self.value.desc.clone()]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.value.collect()]
    }
}

#[derive(Clone)]
pub struct GaugeVecBuilder;

impl MetricVecBuilder for GaugeVecBuilder {
    type P = Opts;
    type M = Gauge;

    fn build(&self, opts: &Opts, label_values: &[&str]) -> Result<Gauge> {
        let value = Value::new(opts, ValueType::Gauge, 0.0, label_values)?;
        Ok(Gauge {
            value: Arc::new(value),
        })
    }

    fn kind(&self) -> crate::desc::MetricKind {
        crate::desc::MetricKind::Gauge
    }
}

#[derive(Clone)]
pub struct GaugeVec {
    inner: MetricVec<GaugeVecBuilder>,
}

impl GaugeVec {
    pub fn new(opts: Opts) -> Result<Self> {
        Ok(GaugeVec {
            inner: MetricVec::create(GaugeVecBuilder, opts)?,
        })
    }

    pub fn with_label_values(&self, label_values: &[&str]) -> Result<Gauge> {
        self.inner.get_or_create_with_label_values(label_values)
    }

    pub fn with(&self, labels: &HashMap<&str, &str>) -> Result<Gauge> {
        self.inner.get_or_create_with_labels(labels)
    }

    pub fn remove_label_values(&self, label_values: &[&str]) -> Result<bool> {
        self.inner.delete_with_label_values(label_values)
    }

    pub fn remove(&self, labels: &HashMap<&str, &str>) -> Result<bool> {
        self.inner.delete_with_labels(labels)
    }

    pub fn reset(&self) {
        self.inner.reset();
    }

    pub fn curry_with(
        &self,
        partial: HashMap<String, String>,
    ) -> Result<crate::vec::CurriedMetricVec<GaugeVecBuilder>> {
        self.inner.curry(partial)
    }
}

impl Collector for GaugeVec {
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
    fn test_gauge_set_add_sub() {
        let g = Gauge::new("g", "help").unwrap();
        g.set(5.0);
        g.add(2.0);
        g.sub(1.0);
        assert_eq!(g.get(), 6.0);
        g.inc();
        g.dec();
        g.dec();
        assert_eq!(g.get(), 5.0);
    }

    #[test]
    fn test_gauge_set_to_current_time() {
        let g = Gauge::new("g", "help").unwrap();
        g.set_to_current_time();
        assert!(g.get() > 1_700_000_000.0);
    }

    #[test]
    fn test_gauge_vec() {
        let opts = Opts::new("g", "help").variable_label("shard");
        let gv = GaugeVec::new(opts).unwrap();
        gv.with_label_values(&["0"]).unwrap().set(1.0);
        gv.with_label_values(&["1"]).unwrap().set(2.0);
        assert_eq!(gv.collect()[0].metrics.len(), 2);
        assert!(gv.remove_label_values(&["0"]).unwrap());
        assert_eq!(gv.collect()[0].metrics.len(), 1);
    }
}
