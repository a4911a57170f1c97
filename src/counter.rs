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

//! A monotonic cumulative counter (spec.md §4.2): `inc`/`add`, with `add`
//! rejecting negative increments. There is no `set` — a counter can only
//! move forward.

use std::collections::HashMap;
use std::sync::Arc;

use crate::collector::{Collector, Metric as MetricTrait, Opts};
use crate::desc::Desc;
use crate::error::{Error, Result};
use crate::proto::{Metric as ProtoMetric, MetricFamily};
use crate::value::{Value, ValueType};
use crate::vec::{MetricVec, MetricVecBuilder};

#[derive(Clone)]
pub struct Counter {
    value: Arc<Value>,
}

impl Counter {
    pub fn new<S: Into<String>>(name: S, help: S) -> Result<Self> {
        Self::with_opts(Opts::new(name.into(), help.into()))
    }

    pub fn with_opts(opts: Opts) -> Result<Self> {
        let value = Value::new(&opts, ValueType::Counter, 0.0, &[])?;
        Ok(Counter {
            value: Arc::new(value),
        })
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.get()
    }

    #[inline]
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Adds `v` to the counter. Rejects negative values: a counter only
    /// moves forward.
    pub fn add(&self, v: f64) -> Result<()> {
        if v < 0.0 {
            return Err(Error::NegativeIncrement(v));
        }
        self.value.add(v);
        Ok(())
    }

    pub fn desc(&self) -> &Desc {
        &self.value.desc
    }
}

impl MetricTrait for Counter {
    fn metric(&self) -> ProtoMetric {
        self.value.metric()
    }
}

impl Collector for Counter {
    fn describe(&self) -> Vec<Desc> {
        vec![self.value.desc.clone()]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.value.collect()]
    }
}

#[derive(Clone)]
pub struct CounterVecBuilder;

impl MetricVecBuilder for CounterVecBuilder {
    type P = Opts;
    type M = Counter;

    fn build(&self, opts: &Opts, label_values: &[&str]) -> Result<Counter> {
        let value = Value::new(opts, ValueType::Counter, 0.0, label_values)?;
        Ok(Counter {
            value: Arc::new(value),
        })
    }

    fn kind(&self) -> crate::desc::MetricKind {
        crate::desc::MetricKind::Counter
    }
}

#[derive(Clone)]
pub struct CounterVec {
    inner: MetricVec<CounterVecBuilder>,
}

impl CounterVec {
    pub fn new(opts: Opts) -> Result<Self> {
        Ok(CounterVec {
            inner: MetricVec::create(CounterVecBuilder, opts)?,
        })
    }

    pub fn with_label_values(&self, label_values: &[&str]) -> Result<Counter> {
        self.inner.get_or_create_with_label_values(label_values)
    }

    pub fn with(&self, labels: &HashMap<&str, &str>) -> Result<Counter> {
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
    ) -> Result<crate::vec::CurriedMetricVec<CounterVecBuilder>> {
        self.inner.curry(partial)
    }
}

impl Collector for CounterVec {
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
    fn test_counter_inc_add() {
        let c = Counter::new("c", "help").unwrap();
        c.inc();
        c.add(2.0).unwrap();
        assert_eq!(c.get(), 3.0);
    }

    #[test]
    fn test_counter_rejects_negative() {
        let c = Counter::new("c", "help").unwrap();
        let err = c.add(-1.0).unwrap_err();
        assert_eq!(err, Error::NegativeIncrement(-1.0));
        assert_eq!(c.get(), 0.0);
    }

    #[test]
    fn test_counter_vec_with_label_values() {
        let opts = Opts::new("c", "help").variable_label("path");
        let cv = CounterVec::new(opts).unwrap();
        cv.with_label_values(&["/a"]).unwrap().inc();
        cv.with_label_values(&["/a"]).unwrap().inc();
        cv.with_label_values(&["/b"]).unwrap().inc();

        let families = cv.collect();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metrics.len(), 2);
    }
}
