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

//! A generic scalar metric cell, shared by [`Counter`](crate::counter::Counter)
//! and [`Gauge`](crate::gauge::Gauge). Its effective kind is carried by
//! `ValueType`; this is the low-level building block the two public types
//! are thin wrappers over.

use crate::atomic::AtomicF64;
use crate::collector::Opts;
use crate::desc::{Desc, MetricKind};
use crate::error::{Error, Result};
use crate::proto::{Metric, MetricFamily, MetricValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Counter,
    Gauge,
}

impl ValueType {
    pub fn metric_kind(&self) -> MetricKind {
        match self {
            ValueType::Counter => MetricKind::Counter,
            ValueType::Gauge => MetricKind::Gauge,
        }
    }
}

#[derive(Debug)]
pub struct Value {
    pub desc: Desc,
    pub val: AtomicF64,
    pub val_type: ValueType,
    pub label_pairs: Vec<(String, String)>,
}

impl Value {
    pub fn new(
        opts: &Opts,
        val_type: ValueType,
        initial: f64,
        label_values: &[&str],
    ) -> Result<Self> {
        let desc = opts.describe(val_type.metric_kind())?;
        if desc.variable_labels.len() != label_values.len() {
            return Err(Error::CardinalityMismatch {
                expected: desc.variable_labels.len(),
                got: label_values.len(),
            });
        }

        let label_pairs = make_label_pairs(&desc, label_values);

        Ok(Value {
            desc,
            val: AtomicF64::new(initial),
            val_type,
            label_pairs,
        })
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.val.get()
    }

    #[inline]
    pub fn set(&self, v: f64) {
        self.val.set(v);
    }

    #[inline]
    pub fn add(&self, v: f64) {
        self.val.add(v);
    }

    pub fn metric(&self) -> Metric {
        let value = self.get();
        let value = match self.val_type {
            ValueType::Counter => MetricValue::Counter {
                value,
                created_timestamp_seconds: None,
                exemplar: None,
            },
            ValueType::Gauge => MetricValue::Gauge { value },
        };
        Metric {
            labels: self.label_pairs.clone(),
            value,
        }
    }

    pub fn collect(&self) -> MetricFamily {
        MetricFamily {
            name: self.desc.fq_name.clone(),
            help: self.desc.help.clone(),
            metric_type: self.val_type.metric_kind().into(),
            metrics: vec![self.metric()],
        }
    }
}

impl From<MetricKind> for crate::proto::MetricType {
    fn from(k: MetricKind) -> Self {
        match k {
            MetricKind::Counter => crate::proto::MetricType::Counter,
            MetricKind::Gauge => crate::proto::MetricType::Gauge,
            MetricKind::Histogram => crate::proto::MetricType::Histogram,
            MetricKind::Summary => crate::proto::MetricType::Summary,
            MetricKind::Untyped => crate::proto::MetricType::Untyped,
        }
    }
}

/// Builds the sorted `(name, value)` label-pair list for one reading:
/// variable labels (in descriptor order, paired with `label_values`) plus
/// the descriptor's constant labels, sorted by name as the wire format
/// requires.
pub fn make_label_pairs(desc: &Desc, label_values: &[&str]) -> Vec<(String, String)> {
    let total_len = desc.variable_labels.len() + desc.const_label_pairs.len();
    if total_len == 0 {
        return Vec::new();
    }

    let mut pairs = Vec::with_capacity(total_len);
    for (name, value) in desc.variable_labels.iter().zip(label_values) {
        pairs.push((name.clone(), (*value).to_owned()));
    }
    pairs.extend(desc.const_label_pairs.iter().cloned());
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Opts;

    #[test]
    fn test_value_cardinality_mismatch() {
        let opts = Opts::new("x", "h").variable_label("a");
        let err = Value::new(&opts, ValueType::Counter, 0.0, &[]).unwrap_err();
        assert_eq!(
            err,
            Error::CardinalityMismatch {
                expected: 1,
                got: 0
            }
        );
    }

    #[test]
    fn test_value_add_get() {
        let opts = Opts::new("x", "h");
        let v = Value::new(&opts, ValueType::Gauge, 0.0, &[]).unwrap();
        v.add(3.0);
        v.add(-1.0);
        assert_eq!(v.get(), 2.0);
    }
}
