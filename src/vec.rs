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

//! A map from label-value tuple to value cell sharing one descriptor
//! (spec.md §4.6): lazy creation, deletion, reset, and currying.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collector::{Collector, Metric as MetricTrait, Opts};
use crate::desc::{Desc, MetricKind};
use crate::error::{Error, Result};
use crate::label::hash_label_values;
use crate::proto::MetricFamily;

/// Opts types usable with a `MetricVec` must know their own variable-label
/// names and be able to materialize a `Desc`.
pub trait VecOpts: Clone {
    fn variable_labels(&self) -> &[String];
    fn build_desc(&self, kind: MetricKind) -> Result<Desc>;
}

impl VecOpts for Opts {
    fn variable_labels(&self) -> &[String] {
        &self.variable_labels
    }

    fn build_desc(&self, kind: MetricKind) -> Result<Desc> {
        self.describe(kind)
    }
}

/// Builds one child metric of kind `M` from a set of opts `P` and the
/// ordered label values for that child.
pub trait MetricVecBuilder: Clone + Send + Sync {
    type P: VecOpts;
    type M: Collector + MetricTrait + Clone;

    fn build(&self, opts: &Self::P, label_values: &[&str]) -> Result<Self::M>;

    fn kind(&self) -> MetricKind;
}

struct Child<M> {
    values: Vec<String>,
    metric: M,
}

struct MetricVecCore<T: MetricVecBuilder> {
    desc: Desc,
    opts: T::P,
    builder: T,
    children: RwLock<HashMap<u64, Vec<Child<T::M>>>>,
}

/// A [`Collector`] that bundles a family of same-descriptor metrics,
/// partitioned by the values of one or more variable labels.
pub struct MetricVec<T: MetricVecBuilder> {
    core: Arc<MetricVecCore<T>>,
}

impl<T: MetricVecBuilder> Clone for MetricVec<T> {
    fn clone(&self) -> Self {
        MetricVec {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: MetricVecBuilder> MetricVec<T> {
    pub fn create(builder: T, opts: T::P) -> Result<Self> {
        let desc = opts.build_desc(builder.kind())?;
        if desc.variable_labels.is_empty() {
            return Err(Error::Msg(
                "a MetricVec requires at least one variable label".to_owned(),
            ));
        }
        Ok(MetricVec {
            core: Arc::new(MetricVecCore {
                desc,
                opts,
                builder,
                children: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn desc(&self) -> &Desc {
        &self.core.desc
    }

    fn check_arity(&self, n: usize) -> Result<()> {
        let expected = self.core.desc.variable_labels.len();
        if expected != n {
            return Err(Error::CardinalityMismatch { expected, got: n });
        }
        Ok(())
    }

    /// Returns the cell for `label_values`, creating it if absent.
    /// Two-phase locking: a reader-lock lookup, and only on a miss a
    /// writer-lock insert (re-checked, since another thread may have
    /// inserted meanwhile).
    pub fn get_or_create_with_label_values(&self, label_values: &[&str]) -> Result<T::M> {
        self.check_arity(label_values.len())?;
        let hash = hash_label_values(label_values);

        if let Some(m) = self.lookup(hash, label_values) {
            return Ok(m);
        }

        let mut children = self.core.children.write();
        // Re-check: another writer may have raced us to the insert.
        if let Some(bucket) = children.get(&hash) {
            if let Some(child) = bucket.iter().find(|c| c.values_match(label_values)) {
                return Ok(child.metric.clone());
            }
        }

        let metric = self.core.builder.build(&self.core.opts, label_values)?;
        children.entry(hash).or_default().push(Child {
            values: label_values.iter().map(|s| (*s).to_owned()).collect(),
            metric: metric.clone(),
        });
        Ok(metric)
    }

    fn lookup(&self, hash: u64, label_values: &[&str]) -> Option<T::M> {
        let children = self.core.children.read();
        let bucket = children.get(&hash)?;
        bucket
            .iter()
            .find(|c| c.values_match(label_values))
            .map(|c| c.metric.clone())
    }

    /// Same as [`get_or_create_with_label_values`] but addressed by a
    /// `name -> value` map, which must contain exactly the descriptor's
    /// variable-label names.
    pub fn get_or_create_with_labels(&self, labels: &HashMap<&str, &str>) -> Result<T::M> {
        let ordered = self.order_labels(labels)?;
        let refs: Vec<&str> = ordered.iter().map(|s| s.as_str()).collect();
        self.get_or_create_with_label_values(&refs)
    }

    fn order_labels(&self, labels: &HashMap<&str, &str>) -> Result<Vec<String>> {
        if labels.len() > self.core.desc.variable_labels.len() {
            for key in labels.keys() {
                if !self.core.desc.variable_labels.iter().any(|n| n == key) {
                    return Err(Error::UnknownLabel((*key).to_owned()));
                }
            }
        }
        let mut ordered = Vec::with_capacity(self.core.desc.variable_labels.len());
        for name in &self.core.desc.variable_labels {
            match labels.get(name.as_str()) {
                Some(v) => ordered.push((*v).to_owned()),
                None => return Err(Error::MissingLabel(name.clone())),
            }
        }
        for key in labels.keys() {
            if !self.core.desc.variable_labels.iter().any(|n| n == key) {
                return Err(Error::UnknownLabel((*key).to_owned()));
            }
        }
        Ok(ordered)
    }

    pub fn delete_with_label_values(&self, label_values: &[&str]) -> Result<bool> {
        self.check_arity(label_values.len())?;
        let hash = hash_label_values(label_values);
        let mut children = self.core.children.write();
        let Some(bucket) = children.get_mut(&hash) else {
            return Ok(false);
        };
        let before = bucket.len();
        bucket.retain(|c| !c.values_match(label_values));
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            children.remove(&hash);
        }
        Ok(removed)
    }

    pub fn delete_with_labels(&self, labels: &HashMap<&str, &str>) -> Result<bool> {
        let ordered = self.order_labels(labels)?;
        let refs: Vec<&str> = ordered.iter().map(|s| s.as_str()).collect();
        self.delete_with_label_values(&refs)
    }

    pub fn reset(&self) {
        self.core.children.write().clear();
    }

    pub fn len(&self) -> usize {
        self.core.children.read().values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a curried view: a subset of variable labels are fixed, and
    /// the arity of the returned vector is reduced by that many.
    pub fn curry(&self, partial: HashMap<String, String>) -> Result<CurriedMetricVec<T>> {
        for name in partial.keys() {
            if !self.core.desc.variable_labels.iter().any(|n| n == name) {
                return Err(Error::UnknownLabel(name.clone()));
            }
        }
        let remaining: Vec<String> = self
            .core
            .desc
            .variable_labels
            .iter()
            .filter(|n| !partial.contains_key(*n))
            .cloned()
            .collect();
        Ok(CurriedMetricVec {
            inner: self.clone(),
            fixed: partial,
            remaining,
        })
    }
}

impl<M: Clone> Child<M> {
    fn values_match(&self, label_values: &[&str]) -> bool {
        self.values.len() == label_values.len()
            && self.values.iter().zip(label_values).all(|(a, b)| a == b)
    }
}

impl<T: MetricVecBuilder> Collector for MetricVec<T> {
    fn describe(&self) -> Vec<Desc> {
        vec![self.core.desc.clone()]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let children = self.core.children.read();
        let metrics: Vec<_> = children
            .values()
            .flatten()
            .map(|c| c.metric.metric())
            .collect();
        if metrics.is_empty() {
            return Vec::new();
        }
        vec![MetricFamily {
            name: self.core.desc.fq_name.clone(),
            help: self.core.desc.help.clone(),
            metric_type: self.core.desc.kind.into(),
            metrics,
        }]
    }
}

/// A view of a [`MetricVec`] with some of its variable labels preset.
/// Currying an already-fixed label is rejected, matching the base vector's
/// behavior rather than silently overwriting it.
pub struct CurriedMetricVec<T: MetricVecBuilder> {
    inner: MetricVec<T>,
    fixed: HashMap<String, String>,
    remaining: Vec<String>,
}

impl<T: MetricVecBuilder> Clone for CurriedMetricVec<T> {
    fn clone(&self) -> Self {
        CurriedMetricVec {
            inner: self.inner.clone(),
            fixed: self.fixed.clone(),
            remaining: self.remaining.clone(),
        }
    }
}

impl<T: MetricVecBuilder> CurriedMetricVec<T> {
    pub fn curry(&self, partial: HashMap<String, String>) -> Result<CurriedMetricVec<T>> {
        for name in partial.keys() {
            if self.fixed.contains_key(name) {
                return Err(Error::DuplicateLabel(name.clone()));
            }
            if !self.remaining.iter().any(|n| n == name) {
                return Err(Error::UnknownLabel(name.clone()));
            }
        }
        let mut fixed = self.fixed.clone();
        fixed.extend(partial);
        let remaining: Vec<String> = self
            .remaining
            .iter()
            .filter(|n| !fixed.contains_key(*n))
            .cloned()
            .collect();
        Ok(CurriedMetricVec {
            inner: self.inner.clone(),
            fixed,
            remaining,
        })
    }

    pub fn get_or_create_with_label_values(&self, label_values: &[&str]) -> Result<T::M> {
        if label_values.len() != self.remaining.len() {
            return Err(Error::CardinalityMismatch {
                expected: self.remaining.len(),
                got: label_values.len(),
            });
        }
        let mut by_name: HashMap<&str, &str> = self
            .fixed
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (name, value) in self.remaining.iter().zip(label_values) {
            by_name.insert(name.as_str(), value);
        }
        self.inner.get_or_create_with_labels(&by_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Metric as MetricTrait;
    use crate::proto::Metric as ProtoMetric;

    #[derive(Clone)]
    struct DummyBuilder;

    #[derive(Clone)]
    struct DummyMetric {
        value: Arc<crate::atomic::AtomicF64>,
        label_pairs: Vec<(String, String)>,
    }

    impl MetricTrait for DummyMetric {
        fn metric(&self) -> ProtoMetric {
            ProtoMetric {
                labels: self.label_pairs.clone(),
                value: crate::proto::MetricValue::Gauge {
                    value: self.value.get(),
                },
            }
        }
    }

    impl Collector for DummyMetric {
        fn describe(&self) -> Vec<Desc> {
            vec![]
        }
        fn collect(&self) -> Vec<MetricFamily> {
            vec![]
        }
    }

    impl MetricVecBuilder for DummyBuilder {
        type P = Opts;
        type M = DummyMetric;

        fn build(&self, opts: &Opts, label_values: &[&str]) -> Result<DummyMetric> {
            let desc = opts.describe(MetricKind::Gauge)?;
            let label_pairs = crate::value::make_label_pairs(&desc, label_values);
            Ok(DummyMetric {
                value: Arc::new(crate::atomic::AtomicF64::new(0.0)),
                label_pairs,
            })
        }

        fn kind(&self) -> MetricKind {
            MetricKind::Gauge
        }
    }

    fn make_vec() -> MetricVec<DummyBuilder> {
        let opts = Opts::new("test_vec", "help").variable_labels(vec!["a".into(), "b".into()]);
        MetricVec::create(DummyBuilder, opts).unwrap()
    }

    #[test]
    fn test_get_or_create_distinct_tuples() {
        let v = make_vec();
        let m1 = v.get_or_create_with_label_values(&["x", "y"]).unwrap();
        let m2 = v.get_or_create_with_label_values(&["x", "z"]).unwrap();
        assert!(!Arc::ptr_eq(&m1.value, &m2.value));
        let m1_again = v.get_or_create_with_label_values(&["x", "y"]).unwrap();
        assert!(Arc::ptr_eq(&m1.value, &m1_again.value));
    }

    #[test]
    fn test_cardinality_mismatch() {
        let v = make_vec();
        let err = v.get_or_create_with_label_values(&["only_one"]).unwrap_err();
        assert_eq!(err, Error::CardinalityMismatch { expected: 2, got: 1 });
    }

    #[test]
    fn test_delete_and_reset() {
        let v = make_vec();
        v.get_or_create_with_label_values(&["x", "y"]).unwrap();
        assert!(v.delete_with_label_values(&["x", "y"]).unwrap());
        assert!(!v.delete_with_label_values(&["x", "y"]).unwrap());

        v.get_or_create_with_label_values(&["x", "y"]).unwrap();
        v.get_or_create_with_label_values(&["p", "q"]).unwrap();
        assert_eq!(v.len(), 2);
        v.reset();
        assert_eq!(v.len(), 0);
    }

    #[test]
    fn test_get_by_labels_missing_and_unknown() {
        let v = make_vec();
        let mut labels = HashMap::new();
        labels.insert("a", "x");
        let err = v.get_or_create_with_labels(&labels).unwrap_err();
        assert_eq!(err, Error::MissingLabel("b".into()));

        let mut labels = HashMap::new();
        labels.insert("a", "x");
        labels.insert("b", "y");
        labels.insert("c", "z");
        let err = v.get_or_create_with_labels(&labels).unwrap_err();
        assert_eq!(err, Error::UnknownLabel("c".into()));
    }

    #[test]
    fn test_curry() {
        let v = make_vec();
        let mut partial = HashMap::new();
        partial.insert("a".to_owned(), "x".to_owned());
        let curried = v.curry(partial).unwrap();

        let m = curried.get_or_create_with_label_values(&["y"]).unwrap();
        let direct = v.get_or_create_with_label_values(&["x", "y"]).unwrap();
        assert!(Arc::ptr_eq(&m.value, &direct.value));
    }

    #[test]
    fn test_curry_twice_same_label_fails() {
        let v = make_vec();
        let mut partial = HashMap::new();
        partial.insert("a".to_owned(), "x".to_owned());
        let curried = v.curry(partial).unwrap();

        let mut partial2 = HashMap::new();
        partial2.insert("a".to_owned(), "z".to_owned());
        let err = curried.curry(partial2).unwrap_err();
        assert_eq!(err, Error::DuplicateLabel("a".into()));
    }
}
