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

//! Collector framing (spec.md §4.7): the abstract producer interface the
//! registry drives, plus `Opts`, the common builder every instrument
//! constructor accepts.

use std::collections::HashMap;

use crate::desc::{Desc, MetricKind};
use crate::error::Result;
use crate::proto::{Metric as ProtoMetric, MetricFamily};

/// A producer of metric readings. An instrument is its own collector (it
/// emits its single descriptor and its single reading); a vector's
/// collector iterates its cells. A collector that emits no descriptor from
/// `describe` is "unchecked": its output is admitted without
/// dimension-consistency checks at registration time, though gather still
/// checks it.
pub trait Collector: Sync + Send {
    /// Every descriptor this collector might produce during a `collect`.
    /// May be empty.
    fn describe(&self) -> Vec<Desc>;

    /// Zero or more completed readings.
    fn collect(&self) -> Vec<MetricFamily>;
}

/// A single sample value with its label pairs, convertible to the wire
/// representation.
pub trait Metric: Sync + Send {
    fn metric(&self) -> ProtoMetric;
}

/// Bundles the options common to every metric kind: the three components
/// of the fully-qualified name, the help text, constant labels, and
/// variable-label names.
#[derive(Debug, Clone, Default)]
pub struct Opts {
    pub namespace: String,
    pub subsystem: String,
    pub name: String,
    pub help: String,
    pub const_labels: HashMap<String, String>,
    pub variable_labels: Vec<String>,
}

impl Opts {
    pub fn new<S: Into<String>>(name: S, help: S) -> Opts {
        Opts {
            namespace: String::new(),
            subsystem: String::new(),
            name: name.into(),
            help: help.into(),
            const_labels: HashMap::new(),
            variable_labels: Vec::new(),
        }
    }

    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn subsystem<S: Into<String>>(mut self, subsystem: S) -> Self {
        self.subsystem = subsystem.into();
        self
    }

    pub fn const_labels(mut self, const_labels: HashMap<String, String>) -> Self {
        self.const_labels = const_labels;
        self
    }

    pub fn const_label<S: Into<String>>(mut self, name: S, value: S) -> Self {
        self.const_labels.insert(name.into(), value.into());
        self
    }

    pub fn variable_labels(mut self, variable_labels: Vec<String>) -> Self {
        self.variable_labels = variable_labels;
        self
    }

    pub fn variable_label<S: Into<String>>(mut self, name: S) -> Self {
        self.variable_labels.push(name.into());
        self
    }

    pub fn fq_name(&self) -> String {
        build_fq_name(&self.namespace, &self.subsystem, &self.name)
    }

    pub fn describe(&self, kind: MetricKind) -> Result<Desc> {
        Desc::build(
            self.fq_name(),
            self.help.clone(),
            kind,
            self.variable_labels.clone(),
            self.const_labels.clone(),
        )
    }
}

/// Joins the three name components with `_`, skipping empty components. If
/// `name` itself is empty the result is empty, independent of the other
/// components — `Desc::build` then reports `EmptyName`.
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let mut parts = Vec::with_capacity(3);
    if !namespace.is_empty() {
        parts.push(namespace);
    }
    if !subsystem.is_empty() {
        parts.push(subsystem);
    }
    parts.push(name);
    parts.join("_")
}

/// A wrapping collector that prefixes the fully-qualified name and/or
/// attaches extra constant labels before forwarding a child's metrics. Used
/// to namespace a subsystem's collectors without changing their own
/// definitions.
pub struct WrappingCollector<C: Collector> {
    inner: C,
    prefix: String,
    extra_labels: Vec<(String, String)>,
}

impl<C: Collector> WrappingCollector<C> {
    pub fn new(inner: C, prefix: impl Into<String>, extra_labels: HashMap<String, String>) -> Self {
        let mut extra_labels: Vec<(String, String)> = extra_labels.into_iter().collect();
        extra_labels.sort_by(|a, b| a.0.cmp(&b.0));
        WrappingCollector {
            inner,
            prefix: prefix.into(),
            extra_labels,
        }
    }

    fn wrap_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}_{}", self.prefix, name)
        }
    }

    fn merge_labels(&self, mut labels: Vec<(String, String)>) -> Vec<(String, String)> {
        labels.extend(self.extra_labels.iter().cloned());
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        labels
    }
}

impl<C: Collector> Collector for WrappingCollector<C> {
    fn describe(&self) -> Vec<Desc> {
        self.inner
            .describe()
            .into_iter()
            .map(|mut d| {
                d.fq_name = self.wrap_name(&d.fq_name);
                d.const_label_pairs = self.merge_labels(d.const_label_pairs);
                d.recompute_hashes();
                d
            })
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.inner
            .collect()
            .into_iter()
            .map(|mut mf| {
                mf.name = self.wrap_name(&mf.name);
                for m in &mut mf.metrics {
                    m.labels = self.merge_labels(std::mem::take(&mut m.labels));
                }
                mf
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fq_name() {
        let tbl = [
            ("a", "b", "c", "a_b_c"),
            ("", "b", "c", "b_c"),
            ("a", "", "c", "a_c"),
            ("", "", "c", "c"),
            ("a", "b", "", ""),
        ];
        for (ns, ss, name, expect) in tbl {
            assert_eq!(build_fq_name(ns, ss, name), expect);
        }
    }

    #[test]
    fn test_opts_describe_empty_name() {
        let opts = Opts::new("", "help");
        let err = opts.describe(MetricKind::Counter).unwrap_err();
        assert_eq!(err, crate::error::Error::EmptyName);
    }
}
