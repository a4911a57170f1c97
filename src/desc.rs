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

//! The immutable identity of a metric family: fully-qualified name, help
//! text, constant labels, variable-label names, and the derived `id` /
//! `dim_hash` fingerprints the registry uses to enforce consistency.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::label::{check_label_name, hash_label_pairs, is_valid_metric_name};

/// The kind of instrument a descriptor was built for. Carried implicitly by
/// the instrument type: it is fixed at `Desc::build` time and never
/// changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }
}

/// The durable identity of a metric family. Immutable once built; freely
/// `Clone`-able and shareable across threads.
#[derive(Debug, Clone)]
pub struct Desc {
    pub fq_name: String,
    pub help: String,
    pub kind: MetricKind,
    /// Sorted by name, for stable hashing and stable text-format output.
    pub const_label_pairs: Vec<(String, String)>,
    pub variable_labels: Vec<String>,
    /// `hash(fq_name, const_label_pairs)`. Unique per registration.
    pub id: u64,
    /// `hash(kind, help, sorted label names)`. Two descriptors sharing
    /// `fq_name` must share `dim_hash`.
    pub dim_hash: u64,
}

fn reserved_label_for_kind(kind: MetricKind, name: &str) -> bool {
    match kind {
        MetricKind::Histogram => name == "le",
        MetricKind::Summary => name == "quantile",
        _ => false,
    }
}

impl Desc {
    /// Builds and validates a descriptor. A descriptor that fails to build
    /// is never constructed at all: the error is returned immediately so
    /// callers cannot hold a poisoned `Desc`. Code that used to check a
    /// `Desc` for "did it build ok" at arbitrary later points instead
    /// propagates this `Result` straight out of the instrument
    /// constructor.
    pub fn build(
        fq_name: String,
        help: String,
        kind: MetricKind,
        variable_labels: Vec<String>,
        const_labels: HashMap<String, String>,
    ) -> Result<Desc> {
        if fq_name.is_empty() {
            return Err(Error::EmptyName);
        }
        if !is_valid_metric_name(&fq_name) {
            return Err(Error::InvalidName(fq_name));
        }
        if help.is_empty() {
            return Err(Error::EmptyHelp);
        }

        for name in &variable_labels {
            check_label_name(name)?;
            if reserved_label_for_kind(kind, name) {
                return Err(Error::ReservedLabelName(name.clone()));
            }
        }

        let mut const_label_pairs: Vec<(String, String)> = Vec::with_capacity(const_labels.len());
        for (name, value) in const_labels {
            check_label_name(&name)?;
            if reserved_label_for_kind(kind, &name) {
                return Err(Error::ReservedLabelName(name));
            }
            const_label_pairs.push((name, value));
        }
        const_label_pairs.sort_by(|a, b| a.0.cmp(&b.0));

        // Duplicate label name across constant and variable sets.
        for (name, _) in &const_label_pairs {
            if variable_labels.iter().any(|v| v == name) {
                return Err(Error::DuplicateLabel(name.clone()));
            }
        }
        {
            let mut seen = std::collections::HashSet::new();
            for name in &variable_labels {
                if !seen.insert(name) {
                    return Err(Error::DuplicateLabel(name.clone()));
                }
            }
        }

        let (id, dim_hash) = Self::compute_hashes(&fq_name, &help, kind, &variable_labels, &const_label_pairs);

        Ok(Desc {
            fq_name,
            help,
            kind,
            const_label_pairs,
            variable_labels,
            id,
            dim_hash,
        })
    }

    fn compute_hashes(
        fq_name: &str,
        help: &str,
        kind: MetricKind,
        variable_labels: &[String],
        const_label_pairs: &[(String, String)],
    ) -> (u64, u64) {
        let id = hash_label_pairs(
            &std::iter::once(("__name__".to_owned(), fq_name.to_owned()))
                .chain(const_label_pairs.iter().cloned())
                .collect::<Vec<_>>(),
        );

        let mut label_names: Vec<String> = const_label_pairs.iter().map(|(n, _)| n.clone()).collect();
        // Variable label names are tagged to distinguish a constant label
        // "x" from a variable label "x" when computing dim_hash, even
        // though such an overlap is already rejected above as a duplicate
        // within one descriptor — two *different* descriptors for the same
        // fq_name could otherwise pick different roles for the same name.
        label_names.extend(variable_labels.iter().map(|n| format!("$var:{n}")));
        label_names.sort();

        let mut dim_fields = vec![kind.as_str().to_owned(), help.to_owned()];
        dim_fields.extend(label_names);
        let dim_hash = crate::label::hash_label_values(&dim_fields);

        (id, dim_hash)
    }

    /// Recomputes `id` and `dim_hash` from the current field values. A
    /// wrapping collector that rewrites `fq_name`/`const_label_pairs` after
    /// the wrapped descriptor was built must call this, or the identity and
    /// dimension hashes keep describing the pre-wrap name and labels.
    pub fn recompute_hashes(&mut self) {
        let (id, dim_hash) = Self::compute_hashes(
            &self.fq_name,
            &self.help,
            self.kind,
            &self.variable_labels,
            &self.const_label_pairs,
        );
        self.id = id;
        self.dim_hash = dim_hash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cl(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_build_basic() {
        let d = Desc::build(
            "http_requests_total".into(),
            "total requests".into(),
            MetricKind::Counter,
            vec!["method".into()],
            cl(&[("service", "api")]),
        )
        .unwrap();
        assert_eq!(d.fq_name, "http_requests_total");
        assert_eq!(d.const_label_pairs, vec![("service".to_owned(), "api".to_owned())]);
    }

    #[test]
    fn test_empty_name() {
        let err = Desc::build(
            "".into(),
            "h".into(),
            MetricKind::Counter,
            vec![],
            HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, Error::EmptyName);
    }

    #[test]
    fn test_empty_help() {
        let err = Desc::build(
            "x".into(),
            "".into(),
            MetricKind::Counter,
            vec![],
            HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, Error::EmptyHelp);
    }

    #[test]
    fn test_reserved_label_histogram() {
        let err = Desc::build(
            "x".into(),
            "h".into(),
            MetricKind::Histogram,
            vec!["le".into()],
            HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, Error::ReservedLabelName("le".into()));
    }

    #[test]
    fn test_reserved_label_summary() {
        let err = Desc::build(
            "x".into(),
            "h".into(),
            MetricKind::Summary,
            vec![],
            cl(&[("quantile", "0.5")]),
        )
        .unwrap_err();
        assert_eq!(err, Error::ReservedLabelName("quantile".into()));
    }

    #[test]
    fn test_duplicate_label() {
        let err = Desc::build(
            "x".into(),
            "h".into(),
            MetricKind::Counter,
            vec!["a".into()],
            cl(&[("a", "1")]),
        )
        .unwrap_err();
        assert_eq!(err, Error::DuplicateLabel("a".into()));
    }

    #[test]
    fn test_dim_hash_agreement_depends_on_help_and_labels() {
        let a = Desc::build(
            "x".into(),
            "h".into(),
            MetricKind::Counter,
            vec![],
            cl(&[("a", "1")]),
        )
        .unwrap();
        let b = Desc::build(
            "x".into(),
            "h".into(),
            MetricKind::Counter,
            vec![],
            cl(&[("a", "2")]),
        )
        .unwrap();
        assert_eq!(a.dim_hash, b.dim_hash);
        assert_ne!(a.id, b.id);

        let c = Desc::build(
            "x".into(),
            "h2".into(),
            MetricKind::Counter,
            vec![],
            cl(&[("a", "1")]),
        )
        .unwrap();
        assert_ne!(a.dim_hash, c.dim_hash);
    }
}
