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

//! Cross-module scenarios that don't fit naturally in any one file's unit
//! tests: the full registration-conflict literal table, and an end-to-end
//! register/observe/gather/encode pass across several instrument kinds at
//! once.

use std::collections::HashMap;

use metrics_core_engine::collector::Opts;
use metrics_core_engine::counter::Counter;
use metrics_core_engine::encoding::text;
use metrics_core_engine::error::Error;
use metrics_core_engine::gauge::Gauge;
use metrics_core_engine::histogram::{Histogram, HistogramOpts};
use metrics_core_engine::registry::Registry;

fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_registration_conflict_literal_table() {
    let registry = Registry::new();

    let c1 = Counter::with_opts(
        Opts::new("x", "h").const_labels(labels(&[("a", "1")])),
    )
    .unwrap();
    registry.register(c1).unwrap();

    let c2 = Counter::with_opts(
        Opts::new("x", "h").const_labels(labels(&[("a", "1")])),
    )
    .unwrap();
    let err = registry.register(c2).unwrap_err();
    assert_eq!(err, Error::DescriptorIdCollision { fq_name: "x".into() });

    let c3 = Counter::with_opts(
        Opts::new("x", "h").const_labels(labels(&[("a", "2")])),
    )
    .unwrap();
    registry.register(c3).unwrap();

    let c4 = Counter::with_opts(
        Opts::new("x", "h2").const_labels(labels(&[("a", "3")])),
    )
    .unwrap();
    let err = registry.register(c4).unwrap_err();
    assert_eq!(err, Error::DimensionMismatch { fq_name: "x".into() });
}

#[test]
fn test_end_to_end_register_observe_gather_encode() {
    let registry = Registry::new();

    let requests = Counter::new("http_requests_total", "total requests").unwrap();
    registry.register(requests.clone()).unwrap();
    requests.inc();
    requests.inc();

    let in_flight = Gauge::new("http_in_flight", "in-flight requests").unwrap();
    registry.register(in_flight.clone()).unwrap();
    in_flight.set(3.0);

    let latency = Histogram::with_opts(
        HistogramOpts::new("http_latency_seconds", "latency").buckets(vec![0.1, 1.0]),
    )
    .unwrap();
    registry.register(latency.clone()).unwrap();
    latency.observe(0.05);
    latency.observe(0.5);
    latency.observe(2.0);

    let families = registry.gather().unwrap();
    assert_eq!(families.len(), 3);
    let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["http_in_flight", "http_latency_seconds", "http_requests_total"]
    );

    let text = text::encode_to_string(&families);
    assert!(text.contains("http_requests_total 2"));
    assert!(text.contains("http_in_flight 3"));
    assert!(text.contains("http_latency_seconds_bucket{le=\"+Inf\"} 3"));
}
