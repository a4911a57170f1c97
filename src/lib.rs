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

/*!
A process-embedded metrics instrumentation core, compatible with the
Prometheus exposition ecosystem: counters, gauges, histograms (classic and
native/exponential), summaries with sliding-window quantile estimation, a
registry with transactional registration and a gather protocol, and text
and binary encoders.
*/

#[macro_use]
mod macros;

pub mod atomic;
pub mod collector;
pub mod counter;
pub mod desc;
pub mod encoding;
pub mod error;
pub mod exemplar;
pub mod gauge;
pub mod histogram;
pub mod label;
#[cfg(feature = "process")]
pub mod process_collector;
pub mod proto;
pub mod registry;
pub mod summary;
pub mod value;
pub mod vec;

pub use crate::collector::{Collector, Metric, Opts, WrappingCollector};
pub use crate::counter::{Counter, CounterVec};
pub use crate::desc::{Desc, MetricKind};
pub use crate::error::{Error, Result};
pub use crate::exemplar::Exemplar;
pub use crate::gauge::{Gauge, GaugeVec};
pub use crate::histogram::{
    exponential_buckets, linear_buckets, Histogram, HistogramOpts, HistogramVec, NativeConfig,
    DEFAULT_BUCKETS,
};
#[cfg(feature = "process")]
pub use crate::process_collector::ProcessCollector;
pub use crate::registry::{BufferPool, CollectorId, Registry};
pub use crate::summary::{Summary, SummaryOpts, SummaryVec};
pub use crate::vec::{CurriedMetricVec, MetricVec, MetricVecBuilder, VecOpts};

use std::sync::OnceLock;

static DEFAULT_REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide default [`Registry`], lazily created on first use.
/// `register`/`unregister`/`gather` operate on this instance; an
/// application that wants several independent registries should construct
/// its own `Registry` values directly instead.
pub fn default_registry() -> &'static Registry {
    DEFAULT_REGISTRY.get_or_init(Registry::new)
}

/// Registers a collector with the default registry.
pub fn register<C: Collector + 'static>(collector: C) -> Result<CollectorId> {
    default_registry().register(collector)
}

/// Unregisters a collector previously registered with the default registry.
pub fn unregister(id: CollectorId) -> bool {
    default_registry().unregister(id)
}

/// Gathers every family from the default registry.
pub fn gather() -> Result<Vec<proto::MetricFamily>> {
    default_registry().gather()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_register_and_gather() {
        let c = Counter::new("lib_test_total", "help").unwrap();
        c.inc();
        register(c).unwrap();
        let families = gather().unwrap();
        assert!(families.iter().any(|f| f.name == "lib_test_total"));
    }
}
