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

//! The registry and gather protocol (spec.md §4.8): registration
//! consistency checks and a concurrent, deduplicated, ordered snapshot of
//! every registered producer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::collector::Collector;
use crate::desc::Desc;
use crate::error::{Error, Result};
use crate::label::hash_u64_seq;
use crate::proto::{Metric, MetricFamily, MetricType};

struct Registered {
    collector: Arc<dyn Collector>,
    desc_ids: Vec<u64>,
}

#[derive(Default)]
struct RegistryState {
    producers: HashMap<u64, Registered>,
    desc_ids: HashSet<u64>,
    dim_hashes_by_name: HashMap<String, u64>,
}

/// A bounded stack of reusable byte buffers that an encoder can draw from
/// instead of allocating fresh on every gather.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        BufferPool {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn acquire(&self) -> Vec<u8> {
        self.buffers.lock().pop().unwrap_or_default()
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.capacity {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(16)
    }
}

/// A handle returned by `register`, used to `unregister` the same
/// producer later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectorId(u64);

pub struct Registry {
    state: RwLock<RegistryState>,
    pedantic: bool,
    pub buffers: BufferPool,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            state: RwLock::new(RegistryState::default()),
            pedantic: false,
            buffers: BufferPool::default(),
        }
    }

    /// A registry that always aborts a `gather` on the first inconsistency
    /// instead of dropping offending families, matching the strict mode
    /// tests want to run under.
    pub fn new_pedantic() -> Self {
        Registry {
            state: RwLock::new(RegistryState::default()),
            pedantic: true,
            buffers: BufferPool::default(),
        }
    }

    /// Registers a producer. The collector identity is the FNV-1a hash of
    /// the sorted sequence of its descriptor ids; re-registering the same
    /// identity is rejected. All of the producer's descriptors are
    /// validated before any of them are committed: a failure leaves the
    /// registry exactly as it was.
    ///
    /// Consistency is checked descriptor-by-descriptor, before the
    /// collector-identity check: a descriptor's dimension hash (label names,
    /// help, kind) is compared against any prior descriptor of the same
    /// `fq_name` first, then its id is checked against every previously
    /// registered id. `Desc::id` hashes only `fq_name` and const labels, not
    /// `kind`/`help`, so two single-descriptor collectors that share a name
    /// and const labels always land on the same collector identity; running
    /// the per-descriptor checks first is what lets `DimensionMismatch` and
    /// `DescriptorIdCollision` surface instead of being shadowed by
    /// `AlreadyRegistered`.
    pub fn register<C: Collector + 'static>(&self, collector: C) -> Result<CollectorId> {
        let descs = collector.describe();
        let mut ids: Vec<u64> = descs.iter().map(|d: &Desc| d.id).collect();
        ids.sort_unstable();
        let collector_id = hash_u64_seq(&ids);

        let mut state = self.state.write();
        for d in &descs {
            if let Some(&existing) = state.dim_hashes_by_name.get(&d.fq_name) {
                if existing != d.dim_hash {
                    return Err(Error::DimensionMismatch {
                        fq_name: d.fq_name.clone(),
                    });
                }
            }
        }
        for d in &descs {
            if state.desc_ids.contains(&d.id) {
                return Err(Error::DescriptorIdCollision {
                    fq_name: d.fq_name.clone(),
                });
            }
        }
        if state.producers.contains_key(&collector_id) {
            return Err(Error::AlreadyRegistered);
        }

        for d in &descs {
            state.desc_ids.insert(d.id);
            state.dim_hashes_by_name.insert(d.fq_name.clone(), d.dim_hash);
        }
        state.producers.insert(
            collector_id,
            Registered {
                collector: Arc::new(collector),
                desc_ids: ids,
            },
        );
        Ok(CollectorId(collector_id))
    }

    /// Removes a producer by the identity `register` returned. Leaves the
    /// recorded `fq_name -> dimHash` association in place: that binding is
    /// part of the registry's historical contract, not tied to any single
    /// producer's lifetime.
    pub fn unregister(&self, id: CollectorId) -> bool {
        let mut state = self.state.write();
        match state.producers.remove(&id.0) {
            Some(registered) => {
                for desc_id in registered.desc_ids {
                    state.desc_ids.remove(&desc_id);
                }
                true
            }
            None => false,
        }
    }

    fn snapshot_producers(&self) -> Vec<Arc<dyn Collector>> {
        self.state
            .read()
            .producers
            .values()
            .map(|r| Arc::clone(&r.collector))
            .collect()
    }

    /// Strict gather: the first inconsistency aborts the whole snapshot.
    pub fn gather(&self) -> Result<Vec<MetricFamily>> {
        let raw = self.collect_all();
        merge_families(raw, true).map(|(families, _)| families)
    }

    /// Lenient gather: inconsistent families are dropped and reported,
    /// everything else is still returned. A pedantic registry degrades
    /// this to strict behavior.
    pub fn gather_lenient(&self) -> Result<(Vec<MetricFamily>, Vec<Error>)> {
        let raw = self.collect_all();
        merge_families(raw, self.pedantic)
    }

    fn collect_all(&self) -> Vec<MetricFamily> {
        let producers = self.snapshot_producers();
        std::thread::scope(|scope| {
            let handles: Vec<_> = producers
                .iter()
                .map(|p| scope.spawn(|| p.collect()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_default())
                .collect()
        })
    }
}

struct FamilyAcc {
    help: String,
    metric_type: MetricType,
    label_names: Vec<String>,
    metrics: Vec<Metric>,
}

fn label_names_of(metric: &Metric) -> Vec<String> {
    metric.labels.iter().map(|(n, _)| n.clone()).collect()
}

fn merge_families(raw: Vec<MetricFamily>, strict: bool) -> Result<(Vec<MetricFamily>, Vec<Error>)> {
    let mut acc: HashMap<String, FamilyAcc> = HashMap::new();
    let mut errors = Vec::new();

    for family in raw {
        for metric in family.metrics {
            let names = label_names_of(&metric);
            match acc.get_mut(&family.name) {
                None => {
                    acc.insert(
                        family.name.clone(),
                        FamilyAcc {
                            help: family.help.clone(),
                            metric_type: family.metric_type,
                            label_names: names,
                            metrics: vec![metric],
                        },
                    );
                }
                Some(existing) => {
                    if existing.metric_type != family.metric_type || existing.label_names != names
                    {
                        let err = Error::Inconsistent(family.name.clone());
                        if strict {
                            return Err(err);
                        }
                        errors.push(err);
                        continue;
                    }
                    existing.metrics.push(metric);
                }
            }
        }
    }

    let mut families: Vec<MetricFamily> = acc
        .into_iter()
        .map(|(name, mut fam)| {
            fam.metrics.sort_by(|a, b| cmp_label_pairs(&a.labels, &b.labels));
            MetricFamily {
                name,
                help: fam.help,
                metric_type: fam.metric_type,
                metrics: fam.metrics,
            }
        })
        .collect();
    families.sort_by(|a, b| a.name.cmp(&b.name));

    Ok((families, errors))
}

fn cmp_label_pairs(a: &[(String, String)], b: &[(String, String)]) -> std::cmp::Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Counter;
    use crate::gauge::Gauge;

    #[test]
    fn test_register_and_gather() {
        let registry = Registry::new();
        let c = Counter::new("requests_total", "total requests").unwrap();
        c.inc();
        registry.register(c).unwrap();

        let families = registry.gather().unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "requests_total");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = Registry::new();
        let c1 = Counter::new("dup", "help").unwrap();
        let c2 = Counter::new("dup", "help").unwrap();
        registry.register(c1).unwrap();
        let err = registry.register(c2).unwrap_err();
        assert_eq!(err, Error::DescriptorIdCollision { fq_name: "dup".into() });
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let registry = Registry::new();
        let c = Counter::new("x", "help a").unwrap();
        registry.register(c).unwrap();

        let g = Gauge::new("x", "help b").unwrap();
        let err = registry.register(g).unwrap_err();
        assert_eq!(err, Error::DimensionMismatch { fq_name: "x".into() });
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        let c = Counter::new("gone", "help").unwrap();
        let id = registry.register(c).unwrap();
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));

        let families = registry.gather().unwrap();
        assert!(families.is_empty());
    }

    #[test]
    fn test_gather_sorted_by_name() {
        let registry = Registry::new();
        registry
            .register(Counter::new("zeta", "help").unwrap())
            .unwrap();
        registry
            .register(Counter::new("alpha", "help").unwrap())
            .unwrap();

        let families = registry.gather().unwrap();
        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
