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

//! The atomic, lock-free carrier for a single `f64` observation. Counters,
//! gauges, and the scalar parts of histograms and summaries all bottom out
//! here: an `AtomicU64` holding the IEEE-754 bit pattern of the current
//! value, mutated with a compare-and-swap retry loop.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free `f64` cell. `Send + Sync`, allocation-free, and safe for
/// concurrent observation from any number of threads.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        AtomicF64 {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Adds `delta` via a CAS retry loop. `delta` may be negative (used by
    /// `Gauge::sub`); `Counter` enforces non-negativity itself before
    /// calling this.
    #[inline]
    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let new = f64::from_bits(current) + delta;
            match self.bits.compare_exchange_weak(
                current,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// A plain `AtomicU64` counter. Used for the packed `count_and_hot_idx` word
/// in the histogram engine (src/histogram.rs), where the top bit selects the
/// hot side and the low 63 bits are a monotonic observation count. A thin
/// alias kept separate from `std::sync::atomic::AtomicU64` only so that call
/// site reads `atomic::AtomicCount` next to `atomic::AtomicF64` rather than
/// mixing `std::sync::atomic` imports with this module's.
pub type AtomicCount = AtomicU64;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_atomic_f64_get_set() {
        let a = AtomicF64::new(1.5);
        assert_eq!(a.get(), 1.5);
        a.set(-3.0);
        assert_eq!(a.get(), -3.0);
    }

    #[test]
    fn test_atomic_f64_add_concurrent() {
        let a = Arc::new(AtomicF64::new(0.0));
        let mut handles = vec![];
        for _ in 0..8 {
            let a = Arc::clone(&a);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    a.add(1.0);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(a.get(), 8000.0);
    }
}
