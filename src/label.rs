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

//! Label-name grammar and the FNV-1a hashing used throughout the crate for
//! descriptor identity, dimension hashes, and label-value-tuple
//! fingerprints.

use fnv::FnvHasher;
use std::hash::Hasher;

use crate::error::{Error, Result};

/// Fully-qualified metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*`. Names beginning with
/// `__` are reserved for internal use and rejected here too.
pub fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn check_label_name(name: &str) -> Result<()> {
    if is_valid_label_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidLabelName(name.to_owned()))
    }
}

pub fn check_label_value(name: &str, value: &str) -> Result<()> {
    // Label values are arbitrary UTF-8; `&str` already guarantees this, so
    // there is nothing further to validate beyond the type itself. Kept as
    // an explicit checkpoint so call sites read the same whether or not a
    // future grammar restriction is added.
    let _ = (name, value);
    Ok(())
}

/// 64-bit FNV-1a over an arbitrary byte stream, using `0xFF` as an
/// unambiguous separator between fields (never valid inside a UTF-8
/// string) so that e.g. `("ab", "c")` and `("a", "bc")` hash differently.
pub struct Fingerprint {
    hasher: FnvHasher,
}

impl Fingerprint {
    pub fn new() -> Self {
        Fingerprint {
            hasher: FnvHasher::default(),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.write(bytes);
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write(s.as_bytes())
    }

    pub fn separator(&mut self) -> &mut Self {
        self.hasher.write_u8(0xFF);
        self
    }

    pub fn finish(&self) -> u64 {
        self.hasher.finish()
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

/// Hashes an ordered sequence of label values (already positioned according
/// to a descriptor's variable-label order) into a single 64-bit
/// fingerprint used as the key inside a `MetricVec`.
pub fn hash_label_values<S: AsRef<str>>(values: &[S]) -> u64 {
    let mut fp = Fingerprint::new();
    for v in values {
        fp.write_str(v.as_ref());
        fp.separator();
    }
    fp.finish()
}

/// Hashes a sorted sequence of `u64`s, used for a collector's identity:
/// FNV-1a over the sorted sequence of its descriptor ids.
pub fn hash_u64_seq(values: &[u64]) -> u64 {
    let mut fp = Fingerprint::new();
    for v in values {
        fp.write(&v.to_le_bytes());
        fp.separator();
    }
    fp.finish()
}

/// Hashes an ordered sequence of `(name, value)` pairs; used for the
/// dimension hash and for canonicalizing constant-label sets.
pub fn hash_label_pairs<S: AsRef<str>>(pairs: &[(S, S)]) -> u64 {
    let mut fp = Fingerprint::new();
    for (name, value) in pairs {
        fp.write_str(name.as_ref());
        fp.separator();
        fp.write_str(value.as_ref());
        fp.separator();
    }
    fp.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_metric_name() {
        assert!(is_valid_metric_name("http_requests_total"));
        assert!(is_valid_metric_name("_private"));
        assert!(is_valid_metric_name("a:b"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1abc"));
        assert!(!is_valid_metric_name("has space"));
    }

    #[test]
    fn test_valid_label_name() {
        assert!(is_valid_label_name("method"));
        assert!(is_valid_label_name("_x"));
        assert!(!is_valid_label_name("__reserved"));
        assert!(!is_valid_label_name("1x"));
        assert!(!is_valid_label_name(""));
    }

    #[test]
    fn test_fingerprint_distinguishes_split_point() {
        let a = hash_label_values(&["ab", "c"]);
        let b = hash_label_values(&["a", "bc"]);
        // Not a correctness guarantee (hash collisions are always
        // possible) but the separator must make this the overwhelmingly
        // likely case, which is all the crate relies on: the vector falls
        // back to tuple equality on a fingerprint collision.
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_order_sensitive() {
        let a = hash_label_values(&["a", "b"]);
        let b = hash_label_values(&["b", "a"]);
        assert_ne!(a, b);
    }
}
