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

//! Exemplars: an optional reading attached to a histogram bucket, pointing
//! to a trace or sample associated with the observation.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Total UTF-8 length, across all label pairs, that an exemplar's label
/// set may carry.
pub const MAX_LABEL_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    pub value: f64,
    pub timestamp_epoch_seconds: f64,
    pub labels: Vec<(String, String)>,
}

impl Exemplar {
    pub fn new(value: f64, labels: Vec<(String, String)>) -> Result<Self> {
        let total_len: usize = labels
            .iter()
            .map(|(k, v)| k.chars().count() + v.chars().count())
            .sum();
        if total_len > MAX_LABEL_LEN {
            return Err(Error::Msg(format!(
                "exemplar label set exceeds {MAX_LABEL_LEN} UTF-8 code units"
            )));
        }
        for (name, _) in &labels {
            crate::label::check_label_name(name)?;
        }

        Ok(Exemplar {
            value,
            timestamp_epoch_seconds: epoch_seconds(),
            labels,
        })
    }
}

fn epoch_seconds() -> f64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_secs() as f64 + f64::from(d.subsec_nanos()) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exemplar_label_budget() {
        let ok = Exemplar::new(1.0, vec![("trace_id".into(), "abc123".into())]);
        assert!(ok.is_ok());

        let too_long: String = std::iter::repeat('a').take(200).collect();
        let err = Exemplar::new(1.0, vec![("trace_id".into(), too_long)]);
        assert!(err.is_err());
    }
}
