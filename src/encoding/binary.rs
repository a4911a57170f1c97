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

//! A length-delimited binary encoding of the abstract metric family model
//! (spec.md §6). There is no `.proto` schema compiled into this crate (see
//! DESIGN.md): each family is varint-length-prefixed followed by a plain
//! field encoding of [`MetricFamily`], rather than the real Prometheus
//! protobuf wire format.

use std::io::{self, Write};

use crate::proto::{
    BucketSpan, HistogramBucket, HistogramValue, Metric, MetricFamily, MetricType, MetricValue,
    NativeHistogramData, SummaryQuantile, SummaryValue,
};

fn write_varint<W: Write>(w: &mut W, mut v: u64) -> io::Result<()> {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            w.write_all(&[byte])?;
            return Ok(());
        }
        w.write_all(&[byte | 0x80])?;
    }
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_varint(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_bits().to_le_bytes())
}

fn write_label_pairs<W: Write>(w: &mut W, pairs: &[(String, String)]) -> io::Result<()> {
    write_varint(w, pairs.len() as u64)?;
    for (name, value) in pairs {
        write_str(w, name)?;
        write_str(w, value)?;
    }
    Ok(())
}

fn metric_type_tag(t: MetricType) -> u8 {
    match t {
        MetricType::Counter => 0,
        MetricType::Gauge => 1,
        MetricType::Histogram => 2,
        MetricType::Summary => 3,
        MetricType::Untyped => 4,
    }
}

/// Encodes every family to `writer`, each preceded by a varint byte length
/// so a reader can frame them back out of a concatenated stream.
pub fn encode<W: Write>(writer: &mut W, families: &[MetricFamily]) -> io::Result<()> {
    for family in families {
        let mut buf = Vec::new();
        encode_family(&mut buf, family)?;
        write_varint(writer, buf.len() as u64)?;
        writer.write_all(&buf)?;
    }
    Ok(())
}

fn encode_family<W: Write>(w: &mut W, family: &MetricFamily) -> io::Result<()> {
    write_str(w, &family.name)?;
    write_str(w, &family.help)?;
    w.write_all(&[metric_type_tag(family.metric_type)])?;
    write_varint(w, family.metrics.len() as u64)?;
    for metric in &family.metrics {
        encode_metric(w, metric)?;
    }
    Ok(())
}

fn encode_metric<W: Write>(w: &mut W, metric: &Metric) -> io::Result<()> {
    write_label_pairs(w, &metric.labels)?;
    match &metric.value {
        MetricValue::Counter {
            value,
            created_timestamp_seconds,
            exemplar,
        } => {
            w.write_all(&[0])?;
            write_f64(w, *value)?;
            match created_timestamp_seconds {
                Some(ts) => {
                    w.write_all(&[1])?;
                    write_f64(w, *ts)?;
                }
                None => w.write_all(&[0])?,
            }
            encode_exemplar(w, exemplar.as_ref())
        }
        MetricValue::Gauge { value } => {
            w.write_all(&[1])?;
            write_f64(w, *value)
        }
        MetricValue::Histogram(hv) => {
            w.write_all(&[2])?;
            encode_histogram(w, hv)
        }
        MetricValue::Summary(sv) => {
            w.write_all(&[3])?;
            encode_summary(w, sv)
        }
        MetricValue::Untyped { value } => {
            w.write_all(&[4])?;
            write_f64(w, *value)
        }
    }
}

fn encode_exemplar<W: Write>(w: &mut W, exemplar: Option<&crate::exemplar::Exemplar>) -> io::Result<()> {
    match exemplar {
        None => w.write_all(&[0]),
        Some(e) => {
            w.write_all(&[1])?;
            write_f64(w, e.value)?;
            write_f64(w, e.timestamp_epoch_seconds)?;
            write_label_pairs(w, &e.labels)
        }
    }
}

fn encode_histogram<W: Write>(w: &mut W, hv: &HistogramValue) -> io::Result<()> {
    write_varint(w, hv.sample_count)?;
    write_f64(w, hv.sample_sum)?;
    write_varint(w, hv.buckets.len() as u64)?;
    for b in &hv.buckets {
        encode_bucket(w, b)?;
    }
    match &hv.native {
        None => w.write_all(&[0])?,
        Some(n) => {
            w.write_all(&[1])?;
            encode_native(w, n)?;
        }
    }
    Ok(())
}

fn encode_bucket<W: Write>(w: &mut W, b: &HistogramBucket) -> io::Result<()> {
    write_f64(w, b.upper_bound)?;
    write_varint(w, b.cumulative_count)?;
    encode_exemplar(w, b.exemplar.as_ref())
}

fn encode_native<W: Write>(w: &mut W, n: &NativeHistogramData) -> io::Result<()> {
    w.write_all(&n.schema.to_le_bytes())?;
    write_f64(w, n.zero_threshold)?;
    write_varint(w, n.zero_count)?;
    encode_spans(w, &n.positive_spans)?;
    encode_spans(w, &n.negative_spans)
}

fn encode_spans<W: Write>(w: &mut W, spans: &[BucketSpan]) -> io::Result<()> {
    write_varint(w, spans.len() as u64)?;
    for span in spans {
        w.write_all(&span.offset.to_le_bytes())?;
        write_varint(w, span.deltas.len() as u64)?;
        for d in &span.deltas {
            w.write_all(&d.to_le_bytes())?;
        }
    }
    Ok(())
}

fn encode_summary<W: Write>(w: &mut W, sv: &SummaryValue) -> io::Result<()> {
    write_varint(w, sv.sample_count)?;
    write_f64(w, sv.sample_sum)?;
    write_varint(w, sv.quantiles.len() as u64)?;
    for q in &sv.quantiles {
        encode_quantile(w, q)?;
    }
    Ok(())
}

fn encode_quantile<W: Write>(w: &mut W, q: &SummaryQuantile) -> io::Result<()> {
    write_f64(w, q.quantile)?;
    write_f64(w, q.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::counter::Counter;

    #[test]
    fn test_encode_roundtrip_length_prefix() {
        let c = Counter::new("c", "help").unwrap();
        c.inc();
        let mut buf = Vec::new();
        encode(&mut buf, &c.collect()).unwrap();
        assert!(!buf.is_empty());
        // first byte is the varint length of the encoded family.
        assert!(buf[0] as usize <= buf.len());
    }
}
