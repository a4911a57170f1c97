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

//! The Prometheus text exposition format, 0.0.4 (spec.md §6).

use std::io::{self, Write};

use crate::proto::{MetricFamily, MetricType, MetricValue};

/// Encodes every family to `writer` in Prometheus text 0.0.4.
pub fn encode<W: Write>(writer: &mut W, families: &[MetricFamily]) -> io::Result<()> {
    for family in families {
        write_family(writer, family)?;
    }
    Ok(())
}

/// Convenience wrapper returning the encoded text as a `String`.
pub fn encode_to_string(families: &[MetricFamily]) -> String {
    let mut buf = Vec::new();
    encode(&mut buf, families).expect("writing to a Vec<u8> cannot fail");
    String::from_utf8(buf).expect("encoder only emits valid UTF-8")
}

fn write_family<W: Write>(w: &mut W, family: &MetricFamily) -> io::Result<()> {
    writeln!(w, "# HELP {} {}", family.name, escape_help(&family.help))?;
    writeln!(w, "# TYPE {} {}", family.name, type_str(family.metric_type))?;
    for metric in &family.metrics {
        write_metric(w, family, metric)?;
    }
    Ok(())
}

fn type_str(t: MetricType) -> &'static str {
    match t {
        MetricType::Counter => "counter",
        MetricType::Gauge => "gauge",
        MetricType::Histogram => "histogram",
        MetricType::Summary => "summary",
        MetricType::Untyped => "untyped",
    }
}

fn write_metric<W: Write>(
    w: &mut W,
    family: &MetricFamily,
    metric: &crate::proto::Metric,
) -> io::Result<()> {
    match &metric.value {
        MetricValue::Counter { value, .. } => {
            write_sample(w, &family.name, &metric.labels, &[], *value)
        }
        MetricValue::Gauge { value } | MetricValue::Untyped { value } => {
            write_sample(w, &family.name, &metric.labels, &[], *value)
        }
        MetricValue::Histogram(hv) => {
            // Finite buckets carry their own cumulative count; the `+Inf`
            // bucket always equals sampleCount and is emitted even when no
            // exemplar gave it an explicit entry in `hv.buckets`.
            for bucket in &hv.buckets {
                if bucket.upper_bound.is_finite() {
                    write_sample(
                        w,
                        &format!("{}_bucket", family.name),
                        &metric.labels,
                        &[("le", format_bound(bucket.upper_bound))],
                        bucket.cumulative_count as f64,
                    )?;
                }
            }
            write_sample(
                w,
                &format!("{}_bucket", family.name),
                &metric.labels,
                &[("le", "+Inf".to_owned())],
                hv.sample_count as f64,
            )?;
            write_sample(
                w,
                &format!("{}_sum", family.name),
                &metric.labels,
                &[],
                hv.sample_sum,
            )?;
            write_sample(
                w,
                &format!("{}_count", family.name),
                &metric.labels,
                &[],
                hv.sample_count as f64,
            )
        }
        MetricValue::Summary(sv) => {
            for q in &sv.quantiles {
                write_sample(
                    w,
                    &family.name,
                    &metric.labels,
                    &[("quantile", format_bound(q.quantile))],
                    q.value,
                )?;
            }
            write_sample(
                w,
                &format!("{}_sum", family.name),
                &metric.labels,
                &[],
                sv.sample_sum,
            )?;
            write_sample(
                w,
                &format!("{}_count", family.name),
                &metric.labels,
                &[],
                sv.sample_count as f64,
            )
        }
    }
}

fn format_bound(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 {
            "+Inf".to_owned()
        } else {
            "-Inf".to_owned()
        }
    } else {
        v.to_string()
    }
}

fn write_sample<W: Write>(
    w: &mut W,
    name: &str,
    labels: &[(String, String)],
    synthetic: &[(&str, String)],
    value: f64,
) -> io::Result<()> {
    write!(w, "{name}")?;
    if !labels.is_empty() || !synthetic.is_empty() {
        write!(w, "{{")?;
        let mut first = true;
        for (k, v) in labels {
            if !first {
                write!(w, ",")?;
            }
            write!(w, "{k}=\"{}\"", escape_label_value(v))?;
            first = false;
        }
        for (k, v) in synthetic {
            if !first {
                write!(w, ",")?;
            }
            write!(w, "{k}=\"{}\"", escape_label_value(v))?;
            first = false;
        }
        write!(w, "}}")?;
    }
    writeln!(w, " {}", format_value(value))
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v.is_infinite() {
        if v > 0.0 {
            "+Inf".to_owned()
        } else {
            "-Inf".to_owned()
        }
    } else {
        v.to_string()
    }
}

fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::histogram::{Histogram, HistogramOpts};

    #[test]
    fn test_histogram_text_output() {
        let h = Histogram::with_opts(
            HistogramOpts::new("http_latency_seconds", "latency").buckets(vec![0.1, 1.0]),
        )
        .unwrap();
        h.observe(0.05);
        h.observe(0.5);
        h.observe(2.0);

        let text = encode_to_string(&h.collect());
        assert!(text.contains("http_latency_seconds_bucket{le=\"0.1\"} 1"));
        assert!(text.contains("http_latency_seconds_bucket{le=\"1\"} 2"));
        assert!(text.contains("http_latency_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("http_latency_seconds_sum"));
        assert!(text.contains("http_latency_seconds_count 3"));
    }

    #[test]
    fn test_help_and_label_escaping() {
        use crate::collector::Opts;
        use crate::counter::Counter;

        let c = Counter::with_opts(Opts::new("c", "help with \\ and \n newline")).unwrap();
        c.inc();
        let text = encode_to_string(&c.collect());
        assert!(text.contains("# HELP c help with \\\\ and \\n newline"));
    }
}
