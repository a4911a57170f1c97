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

//! Convenience macros for building label maps, opts, and registering
//! instruments with the default registry.

/// Builds a `HashMap<&str, &str>` from `"key" => "value"` pairs, for use
/// with `with`/`get_by_labels`/`remove`-style vector lookups.
#[macro_export]
macro_rules! labels {
    ( $( $key:expr => $value:expr ),* $(,)? ) => {{
        #[allow(unused_mut)]
        let mut m = ::std::collections::HashMap::new();
        $( m.insert($key, $value); )*
        m
    }};
}

/// Builds an [`Opts`](crate::collector::Opts) from a name and help string,
/// optionally followed by `const_labels: { ... }`.
#[macro_export]
macro_rules! opts {
    ( $name:expr, $help:expr $(, const_labels: { $( $lk:expr => $lv:expr ),* $(,)? } )? $(,)? ) => {{
        #[allow(unused_mut)]
        let mut opts = $crate::collector::Opts::new($name, $help);
        $(
            let mut cl = ::std::collections::HashMap::new();
            $( cl.insert($lk.to_owned(), $lv.to_owned()); )*
            opts = opts.const_labels(cl);
        )?
        opts
    }};
}

/// Registers a counter built from `opts!`-style arguments into the
/// default registry, returning the constructed [`Counter`](crate::counter::Counter).
#[macro_export]
macro_rules! register_counter {
    ( $name:expr, $help:expr ) => {{
        let c = $crate::counter::Counter::new($name, $help)?;
        $crate::default_registry().register(c.clone())?;
        Ok::<_, $crate::error::Error>(c)
    }};
}

/// Registers a gauge built from `opts!`-style arguments into the default
/// registry, returning the constructed [`Gauge`](crate::gauge::Gauge).
#[macro_export]
macro_rules! register_gauge {
    ( $name:expr, $help:expr ) => {{
        let g = $crate::gauge::Gauge::new($name, $help)?;
        $crate::default_registry().register(g.clone())?;
        Ok::<_, $crate::error::Error>(g)
    }};
}

/// Registers a histogram with the given opts into the default registry.
#[macro_export]
macro_rules! register_histogram {
    ( $opts:expr ) => {{
        let h = $crate::histogram::Histogram::with_opts($opts)?;
        $crate::default_registry().register(h.clone())?;
        Ok::<_, $crate::error::Error>(h)
    }};
}

/// Registers a summary with the given opts into the default registry.
#[macro_export]
macro_rules! register_summary {
    ( $opts:expr ) => {{
        let s = $crate::summary::Summary::with_opts($opts)?;
        $crate::default_registry().register(s.clone())?;
        Ok::<_, $crate::error::Error>(s)
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_labels_macro() {
        let m = labels! { "a" => "1", "b" => "2" };
        assert_eq!(m.get("a"), Some(&"1"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_opts_macro() {
        let opts = opts!("name", "help", const_labels: { "service" => "api" });
        assert_eq!(opts.name, "name");
        assert_eq!(opts.const_labels.get("service"), Some(&"api".to_owned()));
    }

    #[test]
    fn test_register_counter_macro() {
        let result: Result<_, crate::error::Error> = (|| register_counter!("reg_test_counter", "help"))();
        let c = result.unwrap();
        c.inc();
        assert_eq!(c.get(), 1.0);
    }
}
