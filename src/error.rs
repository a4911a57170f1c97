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

use std::result;

use thiserror::Error;

/// All error kinds produced by this crate. The core returns errors; it
/// never logs and never panics on a host-supplied value (panics are
/// reserved for the `_or_panic` convenience constructors, which exist only
/// for program-initialization paths).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("metric name must not be empty")]
    EmptyName,

    #[error("metric help text must not be empty")]
    EmptyHelp,

    #[error("invalid metric name: {0:?}")]
    InvalidName(String),

    #[error("invalid label name: {0:?}")]
    InvalidLabelName(String),

    #[error("invalid label value for {name:?}: {value:?}")]
    InvalidLabelValue { name: String, value: String },

    #[error("duplicate label name {0:?} in constant and variable label sets")]
    DuplicateLabel(String),

    #[error("{0:?} is a reserved label name for this metric kind")]
    ReservedLabelName(String),

    #[error("expected {expected} label values, got {got}")]
    CardinalityMismatch { expected: usize, got: usize },

    #[error("missing value for variable label {0:?}")]
    MissingLabel(String),

    #[error("unrecognized label name {0:?}")]
    UnknownLabel(String),

    #[error("collector already registered")]
    AlreadyRegistered,

    #[error("descriptor {fq_name:?} collides with an already-registered descriptor")]
    DescriptorIdCollision { fq_name: String },

    #[error("descriptor {fq_name:?} disagrees in help/kind/labels with a prior registration")]
    DimensionMismatch { fq_name: String },

    #[error("counter cannot be incremented by a negative value: {0}")]
    NegativeIncrement(f64),

    #[error("a metric emitted by a producer is inconsistent with its descriptor: {0}")]
    Inconsistent(String),

    #[error("{0} producer(s) failed during gather")]
    Gather(usize),

    #[error("{0}")]
    Msg(String),
}

pub type Result<T> = result::Result<T, Error>;
