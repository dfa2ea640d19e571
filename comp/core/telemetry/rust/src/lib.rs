// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

//! Internal telemetry for agent components.
//!
//! Components emit their health metrics through the `metrics` facade. Each
//! component holds a [`Telemetry`] handle: either bound to its own
//! [`metrics::Recorder`], so that two components never share state, or
//! falling through to whatever global recorder the process installed.

mod memory;

pub use memory::{MemoryRecorder, MetricType, Sample};

use std::fmt;
use std::sync::Arc;

use metrics::{Label, Recorder};

/// Where a component's metrics go.
#[derive(Clone, Default)]
pub struct Telemetry {
    recorder: Option<Arc<dyn Recorder + Send + Sync>>,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("local_recorder", &self.recorder.is_some())
            .finish()
    }
}

fn to_labels(labels: &[(&str, &str)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(key.to_string(), value.to_string()))
        .collect()
}

impl Telemetry {
    /// Emit to the process global recorder, which discards everything until
    /// one is installed.
    pub fn global() -> Self {
        Self::default()
    }

    /// Emit to `recorder` only.
    pub fn with_recorder(recorder: impl Recorder + Send + Sync + 'static) -> Self {
        Self {
            recorder: Some(Arc::new(recorder)),
        }
    }

    fn emit(&self, f: impl FnOnce()) {
        match &self.recorder {
            Some(recorder) => metrics::with_local_recorder(recorder.as_ref(), f),
            None => f(),
        }
    }

    pub fn count(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        let labels = to_labels(labels);
        self.emit(|| metrics::counter!(name.to_string(), labels).increment(value));
    }

    pub fn gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let labels = to_labels(labels);
        self.emit(|| metrics::gauge!(name.to_string(), labels).set(value));
    }

    pub fn histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let labels = to_labels(labels);
        self.emit(|| metrics::histogram!(name.to_string(), labels).record(value));
    }
}
