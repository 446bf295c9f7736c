// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An ordered group of spans sharing one root operation.
pub type Trace = Vec<Span>;

/// A single timed operation, laid out with the field names the agent's v0.4 endpoint expects.
///
/// The writer never mutates spans; filters may replace a whole trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: u64,
    pub span_id: u64,
    /// Zero for a root span.
    pub parent_id: u64,
    pub name: String,
    pub service: String,
    pub resource: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub span_type: String,
    /// Start time in nanoseconds since the unix epoch.
    pub start: i64,
    /// Duration in nanoseconds.
    pub duration: i64,
    pub error: i32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, f64>,
}

impl Span {
    pub fn new(trace_id: u64, span_id: u64, parent_id: u64, name: &str, service: &str) -> Self {
        Span {
            trace_id,
            span_id,
            parent_id,
            name: name.to_string(),
            service: service.to_string(),
            resource: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }
}

/// Returns the root span of a trace: the first span without a parent, or the first span when
/// the trace only holds children (partial flush).
pub fn root_span(trace: &[Span]) -> Option<&Span> {
    trace.iter().find(|span| span.is_root()).or_else(|| trace.first())
}
