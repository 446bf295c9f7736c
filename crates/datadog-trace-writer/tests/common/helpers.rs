// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

#![allow(dead_code)]

use datadog_trace_writer::{Config, Span, Trace};
use std::time::{Duration, Instant};

/// A trace of `span_count` spans whose root belongs to `service`.
pub fn create_test_trace(trace_id: u64, span_count: usize, service: &str) -> Trace {
    (0..span_count as u64)
        .map(|i| {
            let parent_id = if i == 0 { 0 } else { 1 };
            Span::new(trace_id, i + 1, parent_id, "operation", service)
        })
        .collect()
}

/// A single-span trace carrying roughly `size` bytes of tag data.
pub fn create_sized_trace(trace_id: u64, size: usize) -> Trace {
    let mut span = Span::new(trace_id, 1, 0, "operation", "web");
    span.meta.insert("blob".to_string(), "x".repeat(size));
    vec![span]
}

/// Settings with a long flush interval so only triggers and shutdown flush.
pub fn test_settings() -> Config {
    Config {
        flush_interval: Duration::from_secs(60),
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
