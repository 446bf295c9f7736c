// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Best-effort health metrics about the writer itself, shipped to a local DogStatsD server.

use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use tracing::debug;

pub const HEARTBEAT: &str = "datadog.tracer.heartbeat";
pub const FLUSHES: &str = "datadog.tracer.flushes";
pub const FLUSH_TRACES: &str = "datadog.tracer.flush.traces";
pub const FLUSH_SPANS: &str = "datadog.tracer.flush.spans";
pub const FLUSH_BYTES: &str = "datadog.tracer.flush.bytes";
pub const FLUSH_TRACES_FILTERED: &str = "datadog.tracer.flush.traces_filtered";
pub const API_REQUESTS: &str = "datadog.tracer.api.requests";
pub const API_ERRORS: &str = "datadog.tracer.api.errors";
pub const API_RESPONSES: &str = "datadog.tracer.api.responses";
pub const QUEUE_MAX_LENGTH: &str = "datadog.tracer.queue.max_length";
pub const QUEUE_DROPPED_TRACES: &str = "datadog.tracer.queue.dropped.traces";
pub const QUEUE_ENQUEUED_TRACES: &str = "datadog.tracer.queue.enqueued.traces";
pub const QUEUE_ENQUEUED_SPANS: &str = "datadog.tracer.queue.enqueued.spans";
pub const SHUTDOWN: &str = "datadog.tracer.shutdown";

/// Sink for writer health metrics. Implementations must never block or fail loudly: metrics are a
/// side channel and their absence never affects trace delivery.
pub trait HealthMetrics: Send + Sync {
    fn gauge(&self, name: &str, value: f64, tags: &[&str]);
    fn increment(&self, name: &str, value: u64, tags: &[&str]);
    fn histogram(&self, name: &str, value: f64, tags: &[&str]);

    /// Records `value` as a histogram and adds it to a `<name>.total` counter.
    fn histogram_with_total(&self, name: &str, value: u64, tags: &[&str]) {
        self.histogram(name, value as f64, tags);
        self.increment(&format!("{name}.total"), value, tags);
    }
}

/// Formats a single DogStatsD datagram: `name:value|type|#tag1,tag2`.
pub fn format_metric(name: &str, value: &str, metric_type: &str, tags: &[&str]) -> String {
    if tags.is_empty() {
        format!("{name}:{value}|{metric_type}")
    } else {
        format!("{name}:{value}|{metric_type}|#{}", tags.join(","))
    }
}

/// Fire-and-forget UDP DogStatsD client.
#[derive(Debug)]
pub struct DogStatsDClient {
    socket: UdpSocket,
}

impl DogStatsDClient {
    pub fn new<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        socket.set_nonblocking(true)?;
        Ok(DogStatsDClient { socket })
    }

    fn send(&self, line: String) {
        if let Err(e) = self.socket.send(line.as_bytes()) {
            debug!("Failed to send health metric {line}: {e}");
        }
    }
}

impl HealthMetrics for DogStatsDClient {
    fn gauge(&self, name: &str, value: f64, tags: &[&str]) {
        self.send(format_metric(name, &value.to_string(), "g", tags));
    }

    fn increment(&self, name: &str, value: u64, tags: &[&str]) {
        self.send(format_metric(name, &value.to_string(), "c", tags));
    }

    fn histogram(&self, name: &str, value: f64, tags: &[&str]) {
        self.send(format_metric(name, &value.to_string(), "h", tags));
    }
}
