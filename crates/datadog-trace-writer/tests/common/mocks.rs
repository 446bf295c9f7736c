// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of writer collaborators for testing

#![allow(dead_code)]

use async_trait::async_trait;
use datadog_trace_writer::encoder::{Payload, JSON_CONTENT_TYPE};
use datadog_trace_writer::errors::{FilterError, TransportError};
use datadog_trace_writer::filter::TraceFilter;
use datadog_trace_writer::health::HealthMetrics;
use datadog_trace_writer::sampler::RateByServiceSink;
use datadog_trace_writer::transport::{Response, SendResult, Transport};
use datadog_trace_writer::{Span, Trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Transport that records every payload and answers with a configurable status.
pub struct MockTransport {
    pub payloads: Mutex<Vec<Payload>>,
    status: Mutex<u16>,
    body: Mutex<Option<String>>,
    refuse: Mutex<bool>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::with_delay(Duration::ZERO)
    }

    /// Sleeps for `delay` inside every send.
    pub fn with_delay(delay: Duration) -> Self {
        MockTransport {
            payloads: Mutex::new(Vec::new()),
            status: Mutex::new(200),
            body: Mutex::new(None),
            refuse: Mutex::new(false),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn respond_with(&self, status: u16, body: Option<&str>) {
        *self.status.lock().unwrap() = status;
        *self.body.lock().unwrap() = body.map(str::to_string);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        *self.refuse.lock().unwrap() = refuse;
    }

    pub fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn sent_traces(&self) -> usize {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|payload| payload.trace_count)
            .sum()
    }

    /// Most sends that were ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Decodes every recorded payload back into traces, in send order.
    pub fn decoded_traces(&self) -> Vec<Trace> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .flat_map(|payload| {
                let traces: Vec<Vec<Span>> = if payload.content_type == JSON_CONTENT_TYPE {
                    serde_json::from_slice(&payload.data).unwrap()
                } else {
                    rmp_serde::from_slice(&payload.data).unwrap()
                };
                traces
            })
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, payload: &Payload) -> Vec<SendResult> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.payloads.lock().unwrap().push(payload.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if *self.refuse.lock().unwrap() {
            let error = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
            return vec![Err(TransportError::Io(error))];
        }
        let status = *self.status.lock().unwrap();
        let body = self.body.lock().unwrap().clone();
        vec![Ok(Response::new(status, body))]
    }

    fn endpoint(&self) -> String {
        "http://mock-agent:8126".to_string()
    }
}

/// Sampling sink that keeps every table it receives.
#[derive(Default)]
pub struct MockRateSink {
    pub updates: Mutex<Vec<HashMap<String, f64>>>,
}

impl RateByServiceSink for MockRateSink {
    fn update_rate_by_service_sample_rates(&self, rates: &HashMap<String, f64>) {
        self.updates.lock().unwrap().push(rates.clone());
    }
}

/// Health metrics sink that records metric names and values.
#[derive(Default)]
pub struct MockHealthMetrics {
    pub metrics: Mutex<Vec<(String, f64)>>,
}

impl MockHealthMetrics {
    pub fn count(&self, name: &str) -> usize {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|(metric, _)| metric == name)
            .count()
    }

    pub fn total(&self, name: &str) -> f64 {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|(metric, _)| metric == name)
            .map(|(_, value)| value)
            .sum()
    }
}

impl HealthMetrics for MockHealthMetrics {
    fn gauge(&self, name: &str, value: f64, _tags: &[&str]) {
        self.metrics.lock().unwrap().push((name.to_string(), value));
    }

    fn increment(&self, name: &str, value: u64, tags: &[&str]) {
        let name = match tags.first() {
            Some(tag) => format!("{name}|{tag}"),
            None => name.to_string(),
        };
        self.metrics.lock().unwrap().push((name, value as f64));
    }

    fn histogram(&self, name: &str, value: f64, _tags: &[&str]) {
        self.metrics.lock().unwrap().push((name.to_string(), value));
    }
}

/// Drops traces whose root span belongs to `service`.
pub struct DropServiceFilter {
    pub service: String,
}

impl TraceFilter for DropServiceFilter {
    fn process_trace(&self, trace: Trace) -> Result<Option<Trace>, FilterError> {
        if trace.iter().any(|span| span.service == self.service) {
            Ok(None)
        } else {
            Ok(Some(trace))
        }
    }
}

/// Filter that always fails.
pub struct FailingFilter;

impl TraceFilter for FailingFilter {
    fn process_trace(&self, _trace: Trace) -> Result<Option<Trace>, FilterError> {
        Err(FilterError::new("FailingFilter", "boom"))
    }
}
