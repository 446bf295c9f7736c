// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::encoder::{new_encoder, Payload, TraceEncoder};
use crate::errors::WriterError;
use crate::filter::{apply_filters, TraceFilter};
use crate::health::{self, DogStatsDClient, HealthMetrics};
use crate::sampler::RateByServiceSink;
use crate::span::Trace;
use crate::throttle::ErrorThrottle;
use crate::transport::{AgentTransport, Response, Transport};
use crate::worker::{PeriodicTask, PeriodicWorker};

const WORKER_NAME: &str = "dd-trace-writer";

/// Everything an [`AgentWriter`] is built from. Cloning it is how a writer is recreated with
/// the same settings.
#[derive(Clone)]
pub struct WriterConfig {
    pub settings: Arc<Config>,
    pub filters: Vec<Arc<dyn TraceFilter>>,
    pub rate_sinks: Vec<Arc<dyn RateByServiceSink>>,
    /// Used instead of a DogStatsD client when health metrics are enabled.
    pub health_metrics: Option<Arc<dyn HealthMetrics>>,
    /// Used instead of an [`AgentTransport`] built from `settings.agent`.
    pub transport: Option<Arc<dyn Transport>>,
}

impl WriterConfig {
    pub fn new(settings: Config) -> Self {
        WriterConfig {
            settings: Arc::new(settings),
            filters: Vec::new(),
            rate_sinks: Vec::new(),
            health_metrics: None,
            transport: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn TraceFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_rate_sink(mut self, sink: Arc<dyn RateByServiceSink>) -> Self {
        self.rate_sinks.push(sink);
        self
    }

    #[must_use]
    pub fn with_health_metrics(mut self, health_metrics: Arc<dyn HealthMetrics>) -> Self {
        self.health_metrics = Some(health_metrics);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Unstarted,
    Running,
    Stopped,
}

/// Counters reset at every flush cycle.
#[derive(Debug, Default)]
struct WriterStats {
    enqueued_traces: AtomicU64,
    enqueued_spans: AtomicU64,
    filtered_traces: AtomicU64,
    dropped_traces: AtomicU64,
}

impl WriterStats {
    fn add(counter: &AtomicU64, value: usize) {
        counter.fetch_add(value as u64, Ordering::Relaxed);
    }

    fn take(counter: &AtomicU64) -> u64 {
        counter.swap(0, Ordering::Relaxed)
    }
}

struct Buffer {
    encoder: Box<dyn TraceEncoder>,
    /// Sealed payloads waiting for the next flush, oldest first.
    pending: VecDeque<Payload>,
}

struct WriterInner {
    settings: Arc<Config>,
    filters: Vec<Arc<dyn TraceFilter>>,
    rate_sinks: Vec<Arc<dyn RateByServiceSink>>,
    health_metrics: Option<Arc<dyn HealthMetrics>>,
    transport: Arc<dyn Transport>,
    buffer: Mutex<Buffer>,
    /// Held for a whole flush so batches reach the transport in drain order.
    flush_lock: tokio::sync::Mutex<()>,
    stats: WriterStats,
    throttle: ErrorThrottle,
}

impl WriterInner {
    fn new(
        config: &WriterConfig,
        transport: Arc<dyn Transport>,
        health_metrics: Option<Arc<dyn HealthMetrics>>,
    ) -> Self {
        let settings = Arc::clone(&config.settings);
        WriterInner {
            filters: config.filters.clone(),
            rate_sinks: config.rate_sinks.clone(),
            health_metrics,
            transport,
            buffer: Mutex::new(Buffer {
                encoder: new_encoder(settings.encoding),
                pending: VecDeque::new(),
            }),
            flush_lock: tokio::sync::Mutex::new(()),
            stats: WriterStats::default(),
            throttle: ErrorThrottle::new(settings.log_error_interval),
            settings,
        }
    }

    /// Appends a filtered trace to the buffer. Returns `true` when the worker should flush
    /// ahead of its next tick.
    fn enqueue(&self, trace: Trace) -> bool {
        let max_payload_size = self.settings.max_payload_size;
        #[allow(clippy::expect_used)]
        let mut buffer = self.buffer.lock().expect("lock poisoned");

        let encoded = match buffer.encoder.encode_trace(&trace) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode trace with {} spans: {e}", trace.len());
                WriterStats::add(&self.stats.dropped_traces, 1);
                return false;
            }
        };

        if buffer.encoder.standalone_size(encoded.len()) >= max_payload_size {
            error!(
                "Trace with {} spans is {} bytes, over the {max_payload_size} byte payload limit, dropping it",
                trace.len(),
                encoded.len()
            );
            WriterStats::add(&self.stats.dropped_traces, 1);
            return false;
        }

        let mut sealed = false;
        if buffer.encoder.size_with(encoded.len()) >= max_payload_size {
            if buffer.pending.len() >= self.settings.max_pending_payloads {
                warn!(
                    "Trace buffer is full with {} payloads waiting to be sent, dropping trace",
                    buffer.pending.len()
                );
                WriterStats::add(&self.stats.dropped_traces, 1);
                return true;
            }
            let trace_count = buffer.encoder.trace_count();
            match buffer.encoder.drain() {
                Ok(payload) => buffer.pending.push_back(payload),
                Err(e) => {
                    error!("Failed to seal payload, dropping {trace_count} traces: {e}");
                    WriterStats::add(&self.stats.dropped_traces, trace_count);
                }
            }
            sealed = true;
        }

        let size = buffer.encoder.push_encoded(encoded, trace.len());
        WriterStats::add(&self.stats.enqueued_traces, 1);
        WriterStats::add(&self.stats.enqueued_spans, trace.len());

        sealed || size >= self.settings.payload_size_threshold
    }

    /// Takes every sealed payload plus the in-progress buffer, leaving an empty buffer behind.
    fn take_payloads(&self) -> Vec<Payload> {
        #[allow(clippy::expect_used)]
        let mut buffer = self.buffer.lock().expect("lock poisoned");
        let mut payloads: Vec<Payload> = buffer.pending.drain(..).collect();
        if !buffer.encoder.is_empty() {
            let trace_count = buffer.encoder.trace_count();
            match buffer.encoder.drain() {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    error!("Failed to finish payload, dropping {trace_count} traces: {e}");
                    WriterStats::add(&self.stats.dropped_traces, trace_count);
                }
            }
        }
        payloads
    }

    fn buffered_size(&self) -> usize {
        #[allow(clippy::expect_used)]
        let buffer = self.buffer.lock().expect("lock poisoned");
        let current = if buffer.encoder.is_empty() {
            0
        } else {
            buffer.encoder.size()
        };
        current + buffer.pending.iter().map(Payload::size).sum::<usize>()
    }

    fn buffered_traces(&self) -> usize {
        #[allow(clippy::expect_used)]
        let buffer = self.buffer.lock().expect("lock poisoned");
        buffer.encoder.trace_count()
            + buffer
                .pending
                .iter()
                .map(|payload| payload.trace_count)
                .sum::<usize>()
    }

    async fn flush(&self) {
        let _flushing = self.flush_lock.lock().await;
        let payloads = self.take_payloads();
        self.report_queue_stats();
        if payloads.is_empty() {
            debug!("No traces to flush");
            return;
        }

        if let Some(metrics) = &self.health_metrics {
            metrics.increment(health::FLUSHES, 1, &[]);
        }
        for payload in payloads {
            self.send(payload).await;
        }
    }

    async fn send(&self, payload: Payload) {
        debug!(
            "Flushing {} traces ({} spans, {} bytes)",
            payload.trace_count,
            payload.span_count,
            payload.size()
        );
        let responses = self.transport.send(&payload).await;

        let mut errors = 0_u64;
        for result in &responses {
            match result {
                Ok(response) => {
                    if let Some(metrics) = &self.health_metrics {
                        let status = format!("status:{}", response.status);
                        metrics.increment(health::API_RESPONSES, 1, &[status.as_str()]);
                    }
                    if response.is_error() {
                        errors += 1;
                        self.log_failure(&format_status_failure(response));
                    } else {
                        self.update_rates(response);
                    }
                }
                Err(e) => {
                    errors += 1;
                    self.log_failure(&e.to_string());
                }
            }
        }

        if let Some(metrics) = &self.health_metrics {
            metrics.histogram_with_total(health::FLUSH_TRACES, payload.trace_count as u64, &[]);
            metrics.histogram_with_total(health::FLUSH_SPANS, payload.span_count as u64, &[]);
            metrics.histogram_with_total(health::FLUSH_BYTES, payload.size() as u64, &[]);
            metrics.histogram_with_total(health::API_REQUESTS, responses.len() as u64, &[]);
            metrics.histogram_with_total(health::API_ERRORS, errors, &[]);
        }
    }

    fn update_rates(&self, response: &Response) {
        let Some(rates) = response.rate_by_service() else {
            return;
        };
        debug!("Updating sample rates for {} services", rates.len());
        for sink in &self.rate_sinks {
            sink.update_rate_by_service_sample_rates(&rates);
        }
    }

    fn log_failure(&self, reason: &str) {
        let endpoint = self.transport.endpoint();
        if self.throttle.should_log_error(Instant::now()) {
            error!("Failed to send traces to Datadog Agent at {endpoint}: {reason}");
        } else {
            debug!("Failed to send traces to Datadog Agent at {endpoint}: {reason}");
        }
    }

    fn report_queue_stats(&self) {
        let enqueued_traces = WriterStats::take(&self.stats.enqueued_traces);
        let enqueued_spans = WriterStats::take(&self.stats.enqueued_spans);
        let filtered_traces = WriterStats::take(&self.stats.filtered_traces);
        let dropped_traces = WriterStats::take(&self.stats.dropped_traces);

        let Some(metrics) = &self.health_metrics else {
            return;
        };
        metrics.gauge(
            health::QUEUE_MAX_LENGTH,
            self.settings.max_payload_size as f64,
            &[],
        );
        metrics.histogram_with_total(health::QUEUE_ENQUEUED_TRACES, enqueued_traces, &[]);
        metrics.histogram_with_total(health::QUEUE_ENQUEUED_SPANS, enqueued_spans, &[]);
        metrics.histogram_with_total(health::QUEUE_DROPPED_TRACES, dropped_traces, &[]);
        metrics.histogram_with_total(health::FLUSH_TRACES_FILTERED, filtered_traces, &[]);
    }
}

fn format_status_failure(response: &Response) -> String {
    format!(
        "HTTP error status {}, reason {}, message {}",
        response.status,
        response.reason.as_deref().unwrap_or("None"),
        response.message.as_deref().unwrap_or("None")
    )
}

#[async_trait]
impl PeriodicTask for WriterInner {
    async fn run_periodic(&self) {
        self.flush().await;
        if let Some(metrics) = &self.health_metrics {
            metrics.gauge(health::HEARTBEAT, 1.0, &[]);
        }
    }

    async fn on_shutdown(&self) {
        self.run_periodic().await;
        if let Some(metrics) = &self.health_metrics {
            metrics.increment(health::SHUTDOWN, 1, &[]);
        }
    }
}

/// Buffers traces in memory and ships them to the Datadog Agent from a background thread.
///
/// The background thread is started by [`AgentWriter::start`] or lazily by the first
/// [`AgentWriter::write`]. [`AgentWriter::shutdown`] (or dropping the writer) runs one last
/// flush, bounded by the configured shutdown timeout.
pub struct AgentWriter {
    config: WriterConfig,
    inner: Arc<WriterInner>,
    worker: PeriodicWorker,
    /// `write` holds a read guard from its state check through the enqueue, so once
    /// `shutdown` has stored `Stopped` no trace lands in the buffer after the final flush.
    state: RwLock<WriterState>,
}

impl AgentWriter {
    pub fn new(config: WriterConfig) -> Result<Self, WriterError> {
        let settings = Arc::clone(&config.settings);
        let transport: Arc<dyn Transport> = match &config.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(AgentTransport::new(
                settings.agent.clone(),
                settings.agent_timeout,
            )?),
        };

        let health_metrics = if settings.health_metrics_enabled {
            config.health_metrics.clone().or_else(|| {
                let addr = settings.dogstatsd_addr();
                match DogStatsDClient::new(addr.as_str()) {
                    Ok(client) => Some(Arc::new(client) as Arc<dyn HealthMetrics>),
                    Err(e) => {
                        warn!("Unable to reach DogStatsD at {addr}, health metrics disabled: {e}");
                        None
                    }
                }
            })
        } else {
            None
        };

        debug!(
            "Creating trace writer for agent at {}",
            transport.endpoint()
        );
        Ok(AgentWriter {
            inner: Arc::new(WriterInner::new(&config, transport, health_metrics)),
            worker: PeriodicWorker::new(
                WORKER_NAME,
                settings.flush_interval,
                settings.shutdown_timeout,
            ),
            state: RwLock::new(WriterState::Unstarted),
            config,
        })
    }

    /// A fresh writer with the same settings and collaborators and none of this writer's
    /// buffered traces. Used after the process forks.
    pub fn recreate(&self) -> Result<AgentWriter, WriterError> {
        AgentWriter::new(self.config.clone())
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn state(&self) -> WriterState {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        *state
    }

    /// Starts the background flush thread. Returns `Ok(false)` if the writer was already
    /// started or has been shut down. A writer whose thread fails to start is stopped.
    pub fn start(&self) -> Result<bool, WriterError> {
        #[allow(clippy::expect_used)]
        let mut state = self.state.write().expect("lock poisoned");
        match *state {
            WriterState::Unstarted => {
                let task: Arc<dyn PeriodicTask> = self.inner.clone();
                match self.worker.start(task) {
                    Ok(_) => {
                        *state = WriterState::Running;
                        Ok(true)
                    }
                    Err(e) => {
                        *state = WriterState::Stopped;
                        Err(e)
                    }
                }
            }
            WriterState::Running => Ok(false),
            WriterState::Stopped => {
                debug!("Trace writer was shut down, not restarting it");
                Ok(false)
            }
        }
    }

    /// Queues a finished trace for sending. Never blocks on the network and never fails:
    /// traces that cannot be accepted are logged and dropped.
    pub fn write(&self, trace: Trace) {
        if trace.is_empty() {
            return;
        }
        if self.state() == WriterState::Unstarted {
            if let Err(e) = self.start() {
                error!("Failed to start trace writer, discarding traces: {e}");
            }
        }

        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        if *state != WriterState::Running {
            debug!("Trace writer is not running, discarding trace with {} spans", trace.len());
            return;
        }

        let trace = match apply_filters(&self.inner.filters, trace) {
            Ok(Some(trace)) if !trace.is_empty() => trace,
            Ok(_) => {
                WriterStats::add(&self.inner.stats.filtered_traces, 1);
                return;
            }
            Err(e) => {
                error!("Error while applying trace filters, dropping trace: {e}");
                WriterStats::add(&self.inner.stats.filtered_traces, 1);
                return;
            }
        };

        if self.inner.enqueue(trace) {
            self.worker.trigger();
        }
    }

    /// Drains the buffer and sends it from the calling task. Waits for a flush already in
    /// progress on the background thread, so batches still go out in drain order.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Encoded size of everything waiting to be flushed.
    pub fn buffered_size(&self) -> usize {
        self.inner.buffered_size()
    }

    pub fn buffered_traces(&self) -> usize {
        self.inner.buffered_traces()
    }

    /// Stops the background thread after one final flush. Traces written afterwards are
    /// discarded.
    pub fn shutdown(&self) -> Result<(), WriterError> {
        let previous = {
            #[allow(clippy::expect_used)]
            let mut state = self.state.write().expect("lock poisoned");
            std::mem::replace(&mut *state, WriterState::Stopped)
        };
        match previous {
            WriterState::Running => self.worker.stop(),
            WriterState::Unstarted | WriterState::Stopped => Ok(()),
        }
    }
}

impl Drop for AgentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Trace writer did not shut down cleanly: {e}");
        }
    }
}
