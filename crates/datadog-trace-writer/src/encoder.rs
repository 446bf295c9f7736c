// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-progress trace payloads.
//!
//! An encoder accumulates already-serialized traces and knows the exact byte size the finished
//! payload will have, so the writer can compare it against its thresholds after every append.
//! Encoders do no locking of their own: the writer only touches them while holding its buffer
//! lock.

use bytes::Bytes;

use crate::config::TraceEncoding;
use crate::errors::EncodeError;
use crate::span::Span;

pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A finished batch of traces ready to be handed to the transport.
#[derive(Debug, Clone)]
pub struct Payload {
    pub data: Bytes,
    pub trace_count: usize,
    pub span_count: usize,
    pub content_type: &'static str,
}

impl Payload {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_count == 0
    }
}

pub trait TraceEncoder: Send {
    /// Serializes one trace without appending it.
    fn encode_trace(&self, trace: &[Span]) -> Result<Vec<u8>, EncodeError>;

    /// Appends an already-serialized trace and returns the new cumulative payload size.
    fn push_encoded(&mut self, encoded: Vec<u8>, span_count: usize) -> usize;

    /// Serializes and appends a trace, returning the new cumulative payload size.
    fn add(&mut self, trace: &[Span]) -> Result<usize, EncodeError> {
        let encoded = self.encode_trace(trace)?;
        Ok(self.push_encoded(encoded, trace.len()))
    }

    /// Size in bytes the payload would have if drained now.
    fn size(&self) -> usize;

    /// Size in bytes the payload would have after appending `encoded_len` more bytes of trace.
    fn size_with(&self, encoded_len: usize) -> usize;

    /// Size in bytes of a payload holding only a trace of `encoded_len` bytes.
    fn standalone_size(&self, encoded_len: usize) -> usize;

    fn trace_count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.trace_count() == 0
    }

    /// Takes the finished payload and resets the encoder to an empty buffer.
    fn drain(&mut self) -> Result<Payload, EncodeError>;

    fn content_type(&self) -> &'static str;
}

pub fn new_encoder(encoding: TraceEncoding) -> Box<dyn TraceEncoder> {
    match encoding {
        TraceEncoding::Msgpack => Box::new(MsgpackEncoder::default()),
        TraceEncoding::Json => Box::new(JsonEncoder::default()),
    }
}

#[derive(Debug, Default)]
struct EncodedTraces {
    body: Vec<u8>,
    traces: usize,
    spans: usize,
}

impl EncodedTraces {
    fn take(&mut self) -> EncodedTraces {
        std::mem::take(self)
    }
}

/// Agent v0.4 msgpack: an array of traces, each an array of span maps.
///
/// The outer array header depends on the final trace count, so it is only written on drain.
#[derive(Debug, Default)]
pub struct MsgpackEncoder {
    traces: EncodedTraces,
}

fn msgpack_array_header_len(len: usize) -> usize {
    match len {
        0..=15 => 1,
        16..=0xffff => 3,
        _ => 5,
    }
}

impl TraceEncoder for MsgpackEncoder {
    fn encode_trace(&self, trace: &[Span]) -> Result<Vec<u8>, EncodeError> {
        Ok(rmp_serde::to_vec_named(trace)?)
    }

    fn push_encoded(&mut self, encoded: Vec<u8>, span_count: usize) -> usize {
        self.traces.body.extend_from_slice(&encoded);
        self.traces.traces += 1;
        self.traces.spans += span_count;
        self.size()
    }

    fn size(&self) -> usize {
        msgpack_array_header_len(self.traces.traces) + self.traces.body.len()
    }

    fn size_with(&self, encoded_len: usize) -> usize {
        msgpack_array_header_len(self.traces.traces + 1) + self.traces.body.len() + encoded_len
    }

    fn standalone_size(&self, encoded_len: usize) -> usize {
        msgpack_array_header_len(1) + encoded_len
    }

    fn trace_count(&self) -> usize {
        self.traces.traces
    }

    fn drain(&mut self) -> Result<Payload, EncodeError> {
        let traces = self.traces.take();
        let count =
            u32::try_from(traces.traces).map_err(|_| EncodeError::TooManyTraces(traces.traces))?;

        let mut data = Vec::with_capacity(msgpack_array_header_len(traces.traces) + traces.body.len());
        rmp::encode::write_array_len(&mut data, count)?;
        data.extend_from_slice(&traces.body);

        Ok(Payload {
            data: Bytes::from(data),
            trace_count: traces.traces,
            span_count: traces.spans,
            content_type: MSGPACK_CONTENT_TYPE,
        })
    }

    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }
}

/// JSON array of traces, accepted by the agent with `Content-Type: application/json`.
#[derive(Debug, Default)]
pub struct JsonEncoder {
    traces: EncodedTraces,
}

impl TraceEncoder for JsonEncoder {
    fn encode_trace(&self, trace: &[Span]) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(trace)?)
    }

    fn push_encoded(&mut self, encoded: Vec<u8>, span_count: usize) -> usize {
        if self.traces.traces > 0 {
            self.traces.body.push(b',');
        }
        self.traces.body.extend_from_slice(&encoded);
        self.traces.traces += 1;
        self.traces.spans += span_count;
        self.size()
    }

    fn size(&self) -> usize {
        // surrounding brackets
        self.traces.body.len() + 2
    }

    fn size_with(&self, encoded_len: usize) -> usize {
        let separator = usize::from(self.traces.traces > 0);
        self.size() + separator + encoded_len
    }

    fn standalone_size(&self, encoded_len: usize) -> usize {
        encoded_len + 2
    }

    fn trace_count(&self) -> usize {
        self.traces.traces
    }

    fn drain(&mut self) -> Result<Payload, EncodeError> {
        let traces = self.traces.take();
        let mut data = Vec::with_capacity(traces.body.len() + 2);
        data.push(b'[');
        data.extend_from_slice(&traces.body);
        data.push(b']');

        Ok(Payload {
            data: Bytes::from(data),
            trace_count: traces.traces,
            span_count: traces.spans,
            content_type: JSON_CONTENT_TYPE,
        })
    }

    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }
}
