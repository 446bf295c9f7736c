// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace export pipeline for an instrumented process.
//!
//! [`writer::AgentWriter`] accepts finished traces from any number of application threads,
//! runs them through the configured [`filter::TraceFilter`]s and appends them to an encoded
//! in-memory payload. A single background [`worker::PeriodicWorker`] drains that payload on a
//! fixed interval (or early, once the payload grows past the soft threshold), ships it to the
//! Datadog Agent through a [`transport::Transport`] and feeds the agent's `rate_by_service`
//! answer back into the registered [`sampler::RateByServiceSink`]s.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod encoder;
pub mod errors;
pub mod filter;
pub mod health;
pub mod sampler;
pub mod span;
pub mod throttle;
pub mod transport;
pub mod worker;
pub mod writer;

pub use config::{AgentEndpoint, Config, TraceEncoding};
pub use errors::WriterError;
pub use span::{Span, Trace};
pub use writer::{AgentWriter, WriterConfig, WriterState};
