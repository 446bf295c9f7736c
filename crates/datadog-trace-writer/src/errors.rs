// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors surfaced by the writer lifecycle. Trace submission itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn writer thread: {0}")]
    WorkerSpawn(std::io::Error),

    #[error("Failed to build writer runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Failed to build agent transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Shutdown timeout exceeded after {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid agent URL {0}: {1}")]
    InvalidAgentUrl(String, String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Failed to encode trace as msgpack: {0}")]
    Msgpack(#[from] rmp_serde::encode::Error),

    #[error("Failed to write msgpack payload header: {0}")]
    Header(#[from] rmp::encode::ValueWriteError),

    #[error("Failed to encode trace as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload holds too many traces for one array header: {0}")]
    TooManyTraces(usize),
}

/// Returned by a [`crate::filter::TraceFilter`] that cannot process a trace.
#[derive(Debug, thiserror::Error)]
#[error("Filter {filter} failed: {message}")]
pub struct FilterError {
    pub filter: &'static str,
    pub message: String,
}

impl FilterError {
    pub fn new(filter: &'static str, message: impl Into<String>) -> Self {
        FilterError {
            filter,
            message: message.into(),
        }
    }
}

/// A transmission attempt that never produced an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("HTTP protocol error: {0}")]
    Protocol(#[from] hyper::Error),

    #[error("Invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unix domain sockets are not supported on this platform")]
    UnsupportedSocket,
}
