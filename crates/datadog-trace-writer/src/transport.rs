// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::AgentEndpoint;
use crate::encoder::Payload;
use crate::errors::TransportError;

pub const TRACES_PATH: &str = "/v0.4/traces";

const TRACE_COUNT_HEADER: HeaderName = HeaderName::from_static("x-datadog-trace-count");
const META_LANG_HEADER: HeaderName = HeaderName::from_static("datadog-meta-lang");
const META_TRACER_VERSION_HEADER: HeaderName =
    HeaderName::from_static("datadog-meta-tracer-version");

/// Outcome of one physical send. A transport that splits a payload yields one per request.
pub type SendResult = Result<Response, TransportError>;

/// Ships finished payloads to the agent.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &Payload) -> Vec<SendResult>;

    /// Identity of the target, used in failure logs.
    fn endpoint(&self) -> String;
}

/// An HTTP answer from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub body: Option<String>,
}

#[derive(Deserialize)]
struct AgentResponse {
    rate_by_service: Option<HashMap<String, f64>>,
}

impl Response {
    pub fn new(status: u16, body: Option<String>) -> Self {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .map(str::to_string);
        let body = body.filter(|body| !body.trim().is_empty());
        Response {
            status,
            reason,
            message: body.as_ref().map(|body| body.trim().to_string()),
            body,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }

    /// The per-service sample rates the agent computed, if the body carries them.
    pub fn rate_by_service(&self) -> Option<HashMap<String, f64>> {
        let body = self.body.as_deref()?;
        match serde_json::from_str::<AgentResponse>(body) {
            Ok(response) => response.rate_by_service,
            Err(e) => {
                debug!("Unable to parse agent response body {body:?}: {e}");
                None
            }
        }
    }
}

fn trace_headers(payload: &Payload) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(payload.content_type),
    );
    headers.insert(TRACE_COUNT_HEADER, HeaderValue::from(payload.trace_count));
    headers.insert(META_LANG_HEADER, HeaderValue::from_static("rust"));
    headers.insert(
        META_TRACER_VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    headers
}

/// Sends payloads to the agent over TCP (HTTP or HTTPS) or a local unix socket.
#[derive(Debug, Clone)]
pub struct AgentTransport {
    endpoint: AgentEndpoint,
    timeout: Duration,
    client: reqwest::Client,
}

impl AgentTransport {
    pub fn new(endpoint: AgentEndpoint, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(AgentTransport {
            endpoint,
            timeout,
            client,
        })
    }

    async fn send_tcp(&self, base_url: &str, payload: &Payload) -> SendResult {
        let response = self
            .client
            .put(format!("{base_url}{TRACES_PATH}"))
            .headers(trace_headers(payload))
            .body(payload.data.clone())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.ok();
        Ok(Response::new(status, body))
    }

    #[cfg(unix)]
    async fn send_unix(&self, path: &std::path::Path, payload: &Payload) -> SendResult {
        tokio::time::timeout(self.timeout, request_over_unix_socket(path, payload))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }

    #[cfg(not(unix))]
    async fn send_unix(&self, _path: &std::path::Path, _payload: &Payload) -> SendResult {
        Err(TransportError::UnsupportedSocket)
    }
}

#[cfg(unix)]
async fn request_over_unix_socket(path: &std::path::Path, payload: &Payload) -> SendResult {
    use http_body_util::{BodyExt, Full};
    use hyper_util::rt::TokioIo;

    let stream = tokio::net::UnixStream::connect(path).await?;
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Agent socket connection closed with error: {e}");
        }
    });

    let mut request = hyper::Request::builder()
        .method(hyper::Method::PUT)
        .uri(TRACES_PATH)
        .body(Full::new(payload.data.clone()))?;
    let headers = request.headers_mut();
    headers.extend(trace_headers(payload));
    headers.insert(header::HOST, HeaderValue::from_static("localhost"));

    let response = sender.send_request(request).await?;
    let status = response.status().as_u16();
    let body = response.into_body().collect().await?.to_bytes();
    Ok(Response::new(
        status,
        Some(String::from_utf8_lossy(&body).into_owned()),
    ))
}

#[async_trait]
impl Transport for AgentTransport {
    async fn send(&self, payload: &Payload) -> Vec<SendResult> {
        debug!(
            "Sending {} traces ({} bytes) to the agent at {}",
            payload.trace_count,
            payload.size(),
            self.endpoint
        );
        let result = match &self.endpoint {
            AgentEndpoint::Tcp { .. } => {
                let base_url = self.endpoint.base_url().unwrap_or_default();
                self.send_tcp(&base_url, payload).await
            }
            AgentEndpoint::Unix { path } => self.send_unix(path, payload).await,
        };
        vec![result]
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}
