// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

const DEFAULT_AGENT_HOST: &str = "localhost";
const DEFAULT_AGENT_PORT: u16 = 8126;
const DEFAULT_DOGSTATSD_PORT: u16 = 8125;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 2;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 2;

/// Trace agent limit payload size of 10 MB.
pub const MAX_PAYLOAD_SIZE: usize = 10_000_000;
/// Buffered size at which the writer flushes ahead of its next tick.
pub const PAYLOAD_SIZE_THRESHOLD: usize = 5_000_000;
/// Finished payloads that may wait for the next flush once the hard maximum forced a split.
pub const MAX_PENDING_PAYLOADS: usize = 4;
/// Minimum time between two error-severity transport failure logs.
pub const LOG_ERROR_INTERVAL: Duration = Duration::from_secs(60);

/// Where the Datadog Agent listens for traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEndpoint {
    Tcp {
        host: String,
        port: u16,
        https: bool,
    },
    Unix {
        path: PathBuf,
    },
}

impl AgentEndpoint {
    /// Parses `http://host:port`, `https://host:port` and `unix:///path/to/socket`.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidAgentUrl(url.to_string(), reason.to_string());

        if let Some(path) = url.strip_prefix("unix://") {
            if !path.starts_with('/') {
                return Err(invalid("unix socket path must be absolute"));
            }
            return Ok(AgentEndpoint::Unix {
                path: PathBuf::from(path),
            });
        }

        let uri = hyper::Uri::from_str(url).map_err(|e| invalid(&e.to_string()))?;
        let https = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
            None => return Err(invalid("missing scheme")),
        };
        let host = uri.host().ok_or_else(|| invalid("missing host"))?;
        Ok(AgentEndpoint::Tcp {
            host: host.to_string(),
            port: uri.port_u16().unwrap_or(DEFAULT_AGENT_PORT),
            https,
        })
    }

    /// Base URL for TCP endpoints; `None` for unix sockets.
    pub fn base_url(&self) -> Option<String> {
        match self {
            AgentEndpoint::Tcp { host, port, https } => {
                let scheme = if *https { "https" } else { "http" };
                Some(format!("{scheme}://{host}:{port}"))
            }
            AgentEndpoint::Unix { .. } => None,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            AgentEndpoint::Tcp { host, .. } => host,
            AgentEndpoint::Unix { .. } => DEFAULT_AGENT_HOST,
        }
    }
}

impl Default for AgentEndpoint {
    fn default() -> Self {
        AgentEndpoint::Tcp {
            host: DEFAULT_AGENT_HOST.to_string(),
            port: DEFAULT_AGENT_PORT,
            https: false,
        }
    }
}

impl fmt::Display for AgentEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentEndpoint::Tcp { .. } => write!(f, "{}", self.base_url().unwrap_or_default()),
            AgentEndpoint::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceEncoding {
    #[default]
    Msgpack,
    Json,
}

impl FromStr for TraceEncoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "msgpack" | "v0.4" => Ok(TraceEncoding::Msgpack),
            "json" => Ok(TraceEncoding::Json),
            _ => Err(ConfigError::InvalidValue("DD_TRACE_ENCODING", s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentEndpoint,
    pub encoding: TraceEncoding,
    /// how often the writer drains its buffer
    pub flush_interval: Duration,
    /// how long shutdown waits for the final flush
    pub shutdown_timeout: Duration,
    /// timeout for each request to the agent
    pub agent_timeout: Duration,
    pub payload_size_threshold: usize,
    pub max_payload_size: usize,
    pub max_pending_payloads: usize,
    pub log_error_interval: Duration,
    pub health_metrics_enabled: bool,
    pub dogstatsd_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentEndpoint::default(),
            encoding: TraceEncoding::default(),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            payload_size_threshold: PAYLOAD_SIZE_THRESHOLD,
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_pending_payloads: MAX_PENDING_PAYLOADS,
            log_error_interval: LOG_ERROR_INTERVAL,
            health_metrics_enabled: false,
            dogstatsd_port: DEFAULT_DOGSTATSD_PORT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let agent = match env::var("DD_TRACE_AGENT_URL") {
            Ok(url) if !url.trim().is_empty() => AgentEndpoint::parse(url.trim())?,
            _ => AgentEndpoint::Tcp {
                host: env::var("DD_AGENT_HOST")
                    .ok()
                    .filter(|host| !host.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_AGENT_HOST.to_string()),
                port: parse_env("DD_TRACE_AGENT_PORT")?.unwrap_or(DEFAULT_AGENT_PORT),
                https: false,
            },
        };

        let encoding = match env::var("DD_TRACE_ENCODING") {
            Ok(value) => value.parse()?,
            Err(_) => TraceEncoding::default(),
        };

        let health_metrics_enabled = match env::var("DD_TRACE_HEALTH_METRICS_ENABLED") {
            Ok(value) => parse_bool("DD_TRACE_HEALTH_METRICS_ENABLED", &value)?,
            Err(_) => false,
        };

        Ok(Config {
            agent,
            encoding,
            flush_interval: Duration::from_secs(
                parse_env("DD_TRACE_WRITER_INTERVAL_SECS")?.unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS),
            ),
            shutdown_timeout: Duration::from_secs(
                parse_env("DD_TRACE_WRITER_SHUTDOWN_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
            agent_timeout: Duration::from_secs(
                parse_env("DD_TRACE_AGENT_TIMEOUT_SECS")?.unwrap_or(DEFAULT_AGENT_TIMEOUT_SECS),
            ),
            health_metrics_enabled,
            dogstatsd_port: parse_env("DD_DOGSTATSD_PORT")?.unwrap_or(DEFAULT_DOGSTATSD_PORT),
            ..Default::default()
        })
    }

    /// Address of the local DogStatsD server that receives health metrics.
    pub fn dogstatsd_addr(&self) -> String {
        format!("{}:{}", self.agent.host(), self.dogstatsd_port)
    }
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, value)),
        Err(_) => Ok(None),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue(name, value.to_string())),
    }
}
