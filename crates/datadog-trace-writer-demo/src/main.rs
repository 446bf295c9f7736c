// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use datadog_trace_writer::{
    filter::FilterRequestsOnUrl, sampler::RateByServiceSampler, AgentWriter, Config, Span,
    Trace, WriterConfig,
};

const DEFAULT_TRACE_COUNT: u64 = 100;
const HEALTH_CHECK_URLS: [&str; 1] = [r"^https?://[^/]+/health$"];

fn synthetic_trace(trace_id: u64) -> Trace {
    let mut root = Span::new(trace_id, 1, 0, "web.request", "demo-web");
    root.resource = "GET /users".to_string();
    root.duration = 1_500_000;
    let url = if trace_id % 10 == 0 {
        "http://demo/health"
    } else {
        "http://demo/users"
    };
    root.meta.insert("http.url".to_string(), url.to_string());

    let mut query = Span::new(trace_id, 2, 1, "postgres.query", "demo-db");
    query.duration = 400_000;
    vec![root, query]
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(true)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let settings = match Config::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Error loading config: {e}");
            return;
        }
    };
    let trace_count = env::var("DEMO_TRACE_COUNT")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TRACE_COUNT);

    let health_check_filter = match FilterRequestsOnUrl::new(HEALTH_CHECK_URLS) {
        Ok(filter) => filter,
        Err(e) => {
            error!("Error building trace filter: {e}");
            return;
        }
    };
    let sampler = Arc::new(RateByServiceSampler::default());
    let config = WriterConfig::new(settings)
        .with_filter(Arc::new(health_check_filter))
        .with_rate_sink(sampler.clone());

    let writer = match AgentWriter::new(config) {
        Ok(writer) => Arc::new(writer),
        Err(e) => {
            error!("Error creating trace writer: {e}");
            return;
        }
    };
    info!(
        "Sending {trace_count} synthetic traces to the agent at {}",
        writer.config().settings.agent
    );

    let mut kept = 0;
    for trace_id in 1..=trace_count {
        let trace = synthetic_trace(trace_id);
        if !sampler.sample(&trace[0]) {
            continue;
        }
        writer.write(trace);
        kept += 1;
        if trace_id % 10 == 0 {
            sleep(Duration::from_millis(50)).await;
        }
    }
    info!("Submitted {kept} of {trace_count} traces, shutting down");

    let result = tokio::task::spawn_blocking(move || writer.shutdown()).await;
    match result {
        Ok(Ok(())) => info!(
            "Trace writer stopped, current default sample rate {}",
            sampler.sample_rate("", "")
        ),
        Ok(Err(e)) => error!("Trace writer did not shut down cleanly: {e}"),
        Err(e) => error!("Shutdown task failed: {e}"),
    }
}
