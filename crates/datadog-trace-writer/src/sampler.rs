// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::RwLock;

use crate::span::Span;

/// Key the agent uses for the rate applied to services it has no specific rate for.
pub const DEFAULT_SERVICE_KEY: &str = "service:,env:";

const ENV_TAG: &str = "env";
const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

/// Receives the `rate_by_service` table the agent returns after every successful flush.
pub trait RateByServiceSink: Send + Sync {
    fn update_rate_by_service_sample_rates(&self, rates: &HashMap<String, f64>);
}

pub fn service_key(service: &str, env: &str) -> String {
    format!("service:{service},env:{env}")
}

#[derive(Debug)]
struct Rates {
    default_rate: f64,
    by_service: HashMap<String, f64>,
}

/// Priority sampler driven by the agent's per-service rates.
///
/// Keep decisions are deterministic in the trace id, so every service taking part in a trace
/// agrees on the outcome for a given rate.
#[derive(Debug)]
pub struct RateByServiceSampler {
    rates: RwLock<Rates>,
}

impl RateByServiceSampler {
    pub fn new(default_rate: f64) -> Self {
        RateByServiceSampler {
            rates: RwLock::new(Rates {
                default_rate: default_rate.clamp(0.0, 1.0),
                by_service: HashMap::new(),
            }),
        }
    }

    pub fn sample_rate(&self, service: &str, env: &str) -> f64 {
        #[allow(clippy::expect_used)]
        let rates = self.rates.read().expect("lock poisoned");
        rates
            .by_service
            .get(&service_key(service, env))
            .copied()
            .unwrap_or(rates.default_rate)
    }

    /// Whether the trace rooted at `span` should be kept.
    pub fn sample(&self, span: &Span) -> bool {
        let env = span.meta.get(ENV_TAG).map(String::as_str).unwrap_or_default();
        keep_trace(span.trace_id, self.sample_rate(&span.service, env))
    }
}

impl Default for RateByServiceSampler {
    fn default() -> Self {
        RateByServiceSampler::new(1.0)
    }
}

impl RateByServiceSink for RateByServiceSampler {
    fn update_rate_by_service_sample_rates(&self, rates: &HashMap<String, f64>) {
        let mut by_service = HashMap::with_capacity(rates.len());
        let mut default_rate = None;
        for (key, rate) in rates {
            let rate = rate.clamp(0.0, 1.0);
            if key == DEFAULT_SERVICE_KEY {
                default_rate = Some(rate);
            } else {
                by_service.insert(key.clone(), rate);
            }
        }

        #[allow(clippy::expect_used)]
        let mut current = self.rates.write().expect("lock poisoned");
        current.by_service = by_service;
        if let Some(rate) = default_rate {
            current.default_rate = rate;
        }
    }
}

fn keep_trace(trace_id: u64, rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    let threshold = rate * u64::MAX as f64;
    (trace_id.wrapping_mul(KNUTH_FACTOR) as f64) <= threshold
}
