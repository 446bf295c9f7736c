// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use std::sync::Arc;

use crate::errors::FilterError;
use crate::span::{root_span, Trace};

const HTTP_URL_TAG: &str = "http.url";

pub trait TraceFilter: Send + Sync {
    /// Returns the (possibly replaced) trace, or `None` to drop it.
    fn process_trace(&self, trace: Trace) -> Result<Option<Trace>, FilterError>;
}

/// Runs `trace` through `filters` in registration order. The first filter that drops the trace
/// short-circuits the rest of the chain.
pub fn apply_filters(
    filters: &[Arc<dyn TraceFilter>],
    trace: Trace,
) -> Result<Option<Trace>, FilterError> {
    let mut trace = trace;
    for filter in filters {
        match filter.process_trace(trace)? {
            Some(processed) => trace = processed,
            None => return Ok(None),
        }
    }
    Ok(Some(trace))
}

/// Drops traces whose root span carries an `http.url` tag matching any of the patterns,
/// e.g. health-check endpoints.
#[derive(Debug, Clone)]
pub struct FilterRequestsOnUrl {
    regexps: Vec<Regex>,
}

impl FilterRequestsOnUrl {
    pub fn new<I, S>(patterns: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let regexps = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref())
                    .map_err(|e| FilterError::new("FilterRequestsOnUrl", e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterRequestsOnUrl { regexps })
    }
}

impl TraceFilter for FilterRequestsOnUrl {
    fn process_trace(&self, trace: Trace) -> Result<Option<Trace>, FilterError> {
        let url = root_span(&trace).and_then(|root| root.meta.get(HTTP_URL_TAG));
        if let Some(url) = url {
            if self.regexps.iter().any(|regexp| regexp.is_match(url)) {
                return Ok(None);
            }
        }
        Ok(Some(trace))
    }
}
