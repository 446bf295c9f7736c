// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Decides whether a repeated failure is logged at error or debug severity.
///
/// The first failure, and the first one after `interval` has passed since the last error-level
/// log, is loud; everything in between stays at debug level.
#[derive(Debug)]
pub struct ErrorThrottle {
    interval: Duration,
    last_error: Mutex<Option<Instant>>,
}

impl ErrorThrottle {
    pub fn new(interval: Duration) -> Self {
        ErrorThrottle {
            interval,
            last_error: Mutex::new(None),
        }
    }

    /// Returns `true` when the failure observed at `now` should be logged as an error, and
    /// records `now` as the last error-level log in that case.
    pub fn should_log_error(&self, now: Instant) -> bool {
        #[allow(clippy::expect_used)]
        let mut last_error = self.last_error.lock().expect("lock poisoned");
        match *last_error {
            Some(last) if now.saturating_duration_since(last) <= self.interval => false,
            _ => {
                *last_error = Some(now);
                true
            }
        }
    }
}
