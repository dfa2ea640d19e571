// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Gate for logs emitted on hot paths.
///
/// The first `burst` calls to [`LogLimit::should_log`] are allowed, after
/// which at most one call per `interval` is.
#[derive(Debug)]
pub struct LogLimit {
    burst: u32,
    interval: Duration,
    state: Mutex<LimitState>,
}

#[derive(Debug)]
struct LimitState {
    allowed: u32,
    last_allowed: Option<Instant>,
}

impl LogLimit {
    pub fn new(burst: u32, interval: Duration) -> Self {
        Self {
            burst,
            interval,
            state: Mutex::new(LimitState {
                allowed: 0,
                last_allowed: None,
            }),
        }
    }

    pub fn should_log(&self) -> bool {
        self.should_log_at(Instant::now())
    }

    pub fn should_log_at(&self, now: Instant) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let allow = if state.allowed < self.burst {
            true
        } else {
            state
                .last_allowed
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
        };
        if allow {
            state.allowed = state.allowed.saturating_add(1);
            state.last_allowed = Some(now);
        }
        allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_interval() {
        let limit = LogLimit::new(3, Duration::from_secs(300));
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limit.should_log_at(start));
        }
        assert!(!limit.should_log_at(start));
        assert!(!limit.should_log_at(start + Duration::from_secs(299)));
        assert!(limit.should_log_at(start + Duration::from_secs(300)));
        assert!(!limit.should_log_at(start + Duration::from_secs(301)));
        assert!(limit.should_log_at(start + Duration::from_secs(600)));
    }

    #[test]
    fn test_zero_burst() {
        let limit = LogLimit::new(0, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limit.should_log_at(start));
        assert!(!limit.should_log_at(start + Duration::from_secs(1)));
    }
}
