// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Per-metric retry backoff.
//!
//! After `r` consecutive failures the next retry happens between
//! `2^(r-1)·30s` and `2^r·30s` from now, and exactly 1800s from now once
//! that upper bound passes 1800s.

use std::time::{Duration, SystemTime};

use rand_core::{OsRng, RngCore};

use crate::model::DatadogMetricInternal;

const BASE_BACKOFF_SECS: f64 = 30.0;
const MAX_BACKOFF_SECS: f64 = 1800.0;

/// Backoff after `retries` failures. `jitter` in `[0, 1)` picks the point in
/// the window.
pub fn backoff_duration(retries: u32, jitter: f64) -> Duration {
    if retries == 0 {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
    let upper = BASE_BACKOFF_SECS * 2f64.powi(exponent);
    if upper >= MAX_BACKOFF_SECS {
        return Duration::from_secs_f64(MAX_BACKOFF_SECS);
    }
    let jitter = jitter.clamp(0.0, 1.0);
    Duration::from_secs_f64(upper - jitter * upper / 2.0)
}

fn random_unit() -> f64 {
    // 53 random bits mapped onto [0, 1)
    (OsRng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
}

/// Record one more failure on `metric` and schedule its next retry.
pub fn increment_retries(metric: &mut DatadogMetricInternal, now: SystemTime) {
    metric.retries = metric.retries.saturating_add(1);
    metric.retry_after = Some(now + backoff_duration(metric.retries, random_unit()));
}

/// Forget past failures after a successful fetch.
pub fn reset_retries(metric: &mut DatadogMetricInternal) {
    metric.retries = 0;
    metric.retry_after = None;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_bounds() {
        for retries in 1..=12u32 {
            let lower = (30.0 * 2f64.powi(retries as i32 - 1)).min(1800.0);
            let upper = (30.0 * 2f64.powi(retries as i32)).min(1800.0);
            for jitter in [0.0, 0.25, 0.5, 0.999] {
                let backoff = backoff_duration(retries, jitter).as_secs_f64();
                assert!(
                    lower <= backoff && backoff <= upper,
                    "retries={retries} jitter={jitter}: {backoff} not in [{lower}, {upper}]"
                );
            }
        }
        assert_eq!(backoff_duration(0, 0.5), Duration::ZERO);
    }

    #[test]
    fn test_increment_retries() {
        let cases = [(0, 1, 30, 60), (1, 2, 60, 120), (5, 6, 1799, 1801), (10, 11, 1799, 1801)];
        for (current, expected, min_secs, max_secs) in cases {
            let now = SystemTime::now();
            let mut metric = DatadogMetricInternal::new("ns/m", "q");
            metric.retries = current;
            increment_retries(&mut metric, now);
            assert_eq!(metric.retries, expected);
            let after = metric.retry_after.unwrap().duration_since(now).unwrap();
            assert!(after >= Duration::from_secs(min_secs), "{after:?}");
            assert!(after <= Duration::from_secs(max_secs), "{after:?}");
        }
    }

    #[test]
    fn test_reset() {
        let mut metric = DatadogMetricInternal::new("ns/m", "q");
        increment_retries(&mut metric, SystemTime::now());
        reset_retries(&mut metric);
        assert_eq!(metric.retries, 0);
        assert!(metric.retry_after.is_none());
    }

    fn window(retries: u32) -> (f64, f64) {
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let lower = (30.0 * 2f64.powi(exponent - 1)).min(1800.0);
        let upper = (30.0 * 2f64.powi(exponent)).min(1800.0);
        (lower, upper)
    }

    proptest! {
        #[test]
        fn prop_backoff_stays_in_window(
            retries in prop_oneof![1u32..40, 1u32..=u32::MAX],
            jitter in 0.0f64..1.0,
        ) {
            let (lower, upper) = window(retries);
            let backoff = backoff_duration(retries, jitter).as_secs_f64();
            prop_assert!(
                lower <= backoff && backoff <= upper,
                "{} not in [{}, {}]",
                backoff,
                lower,
                upper
            );
        }

        #[test]
        fn prop_backoff_grows_with_retries(retries in 1u32..40, jitter in 0.0f64..1.0) {
            prop_assert!(
                backoff_duration(retries, jitter) <= backoff_duration(retries + 1, jitter)
            );
        }
    }
}
