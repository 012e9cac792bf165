//! Retry delay derived from a failed response's `Retry-After` header

use crate::utils::jitter::generate_jitter_secs_with;
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Delays below this are raised to [`MIN_RETRY_DELAY_SECS`]
const FLOOR_THRESHOLD_SECS: u64 = 1;
const MIN_RETRY_DELAY_SECS: u64 = 2;
/// Delays below this are treated as too optimistic and scaled up
const SCALE_THRESHOLD_SECS: u64 = 100;
const SCALE_FACTOR: u64 = 10;
const MAX_JITTER_SECS: u64 = 30;

/// Read `Retry-After` as a whole number of seconds
///
/// HTTP-date values and garbage are treated as absent.
pub fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| value.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|value| value.parse::<u64>().ok())
}

/// Normalize a retry delay, drawing jitter from `rng`
///
/// `0` becomes 2s, values under 100s are multiplied by ten plus up to 30s of
/// jitter, larger values pass through. The result never exceeds `max_secs`.
pub fn normalize_retry_after_with<R: Rng + ?Sized>(rng: &mut R, secs: u64, max_secs: u64) -> u64 {
    let delay = if secs < FLOOR_THRESHOLD_SECS {
        MIN_RETRY_DELAY_SECS
    } else if secs < SCALE_THRESHOLD_SECS {
        secs * SCALE_FACTOR + generate_jitter_secs_with(rng, MAX_JITTER_SECS)
    } else {
        secs
    };
    delay.min(max_secs)
}

/// Retry policy for failed page requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Used when the response carries no usable `Retry-After`
    pub default_retry_after: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(default_retry_after: Duration, max_delay: Duration) -> Self {
        Self {
            default_retry_after,
            max_delay,
        }
    }

    /// Delay before the failed job may run again
    pub fn delay_for(&self, response_headers: &HeaderMap) -> Duration {
        let secs = retry_after_seconds(response_headers)
            .unwrap_or(self.default_retry_after.as_secs());
        Duration::from_secs(normalize_retry_after_with(
            &mut rand::rng(),
            secs,
            self.max_delay.as_secs(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use reqwest::header::HeaderValue;

    const CAP: u64 = 3600;

    fn normalize(secs: u64) -> u64 {
        normalize_retry_after_with(&mut StdRng::seed_from_u64(7), secs, CAP)
    }

    #[test]
    fn test_zero_becomes_minimum() {
        assert_eq!(normalize(0), 2);
    }

    #[test]
    fn test_small_values_are_scaled_with_jitter() {
        let delay = normalize(45);
        assert!((450..480).contains(&delay), "got {delay}");
        let delay = normalize(1);
        assert!((10..40).contains(&delay), "got {delay}");
    }

    #[test]
    fn test_large_values_pass_through_and_cap() {
        assert_eq!(normalize(200), 200);
        assert_eq!(normalize(5000), 3600);
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_seconds(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(retry_after_seconds(&headers), Some(120));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_seconds(&headers), None);
    }

    #[test]
    fn test_retry_after_requires_plain_digits() {
        let mut headers = HeaderMap::new();
        for raw in ["+5", "-5", "5.0", "", " 7 "] {
            headers.insert(RETRY_AFTER, HeaderValue::from_str(raw).unwrap());
            let expected = if raw == " 7 " { Some(7) } else { None };
            assert_eq!(retry_after_seconds(&headers), expected, "header {raw:?}");
        }
    }

    #[test]
    fn test_policy_defaults_when_header_missing() {
        let policy = BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(CAP));
        let delay = policy.delay_for(&HeaderMap::new()).as_secs();
        assert!((600..630).contains(&delay), "got {delay}");
    }

    proptest! {
        #[test]
        fn prop_delay_is_bounded(secs in 0u64..100_000, seed in any::<u64>()) {
            let delay = normalize_retry_after_with(&mut StdRng::seed_from_u64(seed), secs, CAP);
            prop_assert!(delay >= 2);
            prop_assert!(delay <= CAP);
            if (1..100).contains(&secs) {
                prop_assert!(delay >= secs * 10 && delay < secs * 10 + 30);
            }
        }
    }
}
