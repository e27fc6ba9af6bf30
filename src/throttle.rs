//! throttle.rs — fixed-window counter guarding the expensive generation path.
//!
//! Keyed by council identity, not by user: the cost being protected is LLM
//! spend per council, and a cache hit should not be needed to absorb a
//! hot council's traffic. State is process-local; under horizontal scaling
//! each instance gets its own window, which is an accepted imprecision
//! bounded by the cache TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::FactoidError;

pub struct RateThrottle {
    limit: u32,
    window: Duration,
    inner: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateThrottle {
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit: limit_per_window,
            window,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(3_600))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one request against `council`'s window. Must be called before
    /// any gather/prompt/LLM work starts.
    pub fn check(&self, council: &str) -> Result<(), FactoidError> {
        let now = Instant::now();
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        let entry = guard
            .entry(council.to_string())
            .or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        if entry.1 >= self.limit {
            return Err(FactoidError::RateLimited {
                council: council.to_string(),
                limit: self.limit,
            });
        }
        entry.1 += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nth_plus_one_request_is_rejected() {
        let throttle = RateThrottle::per_hour(25);
        for _ in 0..25 {
            assert!(throttle.check("worcestershire").is_ok());
        }
        let err = throttle.check("worcestershire").unwrap_err();
        assert!(matches!(err, FactoidError::RateLimited { limit: 25, .. }));
    }

    #[test]
    fn councils_have_independent_windows() {
        let throttle = RateThrottle::per_hour(1);
        assert!(throttle.check("a").is_ok());
        assert!(throttle.check("b").is_ok());
        assert!(throttle.check("a").is_err());
    }

    #[test]
    fn window_expiry_resets_the_counter() {
        let throttle = RateThrottle::new(1, Duration::from_millis(10));
        assert!(throttle.check("a").is_ok());
        assert!(throttle.check("a").is_err());
        std::thread::sleep(Duration::from_millis(15));
        assert!(throttle.check("a").is_ok());
    }
}
