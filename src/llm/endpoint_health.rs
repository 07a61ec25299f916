//! Endpoint health tracking.
//!
//! An endpoint that fails recoverably (timeout, 5xx, network) is kept out of
//! rotation for a cool-off window, then retried lazily on next selection.
//! No background task: expiry is checked at read time.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Cool-off bookkeeping for failed endpoints.
pub struct EndpointHealth {
    cool_off: Duration,
    failed_at: Mutex<HashMap<String, Instant>>,
}

impl EndpointHealth {
    pub fn new(cool_off: Duration) -> Self {
        Self {
            cool_off,
            failed_at: Mutex::new(HashMap::new()),
        }
    }

    /// Take the endpoint out of rotation for the cool-off window.
    pub fn mark_unhealthy(&self, endpoint_id: &str) {
        debug!(endpoint = endpoint_id, "endpoint marked unhealthy");
        if let Ok(mut failed) = self.failed_at.lock() {
            failed.insert(endpoint_id.to_string(), Instant::now());
        }
    }

    /// Whether the endpoint may be used right now.
    pub fn is_healthy(&self, endpoint_id: &str) -> bool {
        let Ok(mut failed) = self.failed_at.lock() else {
            return true;
        };
        match failed.get(endpoint_id) {
            Some(when) if when.elapsed() < self.cool_off => false,
            Some(_) => {
                failed.remove(endpoint_id);
                true
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_endpoint_is_healthy() {
        let health = EndpointHealth::new(Duration::from_secs(60));
        assert!(health.is_healthy("anything"));
    }

    #[test]
    fn test_failed_endpoint_cools_off() {
        let health = EndpointHealth::new(Duration::from_secs(60));
        health.mark_unhealthy("ep");
        assert!(!health.is_healthy("ep"));
    }

    #[test]
    fn test_cool_off_expires() {
        let health = EndpointHealth::new(Duration::from_millis(0));
        health.mark_unhealthy("ep");
        // Zero cool-off: healthy again on next check.
        assert!(health.is_healthy("ep"));
    }
}
