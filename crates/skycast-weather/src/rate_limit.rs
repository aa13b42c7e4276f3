//! Per-service request budget for upstream providers.
//!
//! Counters are bucketed by wall-clock minute and keyed
//! `"{service}:{minute}"`. Every call drops counters from other minutes, so
//! the map never holds more than one bucket per service.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 60;

#[derive(Debug)]
pub struct RateLimiter {
    max_requests_per_minute: u32,
    counters: Mutex<HashMap<String, u32>>,
}

impl RateLimiter {
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Take one request slot for `service` in the current minute.
    /// Returns false, without consuming anything, once the budget is spent.
    pub fn admit(&self, service: &str) -> bool {
        self.admit_at(service, Utc::now())
    }

    pub fn admit_at(&self, service: &str, now: DateTime<Utc>) -> bool {
        let bucket = minute_bucket(now);
        let key = bucket_key(service, bucket);
        let suffix = format!(":{}", bucket);

        let mut counters = self.counters.lock();
        counters.retain(|k, _| k.ends_with(&suffix));

        let count = counters.entry(key).or_insert(0);
        if *count < self.max_requests_per_minute {
            *count += 1;
            true
        } else {
            tracing::debug!(service, bucket, "rate limit reached");
            false
        }
    }

    /// Slots left for `service` in the current minute.
    pub fn remaining(&self, service: &str) -> u32 {
        self.remaining_at(service, Utc::now())
    }

    pub fn remaining_at(&self, service: &str, now: DateTime<Utc>) -> u32 {
        let key = bucket_key(service, minute_bucket(now));
        let used = self.counters.lock().get(&key).copied().unwrap_or(0);
        self.max_requests_per_minute.saturating_sub(used)
    }

    /// Drop every counter. Test/ops use only.
    pub fn reset(&self) {
        self.counters.lock().clear();
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.counters.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS_PER_MINUTE)
    }
}

fn minute_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}

fn bucket_key(service: &str, bucket: i64) -> String {
    format!("{}:{}", service, bucket)
}
