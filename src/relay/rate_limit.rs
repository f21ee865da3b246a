//! Per-address token-bucket rate limiting for the relay server.
//!
//! Two independent buckets protect the server: a low-rate one for control
//! operations (channel create/join) and a higher-rate one for message relay.
//! A depleted bucket silently drops the request instead of erroring, so an
//! abuser learns nothing about the limiter from timing.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

/// Token bucket limiter keyed by client IP address
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens replenished per second, also the bucket capacity
    points_per_second: u32,
    buckets: HashMap<IpAddr, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter replenishing `points_per_second` tokens per second
    pub fn new(points_per_second: u32) -> Self {
        Self {
            points_per_second,
            buckets: HashMap::new(),
        }
    }

    /// Consume one token for `addr`. Returns false when the bucket is empty.
    pub fn try_consume(&mut self, addr: IpAddr) -> bool {
        self.try_consume_at(addr, Instant::now())
    }

    fn try_consume_at(&mut self, addr: IpAddr, now: Instant) -> bool {
        let capacity = f64::from(self.points_per_second);
        let bucket = self.buckets.entry(addr).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * capacity).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop bucket state for addresses idle longer than `max_idle_secs`
    pub fn prune(&mut self, max_idle_secs: u64) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill).as_secs() < max_idle_secs);
    }
}
