//! Rate-limiting engine over a keyed bucket map.
//!
//! One [`RateLimitHandler`] instance owns one bucket map; the global
//! limiter and every route-scoped limiter are independent instances. Four
//! algorithms share the same contract: admit and annotate the context, or
//! record an error, abort with the configured status (default 429) and a
//! JSON `{"error": ...}` body, and stop the chain.
//!
//! # Memory
//!
//! Buckets for idle keys are evicted after `max(60s, 2 x natural-empty
//! time)` since their last update. Eviction is opportunistic inside the
//! request path — a periodic retain pass under the same store lock, never a
//! dedicated sweeper task.

pub mod fixed_window;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

use crate::models::settings::{KeyStrategy, RateLimitAlgorithm, RateLimitSettings};
use crate::pipeline::{Context, Handler};
use actix_web::http::StatusCode;
use ahash::HashMap as AHashMap;
use async_trait::async_trait;
use fixed_window::FixedWindow;
use leaky_bucket::LeakyBucket;
use log::{debug, warn};
use sliding_window::SlidingWindow;
use std::collections::hash_map::Entry;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use token_bucket::TokenBucket;

/// Minimum idle time before a bucket may be evicted.
const MIN_IDLE_TTL: Duration = Duration::from_secs(60);

/// How often the opportunistic eviction pass runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Algorithm state for one key.
#[derive(Debug)]
enum Bucket {
    Token(TokenBucket),
    Leaky(LeakyBucket),
    Fixed(FixedWindow),
    Sliding(SlidingWindow),
}

impl Bucket {
    fn last_update(&self) -> Instant {
        match self {
            Bucket::Token(b) => b.last_update(),
            Bucket::Leaky(b) => b.last_update(),
            Bucket::Fixed(b) => b.last_update(),
            Bucket::Sliding(b) => b.last_update(),
        }
    }
}

struct StoreInner {
    buckets: AHashMap<String, Bucket>,
    last_cleanup: Instant,
}

/// Outcome of one limiter check, also feeding the `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

/// Rate limiter pipeline stage.
///
/// Parameters are validated and fixed at construction; per-key state lives
/// behind a single store mutex, the simplest design that upholds the
/// one-bucket-per-key invariant. Shard the map if contention ever shows up
/// in profiles.
pub struct RateLimitHandler {
    algorithm: RateLimitAlgorithm,
    rate: f64,
    burst: f64,
    window: Duration,
    key_strategy: KeyStrategy,
    error_status: StatusCode,
    error_message: String,
    store: Mutex<StoreInner>,
}

impl RateLimitHandler {
    /// Builds a limiter from configuration.
    ///
    /// # Errors
    ///
    /// - `rate <= 0` for any algorithm
    /// - `burst <= 0` for the leaky bucket (the token bucket defaults
    ///   `burst <= 0` to `max(rate / 2, 1)` instead)
    /// - `window_secs == 0` for the windowed algorithms
    /// - algorithm `none` (the pipeline builder skips disabled limiters;
    ///   constructing one is a configuration error)
    pub fn new(settings: &RateLimitSettings) -> Result<Self, String> {
        if settings.algorithm == RateLimitAlgorithm::None {
            return Err("rate_limit: algorithm 'none' cannot be constructed".to_string());
        }
        if settings.rate <= 0.0 {
            return Err(format!(
                "rate_limit: rate must be greater than 0, got {}",
                settings.rate
            ));
        }

        let burst = match settings.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                if settings.burst <= 0.0 {
                    (settings.rate / 2.0).max(1.0)
                } else {
                    settings.burst
                }
            }
            RateLimitAlgorithm::LeakyBucket => {
                if settings.burst <= 0.0 {
                    return Err("rate_limit: leaky_bucket requires burst > 0".to_string());
                }
                settings.burst
            }
            _ => settings.burst,
        };

        if matches!(
            settings.algorithm,
            RateLimitAlgorithm::FixedWindow | RateLimitAlgorithm::SlidingWindow
        ) && settings.window_secs == 0
        {
            return Err("rate_limit: windowed algorithms require window_secs > 0".to_string());
        }

        let status = StatusCode::from_u16(settings.error_status)
            .map_err(|_| format!("rate_limit: invalid error_status {}", settings.error_status))?;

        Ok(Self {
            algorithm: settings.algorithm,
            rate: settings.rate,
            burst,
            window: Duration::from_secs(settings.window_secs),
            key_strategy: settings.key_strategy,
            error_status: status,
            error_message: settings.error_message.clone(),
            store: Mutex::new(StoreInner {
                buckets: AHashMap::default(),
                last_cleanup: Instant::now(),
            }),
        })
    }

    /// Derives the limiter key from the context.
    ///
    /// Fallbacks are deterministic: `user` falls back to the client IP when
    /// no authenticated user is present; `service` falls back to the route
    /// id and then the path; `route` falls back to the path.
    pub fn extract_key(&self, ctx: &Context) -> String {
        let ip = || format!("ip:{}", ctx.client_ip().unwrap_or_else(|| "unknown".into()));
        match self.key_strategy {
            KeyStrategy::Ip => ip(),
            KeyStrategy::User => ctx
                .get("user_id")
                .map(|u| format!("user:{}", u))
                .unwrap_or_else(ip),
            KeyStrategy::Path => format!("path:{}", ctx.path),
            KeyStrategy::Route => ctx
                .route_id()
                .map(|r| format!("route:{}", r))
                .unwrap_or_else(|| format!("path:{}", ctx.path)),
            KeyStrategy::Service => ctx
                .service_id
                .as_deref()
                .map(|s| format!("service:{}", s))
                .or_else(|| ctx.route_id().map(|r| format!("route:{}", r)))
                .unwrap_or_else(|| format!("path:{}", ctx.path)),
        }
    }

    /// Natural time for a full bucket/window to empty out.
    fn natural_empty(&self) -> Duration {
        match self.algorithm {
            RateLimitAlgorithm::TokenBucket | RateLimitAlgorithm::LeakyBucket => {
                Duration::from_secs_f64(self.burst / self.rate)
            }
            _ => self.window,
        }
    }

    fn idle_ttl(&self) -> Duration {
        MIN_IDLE_TTL.max(self.natural_empty() * 2)
    }

    /// Per-window limit used for the windowed algorithms and the
    /// `X-RateLimit-Limit` header.
    fn window_limit(&self) -> u64 {
        (self.rate.max(1.0)) as u64
    }

    /// Runs one admission check for `key` at time `now`.
    ///
    /// Exposed for tests; the handler path calls it with `Instant::now()`.
    pub fn check(&self, key: &str, now: Instant) -> Decision {
        let mut inner = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Opportunistic eviction under the same lock; bounds the map
        // without a sweeper task.
        if now.saturating_duration_since(inner.last_cleanup) >= CLEANUP_INTERVAL {
            let ttl = self.idle_ttl();
            let before = inner.buckets.len();
            inner
                .buckets
                .retain(|_, bucket| now.saturating_duration_since(bucket.last_update()) < ttl);
            if inner.buckets.len() != before {
                debug!(
                    "rate limiter evicted {} idle buckets, {} retained",
                    before - inner.buckets.len(),
                    inner.buckets.len()
                );
            }
            inner.last_cleanup = now;
        }

        let limit = match self.algorithm {
            RateLimitAlgorithm::TokenBucket | RateLimitAlgorithm::LeakyBucket => {
                self.burst.max(1.0) as u64
            }
            _ => self.window_limit(),
        };

        match inner.buckets.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                // First request for this key: every algorithm admits it.
                let (bucket, remaining, reset_secs) = match self.algorithm {
                    RateLimitAlgorithm::TokenBucket => {
                        let mut b = TokenBucket::new(self.burst, now);
                        b.allow(now, self.rate, self.burst);
                        let remaining = b.remaining();
                        let reset = b.reset_secs(self.rate);
                        (Bucket::Token(b), remaining, reset)
                    }
                    RateLimitAlgorithm::LeakyBucket => {
                        let b = LeakyBucket::new(now);
                        let remaining = b.remaining(limit);
                        (Bucket::Leaky(b), remaining, 0)
                    }
                    RateLimitAlgorithm::FixedWindow => {
                        let b = FixedWindow::new(now);
                        let remaining = b.remaining(limit);
                        let reset = b.reset_secs(now, self.window);
                        (Bucket::Fixed(b), remaining, reset)
                    }
                    RateLimitAlgorithm::SlidingWindow => {
                        let b = SlidingWindow::new(now);
                        let remaining = b.remaining(limit);
                        let reset = b.reset_secs(now, self.window);
                        (Bucket::Sliding(b), remaining, reset)
                    }
                    RateLimitAlgorithm::None => unreachable!("rejected at construction"),
                };
                slot.insert(bucket);
                Decision {
                    allowed: true,
                    limit,
                    remaining,
                    reset_secs,
                }
            }
            Entry::Occupied(mut slot) => {
                let bucket = slot.get_mut();
                let (allowed, remaining, reset_secs) = match bucket {
                    Bucket::Token(b) => {
                        let allowed = b.allow(now, self.rate, self.burst);
                        (allowed, b.remaining(), b.reset_secs(self.rate))
                    }
                    Bucket::Leaky(b) => {
                        let allowed = b.allow(now, self.rate, limit);
                        (allowed, b.remaining(limit), b.reset_secs(self.rate, limit))
                    }
                    Bucket::Fixed(b) => {
                        let allowed = b.allow(now, limit, self.window);
                        (allowed, b.remaining(limit), b.reset_secs(now, self.window))
                    }
                    Bucket::Sliding(b) => {
                        let allowed = b.allow(now, limit, self.window);
                        (allowed, b.remaining(limit), b.reset_secs(now, self.window))
                    }
                };
                Decision {
                    allowed,
                    limit,
                    remaining,
                    reset_secs,
                }
            }
        }
    }

    /// Number of live buckets; used by eviction tests.
    pub fn bucket_count(&self) -> usize {
        match self.store.lock() {
            Ok(inner) => inner.buckets.len(),
            Err(poisoned) => poisoned.into_inner().buckets.len(),
        }
    }

    pub fn algorithm(&self) -> RateLimitAlgorithm {
        self.algorithm
    }
}

#[async_trait]
impl Handler for RateLimitHandler {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &mut Context) -> bool {
        let key = self.extract_key(ctx);
        let decision = self.check(&key, Instant::now());

        ctx.insert_response_header("X-RateLimit-Limit", decision.limit.to_string());
        ctx.insert_response_header("X-RateLimit-Remaining", decision.remaining.to_string());
        ctx.insert_response_header("X-RateLimit-Reset", decision.reset_secs.to_string());

        if decision.allowed {
            ctx.set("rate_limited", "false");
            ctx.set("rate_limit_key", key);
            ctx.set("rate_limit_algorithm", self.algorithm.as_str());
            return true;
        }

        warn!(
            "rate limit exceeded: key={} algorithm={}",
            key,
            self.algorithm.as_str()
        );
        ctx.insert_response_header("Retry-After", decision.reset_secs.max(1).to_string());
        ctx.add_error("rate_limited", self.error_message.clone());
        let message = self.error_message.clone();
        ctx.abort(self.error_status, &message);
        false
    }
}
