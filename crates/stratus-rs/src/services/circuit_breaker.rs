//! Circuit breaker protecting upstream services.
//!
//! Per-service breaker with the classic three states. The proxy asks
//! [`CircuitBreaker::try_acquire`] before forwarding and reports the
//! outcome back; an open circuit short-circuits to `503` until the reset
//! timeout admits a half-open probe.

use crate::models::service::CircuitBreakerSettings;
use log::{info, warn};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed = 0,
    /// Circuit is open - failing fast
    Open = 1,
    /// Testing if the service is back
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Breaker for one upstream service.
///
/// Counters are atomics on the hot path; the open timestamp sits behind a
/// mutex touched only on state transitions.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_id: String,
    failure_threshold: u64,
    success_threshold: u64,
    reset_timeout: Duration,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(service_id: String, settings: &CircuitBreakerSettings) -> Arc<Self> {
        Arc::new(Self {
            service_id,
            failure_threshold: settings.failure_threshold.max(1),
            success_threshold: settings.success_threshold.max(1),
            reset_timeout: Duration::from_secs(settings.reset_timeout_secs),
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            opened_at: Mutex::new(None),
        })
    }

    /// Whether a request may proceed right now.
    ///
    /// Open circuits admit requests again once the reset timeout has
    /// elapsed, transitioning to half-open so the next outcomes decide
    /// between closing and re-opening.
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = {
                    let opened = self.lock_opened_at();
                    opened.map(|at| at.elapsed())
                };
                match elapsed {
                    Some(elapsed) if elapsed >= self.reset_timeout => {
                        self.transition_to_half_open();
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.success_threshold {
                    self.transition_to_closed();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.failure_threshold {
                    self.transition_to_open();
                }
            }
            // Any failure while probing re-opens the circuit.
            CircuitState::HalfOpen => self.transition_to_open(),
            CircuitState::Open => {
                *self.lock_opened_at() = Some(Instant::now());
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Relaxed))
    }

    fn lock_opened_at(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        match self.opened_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Relaxed);
        *self.lock_opened_at() = Some(Instant::now());
        self.success_count.store(0, Ordering::Relaxed);
        warn!("circuit breaker opened for service {}", self.service_id);
    }

    fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        info!(
            "circuit breaker for service {} is half-open, probing",
            self.service_id
        );
    }

    fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        info!(
            "circuit breaker closed for service {} - recovered",
            self.service_id
        );
    }
}
