// crates/rollout-gateway/src/breaker.rs
// ============================================================================
// Module: Circuit Breaker
// Description: Per-adapter failure-isolation state machine.
// Purpose: Fail fast during sustained execution-plane outages.
// Dependencies: rollout-core (serialization of state), std
// ============================================================================

//! ## Overview
//! Each adapter gets one circuit breaker shared by every operation
//! targeting it. The breaker starts closed; a configured number of
//! consecutive failures opens it, after which calls fail fast without
//! touching the network. Once the recovery timeout elapses the breaker
//! half-opens and admits a limited number of probe calls: any probe success
//! closes the circuit, any probe failure reopens it and restarts the
//! timeout.
//!
//! Time is read through [`MonotonicClock`] so tests can step the recovery
//! timeout without sleeping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Monotonic Clock
// ============================================================================

/// Monotonic time source for recovery-timeout arithmetic.
pub trait MonotonicClock {
    /// Returns milliseconds elapsed on a monotonic clock.
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by [`Instant`].
#[derive(Debug)]
pub struct SystemMonotonicClock {
    /// Process-lifetime epoch the clock measures from.
    epoch: Instant,
}

impl SystemMonotonicClock {
    /// Creates a clock measuring from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemMonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// SECTION: Breaker Configuration
// ============================================================================

/// Circuit breaker configuration.
///
/// # Invariants
/// - `failure_threshold` and `half_open_probes` are at least 1, enforced at
///   the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before half-opening.
    pub recovery_timeout: Duration,
    /// Probe calls admitted while half-open.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_probes: 3,
        }
    }
}

// ============================================================================
// SECTION: Breaker State
// ============================================================================

/// Observable circuit state.
///
/// # Invariants
/// - Variants are stable for serialization and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast until the recovery timeout elapses.
    Open,
    /// A limited number of probe calls is admitted.
    HalfOpen,
}

/// Internal mutable breaker state.
#[derive(Debug)]
struct BreakerInner {
    /// Current circuit state.
    state: CircuitState,
    /// Consecutive failures observed while closed.
    consecutive_failures: u32,
    /// Monotonic millis at which the circuit last opened.
    opened_at_millis: u64,
    /// Probe calls admitted in the current half-open window.
    probes_admitted: u32,
}

/// Per-adapter circuit breaker.
///
/// # Invariants
/// - Shared across all operations targeting the adapter; mutated only
///   through [`CircuitBreaker::allow_call`], [`CircuitBreaker::record_success`],
///   and [`CircuitBreaker::record_failure`].
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Breaker configuration.
    config: BreakerConfig,
    /// Mutable state under lock.
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at_millis: 0,
                probes_admitted: 0,
            }),
        }
    }

    /// Returns whether a call may proceed, half-opening on timeout expiry.
    ///
    /// A `false` return means the caller must fail fast without a network
    /// attempt.
    pub fn allow_call(&self, clock: &dyn MonotonicClock) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let timeout_millis =
                    u64::try_from(self.config.recovery_timeout.as_millis()).unwrap_or(u64::MAX);
                let elapsed = clock.now_millis().saturating_sub(inner.opened_at_millis);
                if elapsed < timeout_millis {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probes_admitted = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.probes_admitted >= self.config.half_open_probes {
                    return false;
                }
                inner.probes_admitted = inner.probes_admitted.saturating_add(1);
                true
            }
        }
    }

    /// Records a successful call, closing the circuit from half-open.
    pub fn record_success(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.probes_admitted = 0;
    }

    /// Records a failed call, opening the circuit at the threshold.
    ///
    /// Any failure while half-open reopens immediately and restarts the
    /// recovery timeout.
    pub fn record_failure(&self, clock: &dyn MonotonicClock) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at_millis = clock.now_millis();
                inner.probes_admitted = 0;
            }
            CircuitState::Closed | CircuitState::Open => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.state == CircuitState::Closed
                    && inner.consecutive_failures >= self.config.failure_threshold
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at_millis = clock.now_millis();
                }
            }
        }
    }

    /// Returns the current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().map_or(CircuitState::Open, |inner| inner.state)
    }
}
