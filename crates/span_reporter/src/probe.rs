//! Destination liveness probes
//!
//! The uploader asks an [`AvailabilityProbe`] before every send. When the
//! probe says the destination is down, the drained batch is discarded instead
//! of being sent, so a dead destination never builds up a backlog.
//!
//! - [`AvailabilityFlag`]: a switch maintained by someone else (a health
//!   checker, an admin endpoint, a test).
//! - [`CircuitBreakerProbe`]: derives availability from the outcome of the
//!   reporter's own bulk requests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Answers "is the destination worth sending to right now?".
pub trait AvailabilityProbe: Send + Sync {
    /// Queried before each send and by `SpanReporter::is_active`.
    fn is_available(&self) -> bool;

    /// Called after a bulk request was answered by the destination.
    fn on_send_success(&self) {}

    /// Called after a bulk request failed at the transport level.
    fn on_send_failure(&self) {}
}

// =============================================================================
// AVAILABILITY FLAG
// =============================================================================

/// Externally maintained availability switch. Starts available.
#[derive(Debug)]
pub struct AvailabilityFlag {
    available: AtomicBool,
}

impl AvailabilityFlag {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }
}

impl Default for AvailabilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AvailabilityProbe for AvailabilityFlag {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

// =============================================================================
// CIRCUIT BREAKER PROBE
// =============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests flow through.
    Closed,
    /// Destination considered down, batches are discarded.
    Open,
    /// Reset timeout elapsed, the next batch is sent as a probe.
    HalfOpen,
}

/// Configuration for [`CircuitBreakerProbe`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transport failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before letting one request through.
    pub reset_timeout: Duration,
    /// Successes in half-open state required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Probe that opens after repeated transport failures.
///
/// ```text
/// ┌────────┐  failure_threshold  ┌────────┐
/// │ Closed │ ──────────────────► │  Open  │ ◄──┐
/// └────────┘                     └────────┘    │
///     ▲                              │         │ failure
///     │ success_threshold            │ reset   │
///     │                              ▼         │
///     │                         ┌──────────┐   │
///     └──────────────────────── │ HalfOpen │ ──┘
///                               └──────────┘
/// ```
pub struct CircuitBreakerProbe {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    times_opened: AtomicU32,
}

impl CircuitBreakerProbe {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
            times_opened: AtomicU32::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// How many times the circuit has opened.
    pub fn times_opened(&self) -> u32 {
        self.times_opened.load(Ordering::Relaxed)
    }

    fn open(&self, state: &mut BreakerState) {
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.consecutive_successes = 0;
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            failures = state.consecutive_failures,
            reset_timeout = ?self.config.reset_timeout,
            "bulk destination marked unavailable"
        );
    }
}

impl std::fmt::Debug for CircuitBreakerProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerProbe")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl AvailabilityProbe for CircuitBreakerProbe {
    fn is_available(&self) -> bool {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let reset = state
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
                if reset {
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                }
                reset
            }
        }
    }

    fn on_send_success(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    tracing::info!("bulk destination available again");
                }
            }
            // A request started before the circuit opened came back fine.
            CircuitState::Open => {}
        }
    }

    fn on_send_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut state);
                }
            }
            CircuitState::HalfOpen => self.open(&mut state),
            CircuitState::Open => state.opened_at = Some(Instant::now()),
        }
    }
}
