//! Circuit breaker state machine.
//!
//! The machine is a plain struct driven with explicit timestamps, so its
//! transitions can be tested deterministically. Sharing across tasks is
//! handled by [`super::CircuitBreakerHandle`], which owns one machine inside
//! an actor.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::utils::duration_ms;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring period that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before admitting trial calls.
    pub reset_timeout_ms: u64,
    /// Length of the sliding failure window.
    pub monitoring_period_ms: u64,
    /// Trial calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Consecutive trial successes needed to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            monitoring_period_ms: 60_000,
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a config with the given threshold and reset timeout.
    #[must_use]
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout_ms: duration_ms(reset_timeout),
            ..Self::default()
        }
    }

    /// Sets the monitoring period.
    #[must_use]
    pub fn with_monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period_ms = duration_ms(period);
        self
    }

    /// Sets the half-open trial budget.
    #[must_use]
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    /// Sets the success threshold.
    #[must_use]
    pub fn with_success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = successes;
        self
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }

    /// Successes required to close, never more than the trial budget.
    fn required_successes(&self) -> u32 {
        self.success_threshold
            .min(self.half_open_max_calls)
            .max(1)
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// A limited number of trial calls pass through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Permission to make one call, issued by [`CircuitBreaker::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    trial: bool,
    generation: u64,
}

impl Permit {
    /// A permit not tied to any breaker state; its outcome only feeds the
    /// totals.
    pub(crate) fn detached() -> Self {
        Self {
            trial: false,
            generation: u64::MAX,
        }
    }

    /// Returns true if the permit is a half-open trial.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Result of asking the breaker for a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed.
    Allowed(Permit),
    /// The call must not be made.
    Rejected {
        /// Time until the breaker may admit a trial.
        retry_after: Duration,
    },
}

/// How a permitted call ended, as far as the breaker is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call succeeded.
    Success,
    /// The call failed in a way that reflects provider health.
    Failure,
    /// The call failed because of its input; not evidence either way.
    Ignored,
}

/// A state change, reported so the owner can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// Previous state.
    pub from: CircuitState,
    /// New state.
    pub to: CircuitState,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Failures currently inside the monitoring window.
    pub failures_in_window: u32,
    /// Permits issued.
    pub total_calls: u64,
    /// Successful outcomes recorded.
    pub total_successes: u64,
    /// Failed outcomes recorded.
    pub total_failures: u64,
    /// Calls rejected without invoking the provider.
    pub total_rejections: u64,
    /// Number of times the circuit opened.
    pub times_opened: u64,
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trials_issued: u32,
    trial_successes: u32,
    last_trial_at: Option<Instant>,
    // Bumped on every transition so outcomes of permits issued under an
    // earlier state do not drive the current one.
    generation: u64,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    times_opened: u64,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            trials_issued: 0,
            trial_successes: 0,
            last_trial_at: None,
            generation: 0,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            times_opened: 0,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Asks for permission to make a call at `now`.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open
    /// here, and the returned change reports it. Half-open trial slots whose
    /// outcome has not arrived within one reset timeout are reclaimed, and
    /// outcomes of those trials are then ignored.
    pub fn try_acquire(&mut self, now: Instant) -> (Admission, Option<StateChange>) {
        let mut change = None;

        if self.state == CircuitState::Open {
            let reopen_at = self
                .opened_at
                .map_or(now, |opened| opened + self.config.reset_timeout());
            if now < reopen_at {
                self.total_rejections += 1;
                return (
                    Admission::Rejected {
                        retry_after: reopen_at - now,
                    },
                    None,
                );
            }
            change = Some(self.transition(CircuitState::HalfOpen));
        }

        if self.state == CircuitState::HalfOpen && self.trials_issued >= self.config.half_open_max_calls {
            if let Some(expires_at) = self.trials_expire_at() {
                if now < expires_at {
                    self.total_rejections += 1;
                    return (
                        Admission::Rejected {
                            retry_after: expires_at - now,
                        },
                        change,
                    );
                }
                self.reclaim_trials();
            }
        }

        let admission = match self.state {
            CircuitState::Closed => Admission::Allowed(Permit {
                trial: false,
                generation: self.generation,
            }),
            CircuitState::HalfOpen if self.trials_issued < self.config.half_open_max_calls => {
                self.trials_issued += 1;
                self.last_trial_at = Some(now);
                Admission::Allowed(Permit {
                    trial: true,
                    generation: self.generation,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                self.total_rejections += 1;
                return (
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    },
                    change,
                );
            }
        };

        self.total_calls += 1;
        (admission, change)
    }

    /// Records the outcome of a permitted call at `now`.
    pub fn record(&mut self, permit: Permit, outcome: CallOutcome, now: Instant) -> Option<StateChange> {
        match outcome {
            CallOutcome::Success => self.total_successes += 1,
            CallOutcome::Failure => self.total_failures += 1,
            CallOutcome::Ignored => {}
        }

        if permit.generation != self.generation {
            return None;
        }

        match (self.state, outcome) {
            (CircuitState::Closed, CallOutcome::Failure) => {
                self.failures.push_back(now);
                self.prune(now);
                let in_window = u32::try_from(self.failures.len()).unwrap_or(u32::MAX);
                if in_window >= self.config.failure_threshold {
                    self.opened_at = Some(now);
                    return Some(self.transition(CircuitState::Open));
                }
                None
            }
            (CircuitState::HalfOpen, CallOutcome::Failure) => {
                self.opened_at = Some(now);
                Some(self.transition(CircuitState::Open))
            }
            (CircuitState::HalfOpen, CallOutcome::Success) => {
                self.trial_successes += 1;
                if self.trial_successes >= self.config.required_successes() {
                    return Some(self.transition(CircuitState::Closed));
                }
                None
            }
            (CircuitState::HalfOpen, CallOutcome::Ignored) => {
                // Give the trial slot back.
                self.trials_issued = self.trials_issued.saturating_sub(1);
                None
            }
            _ => None,
        }
    }

    /// Forces the breaker back to closed.
    pub fn reset(&mut self) -> Option<StateChange> {
        if self.state == CircuitState::Closed && self.failures.is_empty() {
            return None;
        }
        Some(self.transition(CircuitState::Closed))
    }

    /// Returns a snapshot of the breaker at `now`.
    pub fn snapshot(&mut self, now: Instant) -> CircuitSnapshot {
        self.prune(now);
        CircuitSnapshot {
            state: self.state,
            failures_in_window: u32::try_from(self.failures.len()).unwrap_or(u32::MAX),
            total_calls: self.total_calls,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            total_rejections: self.total_rejections,
            times_opened: self.times_opened,
        }
    }

    fn prune(&mut self, now: Instant) {
        let period = self.config.monitoring_period();
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) > period {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn trials_expire_at(&self) -> Option<Instant> {
        self.last_trial_at
            .map(|issued| issued + self.config.reset_timeout())
    }

    fn reclaim_trials(&mut self) {
        self.generation += 1;
        self.trials_issued = 0;
        self.trial_successes = 0;
        self.last_trial_at = None;
    }

    fn transition(&mut self, to: CircuitState) -> StateChange {
        let from = self.state;
        self.state = to;
        self.reclaim_trials();
        match to {
            CircuitState::Open => {
                self.failures.clear();
                self.times_opened += 1;
            }
            CircuitState::Closed => {
                self.failures.clear();
                self.opened_at = None;
            }
            CircuitState::HalfOpen => {}
        }
        StateChange { from, to }
    }
}
