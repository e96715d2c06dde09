//! Shared circuit breakers, one actor per provider instance.
//!
//! Every `(step_type, provider_ref)` key gets a single task owning its
//! [`CircuitBreaker`]. Callers talk to it through a cloneable handle over an
//! mpsc mailbox, so concurrent pipelines never race on a state transition.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::{
    Admission, CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
    Permit, StateChange,
};
use crate::errors::CircuitOpenError;
use crate::utils::duration_ms;

/// Default mailbox capacity of a breaker actor.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Identity of a provider instance guarded by a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakerKey {
    /// Step type.
    pub step_type: String,
    /// Provider reference.
    pub provider_ref: String,
}

impl BreakerKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(step_type: impl Into<String>, provider_ref: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            provider_ref: provider_ref.into(),
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.step_type, self.provider_ref)
    }
}

enum Command {
    Acquire {
        reply: oneshot::Sender<Admission>,
    },
    Record {
        permit: Permit,
        outcome: CallOutcome,
    },
    Snapshot {
        reply: oneshot::Sender<CircuitSnapshot>,
    },
    Reset,
}

/// Cloneable handle to a breaker actor.
#[derive(Debug, Clone)]
pub struct CircuitBreakerHandle {
    key: BreakerKey,
    tx: mpsc::Sender<Command>,
}

impl CircuitBreakerHandle {
    /// Spawns a breaker actor on the current Tokio runtime.
    #[must_use]
    pub fn spawn(key: BreakerKey, config: CircuitBreakerConfig, mailbox_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        tokio::spawn(run_breaker(key.clone(), CircuitBreaker::new(config), rx));
        Self { key, tx }
    }

    /// Returns the key this breaker guards.
    #[must_use]
    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    /// Asks the breaker for a call permit.
    ///
    /// If the actor is gone the call is let through: a lost breaker must not
    /// take the provider down with it.
    pub async fn acquire(&self) -> Result<BreakerPermit, CircuitOpenError> {
        let (reply, rx) = oneshot::channel();
        let admission = if self.tx.send(Command::Acquire { reply }).await.is_ok() {
            rx.await.ok()
        } else {
            None
        };

        match admission {
            Some(Admission::Allowed(permit)) => Ok(BreakerPermit::new(self, permit)),
            Some(Admission::Rejected { retry_after }) => Err(CircuitOpenError {
                step_type: self.key.step_type.clone(),
                provider_ref: self.key.provider_ref.clone(),
                retry_after_ms: duration_ms(retry_after),
            }),
            None => {
                error!(breaker = %self.key, "Circuit breaker actor unavailable; admitting call");
                Ok(BreakerPermit::new(self, Permit::detached()))
            }
        }
    }

    /// Returns a snapshot of the breaker, or `None` if the actor is gone.
    pub async fn snapshot(&self) -> Option<CircuitSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }

    /// Returns the current state, or `None` if the actor is gone.
    pub async fn state(&self) -> Option<CircuitState> {
        self.snapshot().await.map(|s| s.state)
    }

    /// Forces the breaker back to closed.
    pub async fn reset(&self) {
        if self.tx.send(Command::Reset).await.is_err() {
            warn!(breaker = %self.key, "Circuit breaker actor unavailable; reset dropped");
        }
    }
}

/// A permit held while a call is in flight.
///
/// Report the call with [`BreakerPermit::record`]. A permit dropped without
/// an outcome, for example when the caller's future is cancelled, reports
/// [`CallOutcome::Ignored`] so a half-open trial slot is handed back.
#[derive(Debug)]
pub struct BreakerPermit {
    key: BreakerKey,
    tx: mpsc::Sender<Command>,
    permit: Option<Permit>,
}

impl BreakerPermit {
    fn new(handle: &CircuitBreakerHandle, permit: Permit) -> Self {
        Self {
            key: handle.key.clone(),
            tx: handle.tx.clone(),
            permit: Some(permit),
        }
    }

    /// Returns true if the permit is a half-open trial.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.permit.as_ref().is_some_and(Permit::is_trial)
    }

    /// Reports the outcome of the permitted call.
    ///
    /// The permit is only consumed once the mailbox has room, so dropping
    /// this future while it waits still releases the permit.
    pub async fn record(mut self, outcome: CallOutcome) {
        match self.tx.reserve().await {
            Ok(slot) => {
                if let Some(permit) = self.permit.take() {
                    slot.send(Command::Record { permit, outcome });
                }
            }
            Err(_) => {
                self.permit = None;
                warn!(breaker = %self.key, "Circuit breaker actor unavailable; outcome dropped");
            }
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        debug!(breaker = %self.key, trial = permit.is_trial(), "Permit released without an outcome");

        let command = Command::Record {
            permit,
            outcome: CallOutcome::Ignored,
        };
        match self.tx.try_send(command) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                // Mailbox is busy; finish the send off the dropping thread.
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let tx = self.tx.clone();
                    runtime.spawn(async move {
                        let _ = tx.send(command).await;
                    });
                } else {
                    warn!(breaker = %self.key, "No runtime to release permit; trial slot expires after reset timeout");
                }
            }
        }
    }
}

async fn run_breaker(key: BreakerKey, mut breaker: CircuitBreaker, mut rx: mpsc::Receiver<Command>) {
    debug!(breaker = %key, "Circuit breaker started");

    while let Some(command) = rx.recv().await {
        let now = Instant::now();
        match command {
            Command::Acquire { reply } => {
                let (admission, change) = breaker.try_acquire(now);
                log_change(&key, change);
                let _ = reply.send(admission);
            }
            Command::Record { permit, outcome } => {
                let change = breaker.record(permit, outcome, now);
                log_change(&key, change);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(breaker.snapshot(now));
            }
            Command::Reset => {
                log_change(&key, breaker.reset());
            }
        }
    }

    debug!(breaker = %key, "Circuit breaker stopped");
}

fn log_change(key: &BreakerKey, change: Option<StateChange>) {
    let Some(StateChange { from, to }) = change else {
        return;
    };
    match to {
        CircuitState::Open => warn!(breaker = %key, from = %from, to = %to, "Circuit opened"),
        CircuitState::HalfOpen => info!(breaker = %key, from = %from, to = %to, "Circuit half-open"),
        CircuitState::Closed => info!(breaker = %key, from = %from, to = %to, "Circuit closed"),
    }
}

/// Registry of breaker actors keyed by provider instance.
///
/// The configuration passed when a key is first seen is the one the actor
/// keeps; later calls with a different config reuse the existing breaker.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<BreakerKey, CircuitBreakerHandle>,
    mailbox_capacity: usize,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            breakers: DashMap::new(),
            mailbox_capacity,
        }
    }

    /// Gets the breaker for `key`, spawning it on first use.
    pub fn get_or_create(&self, key: &BreakerKey, config: &CircuitBreakerConfig) -> CircuitBreakerHandle {
        if let Some(handle) = self.breakers.get(key) {
            return handle.clone();
        }
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| {
                CircuitBreakerHandle::spawn(key.clone(), config.clone(), self.mailbox_capacity)
            })
            .clone()
    }

    /// Gets an existing breaker.
    #[must_use]
    pub fn get(&self, key: &BreakerKey) -> Option<CircuitBreakerHandle> {
        self.breakers.get(key).map(|h| h.clone())
    }

    /// Returns the keys of all known breakers.
    #[must_use]
    pub fn keys(&self) -> Vec<BreakerKey> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of known breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn key() -> BreakerKey {
        BreakerKey::new("image", "sdxl")
    }

    #[tokio::test]
    async fn test_handle_opens_and_rejects() {
        let handle = CircuitBreakerHandle::spawn(
            key(),
            CircuitBreakerConfig::new(2, Duration::from_secs(30)),
            8,
        );

        for _ in 0..2 {
            let permit = handle.acquire().await.unwrap();
            permit.record(CallOutcome::Failure).await;
        }

        let err = handle.acquire().await.unwrap_err();
        assert_eq!(err.step_type, "image");
        assert_eq!(err.provider_ref, "sdxl");
        assert!(err.retry_after_ms > 0);
        assert_eq!(handle.state().await, Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_half_opens_after_reset_timeout() {
        let handle = CircuitBreakerHandle::spawn(
            key(),
            CircuitBreakerConfig::new(1, Duration::from_millis(500)),
            8,
        );

        let permit = handle.acquire().await.unwrap();
        permit.record(CallOutcome::Failure).await;
        assert!(handle.acquire().await.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;

        let trial = handle.acquire().await.unwrap();
        assert!(trial.is_trial());
        assert!(handle.acquire().await.is_err());

        trial.record(CallOutcome::Success).await;
        assert_eq!(handle.state().await, Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_once() {
        let handle = CircuitBreakerHandle::spawn(
            key(),
            CircuitBreakerConfig::new(3, Duration::from_secs(60)),
            64,
        );

        let mut joins = Vec::new();
        for _ in 0..10 {
            let h = handle.clone();
            joins.push(tokio::spawn(async move {
                if let Ok(permit) = h.acquire().await {
                    permit.record(CallOutcome::Failure).await;
                }
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.times_opened, 1);
    }

    #[tokio::test]
    async fn test_reset_closes() {
        let handle = CircuitBreakerHandle::spawn(
            key(),
            CircuitBreakerConfig::new(1, Duration::from_secs(60)),
            8,
        );
        let permit = handle.acquire().await.unwrap();
        permit.record(CallOutcome::Failure).await;

        handle.reset().await;
        assert_eq!(handle.state().await, Some(CircuitState::Closed));
        assert!(handle.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_registry_reuses_handles() {
        let registry = Arc::new(CircuitBreakerRegistry::default());
        let config = CircuitBreakerConfig::default();

        let a = registry.get_or_create(&key(), &config);
        let b = registry.get_or_create(&key(), &config);
        registry.get_or_create(&BreakerKey::new("image", "other"), &config);

        a.acquire().await.unwrap().record(CallOutcome::Success).await;
        assert!(b.acquire().await.is_ok());

        assert_eq!(registry.len(), 2);
        assert_eq!(a.snapshot().await.unwrap().total_successes, 1);
        assert!(registry.get(&key()).is_some());
        assert_eq!(key().to_string(), "image/sdxl");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_permit_hands_slot_back() {
        let handle = CircuitBreakerHandle::spawn(
            key(),
            CircuitBreakerConfig::new(1, Duration::from_secs(60)),
            8,
        );
        handle.acquire().await.unwrap().record(CallOutcome::Failure).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let trial = handle.acquire().await.unwrap();
        assert!(trial.is_trial());
        assert!(handle.acquire().await.is_err());
        drop(trial);

        let trial = handle.acquire().await.unwrap();
        assert!(trial.is_trial());
        trial.record(CallOutcome::Success).await;
        assert_eq!(handle.state().await, Some(CircuitState::Closed));
    }
}
