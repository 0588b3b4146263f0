//! Lock-free in-process circuit breaker.
//!
//! State and the active counter are packed into one `AtomicU32` (upper two
//! bits state, lower thirty bits count) so every transition is a single
//! compare-and-swap and concurrent recorders never observe a torn pair.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;

use crate::config::CircuitBreakerConfig;

use super::{BreakerError, CircuitBreaker, CircuitState};

const STATE_CLOSED: u32 = 0;
const STATE_OPEN: u32 = 1;
const STATE_HALF_OPEN: u32 = 2;
const STATE_SHIFT: u32 = 30;
const COUNTER_MASK: u32 = (1 << STATE_SHIFT) - 1;

pub struct LocalBreaker {
    provider: Arc<str>,
    config: CircuitBreakerConfig,
    /// Packed state: upper 2 bits state, lower 30 bits the failure counter
    /// (Closed) or success counter (HalfOpen).
    state_and_counter: AtomicU32,
    /// Last failure instant, millis since the UNIX epoch.
    last_failure_ms: AtomicU64,
}

impl LocalBreaker {
    pub fn new(provider: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            state_and_counter: AtomicU32::new(pack(STATE_CLOSED, 0)),
            last_failure_ms: AtomicU64::new(0),
        }
    }

    fn open_timeout_ms(&self) -> u64 {
        self.config.open_timeout.as_millis() as u64
    }

    fn check(&self) -> Result<(), BreakerError> {
        let (state, _) = unpack(self.state_and_counter.load(Ordering::Acquire));
        match state {
            STATE_OPEN => {
                let last = self.last_failure_ms.load(Ordering::Acquire);
                let now = now_ms();
                if now >= last + self.open_timeout_ms() {
                    self.state_and_counter
                        .store(pack(STATE_HALF_OPEN, 0), Ordering::Release);
                    tracing::info!(provider = %self.provider, "circuit breaker half-open, probing recovery");
                    Ok(())
                } else {
                    Err(BreakerError::Open {
                        provider: Arc::clone(&self.provider),
                        retry_after_secs: (last + self.open_timeout_ms() - now) / 1000,
                    })
                }
            }
            _ => Ok(()),
        }
    }

    fn on_success(&self) {
        loop {
            let packed = self.state_and_counter.load(Ordering::Acquire);
            let (state, counter) = unpack(packed);

            match state {
                STATE_CLOSED => {
                    if counter == 0 {
                        return;
                    }
                    // Success resets the failure counter.
                    if self
                        .state_and_counter
                        .compare_exchange_weak(
                            packed,
                            pack(STATE_CLOSED, 0),
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return;
                    }
                    std::hint::spin_loop();
                }
                STATE_HALF_OPEN => {
                    let successes = counter + 1;
                    if successes >= self.config.success_threshold {
                        self.state_and_counter
                            .store(pack(STATE_CLOSED, 0), Ordering::Release);
                        tracing::info!(provider = %self.provider, "circuit breaker closed, provider recovered");
                        return;
                    }
                    if self
                        .state_and_counter
                        .compare_exchange_weak(
                            packed,
                            pack(STATE_HALF_OPEN, successes),
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return;
                    }
                    std::hint::spin_loop();
                }
                _ => return,
            }
        }
    }

    fn on_failure(&self) {
        self.last_failure_ms.store(now_ms(), Ordering::Release);

        loop {
            let packed = self.state_and_counter.load(Ordering::Acquire);
            let (state, counter) = unpack(packed);

            match state {
                STATE_CLOSED => {
                    let failures = counter + 1;
                    if failures >= self.config.failure_threshold {
                        self.state_and_counter
                            .store(pack(STATE_OPEN, 0), Ordering::Release);
                        tracing::warn!(
                            provider = %self.provider,
                            failures,
                            "circuit breaker opened"
                        );
                        return;
                    }
                    if self
                        .state_and_counter
                        .compare_exchange_weak(
                            packed,
                            pack(STATE_CLOSED, failures),
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return;
                    }
                    std::hint::spin_loop();
                }
                STATE_HALF_OPEN => {
                    // Any failure while probing reopens the circuit.
                    self.state_and_counter
                        .store(pack(STATE_OPEN, 0), Ordering::Release);
                    tracing::warn!(provider = %self.provider, "circuit breaker reopened from half-open");
                    return;
                }
                _ => return,
            }
        }
    }

    fn current_state(&self) -> CircuitState {
        let (state, _) = unpack(self.state_and_counter.load(Ordering::Acquire));
        match state {
            STATE_OPEN => {
                // Report HalfOpen once the timeout has elapsed even if no
                // admit has performed the transition yet.
                let last = self.last_failure_ms.load(Ordering::Acquire);
                if now_ms() >= last + self.open_timeout_ms() {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[async_trait]
impl CircuitBreaker for LocalBreaker {
    async fn admit(&self) -> Result<(), BreakerError> {
        self.check()
    }

    async fn record_success(&self) {
        self.on_success();
    }

    async fn record_failure(&self) {
        self.on_failure();
    }

    async fn state(&self) -> CircuitState {
        self.current_state()
    }
}

fn pack(state: u32, counter: u32) -> u32 {
    (state << STATE_SHIFT) | (counter & COUNTER_MASK)
}

fn unpack(packed: u32) -> (u32, u32) {
    (packed >> STATE_SHIFT, packed & COUNTER_MASK)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
