use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failure threshold reached, requests fast-fail.
    Open,
    /// Recovery probe: a few successes close the circuit, any failure
    /// reopens it.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a recovery probe.
    pub recovery_timeout: Duration,
    /// Consecutive successes in half-open before the circuit closes.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Per-dependency failure gate. Transitions are strictly sequential: all
/// state moves happen under the inner mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gate check. Returns true while the circuit is open and the recovery
    /// timeout has not elapsed; moves open -> half-open once it has.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if inner.state != CircuitState::Open {
            return false;
        }
        let elapsed = inner
            .last_failure_time
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed > self.config.recovery_timeout {
            log::info!(
                "circuit breaker '{}' transitioning to half_open after {:.1}s",
                self.name,
                elapsed.as_secs_f64()
            );
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            return false;
        }
        true
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    log::info!(
                        "circuit breaker '{}' closed after successful recovery",
                        self.name
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    log::warn!(
                        "circuit breaker '{}' opened after {} consecutive failures",
                        self.name,
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                log::warn!(
                    "circuit breaker '{}' reopened during recovery attempt",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.failure_count = 1;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, refreshing open -> half-open when the recovery
    /// timeout has passed.
    pub fn state(&self) -> CircuitState {
        self.is_open();
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn stats(&self) -> BreakerStats {
        let state = self.state();
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        BreakerStats {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            success_threshold: self.config.success_threshold,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
        log::info!("circuit breaker '{}' manually reset", self.name);
    }

    #[cfg(test)]
    fn force_last_failure_age(&self, age: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure_time = Instant::now().checked_sub(age);
    }
}

/// Process-wide map of named breakers. Lookups create on demand.
#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .expect("breaker registry poisoned")
            .get(name)
        {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().expect("breaker registry poisoned");
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
        }))
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .expect("breaker registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn all_stats(&self) -> Vec<BreakerStats> {
        self.breakers
            .read()
            .expect("breaker registry poisoned")
            .values()
            .map(|breaker| breaker.stats())
            .collect()
    }

    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self
            .breakers
            .read()
            .expect("breaker registry poisoned")
            .values()
        {
            breaker.reset();
        }
    }
}
