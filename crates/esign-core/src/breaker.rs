//! Circuit breaker wrapping every call to the provider or the local signing
//! co-process.
//!
//! Tracks failure rates per dependency and temporarily short-circuits calls
//! to an unhealthy one. State is shared across all callers of a dependency
//! and independent of any single job's lifecycle.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::gateway::GatewayError;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls short-circuit to the fallback for a cool-down window.
    Open,
    /// A limited number of probe calls are allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Per-dependency breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen before the circuit closes.
    pub success_threshold: u32,
    /// Cool-down before an open circuit admits probes.
    pub reset_timeout: Duration,
    /// Probe budget while half-open.
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_max_probes: 2,
        }
    }
}

/// Circuit breaker for a single external dependency.
pub struct CircuitBreaker {
    dependency: &'static str,
    state: RwLock<Inner>,
    config: BreakerConfig,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_probes: AtomicU32,
}

struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(dependency: &'static str, config: BreakerConfig) -> Self {
        Self {
            dependency,
            state: RwLock::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            config,
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_probes: AtomicU32::new(0),
        }
    }

    pub fn dependency(&self) -> &'static str {
        self.dependency
    }

    pub fn state(&self) -> CircuitState {
        self.check_cooldown();
        self.state.read().expect("breaker poisoned").state
    }

    /// Whether a call may go out right now. Half-open admits a bounded
    /// number of probes.
    pub fn allow_request(&self) -> bool {
        self.check_cooldown();
        let inner = self.state.read().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let used = self.half_open_probes.fetch_add(1, Ordering::SeqCst);
                used < self.config.half_open_max_probes
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.state.write().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    info!(
                        dependency = self.dependency,
                        successes, "circuit breaker closing after recovery"
                    );
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                debug!(
                    dependency = self.dependency,
                    "success recorded while circuit open"
                );
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.state.write().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(
                        dependency = self.dependency,
                        failures, "circuit breaker opening"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    dependency = self.dependency,
                    "circuit breaker re-opening after half-open failure"
                );
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Force a state, for tests and operator tooling.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.state.write().expect("breaker poisoned");
        info!(
            dependency = self.dependency,
            old_state = %inner.state,
            new_state = %new_state,
            "circuit breaker state forced"
        );
        self.transition(&mut inner, new_state);
    }

    /// Run `call` under this breaker. An open circuit short-circuits to
    /// `GatewayError::Unavailable` without touching the dependency. A
    /// `Conflict` is the caller's retryable condition and does not count
    /// against the breaker.
    pub async fn run<T, F, Fut>(&self, call: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        if !self.allow_request() {
            return Err(GatewayError::Unavailable(format!(
                "{} circuit open",
                self.dependency
            )));
        }
        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(GatewayError::Conflict) => Err(GatewayError::Conflict),
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn check_cooldown(&self) {
        let opened_at = {
            let inner = self.state.read().expect("breaker poisoned");
            if inner.state != CircuitState::Open {
                return;
            }
            inner.opened_at
        };
        let Some(opened_at) = opened_at else { return };
        if opened_at.elapsed() >= self.config.reset_timeout {
            let mut inner = self.state.write().expect("breaker poisoned");
            if inner.state == CircuitState::Open {
                info!(
                    dependency = self.dependency,
                    "circuit breaker half-open after cool-down"
                );
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        inner.state = new_state;
        match new_state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
                inner.opened_at = None;
            }
            CircuitState::Open => {
                self.success_count.store(0, Ordering::SeqCst);
                self.half_open_probes.store(0, Ordering::SeqCst);
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                self.success_count.store(0, Ordering::SeqCst);
                self.half_open_probes.store(0, Ordering::SeqCst);
            }
        }
    }
}

/// The five dependency breakers, shared across the whole service.
pub struct Breakers {
    pub sign_api: std::sync::Arc<CircuitBreaker>,
    pub hash_sdk: std::sync::Arc<CircuitBreaker>,
    pub seal_rpc: std::sync::Arc<CircuitBreaker>,
    pub ltv_rpc: std::sync::Arc<CircuitBreaker>,
    pub auth: std::sync::Arc<CircuitBreaker>,
}

impl Breakers {
    pub fn new(config: BreakerConfig) -> Self {
        use std::sync::Arc;
        Self {
            sign_api: Arc::new(CircuitBreaker::new("sign_api", config.clone())),
            hash_sdk: Arc::new(CircuitBreaker::new("hash_sdk", config.clone())),
            seal_rpc: Arc::new(CircuitBreaker::new("seal_rpc", config.clone())),
            ltv_rpc: Arc::new(CircuitBreaker::new("ltv_rpc", config.clone())),
            auth: Arc::new(CircuitBreaker::new("auth", config)),
        }
    }
}

impl Default for Breakers {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(50),
            half_open_max_probes: 2,
        }
    }

    #[test]
    fn closed_to_open_after_threshold() {
        let breaker = CircuitBreaker::new("sign_api", test_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("hash_sdk", test_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_closes_after_successes() {
        let breaker = CircuitBreaker::new("ltv_rpc", test_config());
        breaker.force_state(CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("seal_rpc", test_config());
        breaker.force_state(CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn open_circuit_admits_probes_after_cooldown() {
        let breaker = CircuitBreaker::new("auth", test_config());
        breaker.force_state(CircuitState::Open);
        assert!(!breaker.allow_request());
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        assert!(breaker.allow_request());
        // Probe budget exhausted.
        assert!(!breaker.allow_request());
    }

    #[tokio::test]
    async fn run_short_circuits_when_open() {
        let breaker = CircuitBreaker::new("sign_api", test_config());
        breaker.force_state(CircuitState::Open);
        let result: Result<(), _> = breaker.run(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn run_counts_remote_errors_but_not_conflicts() {
        let breaker = CircuitBreaker::new("hash_sdk", test_config());
        for _ in 0..5 {
            let _: Result<(), _> = breaker.run(|| async { Err(GatewayError::Conflict) }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..3 {
            let _: Result<(), _> = breaker
                .run(|| async {
                    Err(GatewayError::Remote {
                        code: "500".into(),
                        message: "boom".into(),
                    })
                })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
