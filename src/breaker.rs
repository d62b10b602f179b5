//! Circuit breaker protecting downstream dependencies.
//!
//! Every call a processor makes to a downstream dependency (persistence,
//! outbound notification) goes through a per-dependency breaker. While open,
//! calls short-circuit without attempting I/O; the scheduler keeps buffering
//! events up to its configured bound.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ProcessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, failures counted.
    #[default]
    Closed,
    /// Tripped, calls rejected immediately.
    Open,
    /// Cooldown elapsed, one probe call allowed through.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// A half-open circuit admits exactly one trial call at a time; this
    /// holds the slot until the trial's outcome is recorded.
    probe_in_flight: bool,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    /// Whether a call may proceed. Handles the open -> half-open transition
    /// once the cooldown has elapsed; in half-open, only the single probe
    /// slot gets through.
    fn can_execute(&mut self, config: &BreakerConfig, dependency: &str) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(opened_at) = self.opened_at {
                    if opened_at.elapsed() >= config.cooldown {
                        self.state = CircuitState::HalfOpen;
                        self.probe_in_flight = true;
                        tracing::info!(
                            dependency,
                            "circuit transitioning to half-open for probe"
                        );
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    return false;
                }
                self.probe_in_flight = true;
                true
            }
        }
    }

    fn record_success(&mut self, dependency: &str) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.probe_in_flight = false;
                tracing::info!(dependency, "circuit closed after successful probe");
            }
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::Open => {
                tracing::warn!(dependency, "success recorded while circuit open");
            }
        }
    }

    fn record_failure(&mut self, config: &BreakerConfig, dependency: &str) {
        self.consecutive_failures += 1;

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                    tracing::warn!(
                        dependency,
                        failures = self.consecutive_failures,
                        threshold = config.failure_threshold,
                        "circuit opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                self.probe_in_flight = false;
                tracing::warn!(dependency, "circuit reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }
}

/// Point-in-time view of one breaker, for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Seconds since the circuit opened, if open.
    pub open_for_secs: Option<u64>,
}

/// Registry of breakers keyed by dependency name.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<&'static str, CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Run `f` against `dependency`, short-circuiting with
    /// `ProcessError::CircuitOpen` if its breaker is open.
    ///
    /// Only transient failures count against the breaker; any outcome that
    /// shows the dependency responding (success, validation, permanent)
    /// counts as a successful call.
    pub fn call<T>(
        &self,
        dependency: &'static str,
        f: impl FnOnce() -> Result<T, ProcessError>,
    ) -> Result<T, ProcessError> {
        {
            let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
            let breaker = breakers.entry(dependency).or_insert_with(CircuitBreaker::new);
            if !breaker.can_execute(&self.config, dependency) {
                return Err(ProcessError::CircuitOpen(dependency));
            }
        }

        let result = f();

        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let breaker = breakers.entry(dependency).or_insert_with(CircuitBreaker::new);
        match &result {
            // Validation and permanent errors are the caller's problem, not
            // the dependency's: the call itself got through, which is what
            // the breaker (and a held probe slot) cares about
            Ok(_) | Err(ProcessError::Validation(_)) | Err(ProcessError::Permanent(_)) => {
                breaker.record_success(dependency)
            }
            Err(ProcessError::Transient(_)) => breaker.record_failure(&self.config, dependency),
            Err(ProcessError::CircuitOpen(_)) => {}
        }

        result
    }

    /// Record an out-of-band outcome for a dependency, for callers that
    /// cannot run under `call` (e.g. spawned notification tasks).
    pub fn record_outcome(&self, dependency: &'static str, success: bool) {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let breaker = breakers.entry(dependency).or_insert_with(CircuitBreaker::new);
        if success {
            breaker.record_success(dependency);
        } else {
            breaker.record_failure(&self.config, dependency);
        }
    }

    /// Whether a call to `dependency` would currently be allowed.
    pub fn can_execute(&self, dependency: &'static str) -> bool {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let breaker = breakers.entry(dependency).or_insert_with(CircuitBreaker::new);
        breaker.can_execute(&self.config, dependency)
    }

    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.lock().expect("breaker lock poisoned");
        let mut statuses: Vec<BreakerStatus> = breakers
            .iter()
            .map(|(dep, b)| BreakerStatus {
                dependency: dep.to_string(),
                state: b.state,
                consecutive_failures: b.consecutive_failures,
                open_for_secs: b.opened_at.map(|t| t.elapsed().as_secs()),
            })
            .collect();
        statuses.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        statuses
    }
}
