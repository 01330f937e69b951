//! Three-state circuit breaker with a rolling failure ratio.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::telemetry;
use crate::{Result, VerdandiError};

/// Configuration for a [`CircuitBreaker`].
///
/// ```rust
/// # use verdandi::BreakerConfig;
/// # use std::time::Duration;
/// let config = BreakerConfig::new()
///     .error_threshold_percentage(50)
///     .volume_threshold(5)
///     .reset_timeout(Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Per-call timeout; exceeding it counts as a failure. Default: 5s.
    pub timeout: Duration,
    /// Failure percentage (1-100) at which the circuit opens. Default: 50.
    pub error_threshold_percentage: u8,
    /// Time spent open before a probe is allowed. Default: 30s.
    pub reset_timeout: Duration,
    /// Completed calls required in the window before the failure
    /// percentage is evaluated. Default: 5.
    pub volume_threshold: u32,
    /// Outcomes older than this are forgotten. Default: 10s.
    pub rolling_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            error_threshold_percentage: 50,
            reset_timeout: Duration::from_secs(30),
            volume_threshold: 5,
            rolling_window: Duration::from_secs(10),
        }
    }
}

impl BreakerConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lenient profile for non-critical calls (conversion recording).
    pub fn lenient() -> Self {
        Self {
            error_threshold_percentage: 75,
            reset_timeout: Duration::from_secs(60),
            volume_threshold: 10,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn error_threshold_percentage(mut self, pct: u8) -> Self {
        self.error_threshold_percentage = pct;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn volume_threshold(mut self, n: u32) -> Self {
        self.volume_threshold = n;
        self
    }

    pub fn rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.error_threshold_percentage) {
            return Err(VerdandiError::Configuration(format!(
                "breaker error threshold must be 1-100, got {}",
                self.error_threshold_percentage
            )));
        }
        if self.timeout.is_zero() || self.rolling_window.is_zero() {
            return Err(VerdandiError::Configuration(
                "breaker timeout and rolling window must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// The current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; outcomes feed the rolling window.
    Closed,
    /// Calls are rejected without invoking the operation.
    Open,
    /// One probe call is let through to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications emitted by a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    Open,
    HalfOpen,
    Close,
    /// A call exceeded the per-call timeout.
    Timeout,
    /// A call was rejected because the circuit is open.
    Reject,
}

/// Receives breaker notifications.
///
/// Called synchronously after the breaker has updated its state and released
/// its lock, so listeners may query the breaker. Panics are caught and
/// logged; they never affect the call that triggered the event.
pub trait BreakerListener: Send + Sync {
    fn on_event(&self, breaker: &str, event: BreakerEvent);
}

impl<F> BreakerListener for F
where
    F: Fn(&str, BreakerEvent) + Send + Sync,
{
    fn on_event(&self, breaker: &str, event: BreakerEvent) {
        self(breaker, event)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub window_calls: u32,
    pub window_failures: u32,
}

struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Start of the half-open probe currently in flight.
    probe_started: Option<Instant>,
    /// `(completed_at, failed)` for calls completed while closed.
    window: VecDeque<(Instant, bool)>,
    disposed: bool,
}

impl BreakerInner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> u32 {
        self.window.iter().filter(|(_, failed)| *failed).count() as u32
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_started = None;
        self.window.clear();
    }
}

#[derive(Debug, Clone, Copy)]
struct Admission {
    probe: bool,
}

/// A circuit breaker guarding calls to one dependency.
///
/// # States
///
/// ```text
/// Closed   → Open:     completed calls ≥ volume threshold and
///                      failure % ≥ error threshold within the window
/// Open     → HalfOpen: reset timeout elapsed (observed lazily)
/// HalfOpen → Closed:   probe succeeds
/// HalfOpen → Open:     probe fails; reset timer restarts
/// ```
///
/// Rejections while open are not counted as failures: the operation was
/// never reached.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    listeners: RwLock<Vec<Arc<dyn BreakerListener>>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                probe_started: None,
                window: VecDeque::new(),
                disposed: false,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for state notifications.
    pub fn add_listener(&self, listener: Arc<dyn BreakerListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Current state. An open circuit whose reset timeout has elapsed is
    /// moved to half-open here.
    pub fn state(&self) -> CircuitState {
        let mut events = Vec::new();
        let state = {
            let mut inner = self.lock();
            self.advance(&mut inner, Instant::now(), &mut events);
            inner.state
        };
        self.emit(&events);
        state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut events = Vec::new();
        let snapshot = {
            let mut inner = self.lock();
            let now = Instant::now();
            self.advance(&mut inner, now, &mut events);
            inner.prune(now, self.config.rolling_window);
            BreakerSnapshot {
                state: inner.state,
                window_calls: inner.window.len() as u32,
                window_failures: inner.failures(),
            }
        };
        self.emit(&events);
        snapshot
    }

    /// Run `op` through the breaker.
    ///
    /// Fails fast with [`VerdandiError::CircuitOpen`] while open, and with
    /// [`VerdandiError::Timeout`] when `op` outlives the configured timeout.
    /// A panic inside `op` is recorded as a failure and then resumed.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;

        let outcome =
            tokio::time::timeout(self.config.timeout, AssertUnwindSafe(op()).catch_unwind()).await;

        match outcome {
            Ok(Ok(Ok(value))) => {
                self.record(admission, true);
                Ok(value)
            }
            Ok(Ok(Err(e))) => {
                self.record(admission, false);
                Err(e)
            }
            Ok(Err(panic)) => {
                self.record(admission, false);
                std::panic::resume_unwind(panic)
            }
            Err(_) => {
                self.emit(&[BreakerEvent::Timeout]);
                self.record(admission, false);
                Err(VerdandiError::Timeout(self.config.timeout))
            }
        }
    }

    /// Reject all further calls and drop listeners.
    pub fn dispose(&self) {
        self.lock().disposed = true;
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(breaker = %self.name, "circuit breaker disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    fn admit(&self) -> Result<Admission> {
        let mut events = Vec::new();
        let admitted = {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(VerdandiError::Shutdown);
            }
            let now = Instant::now();
            self.advance(&mut inner, now, &mut events);
            match inner.state {
                CircuitState::Closed => Some(Admission { probe: false }),
                CircuitState::Open => None,
                CircuitState::HalfOpen => {
                    // A probe older than the call timeout was abandoned by its caller.
                    let busy = inner
                        .probe_started
                        .is_some_and(|at| now.duration_since(at) < self.config.timeout);
                    if busy {
                        None
                    } else {
                        inner.probe_started = Some(now);
                        Some(Admission { probe: true })
                    }
                }
            }
        };

        match admitted {
            Some(admission) => {
                self.emit(&events);
                Ok(admission)
            }
            None => {
                events.push(BreakerEvent::Reject);
                self.emit(&events);
                Err(VerdandiError::CircuitOpen {
                    name: self.name.clone(),
                })
            }
        }
    }

    fn record(&self, admission: Admission, success: bool) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            let now = Instant::now();
            if admission.probe {
                if inner.state == CircuitState::HalfOpen {
                    if success {
                        inner.state = CircuitState::Closed;
                        inner.opened_at = None;
                        inner.probe_started = None;
                        inner.window.clear();
                        events.push(BreakerEvent::Close);
                    } else {
                        inner.trip(now);
                        events.push(BreakerEvent::Open);
                    }
                }
            } else if inner.state == CircuitState::Closed {
                inner.window.push_back((now, !success));
                inner.prune(now, self.config.rolling_window);

                let calls = inner.window.len() as u32;
                let failures = inner.failures();
                let threshold = u32::from(self.config.error_threshold_percentage);
                if calls >= self.config.volume_threshold
                    && failures > 0
                    && failures * 100 >= threshold * calls
                {
                    warn!(
                        breaker = %self.name,
                        calls,
                        failures,
                        "failure threshold reached, opening circuit"
                    );
                    inner.trip(now);
                    events.push(BreakerEvent::Open);
                }
            }
        }
        self.emit(&events);
    }

    fn advance(&self, inner: &mut BreakerInner, now: Instant, events: &mut Vec<BreakerEvent>) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map_or(Duration::MAX, |at| now.duration_since(at));
        if elapsed >= self.config.reset_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.probe_started = None;
            events.push(BreakerEvent::HalfOpen);
        }
    }

    fn emit(&self, events: &[BreakerEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for &event in events {
            match event {
                BreakerEvent::Open => {
                    warn!(breaker = %self.name, "circuit opened");
                    self.count_transition(CircuitState::Open);
                }
                BreakerEvent::HalfOpen => {
                    info!(breaker = %self.name, "circuit half-open, allowing probe");
                    self.count_transition(CircuitState::HalfOpen);
                }
                BreakerEvent::Close => {
                    info!(breaker = %self.name, "circuit closed, dependency recovered");
                    self.count_transition(CircuitState::Closed);
                }
                BreakerEvent::Timeout => {
                    warn!(breaker = %self.name, timeout_ms = self.config.timeout.as_millis() as u64, "call timed out");
                    metrics::counter!(telemetry::BREAKER_TIMEOUTS_TOTAL, "breaker" => self.name.clone())
                        .increment(1);
                }
                BreakerEvent::Reject => {
                    debug!(breaker = %self.name, "call rejected, circuit open");
                    metrics::counter!(telemetry::BREAKER_REJECTIONS_TOTAL, "breaker" => self.name.clone())
                        .increment(1);
                }
            }

            for listener in &listeners {
                let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    listener.on_event(&self.name, event)
                }));
                if delivered.is_err() {
                    error!(breaker = %self.name, ?event, "breaker listener panicked");
                }
            }
        }
    }

    fn count_transition(&self, state: CircuitState) {
        metrics::counter!(telemetry::BREAKER_TRANSITIONS_TOTAL,
            "breaker" => self.name.clone(),
            "state" => state.as_str(),
        )
        .increment(1);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
