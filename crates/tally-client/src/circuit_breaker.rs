//! Circuit breaker for collector protection
//!
//! Implements the circuit breaker pattern so that an unreachable or failing
//! stats collector is not hammered, and so that callers stop paying its
//! latency once it is known to be down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tally_core::{CircuitBreakerConfig, Result, TallyError};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Failure rate too high - reject requests immediately
    Open,
    /// Cool-down elapsed - allow a limited number of trial requests
    HalfOpen,
}

/// Events published by a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerEvent {
    /// A permitted call completed successfully
    Success,
    /// A permitted call failed
    Error { message: String },
    /// A call was rejected without being attempted
    CallNotPermitted,
    /// The breaker changed state
    StateTransition { from: CircuitState, to: CircuitState },
}

/// Point-in-time counters for a breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerMetrics {
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub not_permitted_calls: u64,
    /// Failure percentage over the sliding window, once enough calls were seen
    pub failure_rate: Option<f32>,
}

type EventHandler = Arc<dyn Fn(&CircuitBreakerEvent) + Send + Sync>;

struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition; outcomes from an older generation only count in metrics
    generation: u64,
    /// Most recent outcomes in CLOSED state, `true` = failure
    outcomes: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_in_flight: u32,
    trial_completed: u32,
    trial_failures: u32,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            outcomes: VecDeque::new(),
            opened_at: None,
            trial_in_flight: 0,
            trial_completed: 0,
            trial_failures: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) -> CircuitBreakerEvent {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.outcomes.clear();
        self.trial_in_flight = 0;
        self.trial_completed = 0;
        self.trial_failures = 0;
        self.opened_at = match to {
            CircuitState::Open => Some(Instant::now()),
            _ => None,
        };
        CircuitBreakerEvent::StateTransition { from, to }
    }

    fn failure_rate(&self, minimum_calls: usize) -> Option<f32> {
        if self.outcomes.is_empty() || self.outcomes.len() < minimum_calls {
            return None;
        }
        let failures = self.outcomes.iter().filter(|failed| **failed).count();
        Some(failures as f32 * 100.0 / self.outcomes.len() as f32)
    }
}

/// Circuit breaker guarding calls to a remote dependency
///
/// # States
///
/// - **Closed**: all calls allowed; outcomes feed a sliding window and the
///   breaker opens once the failure rate reaches the threshold
/// - **Open**: calls rejected immediately until the cool-down elapses
/// - **HalfOpen**: a fixed number of trial calls are let through; when they
///   have all completed the breaker closes, or reopens if the trial failure
///   rate is still at or above the threshold
///
/// State is kept behind an internal mutex that is never held across an
/// `.await`, so a breaker can be shared freely between tasks.
///
/// # Example
///
/// ```
/// use tally_client::{CircuitBreaker, CircuitState};
/// use tally_core::CircuitBreakerConfig;
///
/// let cb = CircuitBreaker::new("collector", CircuitBreakerConfig {
///     sliding_window_size: 4,
///     minimum_number_of_calls: 4,
///     ..CircuitBreakerConfig::default()
/// });
///
/// for _ in 0..4 {
///     let permit = cb.try_acquire().expect("closed breaker permits calls");
///     permit.on_failure("connection refused");
/// }
///
/// assert_eq!(cb.state(), CircuitState::Open);
/// assert!(cb.try_acquire().is_none());
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    wait_duration: Duration,
    inner: Mutex<BreakerInner>,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    not_permitted_calls: AtomicU64,
    handlers: RwLock<Vec<EventHandler>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    ///
    /// # Arguments
    ///
    /// * `name` - Registry name, used in logs and errors
    /// * `config` - Thresholds, window size and cool-down
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            wait_duration: Duration::from_millis(config.wait_duration_in_open_state_ms),
            config,
            inner: Mutex::new(BreakerInner::new()),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            not_permitted_calls: AtomicU64::new(0),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current circuit state
    ///
    /// An OPEN breaker whose cool-down has elapsed still reports `Open` until
    /// the next call attempt moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Check if a request would currently be permitted, without taking a permit
    pub fn can_execute(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.wait_elapsed(&inner),
            CircuitState::HalfOpen => inner.trial_in_flight + inner.trial_completed < self.trial_limit(),
        }
    }

    /// Get time until an OPEN circuit lets trial calls through (ms), 0 if not open
    pub fn time_until_retry(&self) -> u64 {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                self.wait_duration.saturating_sub(opened_at.elapsed()).as_millis() as u64
            }
            _ => 0,
        }
    }

    /// Snapshot of the call counters
    pub fn metrics(&self) -> BreakerMetrics {
        let failure_rate = self.lock().failure_rate(self.minimum_calls());
        BreakerMetrics {
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            not_permitted_calls: self.not_permitted_calls.load(Ordering::Relaxed),
            failure_rate,
        }
    }

    /// Ask for permission to make one call
    ///
    /// Returns `None` (and publishes [`CircuitBreakerEvent::CallNotPermitted`])
    /// when the breaker is OPEN or all half-open trial slots are taken. The
    /// returned permit must be settled with the call's outcome; dropping it
    /// unsettled releases any half-open slot it holds.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let (permit, transition) = {
            let mut inner = self.lock();
            let mut transition = None;

            if inner.state == CircuitState::Open && self.wait_elapsed(&inner) {
                transition = Some(inner.transition(CircuitState::HalfOpen));
            }

            let permitted = match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight + inner.trial_completed < self.trial_limit() {
                        inner.trial_in_flight += 1;
                        true
                    } else {
                        false
                    }
                }
            };

            let permit = permitted.then(|| CallPermit {
                breaker: self,
                generation: inner.generation,
                settled: false,
            });
            (permit, transition)
        };

        if let Some(event) = transition {
            self.log_transition(&event);
            self.publish(&event);
        }

        if permit.is_none() {
            self.not_permitted_calls.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Circuit breaker '{}' rejected call", self.name);
            self.publish(&CircuitBreakerEvent::CallNotPermitted);
        }

        permit
    }

    /// Run `f` through the breaker
    ///
    /// Returns [`TallyError::CallNotPermitted`] without calling `f` when the
    /// breaker rejects the call; otherwise records the outcome and returns it.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let permit = self
            .try_acquire()
            .ok_or_else(|| TallyError::CallNotPermitted(self.name.clone()))?;

        match f().await {
            Ok(value) => {
                permit.on_success();
                Ok(value)
            }
            Err(e) => {
                permit.on_failure(&e.to_string());
                Err(e)
            }
        }
    }

    /// Subscribe to breaker events
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Subscribe to rejected calls only
    pub fn on_call_not_permitted<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if matches!(event, CircuitBreakerEvent::CallNotPermitted) {
                handler();
            }
        });
    }

    /// Force the breaker OPEN (administrative / test override)
    pub fn transition_to_open_state(&self) {
        self.force(CircuitState::Open);
    }

    /// Force the breaker CLOSED (administrative / test override)
    pub fn transition_to_closed_state(&self) {
        self.force(CircuitState::Closed);
    }

    /// Force the breaker HALF_OPEN (administrative / test override)
    pub fn transition_to_half_open_state(&self) {
        self.force(CircuitState::HalfOpen);
    }

    fn force(&self, to: CircuitState) {
        let event = {
            let mut inner = self.lock();
            if inner.state == to {
                return;
            }
            inner.transition(to)
        };
        self.log_transition(&event);
        self.publish(&event);
    }

    fn record(&self, generation: u64, failure: Option<&str>) {
        match failure {
            None => self.successful_calls.fetch_add(1, Ordering::Relaxed),
            Some(_) => self.failed_calls.fetch_add(1, Ordering::Relaxed),
        };
        let failed = failure.is_some();

        let transition = {
            let mut inner = self.lock();
            if inner.generation != generation {
                // The breaker moved on while this call was in flight
                None
            } else {
                match inner.state {
                    CircuitState::Closed => {
                        inner.outcomes.push_back(failed);
                        while inner.outcomes.len() > self.window_size() {
                            inner.outcomes.pop_front();
                        }
                        match inner.failure_rate(self.minimum_calls()) {
                            Some(rate) if rate >= self.config.failure_rate_threshold => {
                                Some(inner.transition(CircuitState::Open))
                            }
                            _ => None,
                        }
                    }
                    CircuitState::HalfOpen => {
                        inner.trial_in_flight = inner.trial_in_flight.saturating_sub(1);
                        inner.trial_completed += 1;
                        if failed {
                            inner.trial_failures += 1;
                        }
                        if inner.trial_completed >= self.trial_limit() {
                            let rate = inner.trial_failures as f32 * 100.0 / inner.trial_completed as f32;
                            let to = if rate >= self.config.failure_rate_threshold {
                                CircuitState::Open
                            } else {
                                CircuitState::Closed
                            };
                            Some(inner.transition(to))
                        } else {
                            None
                        }
                    }
                    CircuitState::Open => None,
                }
            }
        };

        match failure {
            None => self.publish(&CircuitBreakerEvent::Success),
            Some(message) => self.publish(&CircuitBreakerEvent::Error {
                message: message.to_string(),
            }),
        }

        if let Some(event) = transition {
            self.log_transition(&event);
            self.publish(&event);
        }
    }

    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = inner.trial_in_flight.saturating_sub(1);
        }
    }

    fn publish(&self, event: &CircuitBreakerEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(event);
        }
    }

    fn log_transition(&self, event: &CircuitBreakerEvent) {
        if let CircuitBreakerEvent::StateTransition { from, to } = event {
            match to {
                CircuitState::Open => tracing::warn!(
                    "Circuit breaker '{}' {:?} -> {:?}, retrying in {}ms",
                    self.name,
                    from,
                    to,
                    self.wait_duration.as_millis()
                ),
                _ => tracing::info!("Circuit breaker '{}' {:?} -> {:?}", self.name, from, to),
            }
        }
    }

    fn wait_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .map(|opened_at| opened_at.elapsed() >= self.wait_duration)
            .unwrap_or(true)
    }

    fn window_size(&self) -> usize {
        self.config.sliding_window_size.max(1) as usize
    }

    fn minimum_calls(&self) -> usize {
        (self.config.minimum_number_of_calls.max(1) as usize).min(self.window_size())
    }

    fn trial_limit(&self) -> u32 {
        self.config.permitted_calls_in_half_open_state.max(1)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// Permission to make one call through a [`CircuitBreaker`]
#[must_use = "a permit must be settled with on_success or on_failure"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl CallPermit<'_> {
    /// Record a successful call
    pub fn on_success(mut self) {
        self.settled = true;
        self.breaker.record(self.generation, None);
    }

    /// Record a failed call
    pub fn on_failure(mut self, message: &str) {
        self.settled = true;
        self.breaker.record(self.generation, Some(message));
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;

    fn small_config(wait_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 4,
            minimum_number_of_calls: 4,
            permitted_calls_in_half_open_state: 2,
            wait_duration_in_open_state_ms: wait_ms,
        }
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().expect("permit").on_failure("boom");
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().expect("permit").on_success();
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..4 {
            fail(cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_initial_state_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.time_until_retry(), 0);
    }

    #[test]
    fn test_waits_for_minimum_calls() {
        let cb = CircuitBreaker::new("test", small_config(60_000));

        fail(&cb);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_rate, None);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_opens_at_failure_rate_threshold() {
        let cb = CircuitBreaker::new("test", small_config(60_000));

        succeed(&cb);
        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);

        // 2 of 4 failed = 50%
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let cb = CircuitBreaker::new("test", small_config(60_000));

        for _ in 0..10 {
            succeed(&cb);
            succeed(&cb);
            succeed(&cb);
            fail(&cb);
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_rate, Some(25.0));
        assert_eq!(cb.metrics().successful_calls, 30);
        assert_eq!(cb.metrics().failed_calls, 10);
    }

    #[test]
    fn test_open_rejects_and_counts() {
        let cb = CircuitBreaker::new("test", small_config(60_000));
        trip(&cb);

        let rejected = Arc::new(AtomicUsize::new(0));
        let counter = rejected.clone();
        cb.on_call_not_permitted(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(cb.try_acquire().is_none());
        assert!(cb.try_acquire().is_none());

        assert_eq!(rejected.load(Ordering::SeqCst), 2);
        assert_eq!(cb.metrics().not_permitted_calls, 2);
    }

    #[test]
    fn test_time_until_retry() {
        let cb = CircuitBreaker::new("test", small_config(2_000));
        trip(&cb);

        let time_remaining = cb.time_until_retry();
        assert!(time_remaining > 0);
        assert!(time_remaining <= 2000);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = CircuitBreaker::new("test", small_config(50));
        trip(&cb);

        sleep(Duration::from_millis(80));
        assert!(cb.can_execute());

        let permit = cb.try_acquire();
        assert!(permit.is_some());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_can_recover() {
        let cb = CircuitBreaker::new("test", small_config(50));
        trip(&cb);
        sleep(Duration::from_millis(80));

        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", small_config(50));
        trip(&cb);
        sleep(Duration::from_millis(80));

        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_half_open_limits_trial_calls() {
        let cb = CircuitBreaker::new("test", small_config(50));
        trip(&cb);
        sleep(Duration::from_millis(80));

        let first = cb.try_acquire();
        let second = cb.try_acquire();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(cb.try_acquire().is_none());

        // Abandoning a trial call frees its slot
        drop(first);
        assert!(cb.try_acquire().is_some());
    }

    #[test]
    fn test_stale_outcome_does_not_change_state() {
        let cb = CircuitBreaker::new("test", small_config(60_000));
        let permit = cb.try_acquire().expect("permit");

        cb.transition_to_open_state();
        permit.on_success();

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().successful_calls, 1);
    }

    #[test]
    fn test_forced_transitions_publish_events() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        cb.on_event(move |event| sink.lock().unwrap().push(event.clone()));

        cb.transition_to_open_state();
        cb.transition_to_open_state();
        cb.transition_to_closed_state();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                CircuitBreakerEvent::StateTransition {
                    from: CircuitState::Closed,
                    to: CircuitState::Open
                },
                CircuitBreakerEvent::StateTransition {
                    from: CircuitState::Open,
                    to: CircuitState::Closed
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_skips_call_when_open() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        cb.transition_to_open_state();

        let calls = AtomicUsize::new(0);
        let result = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TallyError>(())
            })
            .await;

        assert!(matches!(result, Err(TallyError::CallNotPermitted(name)) if name == "test"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_records_outcomes() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        let ok = cb.execute(|| async { Ok::<_, TallyError>(5) }).await;
        assert_eq!(ok.unwrap(), 5);

        let err = cb
            .execute(|| async { Err::<(), _>(TallyError::Network("refused".to_string())) })
            .await;
        assert!(err.is_err());

        let metrics = cb.metrics();
        assert_eq!(metrics.successful_calls, 1);
        assert_eq!(metrics.failed_calls, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let cb = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                sliding_window_size: 1000,
                minimum_number_of_calls: 1000,
                ..CircuitBreakerConfig::default()
            },
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if let Some(permit) = cb.try_acquire() {
                            permit.on_success();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cb.metrics().successful_calls, 800);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
