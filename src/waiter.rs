//! Eventual-consistency waiter.
//!
//! Remote control planes rarely offer read-after-write consistency. After a
//! mutating call, a lifecycle operation hands a [`ResourceHandle`] and a
//! [`WaitSpec`] to [`wait`], which polls the resource until it reaches an
//! acceptable state, a failure state, or runs out of time.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_convergence::waiter::{wait, ResourceHandle, WaitSpec};
//!
//! let handle = ResourceHandle::new("ws-123", fetcher);
//! let spec = WaitSpec::new(Duration::from_secs(300))
//!     .accept(["ACTIVE"])
//!     .fail_on(["CREATION_FAILED"]);
//! let state = wait(&handle, spec).await?;
//! ```
//!
//! # Deadline
//!
//! The deadline is `start + max_elapsed`, where `start` is the first poll: an
//! [`WaitSpec::with_initial_delay`] does not count against the budget. When the
//! next poll interval would pass the deadline, the waiter sleeps only for the
//! time left and polls one final time at the deadline. If that poll is not
//! terminal, the wait fails with [`WaitError::Timeout`]. No poll starts after
//! the deadline, and a fetch still in flight when it passes is abandoned.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{BoxError, WaitError};

/// Default initial poll interval.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(100);

/// Default poll interval ceiling.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);

const DELETED: &str = "Deleted";

/// An observable status of a remote resource, such as `ACTIVE` or `CREATING`.
///
/// A state may carry the reason the remote API gave for it. States compare,
/// hash and serialize by status code alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct State {
    code: String,
    reason: Option<String>,
}

impl State {
    /// Create a state from its status string.
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            code: state.into(),
            reason: None,
        }
    }

    /// The synthetic state reported when absence confirms a delete.
    pub fn deleted() -> Self {
        Self::new(DELETED)
    }

    /// Attach the reason reported alongside this state.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns true for the synthetic deleted state.
    pub fn is_deleted(&self) -> bool {
        self.code == DELETED
    }

    /// The status string.
    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// The reason reported alongside this state, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code.cmp(&other.code)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<State> for String {
    fn from(state: State) -> Self {
        state.code
    }
}

/// Reads the current state of a remote resource.
///
/// Implementations wrap whatever read API a resource kind needs, and decide
/// which of their errors mean "resource absent".
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// The error type returned by [`Fetcher::fetch`].
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the current state of the resource named by `identifier`.
    async fn fetch(&self, identifier: &str) -> Result<State, Self::Error>;

    /// Returns true if `err` means the resource does not exist.
    fn is_not_found(&self, err: &Self::Error) -> bool;
}

/// A remote identifier paired with the fetcher that observes it.
#[derive(Debug, Clone)]
pub struct ResourceHandle<F> {
    identifier: String,
    fetcher: F,
}

impl<F: Fetcher> ResourceHandle<F> {
    /// Create a handle for the resource named by `identifier`.
    pub fn new(identifier: impl Into<String>, fetcher: F) -> Self {
        Self {
            identifier: identifier.into(),
            fetcher,
        }
    }

    /// The remote identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch the current state once.
    pub async fn fetch(&self) -> Result<State, F::Error> {
        self.fetcher.fetch(&self.identifier).await
    }
}

/// How long to sleep between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same interval every time.
    Fixed(Duration),
    /// Starts at `initial` and doubles after each poll, capped at `max`.
    Exponential {
        /// First interval.
        initial: Duration,
        /// Interval ceiling.
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial: DEFAULT_INITIAL_INTERVAL,
            max: DEFAULT_MAX_INTERVAL,
        }
    }
}

impl Backoff {
    /// A fixed interval.
    pub fn fixed(interval: Duration) -> Self {
        Self::Fixed(interval)
    }

    /// An exponential interval between `initial` and `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Exponential { initial, max }
    }

    /// Interval to sleep after the poll numbered `attempt` (starting at 0).
    pub fn interval(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// The polling contract for one wait.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    /// Interval between polls.
    pub poll: Backoff,
    /// Absolute ceiling on time spent waiting.
    pub max_elapsed: Duration,
    /// States that end the wait successfully.
    pub acceptable: HashSet<State>,
    /// States that end the wait with [`WaitError::RemoteFailureState`].
    pub failure: HashSet<State>,
    /// Whether a not-found fetch confirms success with [`State::deleted`].
    pub absence_acceptable: bool,
    /// Not-found fetches tolerated before failing with [`WaitError::NotFound`].
    pub not_found_tolerance: u32,
    /// Consecutive acceptable observations required to succeed.
    pub required_consecutive: u32,
    /// Sleep before the first poll.
    pub initial_delay: Duration,
}

impl WaitSpec {
    /// Create a `WaitSpec` with the given time budget and default backoff.
    pub fn new(max_elapsed: Duration) -> Self {
        Self {
            poll: Backoff::default(),
            max_elapsed,
            acceptable: HashSet::new(),
            failure: HashSet::new(),
            absence_acceptable: false,
            not_found_tolerance: 0,
            required_consecutive: 1,
            initial_delay: Duration::ZERO,
        }
    }

    /// A `WaitSpec` that confirms a delete: success once the resource is absent.
    pub fn deleted(max_elapsed: Duration) -> Self {
        Self::new(max_elapsed).accept_absence()
    }

    /// Set the poll interval policy.
    pub fn with_poll(mut self, poll: Backoff) -> Self {
        self.poll = poll;
        self
    }

    /// Set the time budget.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Add acceptable states.
    pub fn accept<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<State>,
    {
        self.acceptable.extend(states.into_iter().map(Into::into));
        self
    }

    /// Add failure states.
    pub fn fail_on<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<State>,
    {
        self.failure.extend(states.into_iter().map(Into::into));
        self
    }

    /// Treat a not-found fetch as success.
    pub fn accept_absence(mut self) -> Self {
        self.absence_acceptable = true;
        self
    }

    /// Tolerate up to `count` not-found fetches, for resources not yet visible.
    pub fn tolerate_not_found(mut self, count: u32) -> Self {
        self.not_found_tolerance = count;
        self
    }

    /// Require `count` consecutive acceptable observations. Zero is treated as one.
    pub fn require_consecutive(mut self, count: u32) -> Self {
        self.required_consecutive = count.max(1);
        self
    }

    /// Sleep for `delay` before the first poll.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Outcome of classifying one poll.
enum Step {
    Done(State),
    Continue,
}

/// Poll `handle` until it reaches one of the target states in `spec`.
///
/// Returns the observed acceptable state (or [`State::deleted`] when absence
/// is acceptable).
///
/// # Arguments
///
/// * `handle` - The resource to observe
/// * `spec` - Target states, failure states, backoff and time budget
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_convergence::waiter::{wait, ResourceHandle, WaitSpec};
///
/// let handle = ResourceHandle::new(&workspace_id, fetcher);
/// let spec = WaitSpec::new(timeouts.create)
///     .accept(["ACTIVE"])
///     .fail_on(["CREATION_FAILED"]);
/// let state = wait(&handle, spec).await?;
/// ```
pub async fn wait<F: Fetcher>(handle: &ResourceHandle<F>, spec: WaitSpec) -> Result<State, WaitError> {
    wait_until(handle, spec, std::future::pending::<()>()).await
}

/// Like [`wait`], but returns [`WaitError::Cancelled`] as soon as `cancel`
/// resolves, even in the middle of a sleep or a fetch.
///
/// # Arguments
///
/// * `handle` - The resource to observe
/// * `spec` - Target states, failure states, backoff and time budget
/// * `cancel` - Any future; the wait stops when it completes
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_convergence::waiter::{wait_until, WaitSpec};
///
/// let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
/// let spec = WaitSpec::deleted(timeouts.delete);
/// let cancel = async {
///     let _ = stopped.await;
/// };
/// match wait_until(&handle, spec, cancel).await {
///     Err(err) if err.is_cancelled() => tracing::info!("Delete abandoned"),
///     other => other.map(|_| ())?,
/// }
/// ```
#[instrument(
    skip(handle, spec, cancel),
    name = "waiter.wait",
    fields(identifier = %handle.identifier(), max_elapsed = ?spec.max_elapsed)
)]
pub async fn wait_until<F, C>(
    handle: &ResourceHandle<F>,
    spec: WaitSpec,
    cancel: C,
) -> Result<State, WaitError>
where
    F: Fetcher,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    if !spec.initial_delay.is_zero() {
        tokio::select! {
            _ = &mut cancel => {
                info!("Wait cancelled");
                return Err(WaitError::Cancelled {
                    identifier: handle.identifier().to_string(),
                    last: None,
                });
            }
            _ = tokio::time::sleep(spec.initial_delay) => {}
        }
    }

    let mut poller = Poller::new(handle, &spec);
    let mut attempt: u32 = 0;
    loop {
        // A fetch that is ready at the deadline still counts.
        let result = tokio::select! {
            biased;
            _ = &mut cancel => return Err(poller.cancelled()),
            result = handle.fetch() => result,
            _ = tokio::time::sleep_until(poller.deadline) => return Err(poller.timed_out()),
        };

        if let Step::Done(state) = poller.observe(result)? {
            info!(state = %state, polls = attempt + 1, "Resource converged");
            return Ok(state);
        }

        let remaining = poller.remaining();
        if remaining.is_zero() {
            return Err(poller.timed_out());
        }

        let delay = spec.poll.interval(attempt).min(remaining);
        debug!(attempt = attempt, delay = ?delay, "Resource not yet converged, sleeping");
        tokio::select! {
            _ = &mut cancel => return Err(poller.cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Tracks the mutable side of one wait: timing, last state and counters.
struct Poller<'a, F> {
    handle: &'a ResourceHandle<F>,
    spec: &'a WaitSpec,
    started: Instant,
    deadline: Instant,
    last: Option<State>,
    not_found_seen: u32,
    consecutive: u32,
}

impl<'a, F: Fetcher> Poller<'a, F> {
    fn new(handle: &'a ResourceHandle<F>, spec: &'a WaitSpec) -> Self {
        let started = Instant::now();
        Self {
            handle,
            spec,
            started,
            deadline: started + spec.max_elapsed,
            last: None,
            not_found_seen: 0,
            consecutive: 0,
        }
    }

    fn observe(&mut self, result: Result<State, F::Error>) -> Result<Step, WaitError> {
        let state = match result {
            Ok(state) => state,
            Err(err) if self.handle.fetcher().is_not_found(&err) => return self.not_found(err),
            Err(err) => {
                warn!(error = %err, "Fetch failed");
                return Err(WaitError::Fetch {
                    identifier: self.identifier(),
                    source: Box::new(err),
                    last: self.last.take(),
                });
            }
        };

        debug!(state = %state, "Observed state");
        self.last = Some(state.clone());

        if self.spec.failure.contains(&state) {
            warn!(state = %state, "Resource reached failure state");
            return Err(WaitError::RemoteFailureState {
                identifier: self.identifier(),
                state,
            });
        }

        if self.spec.acceptable.contains(&state) {
            self.consecutive += 1;
            if self.consecutive >= self.spec.required_consecutive {
                return Ok(Step::Done(state));
            }
        } else {
            self.consecutive = 0;
        }
        Ok(Step::Continue)
    }

    fn not_found(&mut self, err: F::Error) -> Result<Step, WaitError> {
        self.consecutive = 0;
        if self.spec.absence_acceptable {
            return Ok(Step::Done(State::deleted()));
        }

        self.not_found_seen += 1;
        if self.not_found_seen > self.spec.not_found_tolerance {
            return Err(WaitError::NotFound {
                identifier: self.identifier(),
                source: Box::new(err) as BoxError,
            });
        }
        debug!(
            seen = self.not_found_seen,
            tolerance = self.spec.not_found_tolerance,
            "Resource not yet visible"
        );
        Ok(Step::Continue)
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn timed_out(&mut self) -> WaitError {
        let elapsed = self.started.elapsed();
        warn!(elapsed = ?elapsed, "Timed out waiting for resource");
        WaitError::Timeout {
            identifier: self.identifier(),
            elapsed,
            last: self.last.take(),
        }
    }

    fn cancelled(&mut self) -> WaitError {
        info!("Wait cancelled");
        WaitError::Cancelled {
            identifier: self.identifier(),
            last: self.last.take(),
        }
    }

    fn identifier(&self) -> String {
        self.handle.identifier().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeError, ScriptedFetcher};
    use tokio_test::{assert_err, assert_ok};

    fn create_spec() -> WaitSpec {
        WaitSpec::new(Duration::from_secs(60))
            .with_poll(Backoff::fixed(Duration::from_secs(1)))
            .accept(["ACTIVE"])
            .fail_on(["CREATION_FAILED"])
    }

    #[test]
    fn test_backoff_intervals() {
        let backoff = Backoff::default();
        assert_eq!(backoff.interval(0), Duration::from_millis(100));
        assert_eq!(backoff.interval(1), Duration::from_millis(200));
        assert_eq!(backoff.interval(3), Duration::from_millis(800));
        assert_eq!(backoff.interval(10), DEFAULT_MAX_INTERVAL);
        assert_eq!(backoff.interval(u32::MAX), DEFAULT_MAX_INTERVAL);

        let fixed = Backoff::fixed(Duration::from_secs(2));
        assert_eq!(fixed.interval(0), Duration::from_secs(2));
        assert_eq!(fixed.interval(7), Duration::from_secs(2));
    }

    #[test]
    fn test_state_helpers() {
        assert!(State::deleted().is_deleted());
        assert!(!State::new("ACTIVE").is_deleted());
        assert_eq!(State::from("ACTIVE").to_string(), "ACTIVE");
        assert_eq!(serde_json::to_string(&State::new("ACTIVE")).unwrap(), "\"ACTIVE\"");
    }

    #[test]
    fn test_wait_spec_builders() {
        let spec = WaitSpec::deleted(Duration::from_secs(5))
            .tolerate_not_found(3)
            .require_consecutive(0)
            .with_initial_delay(Duration::from_secs(1));
        assert!(spec.absence_acceptable);
        assert_eq!(spec.not_found_tolerance, 3);
        assert_eq!(spec.required_consecutive, 1);
        assert_eq!(spec.initial_delay, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acceptable_on_first_fetch() {
        let fetcher = ScriptedFetcher::new().then_state("ACTIVE");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let state = assert_ok!(wait(&handle, create_spec()).await);
        assert_eq!(state, State::new("ACTIVE"));
        assert_eq!(handle.fetcher().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_confirms_delete() {
        let fetcher = ScriptedFetcher::new().then_not_found();
        let handle = ResourceHandle::new("ws-1", fetcher);

        let spec = WaitSpec::deleted(Duration::from_secs(60));
        let state = assert_ok!(wait(&handle, spec).await);
        assert!(state.is_deleted());
        assert_eq!(handle.fetcher().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_through_pending_states() {
        let fetcher = ScriptedFetcher::new()
            .then_state("CREATING")
            .then_state("CREATING")
            .then_state("ACTIVE");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let started = Instant::now();
        let state = assert_ok!(wait(&handle, create_spec()).await);
        assert_eq!(state.as_str(), "ACTIVE");
        assert_eq!(handle.fetcher().calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state() {
        let fetcher = ScriptedFetcher::new()
            .then_state("CREATING")
            .then_state("CREATION_FAILED");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let err = assert_err!(wait(&handle, create_spec()).await);
        match &err {
            WaitError::RemoteFailureState { identifier, state } => {
                assert_eq!(identifier, "ws-1");
                assert_eq!(state.as_str(), "CREATION_FAILED");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.last_state().map(State::as_str), Some("CREATION_FAILED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_never_converging() {
        let fetcher = ScriptedFetcher::new().repeat_state("CREATING");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let spec = create_spec().with_max_elapsed(Duration::from_millis(3500));
        let started = Instant::now();
        let err = assert_err!(wait(&handle, spec).await);

        assert!(err.is_timeout());
        assert_eq!(err.last_state().map(State::as_str), Some("CREATING"));
        // Polls at 0s, 1s, 2s, 3s and a final one at the 3.5s deadline.
        assert_eq!(handle.fetcher().calls(), 5);
        assert_eq!(started.elapsed(), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_poll_at_deadline_can_succeed() {
        let fetcher = ScriptedFetcher::new()
            .then_state("CREATING")
            .then_state("ACTIVE");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let spec = create_spec()
            .with_poll(Backoff::fixed(Duration::from_secs(10)))
            .with_max_elapsed(Duration::from_secs(4));
        let state = assert_ok!(wait(&handle, spec).await);
        assert_eq!(state.as_str(), "ACTIVE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_propagates() {
        let fetcher = ScriptedFetcher::new()
            .then_state("CREATING")
            .then_error(FakeError::Service("throttled".to_string()));
        let handle = ResourceHandle::new("ws-1", fetcher);

        let err = assert_err!(wait(&handle, create_spec()).await);
        assert!(matches!(err, WaitError::Fetch { .. }));
        assert_eq!(err.last_state().map(State::as_str), Some("CREATING"));
        assert!(err.to_string().contains("ws-1"));
        assert!(err.to_string().contains("throttled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_fails_without_tolerance() {
        let fetcher = ScriptedFetcher::new().then_not_found();
        let handle = ResourceHandle::new("ws-1", fetcher);

        let err = assert_err!(wait(&handle, create_spec()).await);
        assert!(matches!(err, WaitError::NotFound { .. }));
        assert_eq!(handle.fetcher().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_tolerated_until_visible() {
        let fetcher = ScriptedFetcher::new()
            .then_not_found()
            .then_not_found()
            .then_state("ACTIVE");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let spec = create_spec().tolerate_not_found(2);
        let state = assert_ok!(wait(&handle, spec).await);
        assert_eq!(state.as_str(), "ACTIVE");
        assert_eq!(handle.fetcher().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_observations() {
        let fetcher = ScriptedFetcher::new()
            .then_state("ACTIVE")
            .then_state("UPDATING")
            .then_state("ACTIVE")
            .then_state("ACTIVE");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let spec = create_spec().require_consecutive(2);
        assert_ok!(wait(&handle, spec).await);
        assert_eq!(handle.fetcher().calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_sleep() {
        let fetcher = ScriptedFetcher::new().repeat_state("CREATING");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let spec = create_spec().with_poll(Backoff::fixed(Duration::from_secs(30)));
        let started = Instant::now();
        let cancel = tokio::time::sleep(Duration::from_secs(5));
        let err = assert_err!(wait_until(&handle, spec, cancel).await);

        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
        assert_eq!(err.last_state().map(State::as_str), Some("CREATING"));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(handle.fetcher().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_with_channel() {
        let fetcher = ScriptedFetcher::new().repeat_state("CREATING");
        let handle = ResourceHandle::new("ws-1", fetcher);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let wait_fut = wait_until(&handle, create_spec(), async {
            let _ = rx.await;
        });
        let cancel_fut = async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            let _ = tx.send(());
        };

        let (result, ()) = tokio::join!(wait_fut, cancel_fut);
        assert!(assert_err!(result).is_cancelled());
        assert_eq!(handle.fetcher().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay() {
        let fetcher = ScriptedFetcher::new().then_state("ACTIVE");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let started = Instant::now();
        let spec = create_spec().with_initial_delay(Duration::from_secs(3));
        assert_ok!(wait(&handle, spec).await);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_not_charged_to_budget() {
        let fetcher = ScriptedFetcher::new()
            .then_state("CREATING")
            .then_state("ACTIVE");
        let handle = ResourceHandle::new("ws-1", fetcher);

        let started = Instant::now();
        let spec = create_spec()
            .with_max_elapsed(Duration::from_secs(2))
            .with_initial_delay(Duration::from_secs(5));
        let state = assert_ok!(wait(&handle, spec).await);
        assert_eq!(state.as_str(), "ACTIVE");
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    /// Answers `ACTIVE`, but only after sleeping for `latency`.
    struct SlowFetcher {
        latency: Duration,
    }

    #[async_trait::async_trait]
    impl Fetcher for SlowFetcher {
        type Error = FakeError;

        async fn fetch(&self, _identifier: &str) -> Result<State, FakeError> {
            tokio::time::sleep(self.latency).await;
            Ok(State::new("ACTIVE"))
        }

        fn is_not_found(&self, err: &FakeError) -> bool {
            err.is_not_found()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_slow_fetch() {
        let handle = ResourceHandle::new(
            "ws-1",
            SlowFetcher {
                latency: Duration::from_secs(3600),
            },
        );

        let started = Instant::now();
        let spec = WaitSpec::new(Duration::from_secs(5)).accept(["ACTIVE"]);
        let err = assert_err!(wait(&handle, spec).await);

        assert!(err.is_timeout());
        assert_eq!(err.last_state(), None);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state_keeps_reason() {
        let fetcher = ScriptedFetcher::new()
            .then_state(State::new("CREATION_FAILED").with_reason("access denied"));
        let handle = ResourceHandle::new("ws-1", fetcher);

        let err = assert_err!(wait(&handle, create_spec()).await);
        assert_eq!(err.last_state().and_then(State::reason), Some("access denied"));
        assert!(err.to_string().ends_with("CREATION_FAILED: access denied"));
    }
}
