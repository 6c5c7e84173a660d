//! Wait-time strategies between attempts.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::http::Response;

/// Source of uniformly distributed numbers in `[0, 1)`.
pub type RandomSource = Arc<dyn Fn() -> f64 + Send + Sync>;

fn default_random_source() -> RandomSource {
    Arc::new(rand::random::<f64>)
}

/// Converts seconds to a `Duration`, mapping negative or NaN values to zero and
/// overflowing values to `Duration::MAX`.
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// `start_timeout * factor^attempt`, capped at `max_timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub start_timeout: Duration,
    pub max_timeout: Duration,
    pub factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(start_timeout: Duration, max_timeout: Duration, factor: f64) -> Self {
        Self {
            start_timeout,
            max_timeout,
            factor,
        }
    }

    /// Wait after the zero-based `attempt`.
    pub fn timeout(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.start_timeout.as_secs_f64() * self.factor.powi(exponent);
        // 0 * inf
        if raw.is_nan() {
            return Duration::ZERO;
        }
        let capped = raw.min(self.max_timeout.as_secs_f64());
        secs(capped)
    }
}

/// Uniformly random wait in `[min_timeout, max_timeout)`.
#[derive(Clone)]
pub struct RandomBackoff {
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    random: RandomSource,
}

impl Default for RandomBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(3))
    }
}

impl fmt::Debug for RandomBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomBackoff")
            .field("min_timeout", &self.min_timeout)
            .field("max_timeout", &self.max_timeout)
            .finish_non_exhaustive()
    }
}

impl RandomBackoff {
    /// Waits drawn uniformly from `min_timeout..=max_timeout`.
    pub fn new(min_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            min_timeout,
            max_timeout,
            random: default_random_source(),
        }
    }

    /// Replaces the random number generator, mostly for deterministic tests.
    pub fn with_random_source(mut self, random: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.random = Arc::new(random);
        self
    }

    pub fn timeout(&self) -> Duration {
        let min = self.min_timeout.as_secs_f64();
        let max = self.max_timeout.as_secs_f64();
        secs(min + (self.random)() * (max - min))
    }
}

/// Explicit list of waits; the number of attempts equals the list length.
#[derive(Debug, Clone, PartialEq)]
pub struct ListBackoff {
    timeouts: Vec<Duration>,
}

impl ListBackoff {
    /// Fails when `timeouts` is empty.
    pub fn new(timeouts: Vec<Duration>) -> Result<Self> {
        if timeouts.is_empty() {
            return Err(Error::invalid_argument(
                "list backoff needs at least one timeout",
            ));
        }
        Ok(Self { timeouts })
    }

    /// Builds the list from seconds.
    pub fn from_secs_f64(timeouts: &[f64]) -> Result<Self> {
        Self::new(timeouts.iter().copied().map(secs).collect())
    }

    pub fn timeouts(&self) -> &[Duration] {
        &self.timeouts
    }

    /// Number of waits, which is also the attempt budget.
    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }

    /// Fails with [`Error::AttemptOutOfRange`] past the end of the list.
    pub fn timeout(&self, attempt: u32) -> Result<Duration> {
        usize::try_from(attempt)
            .ok()
            .and_then(|index| self.timeouts.get(index))
            .copied()
            .ok_or(Error::AttemptOutOfRange {
                attempt,
                len: self.timeouts.len(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FibonacciState {
    prev: f64,
    current: f64,
}

impl Default for FibonacciState {
    fn default() -> Self {
        Self {
            prev: 1.0,
            current: 1.0,
        }
    }
}

/// `multiplier * fib(n)`, capped at `max_timeout`.
///
/// Every call to [`timeout`](Self::timeout) advances the sequence by one step,
/// whatever attempt index is passed. Sharing one instance between concurrent
/// requests interleaves their sequences; give each request its own policy if
/// that matters.
#[derive(Debug)]
pub struct FibonacciBackoff {
    pub multiplier: f64,
    pub max_timeout: Duration,
    state: Mutex<FibonacciState>,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(1.0, Duration::from_secs(3))
    }
}

impl Clone for FibonacciBackoff {
    fn clone(&self) -> Self {
        Self {
            multiplier: self.multiplier,
            max_timeout: self.max_timeout,
            state: Mutex::new(*self.lock_state()),
        }
    }
}

impl FibonacciBackoff {
    pub fn new(multiplier: f64, max_timeout: Duration) -> Self {
        Self {
            multiplier,
            max_timeout,
            state: Mutex::new(FibonacciState::default()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FibonacciState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restarts the sequence from its first step.
    pub fn reset(&self) {
        *self.lock_state() = FibonacciState::default();
    }

    /// Next wait in the sequence. The state advances on every call.
    pub fn timeout(&self) -> Duration {
        let next = {
            let mut state = self.lock_state();
            let next = state.prev + state.current;
            state.prev = state.current;
            state.current = next;
            next
        };
        secs((self.multiplier * next).min(self.max_timeout.as_secs_f64()))
    }
}

/// Exponential backoff plus `uniform(0, random_interval_size)^factor` seconds.
#[derive(Clone)]
pub struct JitterBackoff {
    pub exponential: ExponentialBackoff,
    pub random_interval_size: f64,
    random: RandomSource,
}

impl Default for JitterBackoff {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default(), 2.0)
    }
}

impl fmt::Debug for JitterBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitterBackoff")
            .field("exponential", &self.exponential)
            .field("random_interval_size", &self.random_interval_size)
            .finish_non_exhaustive()
    }
}

impl JitterBackoff {
    /// `random_interval_size` scales the jitter added on top of `exponential`.
    pub fn new(exponential: ExponentialBackoff, random_interval_size: f64) -> Self {
        Self {
            exponential,
            random_interval_size,
            random: default_random_source(),
        }
    }

    /// Replaces the random source. Values should lie in `0.0..1.0`.
    pub fn with_random_source(mut self, random: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.random = Arc::new(random);
        self
    }

    pub fn timeout(&self, attempt: u32) -> Duration {
        let base = self.exponential.timeout(attempt).as_secs_f64();
        let noise = ((self.random)() * self.random_interval_size).powf(self.exponential.factor);
        secs(base + noise)
    }
}

/// A caller-defined wait strategy.
///
/// Closures with the same signature implement it, so a policy that honours
/// `Retry-After` fits in a few lines:
///
/// ```
/// use http_retry::{Backoff, Response, Result, RetryOptions};
/// use std::time::Duration;
///
/// let backoff = Backoff::custom(|attempt: u32, response: Option<&Response>| -> Result<Duration> {
///     let retry_after = response
///         .and_then(|r| r.headers().get("retry-after"))
///         .and_then(|v| v.to_str().ok())
///         .and_then(|v| v.parse::<u64>().ok());
///     Ok(match retry_after {
///         Some(secs) => Duration::from_secs(secs),
///         None => Duration::from_millis(100 * u64::from(attempt + 1)),
///     })
/// });
/// let options = RetryOptions::new(backoff);
/// assert_eq!(options.get_timeout(0, None).unwrap(), Duration::from_millis(100));
/// ```
pub trait BackoffStrategy: Send + Sync {
    /// Wait before the next attempt. `attempt` is zero-based; `response` is
    /// the response being retried, or `None` when the attempt failed with an
    /// error.
    fn timeout(&self, attempt: u32, response: Option<&Response>) -> Result<Duration>;
}

impl<F> BackoffStrategy for F
where
    F: Fn(u32, Option<&Response>) -> Result<Duration> + Send + Sync,
{
    fn timeout(&self, attempt: u32, response: Option<&Response>) -> Result<Duration> {
        self(attempt, response)
    }
}

/// The wait strategy of a retry policy.
#[derive(Clone)]
pub enum Backoff {
    Exponential(ExponentialBackoff),
    Random(RandomBackoff),
    List(ListBackoff),
    Fibonacci(FibonacciBackoff),
    Jitter(JitterBackoff),
    Custom(Arc<dyn BackoffStrategy>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Exponential(b) => f.debug_tuple("Exponential").field(b).finish(),
            Backoff::Random(b) => f.debug_tuple("Random").field(b).finish(),
            Backoff::List(b) => f.debug_tuple("List").field(b).finish(),
            Backoff::Fibonacci(b) => f.debug_tuple("Fibonacci").field(b).finish(),
            Backoff::Jitter(b) => f.debug_tuple("Jitter").field(b).finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential(ExponentialBackoff::default())
    }
}

impl Backoff {
    /// Wraps a caller-defined strategy.
    pub fn custom(strategy: impl BackoffStrategy + 'static) -> Self {
        Backoff::Custom(Arc::new(strategy))
    }

    /// Wait before the next attempt. `attempt` is zero-based: the first retry
    /// asks for attempt 0. Only custom strategies look at `response`.
    pub fn timeout(&self, attempt: u32, response: Option<&Response>) -> Result<Duration> {
        Ok(match self {
            Backoff::Exponential(b) => b.timeout(attempt),
            Backoff::Random(b) => b.timeout(),
            Backoff::List(b) => return b.timeout(attempt),
            Backoff::Fibonacci(b) => b.timeout(),
            Backoff::Jitter(b) => b.timeout(attempt),
            Backoff::Custom(b) => return b.timeout(attempt, response),
        })
    }

    /// Attempt count implied by the strategy itself, if any.
    pub(crate) fn implied_attempts(&self) -> Option<u32> {
        match self {
            Backoff::List(b) => Some(u32::try_from(b.len()).unwrap_or(u32::MAX)),
            _ => None,
        }
    }

    /// Short lowercase name, as used in config files.
    pub fn name(&self) -> &'static str {
        match self {
            Backoff::Exponential(_) => "exponential",
            Backoff::Random(_) => "random",
            Backoff::List(_) => "list",
            Backoff::Fibonacci(_) => "fibonacci",
            Backoff::Jitter(_) => "jitter",
            Backoff::Custom(_) => "custom",
        }
    }
}

impl From<ExponentialBackoff> for Backoff {
    fn from(b: ExponentialBackoff) -> Self {
        Backoff::Exponential(b)
    }
}

impl From<RandomBackoff> for Backoff {
    fn from(b: RandomBackoff) -> Self {
        Backoff::Random(b)
    }
}

impl From<ListBackoff> for Backoff {
    fn from(b: ListBackoff) -> Self {
        Backoff::List(b)
    }
}

impl From<FibonacciBackoff> for Backoff {
    fn from(b: FibonacciBackoff) -> Self {
        Backoff::Fibonacci(b)
    }
}

impl From<JitterBackoff> for Backoff {
    fn from(b: JitterBackoff) -> Self {
        Backoff::Jitter(b)
    }
}

impl From<Arc<dyn BackoffStrategy>> for Backoff {
    fn from(b: Arc<dyn BackoffStrategy>) -> Self {
        Backoff::Custom(b)
    }
}
