use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ShardMapError;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_MULTIPLIER: u32 = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The failure class of an error.
pub enum ErrorClass {
    /// Timeouts, connection resets, throttling. Expected to resolve on retry.
    Transient,
    /// Constraint violations, auth failures, malformed requests.
    Permanent,
}

/// Classifies an error as either transient or permanent.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    #[inline]
    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[derive(Debug, Clone)]
/// Retries transient failures with a capped exponential backoff.
///
/// Each attempt re-runs the whole operation, so operations must be
/// safe to execute more than once.
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: u32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy allowing up to `max_attempts` attempts in total.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the backoff used after the first failure and the cap it grows to.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Set the factor the backoff grows by after each failed attempt.
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable full jitter, picking a random delay between zero and the backoff.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The delay (before jitter) after the given failed attempt, starting at `1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter {
            rand::thread_rng().gen_range(Duration::ZERO..=backoff)
        } else {
            backoff
        }
    }

    /// Runs the operation until it succeeds, fails permanently or runs out of attempts.
    ///
    /// The operation is called once per attempt. It should be a pure function of the
    /// values it captures so every attempt is equivalent.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match error.class() {
                ErrorClass::Permanent => {
                    return Err(RetryError::Permanent {
                        attempts: attempt,
                        error,
                    })
                },
                ErrorClass::Transient if attempt >= max_attempts => {
                    warn!(
                        attempts = attempt,
                        error = %error,
                        "Giving up on operation after exhausting all attempts."
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error,
                    });
                },
                ErrorClass::Transient => {
                    let delay = self.delay(attempt);
                    debug!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay = ?delay,
                        error = %error,
                        "Operation failed with a transient error, retrying."
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }
}

#[derive(Debug)]
/// The last error observed by [RetryPolicy::execute].
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, error: E },
    /// An attempt failed with a permanent error.
    Permanent { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// The number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Permanent { attempts, .. } => *attempts,
        }
    }

    /// Consumes the wrapper returning the last error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { error, .. } => error,
            Self::Permanent { error, .. } => error,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, error } => {
                write!(f, "gave up after {attempts} attempt(s): {error}")
            },
            Self::Permanent { error, .. } => write!(f, "permanent failure: {error}"),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Exhausted { error, .. } => Some(error),
            Self::Permanent { error, .. } => Some(error),
        }
    }
}

impl<E> From<RetryError<E>> for ShardMapError
where
    E: Error + Send + Sync + 'static,
{
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Exhausted { attempts, error } => Self::TransientFailure {
                attempts,
                error: anyhow::Error::new(error),
            },
            RetryError::Permanent { error, .. } => {
                Self::PermanentFailure(anyhow::Error::new(error))
            },
        }
    }
}
