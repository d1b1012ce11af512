use std::error::Error;
use std::fmt::{self, Display};
use std::time::Duration;

use tokio::time::timeout;

use crate::backend::{Connector, Credentials, UnitOfWork};
use crate::config::ShardMapConfig;
use crate::error::ShardMapError;
use crate::map::ShardMap;
use crate::model::Mapping;
use crate::range::ShardKey;
use crate::retry::{Classify, ErrorClass, RetryError, RetryPolicy};
use crate::statistics::{incr, ShardMapStatistics};

/// Resolves keys to their owning shard and runs units of work against it.
///
/// Routing only reads the shard map, so a single router can be shared by any
/// number of concurrent callers. Each call opens its own connection per attempt.
pub struct ShardRouter<K, C> {
    map: ShardMap<K>,
    connector: C,
    credentials: Credentials,
    retry: RetryPolicy,
    command_timeout: Duration,
    statistics: ShardMapStatistics,
}

impl<K, C> ShardRouter<K, C>
where
    K: ShardKey,
    C: Connector,
{
    /// Creates a new router for the given map.
    pub fn new(
        map: ShardMap<K>,
        connector: C,
        config: &ShardMapConfig,
    ) -> Result<Self, ShardMapError> {
        config.validate()?;

        Ok(Self {
            map,
            connector,
            credentials: Credentials::default(),
            retry: config.retry_policy().clone(),
            command_timeout: config.command_timeout(),
            statistics: ShardMapStatistics::default(),
        })
    }

    /// Set the credentials handed to the connector when opening connections.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Record metrics into an existing set of statistics, such as the one used by an allocator.
    pub fn with_statistics(mut self, statistics: ShardMapStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    #[inline]
    pub fn map(&self) -> &ShardMap<K> {
        &self.map
    }

    #[inline]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    #[inline]
    pub fn statistics(&self) -> &ShardMapStatistics {
        &self.statistics
    }

    /// Gets the mapping whose range contains the given key.
    pub fn resolve(&self, key: &K) -> Result<Mapping<K>, ShardMapError> {
        self.map.get_mapping_for_key(key).ok_or_else(|| {
            incr(&self.statistics.num_keys_not_mapped);
            ShardMapError::KeyNotMapped {
                map: self.map.name().to_string(),
                key: format!("{key:?}"),
            }
        })
    }

    /// Resolves the key to its shard and runs the unit of work against it.
    ///
    /// Every attempt opens a new connection and runs the whole unit of work
    /// within the command timeout. Transient failures are retried as per the
    /// retry policy, permanent failures are returned straight away.
    pub async fn resolve_and_run<W>(
        &self,
        key: &K,
        work: &W,
    ) -> Result<W::Output, ShardMapError>
    where
        W: UnitOfWork<C>,
    {
        let mapping = self.resolve(key)?;
        incr(&self.statistics.num_requests_routed);

        let location = mapping.shard().location();
        trace!(
            map = %self.map.name(),
            key = ?key,
            location = %location,
            "Routing unit of work to shard."
        );

        let connector = &self.connector;
        let credentials = &self.credentials;
        let statistics = &self.statistics;
        let command_timeout = self.command_timeout;

        let result = self
            .retry
            .execute(move || async move {
                incr(&statistics.num_attempts);

                let mut conn = connector
                    .open(location, credentials)
                    .await
                    .map_err(AttemptError::Backend)?;

                match timeout(command_timeout, work.run(&mut conn)).await {
                    Ok(res) => res.map_err(AttemptError::Backend),
                    Err(_) => Err(AttemptError::TimedOut(command_timeout)),
                }
            })
            .await;

        result.map_err(|e: RetryError<AttemptError<C::Error>>| {
            match &e {
                RetryError::Exhausted { .. } => incr(&self.statistics.num_transient_failures),
                RetryError::Permanent { .. } => incr(&self.statistics.num_permanent_failures),
            }

            warn!(
                map = %self.map.name(),
                key = ?key,
                location = %location,
                attempts = e.attempts(),
                error = %e,
                "Failed to run unit of work against shard."
            );

            ShardMapError::from(e)
        })
    }
}

#[derive(Debug)]
/// The error produced by a single routed attempt.
pub enum AttemptError<E> {
    /// The connector or unit of work failed.
    Backend(E),
    /// The unit of work did not complete within the command timeout.
    TimedOut(Duration),
}

impl<E: Classify> Classify for AttemptError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Backend(e) => e.class(),
            Self::TimedOut(_) => ErrorClass::Transient,
        }
    }
}

impl<E: Display> Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => Display::fmt(e, f),
            Self::TimedOut(dur) => write!(f, "command timed out after {dur:?}"),
        }
    }
}

impl<E: Error + 'static> Error for AttemptError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            Self::TimedOut(_) => None,
        }
    }
}
