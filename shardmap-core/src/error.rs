use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShardMapError {
    #[error("Invalid range [{low}, {high}): the lower bound must be less than the upper bound")]
    /// A range was constructed with `low >= high`.
    InvalidRange { low: String, high: String },

    #[error("Range {requested} overlaps the existing mapping {existing} in shard map {map}")]
    /// The requested mapping overlaps an existing mapping.
    ///
    /// Existing mappings are never merged or replaced.
    RangeConflict {
        map: String,
        requested: String,
        existing: String,
    },

    #[error("Shard {location} has not been added to shard map {map}")]
    /// A mapping was requested against a shard the map does not know about.
    ShardNotRegistered { map: String, location: String },

    #[error("Key {key} is not covered by any mapping in shard map {map}")]
    /// The key falls outside of every registered range.
    ///
    /// This is never retried, the caller decides if a new range should be allocated.
    KeyNotMapped { map: String, key: String },

    #[error("Operation failed after {attempts} attempt(s) due to a transient error: {error}")]
    /// A transient error was observed on every attempt until the retry policy gave up.
    TransientFailure { attempts: u32, error: anyhow::Error },

    #[error("Operation failed due to a permanent error: {0}")]
    /// An error which retrying cannot fix. It is surfaced after the first attempt.
    PermanentFailure(anyhow::Error),

    #[error("Failed to provision shard database {database}: {error}")]
    /// The provisioner failed to create or initialise a database.
    ///
    /// Provisioning errors are permanent and are never retried.
    Provisioning {
        database: String,
        error: anyhow::Error,
    },

    #[error("Failed to read or write shard map {map} in the registry store: {error}")]
    /// The registry store failed to load or persist the map.
    ///
    /// Store errors are permanent and are never retried.
    Registry { map: String, error: anyhow::Error },

    #[error("Shard map {name} already exists with a key type of {existing}")]
    /// A shard map was requested with a different key type than it was created with.
    MapTypeMismatch { name: String, existing: &'static str },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ShardMapError {
    /// Returns if the error was caused by a transient failure which was retried
    /// until the retry policy gave up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFailure { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("The shard name format {0:?} must contain exactly one `{{}}` placeholder")]
    BadShardNameFormat(String),

    #[error("The command timeout must be greater than zero")]
    ZeroCommandTimeout,

    #[error("The retry policy must allow at least one attempt")]
    ZeroAttempts,
}
