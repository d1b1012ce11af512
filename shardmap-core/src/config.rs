use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub static DEFAULT_SERVER_NAME: &str = "localhost";
pub static DEFAULT_MAP_NAME: &str = "CustomerIDShardMap";
pub static DEFAULT_INIT_SCRIPT: &str = "InitializeShard.sql";
pub static DEFAULT_SHARD_NAME_FORMAT: &str = "ElasticScaleStarterKit_Shard{}";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const PLACEHOLDER: &str = "{}";

#[derive(Debug, Clone)]
/// Settings shared by the shard allocator and router.
pub struct ShardMapConfig {
    server_name: String,
    map_name: String,
    init_script_path: PathBuf,
    shard_name_format: String,
    command_timeout: Duration,
    retry: RetryPolicy,
}

impl Default for ShardMapConfig {
    fn default() -> Self {
        Self {
            server_name: DEFAULT_SERVER_NAME.to_string(),
            map_name: DEFAULT_MAP_NAME.to_string(),
            init_script_path: PathBuf::from(DEFAULT_INIT_SCRIPT),
            shard_name_format: DEFAULT_SHARD_NAME_FORMAT.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ShardMapConfig {
    /// Set the server which new shard databases are provisioned on.
    pub fn with_server_name(mut self, server: impl Into<String>) -> Self {
        self.server_name = server.into();
        self
    }

    /// Set the name of the shard map.
    pub fn with_map_name(mut self, name: impl Into<String>) -> Self {
        self.map_name = name.into();
        self
    }

    /// Set the script ran against every newly provisioned shard database.
    pub fn with_init_script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.init_script_path = path.into();
        self
    }

    /// Set the format of generated shard database names.
    ///
    /// The `{}` placeholder is replaced with the number of shards already in the map.
    pub fn with_shard_name_format(mut self, format: impl Into<String>) -> Self {
        self.shard_name_format = format.into();
        self
    }

    /// Set the timeout applied to each attempt of a routed unit of work.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry policy used for routed units of work.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_name_format.matches(PLACEHOLDER).count() != 1 {
            return Err(ConfigError::BadShardNameFormat(
                self.shard_name_format.clone(),
            ));
        }

        if self.command_timeout.is_zero() {
            return Err(ConfigError::ZeroCommandTimeout);
        }

        if self.retry.max_attempts() == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        Ok(())
    }

    #[inline]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    #[inline]
    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    #[inline]
    pub fn init_script_path(&self) -> &Path {
        &self.init_script_path
    }

    #[inline]
    pub fn shard_name_format(&self) -> &str {
        &self.shard_name_format
    }

    #[inline]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    #[inline]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The database name for the shard with the given ordinal.
    pub fn shard_database_name(&self, ordinal: usize) -> String {
        self.shard_name_format
            .replacen(PLACEHOLDER, &ordinal.to_string(), 1)
    }
}
