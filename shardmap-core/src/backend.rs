use std::convert::Infallible;
use std::error::Error;
use std::fmt::{self, Debug};
use std::path::Path;

use async_trait::async_trait;

use crate::model::{Mapping, Shard, ShardLocation};
use crate::range::ShardKey;
use crate::retry::Classify;

#[async_trait]
/// Creates and initialises the physical databases backing shards.
///
/// Errors returned by the provisioner are treated as permanent and are never retried.
pub trait Provisioner: Send + Sync + 'static {
    type Error: Error + Send + Sync + 'static;

    /// Returns if the database already exists on the server.
    async fn database_exists(&self, server: &str, database: &str) -> Result<bool, Self::Error>;

    /// Creates a new, empty database on the server.
    async fn create_database(&self, server: &str, database: &str) -> Result<(), Self::Error>;

    /// Runs the script at the given path against the database.
    ///
    /// Initialisation scripts are expected to fail when ran against a database
    /// which has already been initialised.
    async fn run_script(
        &self,
        server: &str,
        database: &str,
        script: &Path,
    ) -> Result<(), Self::Error>;
}

#[async_trait]
/// Opens connections to shard databases.
///
/// A connection is released when it is dropped, which happens at the end of
/// every attempt regardless of how the attempt ended.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send;
    type Error: Classify + Error + Send + Sync + 'static;

    async fn open(
        &self,
        location: &ShardLocation,
        credentials: &Credentials,
    ) -> Result<Self::Connection, Self::Error>;
}

#[async_trait]
/// A unit of work ran against a single shard connection.
///
/// Units of work may be ran several times if a transient error occurs, so
/// they should be idempotent, for example an update-else-insert keyed by id.
/// All inputs are owned by the unit itself so every attempt is identical.
pub trait UnitOfWork<C: Connector>: Send + Sync {
    type Output: Send;

    async fn run(&self, conn: &mut C::Connection) -> Result<Self::Output, C::Error>;
}

#[derive(Debug, Clone)]
/// The shards and mappings of a map as held by a [RegistryStore].
pub struct StoredMap<K> {
    pub shards: Vec<Shard>,
    pub mappings: Vec<Mapping<K>>,
}

impl<K> Default for StoredMap<K> {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            mappings: Vec::new(),
        }
    }
}

#[async_trait]
/// Durable storage for the contents of shard maps.
///
/// The in-memory [crate::ShardMap] remains the source of truth while the
/// process runs, the store lets a restarted process find the shards and
/// mappings created by earlier runs.
pub trait RegistryStore<K: ShardKey>: Send + Sync + 'static {
    type Error: Error + Send + Sync + 'static;

    /// Loads a map, returning `None` if it has never been stored.
    async fn load_map(&self, name: &str) -> Result<Option<StoredMap<K>>, Self::Error>;

    /// Records a new, empty map.
    async fn put_map(&self, name: &str) -> Result<(), Self::Error>;

    /// Records a shard of the map, doing nothing if it is already stored.
    async fn put_shard(&self, map: &str, shard: &Shard) -> Result<(), Self::Error>;

    /// Records a new mapping of the map.
    async fn put_mapping(&self, map: &str, mapping: &Mapping<K>) -> Result<(), Self::Error>;
}

#[derive(Debug, Copy, Clone, Default)]
/// A [RegistryStore] which stores nothing, maps only live as long as the process.
pub struct MemoryOnly;

#[async_trait]
impl<K: ShardKey> RegistryStore<K> for MemoryOnly {
    type Error = Infallible;

    async fn load_map(&self, _name: &str) -> Result<Option<StoredMap<K>>, Self::Error> {
        Ok(None)
    }

    async fn put_map(&self, _name: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn put_shard(&self, _map: &str, _shard: &Shard) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn put_mapping(&self, _map: &str, _mapping: &Mapping<K>) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Clone, Default)]
/// The credentials handed to a [Connector] when opening a connection.
pub struct Credentials {
    user_id: String,
    password: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }

    #[inline]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[inline]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .finish()
    }
}
