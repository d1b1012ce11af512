//! In-memory collaborators for testing code built on top of the shard map.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::backend::{Connector, Credentials, Provisioner, RegistryStore, StoredMap, UnitOfWork};
use crate::model::{Mapping, Shard, ShardLocation};
use crate::range::ShardKey;
use crate::retry::{Classify, ErrorClass};

type DatabaseKey = (String, String);

#[derive(Debug, thiserror::Error)]
pub enum MemProvisionerError {
    #[error("Database {0} does not exist")]
    MissingDatabase(String),

    #[error("Database {0} already exists")]
    AlreadyExists(String),

    #[error("Database {0} has already been initialised")]
    AlreadyInitialised(String),
}

#[derive(Clone, Default)]
/// A [Provisioner] which tracks databases in memory.
///
/// Like a real initialisation script, running the script twice against
/// the same database fails.
pub struct MemProvisioner {
    /// Database -> if the initialisation script has been ran.
    databases: Arc<RwLock<BTreeMap<DatabaseKey, bool>>>,
}

impl MemProvisioner {
    /// Adds a database which exists before any allocation happens.
    pub fn with_database(self, server: &str, database: &str, initialised: bool) -> Self {
        self.databases
            .write()
            .insert((server.to_string(), database.to_string()), initialised);
        self
    }

    /// The number of databases which exist.
    pub fn num_databases(&self) -> usize {
        self.databases.read().len()
    }

    /// The names of all databases which exist on the given server.
    pub fn database_names(&self, server: &str) -> Vec<String> {
        self.databases
            .read()
            .keys()
            .filter(|(s, _)| s == server)
            .map(|(_, db)| db.clone())
            .collect()
    }

    /// Returns if the database exists and has been initialised.
    pub fn is_initialised(&self, server: &str, database: &str) -> bool {
        self.databases
            .read()
            .get(&(server.to_string(), database.to_string()))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provisioner for MemProvisioner {
    type Error = MemProvisionerError;

    async fn database_exists(&self, server: &str, database: &str) -> Result<bool, Self::Error> {
        Ok(self
            .databases
            .read()
            .contains_key(&(server.to_string(), database.to_string())))
    }

    async fn create_database(&self, server: &str, database: &str) -> Result<(), Self::Error> {
        let mut lock = self.databases.write();
        let key = (server.to_string(), database.to_string());
        if lock.contains_key(&key) {
            return Err(MemProvisionerError::AlreadyExists(database.to_string()));
        }
        lock.insert(key, false);
        Ok(())
    }

    async fn run_script(
        &self,
        server: &str,
        database: &str,
        _script: &Path,
    ) -> Result<(), Self::Error> {
        let mut lock = self.databases.write();
        match lock.get_mut(&(server.to_string(), database.to_string())) {
            None => Err(MemProvisionerError::MissingDatabase(database.to_string())),
            Some(true) => Err(MemProvisionerError::AlreadyInitialised(database.to_string())),
            Some(initialised) => {
                *initialised = true;
                Ok(())
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("The registry store is unavailable")]
pub struct MemRegistryError;

/// A [RegistryStore] holding stored maps in memory, shared between clones.
///
/// Writes can be made to fail in order to test partially persisted allocations.
pub struct MemRegistry<K> {
    maps: Arc<RwLock<BTreeMap<String, StoredMap<K>>>>,
    fail_writes: Arc<AtomicBool>,
    fail_mapping_writes: Arc<AtomicBool>,
}

impl<K> Clone for MemRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            maps: self.maps.clone(),
            fail_writes: self.fail_writes.clone(),
            fail_mapping_writes: self.fail_mapping_writes.clone(),
        }
    }
}

impl<K> Default for MemRegistry<K> {
    fn default() -> Self {
        Self {
            maps: Default::default(),
            fail_writes: Default::default(),
            fail_mapping_writes: Default::default(),
        }
    }
}

impl<K: ShardKey> MemRegistry<K> {
    /// Fail every write while set.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only writes of mappings while set.
    pub fn fail_mapping_writes(&self, fail: bool) {
        self.fail_mapping_writes.store(fail, Ordering::SeqCst);
    }

    /// A snapshot of the stored map.
    pub fn stored(&self, name: &str) -> Option<StoredMap<K>> {
        self.maps.read().get(name).cloned()
    }

    fn check_writable(&self) -> Result<(), MemRegistryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MemRegistryError);
        }
        Ok(())
    }
}

#[async_trait]
impl<K: ShardKey> RegistryStore<K> for MemRegistry<K> {
    type Error = MemRegistryError;

    async fn load_map(&self, name: &str) -> Result<Option<StoredMap<K>>, Self::Error> {
        Ok(self.stored(name))
    }

    async fn put_map(&self, name: &str) -> Result<(), Self::Error> {
        self.check_writable()?;
        self.maps.write().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn put_shard(&self, map: &str, shard: &Shard) -> Result<(), Self::Error> {
        self.check_writable()?;
        let mut lock = self.maps.write();
        let stored = lock.entry(map.to_string()).or_default();
        if !stored.shards.iter().any(|s| s.id() == shard.id()) {
            stored.shards.push(shard.clone());
        }
        Ok(())
    }

    async fn put_mapping(&self, map: &str, mapping: &Mapping<K>) -> Result<(), Self::Error> {
        self.check_writable()?;
        if self.fail_mapping_writes.load(Ordering::SeqCst) {
            return Err(MemRegistryError);
        }
        self.maps
            .write()
            .entry(map.to_string())
            .or_default()
            .mappings
            .push(mapping.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MemError {
    #[error("Connection timed out")]
    Timeout,

    #[error("Connection reset by peer")]
    ConnectionReset,

    #[error("Request was throttled")]
    Throttled,

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Login failed")]
    AuthFailed,
}

impl Classify for MemError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout | Self::ConnectionReset | Self::Throttled => ErrorClass::Transient,
            Self::ConstraintViolation(_) | Self::AuthFailed => ErrorClass::Permanent,
        }
    }
}

type Rows = Arc<RwLock<BTreeMap<i64, String>>>;

#[derive(Clone, Default)]
/// A [Connector] backed by an in-memory table of rows per shard location.
///
/// Faults can be injected which are returned when opening connections.
pub struct MemConnector {
    shards: Arc<RwLock<HashMap<ShardLocation, Rows>>>,
    faults: Arc<Mutex<VecDeque<MemError>>>,
    persistent_fault: Arc<Mutex<Option<MemError>>>,
    num_opens: Arc<AtomicUsize>,
}

impl MemConnector {
    /// Fail the next `times` attempts to open a connection with the given error.
    pub fn inject_faults(&self, error: MemError, times: usize) {
        let mut lock = self.faults.lock();
        lock.extend(std::iter::repeat(error).take(times));
    }

    /// Fail every attempt to open a connection with the given error.
    pub fn fail_always(&self, error: MemError) {
        *self.persistent_fault.lock() = Some(error);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
        *self.persistent_fault.lock() = None;
    }

    /// The number of times a connection has been opened, including failed attempts.
    pub fn num_opens(&self) -> usize {
        self.num_opens.load(Ordering::SeqCst)
    }

    /// A snapshot of the rows stored in the given shard.
    pub fn rows(&self, location: &ShardLocation) -> BTreeMap<i64, String> {
        self.shards
            .read()
            .get(location)
            .map(|rows| rows.read().clone())
            .unwrap_or_default()
    }

    fn next_fault(&self) -> Option<MemError> {
        if let Some(fault) = self.faults.lock().pop_front() {
            return Some(fault);
        }
        self.persistent_fault.lock().clone()
    }
}

#[async_trait]
impl Connector for MemConnector {
    type Connection = MemConnection;
    type Error = MemError;

    async fn open(
        &self,
        location: &ShardLocation,
        _credentials: &Credentials,
    ) -> Result<Self::Connection, Self::Error> {
        self.num_opens.fetch_add(1, Ordering::SeqCst);

        if let Some(fault) = self.next_fault() {
            return Err(fault);
        }

        let rows = self
            .shards
            .write()
            .entry(location.clone())
            .or_default()
            .clone();

        Ok(MemConnection {
            location: location.clone(),
            rows,
        })
    }
}

/// An open connection to an in-memory shard.
pub struct MemConnection {
    location: ShardLocation,
    rows: Rows,
}

impl MemConnection {
    #[inline]
    pub fn location(&self) -> &ShardLocation {
        &self.location
    }

    /// Inserts the row or updates it if it already exists.
    pub fn upsert(&mut self, key: i64, value: &str) {
        self.rows.write().insert(key, value.to_string());
    }

    /// Inserts a new row, failing if the key already exists.
    pub fn insert(&mut self, key: i64, value: &str) -> Result<(), MemError> {
        let mut lock = self.rows.write();
        if lock.contains_key(&key) {
            return Err(MemError::ConstraintViolation(format!(
                "duplicate key {key}"
            )));
        }
        lock.insert(key, value.to_string());
        Ok(())
    }

    pub fn get(&self, key: i64) -> Option<String> {
        self.rows.read().get(&key).cloned()
    }
}

/// Updates the row for the key, or inserts it if it does not exist.
pub struct Upsert {
    key: i64,
    value: String,
}

impl Upsert {
    pub fn new(key: i64, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

#[async_trait]
impl UnitOfWork<MemConnector> for Upsert {
    type Output = ();

    async fn run(&self, conn: &mut MemConnection) -> Result<(), MemError> {
        conn.upsert(self.key, &self.value);
        Ok(())
    }
}

/// Inserts a new row, failing with a constraint violation if it exists.
pub struct Insert {
    key: i64,
    value: String,
}

impl Insert {
    pub fn new(key: i64, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

#[async_trait]
impl UnitOfWork<MemConnector> for Insert {
    type Output = ();

    async fn run(&self, conn: &mut MemConnection) -> Result<(), MemError> {
        conn.insert(self.key, &self.value)
    }
}

/// Reads the row for the key.
pub struct Get {
    key: i64,
}

impl Get {
    pub fn new(key: i64) -> Self {
        Self { key }
    }
}

#[async_trait]
impl UnitOfWork<MemConnector> for Get {
    type Output = Option<String>;

    async fn run(&self, conn: &mut MemConnection) -> Result<Option<String>, MemError> {
        Ok(conn.get(self.key))
    }
}

/// Returns the location of the shard the connection was opened against.
pub struct Locate;

#[async_trait]
impl UnitOfWork<MemConnector> for Locate {
    type Output = ShardLocation;

    async fn run(&self, conn: &mut MemConnection) -> Result<ShardLocation, MemError> {
        Ok(conn.location().clone())
    }
}
