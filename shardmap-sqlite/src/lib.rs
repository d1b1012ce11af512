//! SQLite backed collaborators for `shardmap-core`.
//!
//! Every shard is a SQLite file on disk, provisioned by [SqliteProvisioner]
//! and opened by [SqliteConnector]. Shard maps are persisted by [SqliteRegistry]
//! in a manager database next to the shards. The crate also carries the customer
//! schema used by the starter kit and units of work operating on it.

#[macro_use]
extern crate tracing;

mod connector;
mod db;
mod error;
mod provisioner;
mod registry;
mod work;

use std::io;
use std::path::{Path, PathBuf};

pub use connector::{ShardConnection, SqliteConnector};
pub use db::{DatabaseHandle, FromRow};
pub use error::SqliteShardError;
pub use provisioner::SqliteProvisioner;
pub use registry::{SqlKey, SqliteRegistry, MANAGER_DATABASE_NAME};
pub use work::{CountOrders, Customer, GetCustomer, InsertOrder, UpsertCustomer};

/// The script creating the customer schema in a new shard.
pub static INITIALIZE_SHARD_SCRIPT: &str = include_str!("../sql/initialize_shard.sql");

/// The file name [write_init_script] writes the script to.
pub static INITIALIZE_SHARD_FILE: &str = "InitializeShard.sql";

/// Writes [INITIALIZE_SHARD_SCRIPT] into the given directory, returning its path.
pub fn write_init_script(dir: impl AsRef<Path>) -> io::Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let path = dir.join(INITIALIZE_SHARD_FILE);
    std::fs::write(&path, INITIALIZE_SHARD_SCRIPT)?;

    Ok(path)
}

pub(crate) fn database_path(root: &Path, server: &str, database: &str) -> PathBuf {
    root.join(server).join(format!("{database}.db"))
}

pub(crate) async fn path_exists(path: PathBuf) -> io::Result<bool> {
    spawn_blocking(move || Ok(path.exists())).await
}

pub(crate) async fn create_dir_all(path: PathBuf) -> io::Result<()> {
    spawn_blocking(move || std::fs::create_dir_all(path)).await
}

/// Runs blocking filesystem IO off the async runtime.
pub(crate) async fn spawn_blocking<T, F>(func: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(func)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
