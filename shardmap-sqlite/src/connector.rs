use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shardmap_core::{Connector, Credentials, ShardLocation};

use crate::db::DatabaseHandle;
use crate::error::SqliteShardError;

/// A [Connector] opening the SQLite file backing a shard.
///
/// SQLite has no notion of users so the credentials are ignored.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    root: PathBuf,
}

impl SqliteConnector {
    /// Creates a new connector reading databases from the given directory.
    ///
    /// This should be the same directory the [crate::SqliteProvisioner] uses.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Connection = ShardConnection;
    type Error = SqliteShardError;

    async fn open(
        &self,
        location: &ShardLocation,
        _credentials: &Credentials,
    ) -> Result<Self::Connection, Self::Error> {
        let path = crate::database_path(&self.root, location.server(), location.database());
        if !crate::path_exists(path.clone()).await? {
            return Err(SqliteShardError::MissingDatabase(location.to_string()));
        }

        let handle = DatabaseHandle::open_existing(&path).await?;

        Ok(ShardConnection {
            location: location.clone(),
            handle,
        })
    }
}

/// An open connection to a single shard database.
///
/// The underlying connection is closed when this is dropped.
pub struct ShardConnection {
    location: ShardLocation,
    handle: DatabaseHandle,
}

impl ShardConnection {
    #[inline]
    pub fn location(&self) -> &ShardLocation {
        &self.location
    }

    #[inline]
    pub fn handle(&self) -> &DatabaseHandle {
        &self.handle
    }
}
