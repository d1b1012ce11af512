use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shardmap_core::Provisioner;

use crate::db::DatabaseHandle;
use crate::error::SqliteShardError;

/// A [Provisioner] which creates each shard database as a SQLite file.
///
/// Databases live at `<root>/<server>/<database>.db`.
#[derive(Debug, Clone)]
pub struct SqliteProvisioner {
    root: PathBuf,
}

impl SqliteProvisioner {
    /// Creates a new provisioner storing databases in the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Provisioner for SqliteProvisioner {
    type Error = SqliteShardError;

    async fn database_exists(&self, server: &str, database: &str) -> Result<bool, Self::Error> {
        crate::path_exists(crate::database_path(&self.root, server, database))
            .await
            .map_err(SqliteShardError::from)
    }

    async fn create_database(&self, server: &str, database: &str) -> Result<(), Self::Error> {
        let path = crate::database_path(&self.root, server, database);
        if let Some(parent) = path.parent() {
            crate::create_dir_all(parent.to_path_buf()).await?;
        }

        // Opening with the create flag is enough to create the file.
        let handle = DatabaseHandle::open(&path).await?;
        drop(handle);

        info!(path = %path.display(), "Created SQLite shard database.");

        Ok(())
    }

    async fn run_script(
        &self,
        server: &str,
        database: &str,
        script: &Path,
    ) -> Result<(), Self::Error> {
        let path = crate::database_path(&self.root, server, database);
        if !crate::path_exists(path.clone()).await? {
            return Err(SqliteShardError::MissingDatabase(database.to_string()));
        }

        let script_path = script.to_path_buf();
        let script = crate::spawn_blocking(move || std::fs::read_to_string(script_path)).await?;

        let handle = DatabaseHandle::open_existing(&path).await?;
        handle.execute_batch(script).await?;

        debug!(path = %path.display(), "Initialised SQLite shard database.");

        Ok(())
    }
}
