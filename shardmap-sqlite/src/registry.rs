use std::any::type_name;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::{FromSql, ToSql};
use rusqlite::Row;
use shardmap_core::{
    Mapping,
    MappingId,
    RegistryStore,
    Shard,
    ShardId,
    ShardKey,
    ShardLocation,
    ShardRange,
    StoredMap,
};
use uuid::Uuid;

use crate::db::{DatabaseHandle, FromRow};
use crate::error::SqliteShardError;

/// The database name of the registry, next to the shard databases of a server.
pub static MANAGER_DATABASE_NAME: &str = "ShardMapManager";

// Keys are stored without a declared type so SQLite keeps the value as written.
static CREATE_REGISTRY_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS shard_maps (
    name        TEXT PRIMARY KEY,
    key_type    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS shards (
    map             TEXT NOT NULL REFERENCES shard_maps (name),
    shard_id        TEXT NOT NULL,
    server_name     TEXT NOT NULL,
    database_name   TEXT NOT NULL,
    PRIMARY KEY (map, shard_id),
    UNIQUE (map, server_name, database_name)
);

CREATE TABLE IF NOT EXISTS mappings (
    map         TEXT NOT NULL REFERENCES shard_maps (name),
    mapping_id  TEXT NOT NULL,
    low         NOT NULL,
    high        NOT NULL,
    shard_id    TEXT NOT NULL,
    PRIMARY KEY (map, mapping_id)
);
"#;

/// Keys which can be written to and read back from SQLite.
pub trait SqlKey: ShardKey + ToSql + FromSql {}

impl<T> SqlKey for T where T: ShardKey + ToSql + FromSql {}

/// A [RegistryStore] persisting shard maps into the shard map manager database.
///
/// The registry keeps every map, shard and mapping so a map can be loaded
/// again by a new process with
/// [shardmap_core::ShardMapManager::load_range_shard_map].
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    path: PathBuf,
    handle: DatabaseHandle,
}

impl SqliteRegistry {
    /// Opens the registry at the given path, creating the database and its tables
    /// if they do not already exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SqliteShardError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            crate::create_dir_all(parent.to_path_buf()).await?;
        }

        let handle = DatabaseHandle::open(&path).await?;
        handle.execute_batch(CREATE_REGISTRY_TABLES).await?;

        debug!(path = %path.display(), "Opened shard map registry.");

        Ok(Self { path, handle })
    }

    /// Opens the registry kept alongside the shard databases of the given server,
    /// `<root>/<server>/ShardMapManager.db`.
    pub async fn open_in_dir(
        root: impl AsRef<Path>,
        server: &str,
    ) -> Result<Self, SqliteShardError> {
        Self::open(crate::database_path(root.as_ref(), server, MANAGER_DATABASE_NAME)).await
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<K: SqlKey> RegistryStore<K> for SqliteRegistry {
    type Error = SqliteShardError;

    async fn load_map(&self, name: &str) -> Result<Option<StoredMap<K>>, Self::Error> {
        let key_type = self
            .handle
            .fetch_one::<_, KeyType>(
                "SELECT key_type FROM shard_maps WHERE name = ?1;",
                (name.to_string(),),
            )
            .await?;

        match key_type {
            None => return Ok(None),
            Some(KeyType(stored)) if stored != type_name::<K>() => {
                return Err(SqliteShardError::InvalidRegistry(format!(
                    "shard map {name} holds keys of type {stored}, not {}",
                    type_name::<K>(),
                )))
            },
            Some(_) => {},
        }

        let shard_rows = self
            .handle
            .fetch_all::<_, ShardRow>(
                "SELECT shard_id, server_name, database_name FROM shards WHERE map = ?1;",
                (name.to_string(),),
            )
            .await?;

        let mut shards = HashMap::with_capacity(shard_rows.len());
        for row in shard_rows {
            let id = ShardId::from_uuid(parse_uuid(&row.shard_id)?);
            let shard = Shard::restore(id, ShardLocation::new(row.server_name, row.database_name));
            shards.insert(row.shard_id, shard);
        }

        let mapping_rows = self
            .handle
            .fetch_all::<_, MappingRow<K>>(
                "SELECT mapping_id, low, high, shard_id FROM mappings WHERE map = ?1;",
                (name.to_string(),),
            )
            .await?;

        let mut mappings = Vec::with_capacity(mapping_rows.len());
        for row in mapping_rows {
            let shard = shards.get(&row.shard_id).cloned().ok_or_else(|| {
                SqliteShardError::InvalidRegistry(format!(
                    "mapping {} references unknown shard {}",
                    row.mapping_id, row.shard_id,
                ))
            })?;
            let range = ShardRange::new(row.low, row.high)
                .map_err(|e| SqliteShardError::InvalidRegistry(e.to_string()))?;
            let id = MappingId::from_uuid(parse_uuid(&row.mapping_id)?);

            mappings.push(Mapping::restore(id, range, shard));
        }

        Ok(Some(StoredMap {
            shards: shards.into_values().collect(),
            mappings,
        }))
    }

    async fn put_map(&self, name: &str) -> Result<(), Self::Error> {
        self.handle
            .execute(
                "INSERT OR IGNORE INTO shard_maps (name, key_type) VALUES (?1, ?2);",
                (name.to_string(), type_name::<K>()),
            )
            .await?;
        Ok(())
    }

    async fn put_shard(&self, map: &str, shard: &Shard) -> Result<(), Self::Error> {
        let location = shard.location();
        self.handle
            .execute(
                "INSERT OR IGNORE INTO shards (map, shard_id, server_name, database_name) VALUES (?1, ?2, ?3, ?4);",
                (
                    map.to_string(),
                    shard.id().to_string(),
                    location.server().to_string(),
                    location.database().to_string(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn put_mapping(&self, map: &str, mapping: &Mapping<K>) -> Result<(), Self::Error> {
        let range = mapping.range();
        self.handle
            .execute(
                "INSERT INTO mappings (map, mapping_id, low, high, shard_id) VALUES (?1, ?2, ?3, ?4, ?5);",
                (
                    map.to_string(),
                    mapping.id().to_string(),
                    range.low().clone(),
                    range.high().clone(),
                    mapping.shard().id().to_string(),
                ),
            )
            .await?;
        Ok(())
    }
}

fn parse_uuid(id: &str) -> Result<Uuid, SqliteShardError> {
    Uuid::parse_str(id)
        .map_err(|e| SqliteShardError::InvalidRegistry(format!("invalid id {id}: {e}")))
}

struct KeyType(String);

impl FromRow for KeyType {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self(row.get(0)?))
    }
}

struct ShardRow {
    shard_id: String,
    server_name: String,
    database_name: String,
}

impl FromRow for ShardRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            shard_id: row.get(0)?,
            server_name: row.get(1)?,
            database_name: row.get(2)?,
        })
    }
}

struct MappingRow<K> {
    mapping_id: String,
    low: K,
    high: K,
    shard_id: String,
}

impl<K: FromSql> FromRow for MappingRow<K> {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            mapping_id: row.get(0)?,
            low: row.get(1)?,
            high: row.get(2)?,
            shard_id: row.get(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use shardmap_core::{CreateStatus, ShardMapManager};

    use super::*;

    #[tokio::test]
    async fn test_registry_round_trips_map() -> anyhow::Result<()> {
        let dir = test_helper::temp_dir();
        let registry = SqliteRegistry::open_in_dir(&dir, "localhost").await?;
        assert!(dir.join("localhost").join("ShardMapManager.db").exists());

        let manager = ShardMapManager::default();
        let (map, status) = manager.load_range_shard_map::<i64, _>("customers", &registry).await?;
        assert_eq!(status, CreateStatus::Created);

        let (shard, _) = map.get_or_create_shard(ShardLocation::new("localhost", "Shard0"));
        RegistryStore::<i64>::put_shard(&registry, "customers", &shard).await?;
        // Writing the same shard twice is a no-op.
        RegistryStore::<i64>::put_shard(&registry, "customers", &shard).await?;
        let mapping = map.create_mapping(ShardRange::new(-50, 100)?, &shard)?;
        registry.put_mapping("customers", &mapping).await?;

        let reopened = SqliteRegistry::open(registry.path()).await?;
        let stored = RegistryStore::<i64>::load_map(&reopened, "customers")
            .await?
            .expect("Map should be stored");
        assert_eq!(stored.shards, vec![shard]);
        assert_eq!(stored.mappings, vec![mapping]);

        let missing = RegistryStore::<i64>::load_map(&reopened, "orders").await?;
        assert!(missing.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_registry_rejects_other_key_types() -> anyhow::Result<()> {
        let registry = SqliteRegistry::open(test_helper::temp_dir().join("manager.db")).await?;
        RegistryStore::<i64>::put_map(&registry, "customers").await?;

        let err = RegistryStore::<String>::load_map(&registry, "customers")
            .await
            .expect_err("Key type should not match");
        assert!(matches!(err, SqliteShardError::InvalidRegistry(_)));

        Ok(())
    }
}
