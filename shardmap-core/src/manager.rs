use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::RegistryStore;
use crate::error::ShardMapError;
use crate::map::ShardMap;
use crate::model::CreateStatus;
use crate::range::ShardKey;

struct RegisteredMap {
    key_type: &'static str,
    map: Box<dyn Any + Send + Sync>,
}

#[derive(Clone, Default)]
/// Holds the set of named shard maps for an application.
///
/// There is no process wide manager, create one and pass it to the components
/// which need it.
pub struct ShardMapManager {
    maps: Arc<RwLock<BTreeMap<String, RegisteredMap>>>,
}

impl ShardMapManager {
    /// Gets the range shard map with the given name, if it exists.
    pub fn try_get_range_shard_map<K: ShardKey>(
        &self,
        name: &str,
    ) -> Result<Option<ShardMap<K>>, ShardMapError> {
        let lock = self.maps.read();
        lock.get(name).map(|entry| downcast(name, entry)).transpose()
    }

    /// Gets the range shard map with the given name or creates it.
    pub fn get_or_create_range_shard_map<K: ShardKey>(
        &self,
        name: &str,
    ) -> Result<(ShardMap<K>, CreateStatus), ShardMapError> {
        if let Some(map) = self.try_get_range_shard_map(name)? {
            info!(map = name, "Shard map already exists.");
            return Ok((map, CreateStatus::AlreadyExisted));
        }

        let mut lock = self.maps.write();
        if let Some(entry) = lock.get(name) {
            return downcast(name, entry).map(|map| (map, CreateStatus::AlreadyExisted));
        }

        let map = ShardMap::<K>::new(name);
        register(&mut lock, name, map.clone());

        info!(map = name, key_type = type_name::<K>(), "Created shard map.");

        Ok((map, CreateStatus::Created))
    }

    /// Gets the range shard map with the given name, loading it from the store
    /// or creating it in both the manager and the store.
    ///
    /// A map which the store already holds is reported as [CreateStatus::AlreadyExisted]
    /// with all of its shards and mappings restored.
    pub async fn load_range_shard_map<K, S>(
        &self,
        name: &str,
        store: &S,
    ) -> Result<(ShardMap<K>, CreateStatus), ShardMapError>
    where
        K: ShardKey,
        S: RegistryStore<K>,
    {
        if let Some(map) = self.try_get_range_shard_map(name)? {
            info!(map = name, "Shard map already exists.");
            return Ok((map, CreateStatus::AlreadyExisted));
        }

        let registry_error = |e: S::Error| ShardMapError::Registry {
            map: name.to_string(),
            error: anyhow::Error::new(e),
        };

        let map = ShardMap::<K>::new(name);
        let status = match store.load_map(name).await.map_err(registry_error)? {
            Some(stored) => {
                map.restore(stored)?;
                info!(
                    map = name,
                    num_shards = map.shard_count(),
                    num_mappings = map.list_mappings().len(),
                    "Shard map already exists, loaded it from the registry store."
                );
                CreateStatus::AlreadyExisted
            },
            None => {
                store.put_map(name).await.map_err(registry_error)?;
                info!(map = name, key_type = type_name::<K>(), "Created shard map.");
                CreateStatus::Created
            },
        };

        let mut lock = self.maps.write();
        if let Some(entry) = lock.get(name) {
            return downcast(name, entry).map(|map| (map, CreateStatus::AlreadyExisted));
        }
        register(&mut lock, name, map.clone());

        Ok((map, status))
    }

    /// The names of all maps held by the manager.
    pub fn map_names(&self) -> Vec<String> {
        self.maps.read().keys().cloned().collect()
    }
}

fn register<K: ShardKey>(maps: &mut BTreeMap<String, RegisteredMap>, name: &str, map: ShardMap<K>) {
    maps.insert(
        name.to_string(),
        RegisteredMap {
            key_type: type_name::<K>(),
            map: Box::new(map),
        },
    );
}

fn downcast<K: ShardKey>(
    name: &str,
    entry: &RegisteredMap,
) -> Result<ShardMap<K>, ShardMapError> {
    entry
        .map
        .downcast_ref::<ShardMap<K>>()
        .cloned()
        .ok_or_else(|| ShardMapError::MapTypeMismatch {
            name: name.to_string(),
            existing: entry.key_type,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShardLocation;
    use crate::range::ShardRange;
    use crate::test_utils::MemRegistry;

    #[test]
    fn test_get_or_create_map() {
        let manager = ShardMapManager::default();
        assert!(manager
            .try_get_range_shard_map::<i32>("customers")
            .unwrap()
            .is_none());

        let (map, status) = manager
            .get_or_create_range_shard_map::<i32>("customers")
            .expect("Create map");
        assert_eq!(status, CreateStatus::Created);
        map.get_or_create_shard(ShardLocation::new("localhost", "shard-0"));

        let (existing, status) = manager
            .get_or_create_range_shard_map::<i32>("customers")
            .expect("Get map");
        assert_eq!(status, CreateStatus::AlreadyExisted);
        assert_eq!(existing.shard_count(), 1, "Maps should share state.");

        assert_eq!(manager.map_names(), vec!["customers".to_string()]);
    }

    #[test]
    fn test_key_type_mismatch() {
        let manager = ShardMapManager::default();
        manager
            .get_or_create_range_shard_map::<i32>("customers")
            .expect("Create map");

        let err = manager
            .get_or_create_range_shard_map::<String>("customers")
            .expect_err("Different key type should be rejected");
        assert!(matches!(err, ShardMapError::MapTypeMismatch { existing: "i32", .. }));

        let err = manager
            .try_get_range_shard_map::<u64>("customers")
            .expect_err("Different key type should be rejected");
        assert!(matches!(err, ShardMapError::MapTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_load_map_from_registry() -> anyhow::Result<()> {
        let _ = tracing_subscriber::fmt::try_init();

        let registry = MemRegistry::<i32>::default();
        let manager = ShardMapManager::default();
        let (map, status) = manager.load_range_shard_map::<i32, _>("customers", &registry).await?;
        assert_eq!(status, CreateStatus::Created);
        assert!(registry.stored("customers").is_some(), "Map should be stored.");

        let (shard, _) = map.get_or_create_shard(ShardLocation::new("localhost", "shard-0"));
        registry.put_shard("customers", &shard).await?;
        let mapping = map.create_mapping(ShardRange::new(0, 100)?, &shard)?;
        registry.put_mapping("customers", &mapping).await?;

        // Same manager, the in memory map is returned.
        let (_, status) = manager.load_range_shard_map::<i32, _>("customers", &registry).await?;
        assert_eq!(status, CreateStatus::AlreadyExisted);

        let manager = ShardMapManager::default();
        let (loaded, status) = manager.load_range_shard_map::<i32, _>("customers", &registry).await?;
        assert_eq!(status, CreateStatus::AlreadyExisted);
        assert_eq!(loaded.list_shards(), vec![shard]);
        assert_eq!(loaded.list_mappings(), vec![mapping.clone()]);
        assert_eq!(loaded.get_mapping_for_key(&42), Some(mapping));

        let (by_name, _) = manager.get_or_create_range_shard_map::<i32>("customers")?;
        assert_eq!(by_name.shard_count(), 1, "Maps should share state.");

        Ok(())
    }

    #[tokio::test]
    async fn test_load_map_registry_failure() {
        let registry = MemRegistry::<i32>::default();
        registry.fail_writes(true);

        let manager = ShardMapManager::default();
        let err = manager
            .load_range_shard_map::<i32, _>("customers", &registry)
            .await
            .expect_err("Registry writes should fail");
        assert!(matches!(err, ShardMapError::Registry { ref map, .. } if map == "customers"));
        assert!(manager.map_names().is_empty());
    }
}
