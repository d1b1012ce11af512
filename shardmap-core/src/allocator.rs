use std::cmp::Ordering;
use std::collections::HashSet;

use crate::backend::{MemoryOnly, Provisioner, RegistryStore};
use crate::config::ShardMapConfig;
use crate::error::ShardMapError;
use crate::map::ShardMap;
use crate::model::{CreateStatus, Mapping, Shard, ShardId, ShardLocation};
use crate::range::{ShardKey, ShardRange};
use crate::statistics::{incr, ShardMapStatistics};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where the shard backing a new mapping came from.
pub enum ShardSource {
    /// An already registered shard without any mappings was reused.
    ReusedEmpty,
    /// A new shard database was provisioned and registered.
    Provisioned {
        /// If the physical database had to be created, rather than already existing.
        database_created: bool,
        /// If the shard had to be added to the map, rather than already existing.
        shard_status: CreateStatus,
    },
}

#[derive(Debug, Clone)]
/// The result of binding a new range to a shard.
pub struct Allocation<K> {
    mapping: Mapping<K>,
    source: ShardSource,
}

impl<K> Allocation<K> {
    #[inline]
    pub fn mapping(&self) -> &Mapping<K> {
        &self.mapping
    }

    #[inline]
    pub fn source(&self) -> &ShardSource {
        &self.source
    }

    #[inline]
    pub fn into_mapping(self) -> Mapping<K> {
        self.mapping
    }
}

/// Binds new key ranges to shards, reusing empty shards before provisioning new ones.
///
/// Allocation is **not** safe to run concurrently. Two concurrent allocations
/// can both see no empty shard, derive the same database name and race while
/// provisioning it. Callers must serialise allocations, for example by only
/// allocating from a single task or behind a lock.
///
/// Shards and mappings only live in memory unless a [RegistryStore] is
/// attached with [ShardAllocator::with_registry].
pub struct ShardAllocator<K, P, S = MemoryOnly> {
    map: ShardMap<K>,
    provisioner: P,
    store: S,
    config: ShardMapConfig,
    statistics: ShardMapStatistics,
}

impl<K, P> ShardAllocator<K, P>
where
    K: ShardKey,
    P: Provisioner,
{
    /// Creates a new allocator for the given map.
    pub fn new(
        map: ShardMap<K>,
        provisioner: P,
        config: ShardMapConfig,
    ) -> Result<Self, ShardMapError> {
        config.validate()?;

        Ok(Self {
            map,
            provisioner,
            store: MemoryOnly,
            config,
            statistics: ShardMapStatistics::default(),
        })
    }
}

impl<K, P, S> ShardAllocator<K, P, S>
where
    K: ShardKey,
    P: Provisioner,
    S: RegistryStore<K>,
{
    /// Persist every shard and mapping the allocator creates into the given store.
    ///
    /// The map should have been loaded from the same store, see
    /// [crate::ShardMapManager::load_range_shard_map].
    pub fn with_registry<S2: RegistryStore<K>>(self, store: S2) -> ShardAllocator<K, P, S2> {
        ShardAllocator {
            map: self.map,
            provisioner: self.provisioner,
            store,
            config: self.config,
            statistics: self.statistics,
        }
    }

    /// Record metrics into an existing set of statistics, such as the one used by a router.
    pub fn with_statistics(mut self, statistics: ShardMapStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    #[inline]
    pub fn map(&self) -> &ShardMap<K> {
        &self.map
    }

    #[inline]
    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    #[inline]
    pub fn statistics(&self) -> &ShardMapStatistics {
        &self.statistics
    }

    /// Finds the first registered shard without any mappings.
    pub fn find_empty_shard(&self) -> Option<Shard> {
        find_empty_shard(&self.map)
    }

    /// Binds the given range to a shard.
    ///
    /// An empty shard is used if one exists, otherwise a new database is provisioned
    /// and registered. A [ShardMapError::RangeConflict] from the registry is returned
    /// unchanged, in that case any shard provisioned by the call stays registered and
    /// empty, ready to be reused by the next allocation.
    ///
    /// The shard is written to the registry store before the mapping. If the mapping
    /// cannot be written it is removed from the map again and a
    /// [ShardMapError::Registry] is returned, leaving the shard empty.
    pub async fn allocate_shard_for_range(
        &self,
        range: ShardRange<K>,
    ) -> Result<Allocation<K>, ShardMapError> {
        let (shard, source) = self.create_or_get_empty_shard().await?;

        self.store
            .put_shard(self.map.name(), &shard)
            .await
            .map_err(|e| self.registry_error(e))?;

        let mapping = self.map.create_mapping(range, &shard)?;
        if let Err(e) = self.store.put_mapping(self.map.name(), &mapping).await {
            self.map.discard_mapping(&mapping);
            warn!(
                map = %self.map.name(),
                range = %mapping.range(),
                error = %e,
                "Failed to persist mapping, it has been removed from the map."
            );
            return Err(self.registry_error(e));
        }
        incr(&self.statistics.num_mappings_created);

        info!(
            map = %self.map.name(),
            range = %mapping.range(),
            database = shard.location().database(),
            "Mapped range to shard."
        );

        Ok(Allocation { mapping, source })
    }

    fn registry_error(&self, error: S::Error) -> ShardMapError {
        ShardMapError::Registry {
            map: self.map.name().to_string(),
            error: anyhow::Error::new(error),
        }
    }

    async fn create_or_get_empty_shard(&self) -> Result<(Shard, ShardSource), ShardMapError> {
        if let Some(shard) = self.find_empty_shard() {
            incr(&self.statistics.num_empty_shards_reused);
            debug!(
                map = %self.map.name(),
                database = shard.location().database(),
                "Reusing empty shard."
            );
            return Ok((shard, ShardSource::ReusedEmpty));
        }

        // Not unique under concurrent allocation, see the type level docs.
        let ordinal = self.map.shard_count();
        let server = self.config.server_name();
        let database = self.config.shard_database_name(ordinal);

        let provisioning = |e: P::Error| ShardMapError::Provisioning {
            database: database.clone(),
            error: anyhow::Error::new(e),
        };

        let exists = self
            .provisioner
            .database_exists(server, &database)
            .await
            .map_err(provisioning)?;

        if !exists {
            self.provisioner
                .create_database(server, &database)
                .await
                .map_err(provisioning)?;
            incr(&self.statistics.num_databases_created);
            info!(server = server, database = %database, "Created shard database.");
        }

        // Ran unconditionally, a database which was already initialised fails here
        // and needs to be fixed by an operator.
        self.provisioner
            .run_script(server, &database, self.config.init_script_path())
            .await
            .map_err(provisioning)?;

        let location = ShardLocation::new(server, database.as_str());
        let (shard, shard_status) = self.map.get_or_create_shard(location);
        if shard_status.is_created() {
            incr(&self.statistics.num_shards_provisioned);
        }

        let source = ShardSource::Provisioned {
            database_created: !exists,
            shard_status,
        };

        Ok((shard, source))
    }
}

/// Finds the first shard in the map which has no mappings.
///
/// Shards are ordered by their database name, then server, so repeated calls
/// against an unchanged map always return the same shard.
pub fn find_empty_shard<K: ShardKey>(map: &ShardMap<K>) -> Option<Shard> {
    let occupied = map
        .list_mappings()
        .into_iter()
        .map(|mapping| mapping.shard().id())
        .collect::<HashSet<ShardId>>();

    let mut shards = map.list_shards();
    shards.sort_by(by_database_name);

    shards
        .into_iter()
        .find(|shard| !occupied.contains(&shard.id()))
}

fn by_database_name(a: &Shard, b: &Shard) -> Ordering {
    let (a, b) = (a.location(), b.location());
    a.database()
        .cmp(b.database())
        .then_with(|| a.server().cmp(b.server()))
}
