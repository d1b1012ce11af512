use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::StoredMap;
use crate::error::ShardMapError;
use crate::model::{CreateStatus, Mapping, Shard, ShardLocation};
use crate::range::{ShardKey, ShardRange};

struct MapState<K> {
    shards: HashMap<ShardLocation, Shard>,
    /// Mappings keyed by the lower bound of their range.
    ///
    /// Ranges never overlap so the lower bound uniquely identifies a mapping
    /// and the ordering by `low` is also an ordering by `high`.
    mappings: BTreeMap<K, Mapping<K>>,
}

impl<K> Default for MapState<K> {
    fn default() -> Self {
        Self {
            shards: HashMap::new(),
            mappings: BTreeMap::new(),
        }
    }
}

/// The registry of shards and range mappings for a single dataset.
///
/// A [ShardMap] is a cheap handle, clones share the same underlying state.
/// All mutations are applied under a single write lock so `get_or_create_shard`
/// and `create_mapping` are atomic with respect to one another. Reads return a
/// point-in-time snapshot.
pub struct ShardMap<K> {
    name: Arc<str>,
    state: Arc<RwLock<MapState<K>>>,
}

impl<K> Clone for ShardMap<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: self.state.clone(),
        }
    }
}

impl<K> Debug for ShardMap<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ShardMap")
            .field("name", &self.name)
            .field("num_shards", &state.shards.len())
            .field("num_mappings", &state.mappings.len())
            .finish()
    }
}

impl<K: ShardKey> ShardMap<K> {
    /// Creates a new, empty shard map.
    ///
    /// Most applications should get their maps via a [crate::ShardMapManager]
    /// so that a single map exists per name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            state: Default::default(),
        }
    }

    #[inline]
    /// The name of the shard map.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All shards currently registered in the map.
    ///
    /// The order of the returned shards is unspecified.
    pub fn list_shards(&self) -> Vec<Shard> {
        self.state.read().shards.values().cloned().collect()
    }

    /// The number of shards currently registered in the map.
    pub fn shard_count(&self) -> usize {
        self.state.read().shards.len()
    }

    /// All current mappings, ordered by their lower bound.
    pub fn list_mappings(&self) -> Vec<Mapping<K>> {
        self.state.read().mappings.values().cloned().collect()
    }

    /// Gets the shard registered at the given location, if any.
    pub fn try_get_shard(&self, location: &ShardLocation) -> Option<Shard> {
        self.state.read().shards.get(location).cloned()
    }

    /// Gets the shard at the given location or registers a new one.
    ///
    /// Calling this several times with the same location always returns the
    /// same shard, only the first call reports [CreateStatus::Created].
    pub fn get_or_create_shard(&self, location: ShardLocation) -> (Shard, CreateStatus) {
        if let Some(shard) = self.try_get_shard(&location) {
            return self.already_existed(shard);
        }

        let mut lock = self.state.write();

        // Another caller may have registered the location between locks.
        if let Some(shard) = lock.shards.get(&location) {
            let shard = shard.clone();
            drop(lock);
            return self.already_existed(shard);
        }

        let shard = Shard::new(location.clone());
        lock.shards.insert(location, shard.clone());

        info!(
            map = %self.name,
            shard_id = %shard.id(),
            database = shard.location().database(),
            "Added shard to the shard map."
        );

        (shard, CreateStatus::Created)
    }

    fn already_existed(&self, shard: Shard) -> (Shard, CreateStatus) {
        info!(
            map = %self.name,
            shard_id = %shard.id(),
            database = shard.location().database(),
            "Shard has already been added to the shard map."
        );
        (shard, CreateStatus::AlreadyExisted)
    }

    /// Binds a range of keys to the given shard.
    ///
    /// Fails with [ShardMapError::RangeConflict] if the range overlaps any existing mapping,
    /// and with [ShardMapError::ShardNotRegistered] if the shard does not belong to this map.
    pub fn create_mapping(
        &self,
        range: ShardRange<K>,
        shard: &Shard,
    ) -> Result<Mapping<K>, ShardMapError> {
        let mapping = Mapping::new(range, shard.clone());
        self.insert_mapping(&mut self.state.write(), mapping.clone())?;
        Ok(mapping)
    }

    fn insert_mapping(
        &self,
        state: &mut MapState<K>,
        mapping: Mapping<K>,
    ) -> Result<(), ShardMapError> {
        let shard = mapping.shard();
        match state.shards.get(shard.location()) {
            Some(registered) if registered.id() == shard.id() => {},
            _ => {
                return Err(ShardMapError::ShardNotRegistered {
                    map: self.name.to_string(),
                    location: shard.location().to_string(),
                })
            },
        }

        let range = mapping.range();

        // Only the mapping with the greatest lower bound below `range.high` can overlap,
        // any earlier mapping ends before that one starts.
        let candidate = state
            .mappings
            .range::<K, _>((Bound::Unbounded, Bound::Excluded(range.high())))
            .next_back()
            .map(|(_, existing)| existing);

        if let Some(existing) = candidate.filter(|m| m.range().overlaps(range)) {
            return Err(ShardMapError::RangeConflict {
                map: self.name.to_string(),
                requested: range.to_string(),
                existing: existing.range().to_string(),
            });
        }

        let low = range.low().clone();
        state.mappings.insert(low, mapping);

        Ok(())
    }

    /// Removes a mapping which could not be persisted.
    pub(crate) fn discard_mapping(&self, mapping: &Mapping<K>) {
        let mut lock = self.state.write();
        let low = mapping.range().low();
        if lock.mappings.get(low).map(|m| m.id()) == Some(mapping.id()) {
            lock.mappings.remove(low);
        }
    }

    /// Loads shards and mappings read back from a registry store.
    ///
    /// Every mapping is checked the same way [ShardMap::create_mapping] checks
    /// new mappings.
    pub(crate) fn restore(&self, stored: StoredMap<K>) -> Result<(), ShardMapError> {
        let mut lock = self.state.write();
        for shard in stored.shards {
            lock.shards.insert(shard.location().clone(), shard);
        }
        for mapping in stored.mappings {
            self.insert_mapping(&mut lock, mapping)?;
        }
        Ok(())
    }

    /// Gets the mapping whose range contains the given key.
    pub fn get_mapping_for_key(&self, key: &K) -> Option<Mapping<K>> {
        let lock = self.state.read();
        lock.mappings
            .range::<K, _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, mapping)| mapping)
            .filter(|mapping| mapping.range().contains(key))
            .cloned()
    }

    /// The greatest upper bound of all mapped ranges.
    pub fn max_high(&self) -> Option<K> {
        let lock = self.state.read();
        lock.mappings
            .values()
            .next_back()
            .map(|mapping| mapping.range().high().clone())
    }
}
