use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around shard allocation and routing.
pub struct ShardMapStatistics(Arc<ShardMapStatisticsInner>);

impl Deref for ShardMapStatistics {
    type Target = ShardMapStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct ShardMapStatisticsInner {
    /// The number of shards registered by the allocator.
    pub(crate) num_shards_provisioned: Counter,
    /// The number of allocations which reused an empty shard.
    pub(crate) num_empty_shards_reused: Counter,
    /// The number of physical databases created by the allocator.
    pub(crate) num_databases_created: Counter,
    /// The number of range mappings created by the allocator.
    pub(crate) num_mappings_created: Counter,
    /// The number of keys resolved to a shard by the router.
    pub(crate) num_requests_routed: Counter,
    /// The number of keys which were not covered by any mapping.
    pub(crate) num_keys_not_mapped: Counter,
    /// The number of attempts made by the router, including retries.
    pub(crate) num_attempts: Counter,
    /// The number of routed units of work which exhausted their retries.
    pub(crate) num_transient_failures: Counter,
    /// The number of routed units of work which failed permanently.
    pub(crate) num_permanent_failures: Counter,
}

impl ShardMapStatisticsInner {
    /// The number of shards registered by the allocator.
    pub fn num_shards_provisioned(&self) -> u64 {
        self.num_shards_provisioned.load(Ordering::Relaxed)
    }

    /// The number of allocations which reused an empty shard.
    pub fn num_empty_shards_reused(&self) -> u64 {
        self.num_empty_shards_reused.load(Ordering::Relaxed)
    }

    /// The number of physical databases created by the allocator.
    pub fn num_databases_created(&self) -> u64 {
        self.num_databases_created.load(Ordering::Relaxed)
    }

    /// The number of range mappings created by the allocator.
    pub fn num_mappings_created(&self) -> u64 {
        self.num_mappings_created.load(Ordering::Relaxed)
    }

    /// The number of keys resolved to a shard by the router.
    pub fn num_requests_routed(&self) -> u64 {
        self.num_requests_routed.load(Ordering::Relaxed)
    }

    /// The number of keys which were not covered by any mapping.
    pub fn num_keys_not_mapped(&self) -> u64 {
        self.num_keys_not_mapped.load(Ordering::Relaxed)
    }

    /// The number of attempts made by the router, including retries.
    pub fn num_attempts(&self) -> u64 {
        self.num_attempts.load(Ordering::Relaxed)
    }

    /// The number of routed units of work which exhausted their retries.
    pub fn num_transient_failures(&self) -> u64 {
        self.num_transient_failures.load(Ordering::Relaxed)
    }

    /// The number of routed units of work which failed permanently.
    pub fn num_permanent_failures(&self) -> u64 {
        self.num_permanent_failures.load(Ordering::Relaxed)
    }
}

pub(crate) fn incr(counter: &Counter) {
    counter.fetch_add(1, Ordering::Relaxed);
}
