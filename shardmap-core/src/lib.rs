//! # Shardmap Core
//! Range based shard allocation and data dependent routing.
//!
//! A [ShardMap] tracks a set of shards, each backed by a physical database, and the
//! contiguous ranges of keys bound to them. The [ShardAllocator] binds new ranges,
//! reusing shards which have no mappings before provisioning new databases, and the
//! [ShardRouter] resolves a key to its shard and runs a [UnitOfWork] against it,
//! retrying transient failures.
//!
//! The physical databases are provided by implementing two traits, [Provisioner]
//! and [Connector].
//!
//! ## Basic Example
//!
//! ```rust
//! use shardmap_core::test_utils::{Locate, MemConnector, MemProvisioner};
//! use shardmap_core::{ShardAllocator, ShardMapConfig, ShardMapManager, ShardRange, ShardRouter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ShardMapConfig::default();
//!     let manager = ShardMapManager::default();
//!     let (map, _) = manager.get_or_create_range_shard_map::<i32>(config.map_name())?;
//!
//!     let allocator = ShardAllocator::new(map.clone(), MemProvisioner::default(), config.clone())?;
//!     allocator.allocate_shard_for_range(ShardRange::new(0, 100)?).await?;
//!
//!     let router = ShardRouter::new(map, MemConnector::default(), &config)?;
//!     let location = router.resolve_and_run(&42, &Locate).await?;
//!     assert_eq!(location.database(), "ElasticScaleStarterKit_Shard0");
//!
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate tracing;

mod allocator;
mod backend;
mod config;
mod error;
mod manager;
mod map;
mod model;
mod range;
mod retry;
mod router;
mod statistics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use allocator::{find_empty_shard, Allocation, ShardAllocator, ShardSource};
pub use backend::{
    Connector,
    Credentials,
    MemoryOnly,
    Provisioner,
    RegistryStore,
    StoredMap,
    UnitOfWork,
};
pub use config::{
    ShardMapConfig,
    DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_INIT_SCRIPT,
    DEFAULT_MAP_NAME,
    DEFAULT_SERVER_NAME,
    DEFAULT_SHARD_NAME_FORMAT,
};
pub use error::{ConfigError, ShardMapError};
pub use manager::ShardMapManager;
pub use map::ShardMap;
pub use model::{CreateStatus, Mapping, MappingId, Shard, ShardId, ShardLocation};
pub use range::{ShardKey, ShardRange};
pub use retry::{Classify, ErrorClass, RetryError, RetryPolicy};
pub use router::{AttemptError, ShardRouter};
pub use statistics::{ShardMapStatistics, ShardMapStatisticsInner};
