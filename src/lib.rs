//! # Shardmap
//! Range based shard allocation and key routing for tokio applications.
//!
//! This is a convenience package which re-exports the sub-crates:
//!
//! ### Features
//! - `shardmap_core` - The shard registry, allocator, key router and retry executor.
//! - `shardmap_sqlite` - A provisioner and connector which keep each shard in its own SQLite database,
//!   and a registry persisting shard maps next to them.

#[cfg(feature = "shardmap-core")]
pub use shardmap_core as core;
#[cfg(feature = "shardmap-sqlite")]
pub use shardmap_sqlite as sqlite;
