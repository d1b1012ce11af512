use std::fmt::{self, Display};

use uuid::Uuid;

use crate::range::ShardRange;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// The physical location of a shard, a database living on a given server.
pub struct ShardLocation {
    server: String,
    database: String,
}

impl ShardLocation {
    /// Creates a new location for a database on a server.
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
        }
    }

    #[inline]
    /// The server identifier hosting the database.
    pub fn server(&self) -> &str {
        &self.server
    }

    #[inline]
    /// The database name.
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl Display for ShardLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.database)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// The opaque identity of a registered shard.
pub struct ShardId(Uuid);

impl ShardId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuilds an id previously read with [ShardId::as_uuid].
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A physical partition registered within a shard map.
///
/// Shards are created once per location and never change afterwards.
pub struct Shard {
    id: ShardId,
    location: ShardLocation,
}

impl Shard {
    pub(crate) fn new(location: ShardLocation) -> Self {
        Self {
            id: ShardId::new(),
            location,
        }
    }

    /// Rebuilds a shard loaded from a [crate::RegistryStore].
    pub fn restore(id: ShardId, location: ShardLocation) -> Self {
        Self { id, location }
    }

    #[inline]
    pub fn id(&self) -> ShardId {
        self.id
    }

    #[inline]
    pub fn location(&self) -> &ShardLocation {
        &self.location
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
/// The opaque identity of a range mapping.
pub struct MappingId(Uuid);

impl MappingId {
    /// Rebuilds an id previously read with [MappingId::as_uuid].
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The binding of a range of keys to the shard which owns them.
pub struct Mapping<K> {
    id: MappingId,
    range: ShardRange<K>,
    shard: Shard,
}

impl<K> Mapping<K> {
    pub(crate) fn new(range: ShardRange<K>, shard: Shard) -> Self {
        Self {
            id: MappingId(Uuid::new_v4()),
            range,
            shard,
        }
    }

    /// Rebuilds a mapping loaded from a [crate::RegistryStore].
    pub fn restore(id: MappingId, range: ShardRange<K>, shard: Shard) -> Self {
        Self { id, range, shard }
    }

    #[inline]
    pub fn id(&self) -> MappingId {
        self.id
    }

    #[inline]
    pub fn range(&self) -> &ShardRange<K> {
        &self.range
    }

    #[inline]
    pub fn shard(&self) -> &Shard {
        &self.shard
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Reports whether a get-or-create call produced a new entry.
pub enum CreateStatus {
    Created,
    AlreadyExisted,
}

impl CreateStatus {
    #[inline]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }
}
