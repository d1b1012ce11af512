use std::io;

use rusqlite::ErrorCode;
use shardmap_core::{Classify, ErrorClass};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqliteShardError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("The background connection thread has stopped")]
    /// The thread owning the connection has gone away.
    Disconnected,

    #[error("Shard database {0} does not exist")]
    MissingDatabase(String),

    #[error("The shard map registry is invalid: {0}")]
    /// The registry holds data which cannot be loaded into a shard map.
    InvalidRegistry(String),
}

impl Classify for SqliteShardError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => match err.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            Self::Io(err) => match err.kind() {
                io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            Self::Disconnected => ErrorClass::Transient,
            Self::Sqlite(_) | Self::MissingDatabase(_) | Self::InvalidRegistry(_) => {
                ErrorClass::Permanent
            },
        }
    }
}
