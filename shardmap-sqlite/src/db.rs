use std::io;
use std::path::Path;
use std::time::Duration;

use flume::{self, Receiver, Sender};
use futures::channel::oneshot;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Params, Row};

use crate::error::SqliteShardError;

type Task = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

const CAPACITY: usize = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// A asynchronous wrapper around a single SQLite connection.
///
/// Statements are ran on a dedicated background thread which owns the
/// connection, preventing any IO from blocking the async context.
/// The connection is closed once every clone of the handle has been dropped.
pub struct DatabaseHandle {
    tx: Sender<Task>,
}

impl DatabaseHandle {
    /// Opens the SQLite database at the given path, creating it if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SqliteShardError> {
        let tx = setup_database(path, OpenFlags::default()).await?;
        Ok(Self { tx })
    }

    /// Opens the SQLite database at the given path, failing if it does not exist.
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self, SqliteShardError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let tx = setup_database(path, flags).await?;
        Ok(Self { tx })
    }

    /// Connects to a new in-memory SQLite database.
    pub async fn open_in_memory() -> Result<Self, SqliteShardError> {
        Self::open(":memory:").await
    }

    /// Execute a SQL statement with some provided parameters.
    pub async fn execute<P>(
        &self,
        sql: impl AsRef<str>,
        params: P,
    ) -> Result<usize, SqliteShardError>
    where
        P: Params + Send + 'static,
    {
        let sql = sql.as_ref().to_string();
        self.submit_task(move |conn| {
            let mut prepared = conn.prepare_cached(&sql)?;
            prepared.execute(params)
        })
        .await
    }

    /// Execute an insert statement returning the rowid of the inserted row.
    pub async fn insert<P>(
        &self,
        sql: impl AsRef<str>,
        params: P,
    ) -> Result<i64, SqliteShardError>
    where
        P: Params + Send + 'static,
    {
        let sql = sql.as_ref().to_string();
        self.submit_task(move |conn| {
            let mut prepared = conn.prepare_cached(&sql)?;
            prepared.insert(params)
        })
        .await
    }

    /// Execute several `;` separated statements without any parameters.
    pub async fn execute_batch(&self, sql: impl AsRef<str>) -> Result<(), SqliteShardError> {
        let sql = sql.as_ref().to_string();
        self.submit_task(move |conn| conn.execute_batch(&sql)).await
    }

    /// Fetch a single row from a given SQL statement with some provided parameters.
    pub async fn fetch_one<P, T>(
        &self,
        sql: impl AsRef<str>,
        params: P,
    ) -> Result<Option<T>, SqliteShardError>
    where
        P: Params + Send + 'static,
        T: FromRow + Send + 'static,
    {
        let sql = sql.as_ref().to_string();

        self.submit_task(move |conn| {
            let mut prepared = conn.prepare_cached(&sql)?;
            prepared.query_row(params, T::from_row).optional()
        })
        .await
    }

    /// Fetch a all rows from a given SQL statement with some provided parameters.
    pub async fn fetch_all<P, T>(
        &self,
        sql: impl AsRef<str>,
        params: P,
    ) -> Result<Vec<T>, SqliteShardError>
    where
        P: Params + Send + 'static,
        T: FromRow + Send + 'static,
    {
        let sql = sql.as_ref().to_string();

        self.submit_task(move |conn| {
            let mut prepared = conn.prepare_cached(&sql)?;
            let mut iter = prepared.query(params)?;

            let mut rows = Vec::with_capacity(4);
            while let Some(row) = iter.next()? {
                rows.push(T::from_row(row)?);
            }

            Ok(rows)
        })
        .await
    }

    /// Submits a task to run against the connection on the background thread.
    async fn submit_task<CB, T>(&self, inner: CB) -> Result<T, SqliteShardError>
    where
        T: Send + 'static,
        CB: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let cb = move |conn: &mut Connection| {
            let res = inner(conn);
            let _ = tx.send(res);
        };

        self.tx
            .send_async(Box::new(cb))
            .await
            .map_err(|_| SqliteShardError::Disconnected)?;

        let res = rx.await.map_err(|_| SqliteShardError::Disconnected)?;
        Ok(res?)
    }
}

/// A helper trait for converting between a Row reference and the given type.
///
/// This is required due to the nature of rows being tied to the database connection
/// which cannot be shared outside of the thread the connection lives on.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

async fn setup_database(
    path: impl AsRef<Path>,
    flags: OpenFlags,
) -> Result<Sender<Task>, SqliteShardError> {
    let path = path.as_ref().to_path_buf();
    let (tx, rx) = flume::bounded(CAPACITY);

    tokio::task::spawn_blocking(move || setup_disk_handle(&path, flags, rx))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

    Ok(tx)
}

fn setup_disk_handle(
    path: &Path,
    flags: OpenFlags,
    tasks: Receiver<Task>,
) -> Result<(), SqliteShardError> {
    let disk = Connection::open_with_flags(path, flags)?;

    disk.query_row("pragma journal_mode = WAL;", (), |_r| Ok(()))?;
    disk.execute("pragma synchronous = normal;", ())?;
    disk.execute("pragma temp_store = memory;", ())?;
    disk.busy_timeout(BUSY_TIMEOUT)?;

    std::thread::Builder::new()
        .name("shardmap-sqlite".to_string())
        .spawn(move || run_tasks(disk, tasks))?;

    Ok(())
}

/// Runs all tasks received with a mutable reference to the given connection.
///
/// Returns once every sender has been dropped, closing the connection.
fn run_tasks(mut conn: Connection, tasks: Receiver<Task>) {
    while let Ok(task) = tasks.recv() {
        (task)(&mut conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_handle() {
        let handle = DatabaseHandle::open_in_memory().await.expect("open DB");

        run_database_handle_suite(handle).await;
    }

    #[tokio::test]
    async fn test_disk_database_handle() {
        let path = test_helper::temp_dir().join("handle.db");
        let handle = DatabaseHandle::open(path).await.expect("open DB");

        run_database_handle_suite(handle).await;
    }

    #[tokio::test]
    async fn test_open_existing_requires_database() {
        let path = test_helper::temp_dir().join("missing.db");
        let res = DatabaseHandle::open_existing(&path).await;
        assert!(res.is_err(), "Missing database should not be created.");
        assert!(!path.exists());

        let handle = DatabaseHandle::open(&path).await.expect("open DB");
        drop(handle);

        DatabaseHandle::open_existing(&path)
            .await
            .expect("Existing database should open");
    }

    #[derive(Debug, Eq, PartialEq)]
    struct Region {
        id: i64,
        name: String,
    }

    impl FromRow for Region {
        fn from_row(row: &Row) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        }
    }

    async fn run_database_handle_suite(handle: DatabaseHandle) {
        handle
            .execute_batch(
                "CREATE TABLE region (
                    id    INTEGER PRIMARY KEY,
                    name  TEXT NOT NULL
                );",
            )
            .await
            .expect("create table");

        let res = handle
            .fetch_one::<_, Region>("SELECT id, name FROM region;", ())
            .await
            .expect("execute statement");
        assert!(res.is_none(), "Expected no rows to be returned.");

        let rowid = handle
            .insert("INSERT INTO region (id, name) VALUES (?1, ?2);", (1, "emea"))
            .await
            .expect("Insert row");
        assert_eq!(rowid, 1);

        let res = handle
            .fetch_one::<_, Region>("SELECT id, name FROM region;", ())
            .await
            .expect("execute statement");
        assert_eq!(
            res,
            Some(Region {
                id: 1,
                name: "emea".to_string(),
            }),
        );

        handle
            .execute(
                "INSERT INTO region (id, name) VALUES (?1, ?2);",
                (2, "apac".to_string()),
            )
            .await
            .expect("Insert row");

        let res = handle
            .fetch_all::<_, Region>("SELECT id, name FROM region ORDER BY id ASC;", ())
            .await
            .expect("execute statement");
        assert_eq!(
            res,
            vec![
                Region {
                    id: 1,
                    name: "emea".to_string(),
                },
                Region {
                    id: 2,
                    name: "apac".to_string(),
                },
            ],
        );

        let err = handle
            .execute("INSERT INTO region (id, name) VALUES (1, 'dupe');", ())
            .await
            .expect_err("Duplicate primary key");
        assert!(matches!(err, SqliteShardError::Sqlite(_)));
    }
}
