use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection};
use rusqlite::{InterruptHandle, OpenFlags};
use tokio::sync::Mutex;
use tracing::debug;

use crate::driver::{DriverConnection, DriverPool, PoolStats};
use crate::error::{Result, SqlDbError};
use crate::format::{QueryFormatter, SqliteDialect};
use crate::results::ResultSet;
use crate::types::RowValues;

use super::params::convert;
use super::query::build_result_set;

pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A pooled SQLite connection plus the handle that interrupts its running statement.
pub struct SqliteHandle {
    conn: SharedSqliteConnection,
    interrupt: Arc<InterruptHandle>,
    broken: bool,
}

/// bb8 manager for rusqlite connections.
pub struct SqliteManager {
    path: String,
    read_only: bool,
}

impl SqliteManager {
    #[must_use]
    pub fn new(path: impl Into<String>, read_only: bool) -> Self {
        Self {
            path: path.into(),
            read_only,
        }
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        is_memory_path(&self.path)
    }
}

fn is_memory_path(path: &str) -> bool {
    path.is_empty() || path == ":memory:" || path.contains("mode=memory")
}

impl ManageConnection for SqliteManager {
    type Connection = SqliteHandle;
    type Error = SqlDbError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        let read_only = self.read_only;
        let file_backed = !self.is_memory();
        async move {
            debug!(path = %path, read_only, "sqlite connect");
            let conn = tokio::task::spawn_blocking(move || -> Result<rusqlite::Connection> {
                let flags = if read_only {
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                        | OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX
                } else {
                    OpenFlags::default()
                };
                let conn = rusqlite::Connection::open_with_flags(&path, flags)?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                if file_backed && !read_only {
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
                }
                Ok(conn)
            })
            .await
            .map_err(|e| SqlDbError::ConnectionError(format!("sqlite open task failed: {e}")))??;
            Ok(SqliteHandle {
                interrupt: Arc::new(conn.get_interrupt_handle()),
                conn: Arc::new(Mutex::new(conn)),
                broken: false,
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(&conn.conn);
        async move {
            run_blocking(handle, |c| Ok(c.query_row("SELECT 1", [], |_| Ok(()))?)).await
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken
    }
}

/// Run `func` against the connection on the blocking pool.
pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| SqlDbError::ExecutionError(format!("sqlite blocking task failed: {e}")))?
}

/// A bb8 pool of SQLite connections. In-memory databases get a single
/// connection so every checkout sees the same database.
pub struct SqlitePool {
    pool: RwLock<Option<Pool<SqliteManager>>>,
    path: String,
    max_size: u32,
}

impl SqlitePool {
    /// Build the pool and open one connection to surface path and permission
    /// errors early.
    ///
    /// # Errors
    /// Returns the open error, or `ConnectionError` if the pool cannot be built.
    pub async fn new(path: impl Into<String>, read_only: bool, max_size: u32) -> Result<Self> {
        let path = path.into();
        let manager = SqliteManager::new(path.clone(), read_only);
        let max_size = if manager.is_memory() { 1 } else { max_size.max(1) };
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .await
            .map_err(|e| SqlDbError::ConnectionError(format!("sqlite pool error: {e}")))?;
        pool.get().await?;
        Ok(Self {
            pool: RwLock::new(Some(pool)),
            path,
            max_size,
        })
    }

    fn pool(&self) -> Result<Pool<SqliteManager>> {
        self.pool
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SqlDbError::ConnectionError("sqlite pool is closed".into()))
    }
}

#[async_trait]
impl DriverPool for SqlitePool {
    fn formatter(&self) -> Arc<dyn QueryFormatter> {
        Arc::new(SqliteDialect)
    }

    async fn acquire(&self) -> Result<Box<dyn DriverConnection>> {
        let conn = self.pool()?.get_owned().await?;
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn stats(&self) -> PoolStats {
        let Ok(pool) = self.pool() else {
            return PoolStats {
                max_size: self.max_size,
                ..PoolStats::default()
            };
        };
        let state = pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
            max_size: self.max_size,
        }
    }

    async fn close(&self) -> Result<()> {
        self.pool
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn connect_string(&self) -> String {
        format!("sqlite://{}", self.path)
    }
}

struct SqliteConnection {
    conn: PooledConnection<'static, SqliteManager>,
}

/// Interrupts the running statement if the awaiting future is dropped.
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    armed: bool,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.interrupt();
        }
    }
}

impl SqliteConnection {
    async fn run<F, R>(&self, func: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut guard = InterruptOnDrop {
            handle: Arc::clone(&self.conn.interrupt),
            armed: true,
        };
        let result = run_blocking(Arc::clone(&self.conn.conn), func).await;
        guard.armed = false;
        result
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    async fn execute(&mut self, query: &str, params: &[RowValues]) -> Result<usize> {
        let query = query.to_string();
        let values = convert(params);
        self.run(move |c| {
            let mut stmt = c.prepare_cached(&query)?;
            Ok(stmt.execute(rusqlite::params_from_iter(values.iter()))?)
        })
        .await
    }

    async fn query(&mut self, query: &str, params: &[RowValues]) -> Result<ResultSet> {
        let query = query.to_string();
        let values = convert(params);
        self.run(move |c| {
            let mut stmt = c.prepare_cached(&query)?;
            build_result_set(&mut stmt, &values)
        })
        .await
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.run(move |c| Ok(c.execute_batch(&sql)?)).await
    }

    async fn ping(&mut self) -> Result<()> {
        self.run(|c| Ok(c.query_row("SELECT 1", [], |_| Ok(()))?)).await
    }

    fn mark_broken(&mut self) {
        self.conn.broken = true;
    }
}
