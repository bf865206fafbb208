use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::driver::{DriverConnection, DriverPool, PoolStats};
use crate::error::{Result, SqlDbError};
use crate::format::{PostgresDialect, QueryFormatter};
use crate::listener::{NotificationConnector, PgNotificationConnector};
use crate::results::ResultSet;
use crate::types::RowValues;

use super::params::as_refs;
use super::query::build_result_set;

/// A pooled Postgres client and whether it must be discarded on return.
pub struct PgClient {
    client: Client,
    broken: bool,
}

impl Deref for PgClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

/// bb8 manager for Postgres clients.
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

impl ManageConnection for PgManager {
    type Connection = PgClient;
    type Error = tokio_postgres::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        async move {
            debug!(
                hosts = ?cfg.get_hosts(),
                dbname = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "postgres connect"
            );
            let (client, connection) = cfg.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "postgres connection task ended with an error");
                }
            });
            Ok(PgClient {
                client,
                broken: false,
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.simple_query("SELECT 1").await.map(|_| ()) }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken || conn.is_closed()
    }
}

/// A bb8 pool of Postgres clients.
pub struct PostgresPool {
    pool: RwLock<Option<Pool<PgManager>>>,
    config: tokio_postgres::Config,
    connect_string: String,
    max_size: u32,
}

impl PostgresPool {
    /// Build a pool; no connection is opened until the first checkout.
    ///
    /// # Errors
    /// Returns `ConnectionError` if the pool cannot be built.
    pub async fn new(
        config: tokio_postgres::Config,
        connect_string: String,
        max_size: u32,
    ) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(PgManager::new(config.clone()))
            .await
            .map_err(|e| SqlDbError::ConnectionError(format!("postgres pool error: {e}")))?;
        Ok(Self {
            pool: RwLock::new(Some(pool)),
            config,
            connect_string,
            max_size,
        })
    }

    fn pool(&self) -> Result<Pool<PgManager>> {
        self.pool
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SqlDbError::ConnectionError("postgres pool is closed".into()))
    }
}

#[async_trait]
impl DriverPool for PostgresPool {
    fn formatter(&self) -> Arc<dyn QueryFormatter> {
        Arc::new(PostgresDialect)
    }

    async fn acquire(&self) -> Result<Box<dyn DriverConnection>> {
        let conn = self.pool()?.get_owned().await?;
        Ok(Box::new(PgConnection { conn }))
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
        // Idle clients are dropped with the last pool handle; checked-out
        // clients are released when their handles drop.
        self.pool
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn connect_string(&self) -> String {
        self.connect_string.clone()
    }

    fn notification_connector(&self) -> Option<Arc<dyn NotificationConnector>> {
        Some(Arc::new(PgNotificationConnector::new(self.config.clone())))
    }
}

struct PgConnection {
    conn: PooledConnection<'static, PgManager>,
}

#[async_trait]
impl DriverConnection for PgConnection {
    async fn execute(&mut self, query: &str, params: &[RowValues]) -> Result<usize> {
        let refs = as_refs(params);
        let rows = self.conn.execute(query, &refs).await?;
        usize::try_from(rows).map_err(|e| {
            SqlDbError::ExecutionError(format!("postgres affected rows conversion error: {e}"))
        })
    }

    async fn query(&mut self, query: &str, params: &[RowValues]) -> Result<ResultSet> {
        let stmt = self.conn.prepare(query).await?;
        let refs = as_refs(params);
        let rows = self.conn.query(&stmt, &refs).await?;
        build_result_set(&stmt, &rows)
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        Ok(self.conn.batch_execute(sql).await?)
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn mark_broken(&mut self) {
        self.conn.broken = true;
    }
}
