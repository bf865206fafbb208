//! The seam between the façade and concrete database drivers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::format::QueryFormatter;
use crate::listener::NotificationConnector;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Pool counters reported by [`DriverPool::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections, idle or checked out.
    pub connections: u32,
    pub idle_connections: u32,
    pub max_size: u32,
}

/// One physical connection checked out of a pool.
///
/// Parameters arrive already adapted by the dialect formatter.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run a statement and return the affected row count.
    async fn execute(&mut self, query: &str, params: &[RowValues]) -> Result<usize>;

    /// Run a statement and materialize its rows.
    async fn query(&mut self, query: &str, params: &[RowValues]) -> Result<ResultSet>;

    /// Run one or more statements without parameters.
    async fn batch_execute(&mut self, sql: &str) -> Result<()>;

    async fn ping(&mut self) -> Result<()>;

    /// Keep the pool from reusing this connection once it is returned.
    ///
    /// Used when the session state is unknown, e.g. after a failed `ROLLBACK`.
    fn mark_broken(&mut self);
}

/// A pool of driver connections plus the dialect that speaks to them.
#[async_trait]
pub trait DriverPool: Send + Sync {
    fn formatter(&self) -> Arc<dyn QueryFormatter>;

    /// # Errors
    /// Pool checkout or connect failures, or `ConnectionError` once closed.
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>>;

    fn stats(&self) -> PoolStats;

    /// Stop handing out connections and drop idle ones.
    async fn close(&self) -> Result<()>;

    /// Identifies the target database; keys the notification listener.
    fn connect_string(&self) -> String;

    /// A source of dedicated notification connections, for dialects with
    /// LISTEN/NOTIFY.
    fn notification_connector(&self) -> Option<Arc<dyn NotificationConnector>> {
        None
    }
}
