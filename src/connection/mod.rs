//! The connection handle.
//!
//! A [`Connection`] is a cheap, cloneable value. Clones share the pool, the
//! dialect formatter and the field mapper; [`Connection::with_context`] and
//! [`Connection::begin`] return new handles that differ only in their context
//! or transaction level.

mod exec;
mod structs;
mod tx;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::info;

use crate::config::Config;
use crate::context::Context;
use crate::driver::{DriverConnection, DriverPool, PoolStats};
use crate::error::{Result, SqlDbError};
use crate::format::QueryFormatter;
use crate::listener::{ListenerRegistry, NotificationConnector, NotifyCallback, UnlistenCallback};
use crate::mapping::{FieldMapper, TaggedFieldMapper};
use crate::query_builder::StatementBuilder;
use crate::types::IsolationLevel;

use tx::TxLevel;

/// Settings shared by every handle derived from one root connection.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub mapper: Arc<dyn FieldMapper>,
    /// Isolation used by `begin` when the options do not name one.
    pub default_isolation: Option<IsolationLevel>,
    pub listeners: ListenerRegistry,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            mapper: Arc::new(TaggedFieldMapper::default()),
            default_isolation: None,
            listeners: ListenerRegistry::global().clone(),
        }
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("default_isolation", &self.default_isolation)
            .finish_non_exhaustive()
    }
}

struct Shared {
    pool: Arc<dyn DriverPool>,
    formatter: Arc<dyn QueryFormatter>,
    mapper: Arc<dyn FieldMapper>,
    default_isolation: Option<IsolationLevel>,
    listeners: ListenerRegistry,
    config: Option<Config>,
    closed: AtomicBool,
}

/// A handle on a database, either at the root or inside a transaction.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    tx: Option<Arc<TxLevel>>,
    ctx: Context,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("dialect", &self.shared.formatter.dialect_name())
            .field("target", &self.shared.pool.connect_string())
            .field("tx_depth", &self.tx_depth())
            .finish_non_exhaustive()
    }
}

/// A driver connection checked out for one operation.
enum Checkout {
    Pooled(Box<dyn DriverConnection>),
    Tx(OwnedMutexGuard<Box<dyn DriverConnection>>),
}

impl Checkout {
    fn conn(&mut self) -> &mut dyn DriverConnection {
        match self {
            Checkout::Pooled(conn) => &mut **conn,
            Checkout::Tx(guard) => &mut ***guard,
        }
    }
}

impl Connection {
    /// A root handle over `pool` with default options.
    #[must_use]
    pub fn new(pool: Arc<dyn DriverPool>) -> Self {
        Self::with_options(pool, ConnectionOptions::default())
    }

    #[must_use]
    pub fn with_options(pool: Arc<dyn DriverPool>, options: ConnectionOptions) -> Self {
        Self::from_parts(pool, options, None)
    }

    pub(crate) fn from_parts(
        pool: Arc<dyn DriverPool>,
        options: ConnectionOptions,
        config: Option<Config>,
    ) -> Self {
        let formatter = pool.formatter();
        Self {
            shared: Arc::new(Shared {
                pool,
                formatter,
                mapper: options.mapper,
                default_isolation: options.default_isolation,
                listeners: options.listeners,
                config,
                closed: AtomicBool::new(false),
            }),
            tx: None,
            ctx: Context::new(),
        }
    }

    /// A clone that carries `ctx` for every operation it issues.
    #[must_use]
    pub fn with_context(&self, ctx: Context) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
            ctx,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The settings this handle was opened from, if it came from
    /// [`Connection::connect`].
    #[must_use]
    pub fn config(&self) -> Option<&Config> {
        self.shared.config.as_ref()
    }

    #[must_use]
    pub fn formatter(&self) -> &Arc<dyn QueryFormatter> {
        &self.shared.formatter
    }

    #[must_use]
    pub fn mapper(&self) -> &Arc<dyn FieldMapper> {
        &self.shared.mapper
    }

    #[must_use]
    pub fn default_isolation(&self) -> Option<IsolationLevel> {
        self.shared.default_isolation
    }

    /// A statement builder for this connection's dialect and mapper.
    #[must_use]
    pub fn statements(&self) -> StatementBuilder<'_> {
        StatementBuilder::new(self.shared.formatter.as_ref(), self.shared.mapper.as_ref())
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Identifies the target database.
    #[must_use]
    pub fn connect_string(&self) -> String {
        self.shared.pool.connect_string()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Check the database answers within `timeout`.
    ///
    /// # Errors
    /// `DeadlineExceeded` on timeout, or the driver error.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        let ctx = self.ctx.with_timeout(timeout);
        ctx.run(async {
            let mut checkout = self.checkout().await?;
            checkout.conn().ping().await
        })
        .await
    }

    /// Roll back when inside a transaction, otherwise close the pool.
    ///
    /// Closing the root is idempotent; handles cloned from it fail afterwards
    /// with `ConnectionError`.
    ///
    /// # Errors
    /// Rollback or pool close failures.
    pub async fn close(&self) -> Result<()> {
        if self.tx.is_some() {
            return self.rollback().await;
        }
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.pool.close().await?;
        info!(target_db = %self.connect_string(), "connection closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SqlDbError::ConnectionError("connection is closed".into()));
        }
        Ok(())
    }

    async fn checkout(&self) -> Result<Checkout> {
        self.ensure_open()?;
        match &self.tx {
            Some(level) => {
                level.ensure_active()?;
                Ok(Checkout::Tx(level.lock_conn().await))
            }
            None => Ok(Checkout::Pooled(self.shared.pool.acquire().await?)),
        }
    }

    /// Subscribe to a notification channel.
    ///
    /// # Errors
    /// `NotSupported` for dialects without LISTEN/NOTIFY, otherwise connect
    /// or `LISTEN` failures.
    pub async fn listen(
        &self,
        channel: &str,
        on_notify: NotifyCallback,
        on_unlisten: Option<UnlistenCallback>,
    ) -> Result<()> {
        self.ensure_open()?;
        let connector = self.notification_support()?;
        self.ctx
            .run(self.shared.listeners.listen(
                &self.connect_string(),
                connector.as_ref(),
                channel,
                on_notify,
                on_unlisten,
            ))
            .await
    }

    /// # Errors
    /// `NotSupported` for dialects without LISTEN/NOTIFY, or `UNLISTEN` failures.
    pub async fn unlisten(&self, channel: &str) -> Result<()> {
        self.notification_support()?;
        self.ctx
            .run(self.shared.listeners.unlisten(&self.connect_string(), channel))
            .await
    }

    /// # Errors
    /// `NotSupported` for dialects without LISTEN/NOTIFY.
    pub fn is_listening(&self, channel: &str) -> Result<bool> {
        self.notification_support()?;
        Ok(self
            .shared
            .listeners
            .is_listening(&self.connect_string(), channel))
    }

    fn notification_support(&self) -> Result<Arc<dyn NotificationConnector>> {
        let unsupported = || {
            SqlDbError::NotSupported(format!(
                "{} has no LISTEN/NOTIFY",
                self.shared.formatter.dialect_name()
            ))
        };
        if !self.shared.formatter.supports_notifications() {
            return Err(unsupported());
        }
        self.shared.pool.notification_connector().ok_or_else(unsupported)
    }
}

#[cfg(test)]
mod tests;
