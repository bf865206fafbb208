use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use futures_util::FutureExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::driver::DriverConnection;
use crate::error::{Result, SqlDbError, panic_message};
use crate::format::QueryFormatter;
use crate::types::{NestedTxPolicy, TxOptions};

use super::Connection;

const ACTIVE: u8 = 0;
const COMMITTED: u8 = 1;
const ROLLED_BACK: u8 = 2;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// One level of a transaction: the root `BEGIN` at depth 1, a savepoint below it.
pub(super) struct TxLevel {
    id: u64,
    depth: usize,
    options: TxOptions,
    conn: Arc<Mutex<Box<dyn DriverConnection>>>,
    formatter: Arc<dyn QueryFormatter>,
    parent: Option<Arc<TxLevel>>,
    state: AtomicU8,
}

impl TxLevel {
    fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
            && self.parent.as_ref().is_none_or(|p| p.is_active())
    }

    pub(super) fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SqlDbError::TxAlreadyDone)
        }
    }

    pub(super) async fn lock_conn(&self) -> OwnedMutexGuard<Box<dyn DriverConnection>> {
        Arc::clone(&self.conn).lock_owned().await
    }

    /// `sp_<d>` for the savepoint opened from depth `d`.
    fn savepoint_name(&self) -> String {
        format!("sp_{}", self.depth - 1)
    }
}

impl Drop for TxLevel {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        if self.depth > 1 {
            warn!(tx_id = self.id, depth = self.depth, "savepoint dropped without commit or rollback");
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(tx_id = self.id, "transaction dropped while active; rolling back");
                let conn = Arc::clone(&self.conn);
                let sql = self.formatter.rollback_sql();
                let id = self.id;
                handle.spawn(async move {
                    let mut conn = conn.lock().await;
                    if let Err(e) = conn.batch_execute(sql).await {
                        conn.mark_broken();
                        warn!(tx_id = id, error = %e, "rollback of dropped transaction failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    tx_id = self.id,
                    "transaction dropped outside a tokio runtime; it could not be rolled back"
                );
            }
        }
    }
}

impl Connection {
    /// True when this handle is inside a transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// 0 at the root, 1 inside `BEGIN`, one more per savepoint.
    #[must_use]
    pub fn tx_depth(&self) -> usize {
        self.tx.as_ref().map_or(0, |level| level.depth)
    }

    /// Process-unique id of the current transaction level.
    #[must_use]
    pub fn tx_id(&self) -> Option<u64> {
        self.tx.as_ref().map(|level| level.id)
    }

    #[must_use]
    pub fn tx_options(&self) -> Option<TxOptions> {
        self.tx.as_ref().map(|level| level.options)
    }

    /// False once this level or any enclosing one has committed or rolled back.
    #[must_use]
    pub fn tx_active(&self) -> bool {
        self.tx.as_ref().is_some_and(|level| level.is_active())
    }

    /// Start a transaction, or a savepoint when already inside one.
    ///
    /// The returned handle owns the transaction; this handle is unchanged.
    /// Without an explicit isolation level the connection default applies.
    ///
    /// # Errors
    /// Checkout or driver errors from `BEGIN`/`SAVEPOINT`; `TxAlreadyDone`
    /// when the enclosing transaction has finished.
    pub async fn begin(&self, options: TxOptions) -> Result<Connection> {
        self.ensure_open()?;
        let formatter = Arc::clone(&self.shared.formatter);
        let level = match &self.tx {
            None => {
                let mut options = options;
                if options.isolation.is_none() {
                    options.isolation = self.shared.default_isolation;
                }
                let statements = formatter.begin_statements(&options);
                let conn = self
                    .ctx
                    .run(async {
                        let mut conn = self.shared.pool.acquire().await?;
                        for sql in &statements {
                            conn.batch_execute(sql).await.map_err(|e| e.with_query(sql.clone()))?;
                        }
                        Ok(conn)
                    })
                    .await?;
                let level = TxLevel {
                    id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
                    depth: 1,
                    options,
                    conn: Arc::new(Mutex::new(conn)),
                    formatter,
                    parent: None,
                    state: AtomicU8::new(ACTIVE),
                };
                debug!(tx_id = level.id, begin = ?statements, "transaction started");
                level
            }
            Some(parent) => {
                parent.ensure_active()?;
                let level = TxLevel {
                    id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
                    depth: parent.depth + 1,
                    options,
                    conn: Arc::clone(&parent.conn),
                    formatter,
                    parent: Some(Arc::clone(parent)),
                    // Not active until the savepoint exists.
                    state: AtomicU8::new(ROLLED_BACK),
                };
                let sql = level.formatter.savepoint_sql(&level.savepoint_name());
                self.ctx
                    .run(async {
                        let mut conn = level.lock_conn().await;
                        conn.batch_execute(&sql).await.map_err(|e| e.with_query(sql.clone()))
                    })
                    .await?;
                level.state.store(ACTIVE, Ordering::Release);
                debug!(tx_id = level.id, depth = level.depth, "savepoint created");
                level
            }
        };
        Ok(Connection {
            shared: Arc::clone(&self.shared),
            tx: Some(Arc::new(level)),
            ctx: self.ctx.clone(),
        })
    }

    /// Commit, or release the savepoint when nested.
    ///
    /// # Errors
    /// `NotWithinTransaction` at the root, `TxAlreadyDone` when this level
    /// already finished, or the driver error.
    pub async fn commit(&self) -> Result<()> {
        let level = self.tx.as_ref().ok_or(SqlDbError::NotWithinTransaction)?;
        level.ensure_active()?;
        let sql = if level.depth == 1 {
            Some(level.formatter.commit_sql().to_string())
        } else {
            level.formatter.release_savepoint_sql(&level.savepoint_name())
        };
        if let Some(sql) = sql {
            self.ctx
                .run(async {
                    let mut conn = level.lock_conn().await;
                    conn.batch_execute(&sql).await.map_err(|e| e.with_query(sql.clone()))
                })
                .await?;
        }
        level
            .state
            .compare_exchange(ACTIVE, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SqlDbError::TxAlreadyDone)?;
        debug!(tx_id = level.id, depth = level.depth, "committed");
        Ok(())
    }

    /// Roll back, or roll back to the savepoint when nested.
    ///
    /// Runs even when this handle's context is cancelled. The level counts
    /// as finished even if the statement fails; a failed root `ROLLBACK`
    /// marks the connection broken so the pool discards it.
    ///
    /// # Errors
    /// `NotWithinTransaction` at the root, `TxAlreadyDone` when this level
    /// already finished, or the driver error.
    pub async fn rollback(&self) -> Result<()> {
        let level = self.tx.as_ref().ok_or(SqlDbError::NotWithinTransaction)?;
        level.ensure_active()?;
        level
            .state
            .compare_exchange(ACTIVE, ROLLED_BACK, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SqlDbError::TxAlreadyDone)?;
        let sql = if level.depth == 1 {
            level.formatter.rollback_sql().to_string()
        } else {
            level.formatter.rollback_to_savepoint_sql(&level.savepoint_name())
        };
        let mut conn = level.lock_conn().await;
        if let Err(e) = conn.batch_execute(&sql).await {
            if level.depth == 1 {
                conn.mark_broken();
                warn!(tx_id = level.id, error = %e, "rollback failed; discarding connection");
            }
            return Err(e.with_query(sql));
        }
        debug!(tx_id = level.id, depth = level.depth, "rolled back");
        Ok(())
    }

    /// Run `f` inside a transaction.
    ///
    /// `f` receives the transactional handle. Its `Ok` commits; its `Err`
    /// rolls back and is returned, combined with the rollback error if that
    /// failed too. A panic in `f` rolls back and then resumes unwinding.
    ///
    /// On a handle already inside a transaction, `options.nested` picks
    /// between a savepoint, running in the outer transaction as is, or
    /// refusing with `WithinTransaction`.
    ///
    /// ```rust,no_run
    /// # use sqldb::prelude::*;
    /// # async fn demo(conn: Connection) -> Result<(), SqlDbError> {
    /// let id: i64 = conn
    ///     .transaction(TxOptions::default(), |tx| async move {
    ///         tx.execute("INSERT INTO t (name) VALUES ($1)", &args!["a"]?).await?;
    ///         tx.query_value("SELECT max(id) FROM t", &[]).await
    ///     })
    ///     .await?;
    /// # let _ = id;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// `TxBegin` wrapping a failed begin, `f`'s error, `RollbackFailed`, or
    /// the commit error.
    pub async fn transaction<F, Fut, T>(&self, options: TxOptions, f: F) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (tx, owns) = match (&self.tx, options.nested) {
            (Some(_), NestedTxPolicy::Reject) => return Err(SqlDbError::WithinTransaction),
            (Some(level), NestedTxPolicy::Inherit) => {
                level.ensure_active()?;
                (self.clone(), false)
            }
            _ => {
                let tx = self
                    .begin(options)
                    .await
                    .map_err(|e| SqlDbError::TxBegin(Box::new(e)))?;
                (tx, true)
            }
        };

        let fut = match catch_unwind(AssertUnwindSafe(|| f(tx.clone()))) {
            Ok(fut) => fut,
            Err(panic) => {
                rollback_after_panic(&tx, panic_message(panic.as_ref())).await;
                resume_unwind(panic);
            }
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => {
                if owns {
                    tx.commit().await?;
                }
                Ok(value)
            }
            Ok(Err(err)) => match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rollback) if rollback.is_already_done() => Err(err),
                Err(rollback) => {
                    warn!(error = %err, rollback_error = %rollback, "rollback after error failed");
                    Err(SqlDbError::RollbackFailed {
                        error: Box::new(err),
                        rollback: Box::new(rollback),
                    })
                }
            },
            Err(panic) => {
                rollback_after_panic(&tx, panic_message(panic.as_ref())).await;
                resume_unwind(panic);
            }
        }
    }
}

async fn rollback_after_panic(tx: &Connection, message: String) {
    warn!(panic = %message, "transaction callback panicked; rolling back");
    if let Err(e) = tx.rollback().await
        && !e.is_already_done()
    {
        warn!(error = %e, "rollback after panic failed");
    }
}
