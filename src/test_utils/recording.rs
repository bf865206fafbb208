use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::driver::{DriverConnection, DriverPool, PoolStats};
use crate::error::{Result, SqlDbError};
use crate::format::{QueryFormatter, formatter_for};
use crate::listener::NotificationConnector;
use crate::results::ResultSet;
use crate::types::{DriverKind, RowValues};

/// Which driver call produced a [`RecordedStatement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Execute,
    Query,
    Batch,
    Ping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// Id of the checked-out connection that ran the statement.
    pub connection: u64,
    pub kind: CallKind,
    pub sql: String,
    pub params: Vec<RowValues>,
}

#[derive(Default)]
struct State {
    log: Vec<RecordedStatement>,
    results: VecDeque<ResultSet>,
    failures: Vec<(String, String)>,
    affected_rows: Option<usize>,
    broken: Vec<u64>,
}

struct Inner {
    formatter: Arc<dyn QueryFormatter>,
    state: Mutex<State>,
    notifications: Option<Arc<dyn NotificationConnector>>,
    closed: AtomicBool,
    checked_out: AtomicU32,
    next_connection: AtomicU64,
}

/// An in-memory driver that records every statement and replays scripted
/// results.
///
/// Queries pop the next queued [`ResultSet`] (an empty one when none is
/// queued); executes report one affected row unless told otherwise.
/// Statements containing a registered failure pattern fail with
/// `ExecutionError`.
///
/// ```rust
/// use std::sync::Arc;
/// use sqldb::prelude::*;
/// use sqldb::test_utils::{RecordingDriver, result_set};
///
/// # tokio_test_block(async {
/// let driver = RecordingDriver::new(DriverKind::Postgres);
/// driver.push_result(result_set(&["n"], vec![vec![RowValues::Int(3)]]));
/// let conn = Connection::new(Arc::new(driver.clone()));
/// let n: i64 = conn.query_value("SELECT count(*) FROM t", &[]).await.unwrap();
/// assert_eq!(n, 3);
/// assert_eq!(driver.sql_log(), vec!["SELECT count(*) FROM t"]);
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct RecordingDriver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RecordingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingDriver")
            .field("dialect", &self.inner.formatter.dialect_name())
            .field("statements", &self.state().log.len())
            .finish_non_exhaustive()
    }
}

impl RecordingDriver {
    #[must_use]
    pub fn new(kind: DriverKind) -> Self {
        Self::build(kind, None)
    }

    /// A driver whose connections can also LISTEN through `connector`.
    #[must_use]
    pub fn with_notifications(kind: DriverKind, connector: Arc<dyn NotificationConnector>) -> Self {
        Self::build(kind, Some(connector))
    }

    fn build(kind: DriverKind, notifications: Option<Arc<dyn NotificationConnector>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                formatter: formatter_for(kind),
                state: Mutex::new(State::default()),
                notifications,
                closed: AtomicBool::new(false),
                checked_out: AtomicU32::new(0),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the result of the next query.
    pub fn push_result(&self, set: ResultSet) {
        self.state().results.push_back(set);
    }

    /// Fail every statement whose SQL contains `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>, message: impl Into<String>) {
        self.state().failures.push((pattern.into(), message.into()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Rows reported by every later execute.
    pub fn set_affected_rows(&self, rows: usize) {
        self.state().affected_rows = Some(rows);
    }

    #[must_use]
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state().log.clone()
    }

    /// SQL of every recorded call except pings.
    #[must_use]
    pub fn sql_log(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter(|s| s.kind != CallKind::Ping)
            .map(|s| s.sql.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Ids of connections marked broken, in order.
    #[must_use]
    pub fn broken_connections(&self) -> Vec<u64> {
        self.state().broken.clone()
    }

    /// Connections currently checked out.
    #[must_use]
    pub fn checked_out(&self) -> u32 {
        self.inner.checked_out.load(Ordering::SeqCst)
    }

    fn record(&self, connection: u64, kind: CallKind, sql: &str, params: &[RowValues]) -> Result<()> {
        let mut state = self.state();
        state.log.push(RecordedStatement {
            connection,
            kind,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match state.failures.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, message)) => Err(SqlDbError::ExecutionError(message.clone())),
            None => Ok(()),
        }
    }
}

/// Build a result set from column names and rows.
#[must_use]
pub fn result_set(columns: &[&str], rows: Vec<Vec<RowValues>>) -> ResultSet {
    let mut set = ResultSet::with_capacity(rows.len());
    set.set_column_names(Arc::new(columns.iter().map(|c| (*c).to_string()).collect()));
    for row in rows {
        set.add_row_values(row);
    }
    set
}

#[async_trait]
impl DriverPool for RecordingDriver {
    fn formatter(&self) -> Arc<dyn QueryFormatter> {
        Arc::clone(&self.inner.formatter)
    }

    async fn acquire(&self) -> Result<Box<dyn DriverConnection>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SqlDbError::ConnectionError("recording driver is closed".into()));
        }
        self.inner.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection {
            id: self.inner.next_connection.fetch_add(1, Ordering::SeqCst),
            driver: self.clone(),
        }))
    }

    fn stats(&self) -> PoolStats {
        let checked_out = self.checked_out();
        PoolStats {
            connections: checked_out,
            idle_connections: 0,
            max_size: u32::MAX,
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connect_string(&self) -> String {
        format!("recording://{}", self.inner.formatter.dialect_name())
    }

    fn notification_connector(&self) -> Option<Arc<dyn NotificationConnector>> {
        self.inner.notifications.clone()
    }
}

struct RecordingConnection {
    id: u64,
    driver: RecordingDriver,
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        self.driver.inner.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DriverConnection for RecordingConnection {
    async fn execute(&mut self, query: &str, params: &[RowValues]) -> Result<usize> {
        self.driver.record(self.id, CallKind::Execute, query, params)?;
        Ok(self.driver.state().affected_rows.unwrap_or(1))
    }

    async fn query(&mut self, query: &str, params: &[RowValues]) -> Result<ResultSet> {
        self.driver.record(self.id, CallKind::Query, query, params)?;
        Ok(self.driver.state().results.pop_front().unwrap_or_default())
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.driver.record(self.id, CallKind::Batch, sql, &[])
    }

    async fn ping(&mut self) -> Result<()> {
        self.driver.record(self.id, CallKind::Ping, "ping", &[])
    }

    fn mark_broken(&mut self) {
        self.driver.state().broken.push(self.id);
    }
}
