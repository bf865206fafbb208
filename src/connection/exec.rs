use std::sync::Arc;

use tracing::{Level, debug, enabled};

use crate::error::Result;
use crate::mapping::Record;
use crate::query::QueryAndParams;
use crate::results::{ResultSet, Row, Rows};
use crate::types::RowValues;
use crate::values::ScanValue;

use super::Connection;

impl Connection {
    fn adapt_args(&self, args: &[RowValues]) -> Vec<RowValues> {
        args.iter()
            .map(|a| self.shared.formatter.adapt_array(a.clone()))
            .collect()
    }

    fn debug_sql(&self, query: &str, args: &[RowValues]) -> String {
        self.shared.formatter.format_query_for_debug(query, args)
    }

    fn log_statement(&self, query: &str, args: &[RowValues]) {
        if enabled!(Level::DEBUG) {
            debug!(tx_depth = self.tx_depth(), sql = %self.debug_sql(query, args), "statement");
        }
    }

    /// Run a statement and return the number of affected rows.
    ///
    /// Driver errors are annotated with the statement rendered for debugging.
    ///
    /// # Errors
    /// Checkout, driver, or cancellation errors.
    pub async fn execute(&self, query: &str, args: &[RowValues]) -> Result<usize> {
        let args = self.adapt_args(args);
        self.log_statement(query, &args);
        self.ctx
            .run(async {
                let mut checkout = self.checkout().await?;
                checkout.conn().execute(query, &args).await
            })
            .await
            .map_err(|e| e.with_query(self.debug_sql(query, &args)))
    }

    /// # Errors
    /// As [`Connection::execute`].
    pub async fn execute_statement(&self, statement: &QueryAndParams) -> Result<usize> {
        self.execute(&statement.query, &statement.params).await
    }

    /// Run one or more statements without arguments.
    ///
    /// # Errors
    /// Checkout, driver, or cancellation errors.
    pub async fn batch_execute(&self, sql: &str) -> Result<()> {
        self.log_statement(sql, &[]);
        self.ctx
            .run(async {
                let mut checkout = self.checkout().await?;
                checkout.conn().batch_execute(sql).await
            })
            .await
            .map_err(|e| e.with_query(sql))
    }

    async fn fetch(&self, query: &str, args: &[RowValues]) -> Result<ResultSet> {
        let args = self.adapt_args(args);
        self.log_statement(query, &args);
        self.ctx
            .run(async {
                let mut checkout = self.checkout().await?;
                checkout.conn().query(query, &args).await
            })
            .await
            .map_err(|e| e.with_query(self.debug_sql(query, &args)))
    }

    /// Run a query and return a cursor over its rows.
    ///
    /// A failed query still yields a cursor; it reports the failure from
    /// [`Rows::err`] and from every scan.
    pub async fn query_rows(&self, query: &str, args: &[RowValues]) -> Rows {
        let mapper = Arc::clone(&self.shared.mapper);
        match self.fetch(query, args).await {
            Ok(set) => Rows::new(set, mapper, self.ctx.clone()),
            Err(err) => Rows::from_error(err, mapper, self.ctx.clone()),
        }
    }

    pub async fn query_statement(&self, statement: &QueryAndParams) -> Rows {
        self.query_rows(&statement.query, &statement.params).await
    }

    /// Run a query and return its first row.
    ///
    /// ```rust,no_run
    /// # use sqldb::prelude::*;
    /// # async fn demo(conn: Connection) -> Result<(), SqlDbError> {
    /// let (mut id, mut name) = (0_i64, String::new());
    /// conn.query_row("SELECT id, name FROM users WHERE email = $1", &args!["a@b.c"]?)
    ///     .await
    ///     .scan(&mut [&mut id, &mut name])?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn query_row(&self, query: &str, args: &[RowValues]) -> Row {
        Row::new(self.query_rows(query, args).await)
    }

    /// The single value of a one-column, one-row query.
    ///
    /// # Errors
    /// `NoRows` on an empty result, query or scan errors.
    pub async fn query_value<T: ScanValue + Default>(&self, query: &str, args: &[RowValues]) -> Result<T> {
        self.query_row(query, args).await.scan_value()
    }

    /// The first row scanned into a record.
    ///
    /// # Errors
    /// `NoRows` on an empty result, query or shape errors.
    pub async fn query_struct<T: Record + Default>(&self, query: &str, args: &[RowValues]) -> Result<T> {
        self.query_row(query, args).await.into_struct()
    }

    /// Every row scanned into a record.
    ///
    /// # Errors
    /// Query or shape errors.
    pub async fn query_struct_slice<T: Record + Default>(
        &self,
        query: &str,
        args: &[RowValues],
    ) -> Result<Vec<T>> {
        self.query_rows(query, args).await.scan_struct_slice()
    }

    /// Every row rendered as strings, optionally preceded by the column names.
    ///
    /// # Errors
    /// Query errors.
    pub async fn query_strings(
        &self,
        query: &str,
        args: &[RowValues],
        include_header: bool,
    ) -> Result<Vec<Vec<String>>> {
        self.query_rows(query, args)
            .await
            .scan_all_rows_as_strings(include_header)
    }
}
