use std::sync::Arc;

use crate::error::{Result, SqlDbError};
use crate::mapping::{ColumnFilter, Record};
use crate::query::QueryAndParams;
use crate::query_builder::ColumnValues;
use crate::results::{Row, Rows};
use crate::types::{NestedTxPolicy, RowValues, TxOptions};

use super::Connection;

impl Connection {
    /// # Errors
    /// `CallerError` without values, `ConfigError` for bad identifiers, or
    /// execution errors.
    pub async fn insert(&self, table: &str, values: &ColumnValues) -> Result<usize> {
        let statement = self.statements().insert(table, values)?;
        self.execute_statement(&statement).await
    }

    /// Insert unless the row conflicts on `on_conflict`; true when inserted.
    ///
    /// # Errors
    /// As [`Connection::insert`].
    pub async fn insert_unique(
        &self,
        table: &str,
        values: &ColumnValues,
        on_conflict: &str,
    ) -> Result<bool> {
        let statement = self.statements().insert_unique(table, values, on_conflict)?;
        self.inserted(&statement).await
    }

    /// Insert and return the `returning` expression's row.
    pub async fn insert_returning(
        &self,
        table: &str,
        values: &ColumnValues,
        returning: &str,
    ) -> Row {
        match self.statements().insert_returning(table, values, returning) {
            Ok(statement) => Row::new(self.query_statement(&statement).await),
            Err(err) => self.failed_row(err),
        }
    }

    /// `UPDATE table SET ... WHERE where_clause`, with `where_args` bound
    /// first.
    ///
    /// # Errors
    /// As [`Connection::insert`].
    pub async fn update(
        &self,
        table: &str,
        values: &ColumnValues,
        where_clause: &str,
        where_args: &[RowValues],
    ) -> Result<usize> {
        let statement = self
            .statements()
            .update(table, values, where_clause, where_args)?;
        self.execute_statement(&statement).await
    }

    /// Insert, or update the non-conflict columns when `conflict_columns` collide.
    ///
    /// # Errors
    /// `ConfigError` without conflict columns, otherwise as [`Connection::insert`].
    pub async fn upsert(
        &self,
        table: &str,
        values: &ColumnValues,
        conflict_columns: &[&str],
    ) -> Result<usize> {
        let statement = self.statements().upsert(table, values, conflict_columns)?;
        self.execute_statement(&statement).await
    }

    /// # Errors
    /// As [`Connection::insert`], plus mapping errors.
    pub async fn insert_struct<T: Record>(
        &self,
        table: &str,
        record: &T,
        filters: &[&dyn ColumnFilter],
    ) -> Result<usize> {
        let statement = self.statements().insert_struct(table, record, filters)?;
        self.execute_statement(&statement).await
    }

    /// Insert every record, one statement each, all or nothing.
    ///
    /// Outside a transaction the inserts run in a new one; inside, they join it.
    ///
    /// # Errors
    /// The first composition or execution error; nothing is inserted then.
    pub async fn insert_structs<T: Record>(
        &self,
        table: &str,
        records: &[T],
        filters: &[&dyn ColumnFilter],
    ) -> Result<usize> {
        let statements = self.statements().insert_structs(table, records, filters)?;
        if statements.is_empty() {
            return Ok(0);
        }
        let options = TxOptions::default().nested(NestedTxPolicy::Inherit);
        self.transaction(options, |tx| async move {
            let mut total = 0;
            for statement in &statements {
                total += tx.execute_statement(statement).await?;
            }
            Ok(total)
        })
        .await
    }

    /// # Errors
    /// As [`Connection::insert_struct`].
    pub async fn insert_unique_struct<T: Record>(
        &self,
        table: &str,
        record: &T,
        on_conflict: &str,
        filters: &[&dyn ColumnFilter],
    ) -> Result<bool> {
        let statement = self
            .statements()
            .insert_unique_struct(table, record, on_conflict, filters)?;
        self.inserted(&statement).await
    }

    pub async fn insert_returning_struct<T: Record>(
        &self,
        table: &str,
        record: &T,
        returning: &str,
        filters: &[&dyn ColumnFilter],
    ) -> Row {
        match self
            .statements()
            .insert_returning_struct(table, record, returning, filters)
        {
            Ok(statement) => Row::new(self.query_statement(&statement).await),
            Err(err) => self.failed_row(err),
        }
    }

    /// Update the record's row, matched on its primary key columns.
    ///
    /// # Errors
    /// `ConfigError` when the record has no primary key or table, otherwise
    /// as [`Connection::insert`].
    pub async fn update_struct<T: Record>(&self, record: &T, filters: &[&dyn ColumnFilter]) -> Result<usize> {
        let statement = self.statements().update_struct(record, filters)?;
        self.execute_statement(&statement).await
    }

    /// # Errors
    /// As [`Connection::update_struct`].
    pub async fn upsert_struct<T: Record>(&self, record: &T, filters: &[&dyn ColumnFilter]) -> Result<usize> {
        let statement = self.statements().upsert_struct(record, filters)?;
        self.execute_statement(&statement).await
    }

    async fn inserted(&self, statement: &QueryAndParams) -> Result<bool> {
        match Row::new(self.query_statement(statement).await).scan_value::<bool>() {
            Ok(inserted) => Ok(inserted),
            Err(err) if err.is_no_rows() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn failed_row(&self, err: SqlDbError) -> Row {
        Row::new(Rows::from_error(err, Arc::clone(&self.shared.mapper), self.ctx.clone()))
    }
}
