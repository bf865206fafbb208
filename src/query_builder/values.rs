use crate::error::{Result, SqlDbError};
use crate::query::QueryAndParams;
use crate::types::RowValues;

use super::{ColumnValues, StatementBuilder, no_values};

impl StatementBuilder<'_> {
    /// `INSERT INTO <table>("c1",...) VALUES(...)` with columns in sorted order.
    ///
    /// # Errors
    /// `CallerError` for an empty map, `ConfigError` for invalid identifiers.
    pub fn insert(&self, table: &str, values: &ColumnValues) -> Result<QueryAndParams> {
        if values.is_empty() {
            return Err(no_values("insert"));
        }
        let (sql, _) = self.insert_head(table, values.keys().map(String::as_str))?;
        Ok(QueryAndParams::new(sql, values.values().cloned().collect()))
    }

    /// Insert unless `on_conflict` collides. The statement returns one row
    /// holding `TRUE` when the row was inserted and no rows otherwise.
    ///
    /// # Errors
    /// As [`StatementBuilder::insert`].
    pub fn insert_unique(
        &self,
        table: &str,
        values: &ColumnValues,
        on_conflict: &str,
    ) -> Result<QueryAndParams> {
        let mut qp = self.insert(table, values)?;
        qp.query
            .push_str(&format!(" ON CONFLICT ({on_conflict}) DO NOTHING RETURNING TRUE"));
        Ok(qp)
    }

    /// Insert and append `RETURNING <returning>` verbatim.
    ///
    /// # Errors
    /// As [`StatementBuilder::insert`].
    pub fn insert_returning(
        &self,
        table: &str,
        values: &ColumnValues,
        returning: &str,
    ) -> Result<QueryAndParams> {
        let mut qp = self.insert(table, values)?;
        qp.query.push_str(" RETURNING ");
        qp.query.push_str(returning);
        Ok(qp)
    }

    /// `UPDATE <table> SET "c"=<ph>,... WHERE <where_clause>`.
    ///
    /// With numbered placeholders, `where_args` bind first (`$1..$k`) and the
    /// set values follow. Positional dialects bind the set values first since
    /// they appear first in the text.
    ///
    /// # Errors
    /// `CallerError` for an empty map, `ConfigError` for invalid identifiers.
    pub fn update(
        &self,
        table: &str,
        values: &ColumnValues,
        where_clause: &str,
        where_args: &[RowValues],
    ) -> Result<QueryAndParams> {
        if values.is_empty() {
            return Err(no_values("update"));
        }
        let table = self.formatter.format_table_name(table)?;
        let positional = self.formatter.placeholder_style().is_positional();
        let offset = if positional { 0 } else { where_args.len() };

        let mut sets = Vec::with_capacity(values.len());
        for (idx, column) in values.keys().enumerate() {
            sets.push(format!(
                "{}={}",
                self.quoted(column)?,
                self.formatter.placeholder(offset + idx)
            ));
        }
        let mut sql = format!("UPDATE {table} SET {}", sets.join(","));
        if !where_clause.trim().is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }

        let mut params = Vec::with_capacity(values.len() + where_args.len());
        if positional {
            params.extend(values.values().cloned());
            params.extend_from_slice(where_args);
        } else {
            params.extend_from_slice(where_args);
            params.extend(values.values().cloned());
        }
        Ok(QueryAndParams::new(sql, params))
    }

    /// Insert, or update every non-conflict column when a row with the same
    /// `conflict_columns` exists.
    ///
    /// # Errors
    /// `CallerError` for an empty map; `ConfigError` when `conflict_columns`
    /// is empty or names a column missing from `values`.
    pub fn upsert(
        &self,
        table: &str,
        values: &ColumnValues,
        conflict_columns: &[&str],
    ) -> Result<QueryAndParams> {
        if conflict_columns.is_empty() {
            return Err(SqlDbError::ConfigError(format!(
                "upsert into {table} needs at least one conflict column"
            )));
        }
        if let Some(missing) = conflict_columns.iter().find(|c| !values.contains_key(**c)) {
            return Err(SqlDbError::ConfigError(format!(
                "conflict column {missing:?} has no value"
            )));
        }
        let mut qp = self.insert(table, values)?;
        let updates: Vec<(usize, &str)> = values
            .keys()
            .enumerate()
            .filter(|(_, c)| !conflict_columns.contains(&c.as_str()))
            .map(|(idx, c)| (idx, c.as_str()))
            .collect();
        self.append_on_conflict(&mut qp, conflict_columns.iter().copied(), &updates)?;
        Ok(qp)
    }

    /// `ON CONFLICT("k",...) DO UPDATE SET "c"=<ph>,...` where each update
    /// reuses the placeholder of its inserted value. Positional dialects cannot
    /// refer back, so the value is bound again.
    pub(super) fn append_on_conflict<'c>(
        &self,
        qp: &mut QueryAndParams,
        conflict_columns: impl IntoIterator<Item = &'c str>,
        updates: &[(usize, &str)],
    ) -> Result<()> {
        qp.query.push_str(&format!(
            " ON CONFLICT({})",
            self.column_list(conflict_columns)?
        ));
        if updates.is_empty() {
            qp.query.push_str(" DO NOTHING");
            return Ok(());
        }
        let positional = self.formatter.placeholder_style().is_positional();
        let mut sets = Vec::with_capacity(updates.len());
        for &(idx, column) in updates {
            let placeholder = if positional {
                let value = qp.params.get(idx).cloned().unwrap_or(RowValues::Null);
                qp.params.push(value);
                self.formatter.placeholder(qp.params.len() - 1)
            } else {
                self.formatter.placeholder(idx)
            };
            sets.push(format!("{}={placeholder}", self.quoted(column)?));
        }
        qp.query.push_str(" DO UPDATE SET ");
        qp.query.push_str(&sets.join(","));
        Ok(())
    }
}
