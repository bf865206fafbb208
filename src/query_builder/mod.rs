//! Statement composition: `INSERT`, `UPDATE`, upserts and `RETURNING`
//! variants, from a column-value map or from a mapped record.
//!
//! The builder only produces SQL text and ordered parameters; executing them
//! is the connection's job.

use std::collections::BTreeMap;

use crate::error::{Result, SqlDbError};
use crate::format::QueryFormatter;
use crate::mapping::{FieldMapper, TaggedFieldMapper};
use crate::types::RowValues;

mod records;
mod values;

/// Column name to value. Iteration order is sorted, so composed SQL is
/// deterministic.
pub type ColumnValues = BTreeMap<String, RowValues>;

/// Composes statements for one dialect and field mapper.
#[derive(Clone, Copy)]
pub struct StatementBuilder<'a> {
    formatter: &'a dyn QueryFormatter,
    mapper: &'a dyn FieldMapper,
}

static DEFAULT_MAPPER: TaggedFieldMapper = TaggedFieldMapper::DEFAULT;

impl<'a> StatementBuilder<'a> {
    #[must_use]
    pub fn new(formatter: &'a dyn QueryFormatter, mapper: &'a dyn FieldMapper) -> Self {
        Self { formatter, mapper }
    }

    /// A builder using the default `db` tag mapper.
    #[must_use]
    pub fn with_default_mapper(formatter: &'a dyn QueryFormatter) -> Self {
        Self::new(formatter, &DEFAULT_MAPPER)
    }

    #[must_use]
    pub fn formatter(&self) -> &'a dyn QueryFormatter {
        self.formatter
    }

    #[must_use]
    pub fn mapper(&self) -> &'a dyn FieldMapper {
        self.mapper
    }

    fn quoted(&self, column: &str) -> Result<String> {
        self.formatter.quote_identifier(column)
    }

    /// `"c1","c2",...`
    fn column_list<'c>(&self, columns: impl IntoIterator<Item = &'c str>) -> Result<String> {
        let quoted = columns
            .into_iter()
            .map(|c| self.quoted(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(quoted.join(","))
    }

    /// `INSERT INTO <table>(<columns>) VALUES(<placeholders>)`, placeholders
    /// starting at index 0.
    fn insert_head<'c>(&self, table: &str, columns: impl IntoIterator<Item = &'c str>) -> Result<(String, usize)> {
        let table = self.formatter.format_table_name(table)?;
        let columns: Vec<&str> = columns.into_iter().collect();
        let mut sql = format!("INSERT INTO {table}({}) VALUES(", self.column_list(columns.iter().copied())?);
        for idx in 0..columns.len() {
            if idx > 0 {
                sql.push(',');
            }
            sql.push_str(&self.formatter.placeholder(idx));
        }
        sql.push(')');
        Ok((sql, columns.len()))
    }
}

fn no_values(verb: &str) -> SqlDbError {
    SqlDbError::CallerError(format!("no values to {verb}"))
}

#[cfg(test)]
mod tests;
