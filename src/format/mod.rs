//! Dialect formatting: identifier quoting, placeholders, transaction
//! statements and human-readable query rendering.

mod debug;
mod dialect;

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{DriverKind, RowValues, TxOptions};
use crate::values::array_to_json;

pub use debug::{dedent, format_query_with, format_value, pg_array_literal, quote_string_literal};
pub use dialect::{MssqlDialect, MysqlDialect, PostgresDialect, SqliteDialect};

/// How a dialect spells bound-argument placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `<prefix><n>` with `n` starting at 1, e.g. `$1`, `?1`, `@p1`.
    Numbered(&'static str),
    /// A bare `?` per argument, in order.
    Positional,
}

impl PlaceholderStyle {
    /// Placeholder for the argument at zero-based `index`.
    #[must_use]
    pub fn render(self, index: usize) -> String {
        match self {
            PlaceholderStyle::Numbered(prefix) => format!("{prefix}{}", index + 1),
            PlaceholderStyle::Positional => "?".to_string(),
        }
    }

    #[must_use]
    pub fn is_positional(self) -> bool {
        matches!(self, PlaceholderStyle::Positional)
    }
}

/// Dialect-specific SQL formatting.
pub trait QueryFormatter: Send + Sync + Debug {
    fn dialect_name(&self) -> &'static str;

    fn driver_kind(&self) -> DriverKind;

    /// # Errors
    /// Returns `ConfigError` when `name` is not a valid identifier for this dialect.
    fn validate_identifier(&self, name: &str) -> Result<()>;

    /// Quote an identifier that already passed validation.
    fn quote_unchecked(&self, name: &str) -> String;

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// # Errors
    /// Returns `ConfigError` for invalid identifiers.
    fn quote_identifier(&self, name: &str) -> Result<String> {
        self.validate_identifier(name)?;
        Ok(self.quote_unchecked(name))
    }

    /// Validate a possibly schema-qualified table name and return it unquoted.
    ///
    /// # Errors
    /// Returns `ConfigError` if any dot-separated part is invalid.
    fn format_table_name(&self, name: &str) -> Result<String> {
        for part in name.split('.') {
            self.validate_identifier(part)?;
        }
        Ok(name.to_string())
    }

    /// Placeholder for the argument at zero-based `index`.
    fn placeholder(&self, index: usize) -> String {
        self.placeholder_style().render(index)
    }

    fn quote_string_literal(&self, s: &str) -> String {
        quote_string_literal(s)
    }

    /// Convert an argument into the form this dialect binds.
    ///
    /// Dialects without native arrays receive arrays as JSON text.
    fn adapt_array(&self, value: RowValues) -> RowValues {
        match value {
            RowValues::Array(items) => RowValues::Text(array_to_json(&items).to_string()),
            other => other,
        }
    }

    fn format_value_for_debug(&self, value: &RowValues) -> String {
        format_value(&self.adapt_array(value.clone()))
    }

    /// Substitute `args` for placeholders and normalize whitespace.
    fn format_query_for_debug(&self, query: &str, args: &[RowValues]) -> String {
        let rendered: Vec<String> = args.iter().map(|a| self.format_value_for_debug(a)).collect();
        dedent(&format_query_with(query, self.placeholder_style(), &rendered))
    }

    fn supports_notifications(&self) -> bool {
        false
    }

    /// Statements that open a transaction, in order.
    fn begin_statements(&self, options: &TxOptions) -> Vec<String>;

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    /// `None` when the dialect has no release statement.
    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {name}"))
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK"
    }
}

/// The formatter for a driver kind.
#[must_use]
pub fn formatter_for(kind: DriverKind) -> Arc<dyn QueryFormatter> {
    match kind {
        DriverKind::Postgres => Arc::new(PostgresDialect),
        DriverKind::Sqlite => Arc::new(SqliteDialect),
        DriverKind::Mysql => Arc::new(MysqlDialect),
        DriverKind::Mssql => Arc::new(MssqlDialect),
    }
}
