use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SqlDbError};
use crate::types::{DriverKind, RowValues, TxOptions};

use super::{PlaceholderStyle, QueryFormatter};

static POSTGRES_IDENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$"));
static GENERIC_IDENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z$_]{1,64}$"));

fn check_identifier(re: &Result<Regex, regex::Error>, dialect: &str, name: &str) -> Result<()> {
    let re = re
        .as_ref()
        .map_err(|e| SqlDbError::ConfigError(format!("identifier pattern: {e}")))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(SqlDbError::ConfigError(format!(
            "invalid {dialect} identifier {name:?}"
        )))
    }
}

fn begin_with_set_transaction(options: &TxOptions, begin: &str) -> Vec<String> {
    let mut statements = Vec::with_capacity(2);
    if let Some(level) = options.isolation {
        statements.push(format!("SET TRANSACTION ISOLATION LEVEL {level}"));
    }
    statements.push(begin.to_string());
    statements
}

/// `PostgreSQL`: `$N` placeholders, double-quoted identifiers, native arrays,
/// LISTEN/NOTIFY.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl QueryFormatter for PostgresDialect {
    fn dialect_name(&self) -> &'static str {
        "postgres"
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Postgres
    }

    fn validate_identifier(&self, name: &str) -> Result<()> {
        check_identifier(&POSTGRES_IDENT, "postgres", name)
    }

    fn quote_unchecked(&self, name: &str) -> String {
        format!("\"{name}\"")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered("$")
    }

    fn adapt_array(&self, value: RowValues) -> RowValues {
        value
    }

    fn format_value_for_debug(&self, value: &RowValues) -> String {
        match value {
            RowValues::Array(items) => {
                super::quote_string_literal(&super::pg_array_literal(items))
            }
            other => super::format_value(other),
        }
    }

    fn supports_notifications(&self) -> bool {
        true
    }

    fn begin_statements(&self, options: &TxOptions) -> Vec<String> {
        let mut sql = String::from("BEGIN");
        if let Some(level) = options.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level.to_sql());
        }
        if options.read_only {
            sql.push_str(" READ ONLY");
        }
        vec![sql]
    }
}

/// `SQLite`: numbered `?N` placeholders, double-quoted identifiers, arrays as JSON text.
///
/// Isolation levels do not apply; read-only transactions are not enforced.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl QueryFormatter for SqliteDialect {
    fn dialect_name(&self) -> &'static str {
        "sqlite"
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn validate_identifier(&self, name: &str) -> Result<()> {
        check_identifier(&GENERIC_IDENT, "sqlite", name)
    }

    fn quote_unchecked(&self, name: &str) -> String {
        format!("\"{name}\"")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered("?")
    }

    fn begin_statements(&self, _options: &TxOptions) -> Vec<String> {
        vec!["BEGIN".to_string()]
    }
}

/// `MySQL`: positional `?` placeholders, backtick identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl QueryFormatter for MysqlDialect {
    fn dialect_name(&self) -> &'static str {
        "mysql"
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Mysql
    }

    fn validate_identifier(&self, name: &str) -> Result<()> {
        check_identifier(&GENERIC_IDENT, "mysql", name)
    }

    fn quote_unchecked(&self, name: &str) -> String {
        format!("`{name}`")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    fn begin_statements(&self, options: &TxOptions) -> Vec<String> {
        let begin = if options.read_only {
            "START TRANSACTION READ ONLY"
        } else {
            "START TRANSACTION"
        };
        begin_with_set_transaction(options, begin)
    }
}

/// SQL Server: `@pN` placeholders, bracketed identifiers, `SAVE TRANSACTION`
/// savepoints without a release statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl QueryFormatter for MssqlDialect {
    fn dialect_name(&self) -> &'static str {
        "mssql"
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Mssql
    }

    fn validate_identifier(&self, name: &str) -> Result<()> {
        check_identifier(&GENERIC_IDENT, "mssql", name)
    }

    fn quote_unchecked(&self, name: &str) -> String {
        format!("[{name}]")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered("@p")
    }

    fn begin_statements(&self, options: &TxOptions) -> Vec<String> {
        begin_with_set_transaction(options, "BEGIN TRANSACTION")
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {name}")
    }

    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {name}")
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT TRANSACTION"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK TRANSACTION"
    }
}
