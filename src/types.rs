use chrono::{DateTime, FixedOffset, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Values that cross the driver boundary, as query arguments or as scanned columns.
///
/// Every driver converts to and from this enum, so mapping and composition code
/// never branches on driver types:
/// ```rust
/// use sqldb::prelude::*;
///
/// let args = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = args;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp without zone, interpreted as UTC
    Timestamp(NaiveDateTime),
    /// Timestamp with a fixed offset
    TimestampTz(DateTime<FixedOffset>),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
    /// One-dimensional or nested array
    Array(Vec<RowValues>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for NULL and for the zero value of each variant: `0`, `0.0`, `false`,
    /// empty text, empty blobs and arrays, the Unix epoch and JSON `null`.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            RowValues::Null => true,
            RowValues::Int(i) => *i == 0,
            RowValues::Float(f) => *f == 0.0,
            RowValues::Text(s) => s.is_empty(),
            RowValues::Bool(b) => !*b,
            RowValues::Timestamp(ts) => ts.and_utc().timestamp() == 0 && ts.and_utc().timestamp_subsec_nanos() == 0,
            RowValues::TimestampTz(ts) => ts.timestamp() == 0 && ts.timestamp_subsec_nanos() == 0,
            RowValues::JSON(v) => v.is_null(),
            RowValues::Blob(b) => b.is_empty(),
            RowValues::Array(a) => a.is_empty(),
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    /// Timestamp in UTC. Text is parsed with the formats SQLite and Postgres emit.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            RowValues::Timestamp(value) => Some(*value),
            RowValues::TimestampTz(value) => Some(value.naive_utc()),
            RowValues::Text(s) => parse_timestamp_text(s).map(|ts| ts.naive_utc()),
            _ => None,
        }
    }

    /// Timestamp with offset; zone-less values are taken as UTC.
    #[must_use]
    pub fn as_timestamp_tz(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            RowValues::TimestampTz(value) => Some(*value),
            RowValues::Timestamp(value) => Some(value.and_utc().fixed_offset()),
            RowValues::Text(s) => parse_timestamp_text(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[RowValues]> {
        if let RowValues::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Short variant name used in conversion error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            RowValues::Int(_) => "int",
            RowValues::Float(_) => "float",
            RowValues::Text(_) => "text",
            RowValues::Bool(_) => "bool",
            RowValues::Timestamp(_) => "timestamp",
            RowValues::TimestampTz(_) => "timestamptz",
            RowValues::Null => "null",
            RowValues::JSON(_) => "json",
            RowValues::Blob(_) => "blob",
            RowValues::Array(_) => "array",
        }
    }
}

fn parse_timestamp_text(s: &str) -> Option<DateTime<FixedOffset>> {
    const ZONED: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f %#z"];
    const NAIVE: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for fmt in ZONED {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    for fmt in NAIVE {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.and_utc().fixed_offset());
        }
    }
    None
}

/// The database driver a configuration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// `PostgreSQL` database
    Postgres,
    /// `SQLite` database
    Sqlite,
    /// `MySQL` / `MariaDB` (formatting only)
    Mysql,
    /// SQL Server (formatting only)
    Mssql,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DriverKind::Postgres => "postgres",
            DriverKind::Sqlite => "sqlite",
            DriverKind::Mysql => "mysql",
            DriverKind::Mssql => "mssql",
        };
        f.write_str(name)
    }
}

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    /// `PostgreSQL` default
    ReadCommitted,
    /// `MySQL` default
    RepeatableRead,
    Serializable,
    /// SQL Server specific
    Snapshot,
}

impl IsolationLevel {
    /// SQL spelling for `SET TRANSACTION` / `BEGIN ... ISOLATION LEVEL`.
    #[must_use]
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

/// What the closure form of `transaction` does when handed a handle that is
/// already inside a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NestedTxPolicy {
    /// Open a savepoint and release or roll back to it.
    #[default]
    Savepoint,
    /// Run inside the outer transaction without BEGIN or COMMIT; errors and
    /// panics still roll the outer transaction back.
    Inherit,
    /// Fail with `WithinTransaction`.
    Reject,
}

/// Options for `begin` and `transaction`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    pub nested: NestedTxPolicy,
}

impl TxOptions {
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn nested(mut self, policy: NestedTxPolicy) -> Self {
        self.nested = policy;
        self
    }
}
