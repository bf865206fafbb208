//! Convenient imports for common functionality.
//!
//! ```rust
//! use sqldb::prelude::*;
//! ```

pub use crate::args;
pub use crate::config::{Config, ConfigBuilder};
pub use crate::connection::{Connection, ConnectionOptions};
pub use crate::context::Context;
pub use crate::error::{ErrorKind, SqlDbError};
pub use crate::format::{QueryFormatter, formatter_for};
pub use crate::listener::{Notification, NotifyCallback, UnlistenCallback};
pub use crate::mapping::{
    ColumnFilter, IgnoreColumns, IgnoreHasDefault, IgnoreNull, IgnoreNullOrZero,
    IgnoreNullOrZeroDefault, IgnorePrimaryKey, IgnoreReadOnly, OnlyColumns, TaggedFieldMapper,
};
pub use crate::Record;
pub use crate::query::QueryAndParams;
pub use crate::query_builder::{ColumnValues, StatementBuilder};
pub use crate::results::{CustomDbRow, ResultSet, Row, Rows};
pub use crate::types::{DriverKind, IsolationLevel, NestedTxPolicy, RowValues, TxOptions};
pub use crate::values::{ScanValue, ToRowValue};
