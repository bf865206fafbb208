//! A driver-agnostic async database façade.
//!
//! - [`Record`] maps struct fields to columns through `#[db = "..."]` tags.
//! - [`query_builder::StatementBuilder`] composes `INSERT`/`UPDATE`/upsert
//!   statements for any [`format::QueryFormatter`] dialect.
//! - [`Connection`] runs statements on a pooled driver, scans results through
//!   [`Rows`] and [`Row`], and nests transactions as savepoints.
//! - [`listener::ListenerRegistry`] multiplexes LISTEN/NOTIFY channels over
//!   one connection per database.
//!
//! ```rust,no_run
//! use sqldb::prelude::*;
//!
//! #[derive(Record, Default)]
//! pub struct User {
//!     #[db = "id,pk=users"]
//!     pub id: i64,
//!     #[db = "email"]
//!     pub email: String,
//! }
//!
//! # async fn demo() -> Result<(), SqlDbError> {
//! let conn = Connection::connect(&Config::sqlite("app.db")).await?;
//! conn.batch_execute("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, email TEXT)")
//!     .await?;
//! conn.upsert_struct(&User { id: 1, email: "a@b.c".into() }, &[]).await?;
//! let users: Vec<User> = conn.query_struct_slice("SELECT id, email FROM users", &[]).await?;
//! # let _ = users;
//! # Ok(())
//! # }
//! ```

extern crate self as sqldb;

pub mod config;
pub mod connection;
pub mod context;
pub mod driver;
pub mod error;
pub mod format;
pub mod listener;
pub mod mapping;
pub mod prelude;
pub mod query;
pub mod query_builder;
pub mod results;
pub mod test_utils;
pub mod types;
pub mod values;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mapping::Record;
pub use sqldb_macros::Record;

pub use config::{Config, ConfigBuilder};
pub use connection::{Connection, ConnectionOptions};
pub use context::Context;
pub use error::{ErrorKind, SqlDbError};
pub use query::QueryAndParams;
pub use results::{ResultSet, Row, Rows};
pub use types::{DriverKind, IsolationLevel, NestedTxPolicy, RowValues, TxOptions};
