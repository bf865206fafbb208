// SQLite driver: rusqlite connections on a bb8 pool, with all blocking
// work moved onto tokio's blocking threads.
//
// - params: RowValues to rusqlite values
// - query: materializing rows
// - pool: the bb8 manager and the DriverPool/DriverConnection impls

mod params;
mod pool;
mod query;

pub use params::row_value_to_sqlite_value;
pub use pool::{SharedSqliteConnection, SqliteHandle, SqliteManager, SqlitePool};
pub use query::{build_result_set, extract_value};
