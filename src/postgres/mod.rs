// PostgreSQL driver: a bb8 pool of tokio-postgres clients.
//
// - params: binding RowValues by the server-reported parameter type
// - query: decoding result columns into RowValues
// - pool: the bb8 manager and the DriverPool/DriverConnection impls

mod params;
mod pool;
mod query;

pub use pool::{PgClient, PgManager, PostgresPool};
pub use query::{build_result_set, extract_value};
