//! Embedded `PostgreSQL` for integration tests and benchmarks.

mod embedded;

pub use embedded::{EmbeddedPostgres, setup_postgres_embedded, stop_postgres_embedded};
