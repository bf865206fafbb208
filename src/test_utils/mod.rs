//! Helpers for testing code built on this crate.
//!
//! [`RecordingDriver`] is always available. The embedded `PostgreSQL`
//! helpers need the `test-utils-postgres` feature.

mod recording;

pub use recording::{CallKind, RecordedStatement, RecordingDriver, result_set};

#[cfg(feature = "test-utils-postgres")]
use std::sync::LazyLock;

#[cfg(feature = "test-utils-postgres")]
use tokio::runtime::Runtime;

/// Shared tokio runtime for the blocking embedded-server helpers.
#[cfg(feature = "test-utils-postgres")]
pub(crate) static SHARED_RUNTIME: LazyLock<Result<Runtime, String>> =
    LazyLock::new(|| Runtime::new().map_err(|e| e.to_string()));

#[cfg(feature = "test-utils-postgres")]
pub mod postgres;
