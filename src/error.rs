use thiserror::Error;

/// Coarse classification of every error this crate surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Misuse by the caller: empty value lists, wrong number of scan destinations.
    Caller,
    /// Programmer error in mappings or identifiers.
    Configuration,
    /// Result columns and record fields do not line up.
    Shape,
    /// Unique, foreign-key, not-null or check violation.
    Integrity,
    /// Lost connection, busy database, pool exhaustion.
    Transient,
    /// Cancellation token fired or deadline passed.
    Cancelled,
    /// The dialect lacks the requested capability.
    NotSupported,
    WithinTransaction,
    NotWithinTransaction,
    /// Commit or rollback on a transaction level that already finished.
    TxAlreadyDone,
    /// A single-row query returned nothing.
    NoRows,
    /// Any other driver failure.
    Driver,
}

/// Which constraint a driver reported as violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
    Other,
}

#[derive(Debug, Error)]
pub enum SqlDbError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    PoolError(String),

    /// A driver error annotated with the statement that produced it.
    #[error("{source} (query: {query})")]
    Query {
        query: String,
        #[source]
        source: Box<SqlDbError>,
    },

    #[error("Caller error: {0}")]
    CallerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shape error: {0}")]
    ShapeError(String),

    #[error("Conversion error: {0}")]
    ConversionError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Already within a transaction")]
    WithinTransaction,

    #[error("Not within a transaction")]
    NotWithinTransaction,

    #[error("Transaction already committed or rolled back")]
    TxAlreadyDone,

    #[error("No rows in result set")]
    NoRows,

    #[error("Begin transaction failed: {0}")]
    TxBegin(#[source] Box<SqlDbError>),

    #[error("{error}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        error: Box<SqlDbError>,
        rollback: Box<SqlDbError>,
    },

    #[error("Callback panicked: {0}")]
    CallbackPanic(String),

    #[error("Constraint violation ({kind:?}): {message}")]
    Constraint {
        kind: ConstraintKind,
        constraint: Option<String>,
        message: String,
    },

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

pub type Result<T, E = SqlDbError> = std::result::Result<T, E>;

impl SqlDbError {
    /// Wrap a driver-surfaced error with the statement text.
    ///
    /// Errors that are already wrapped, and cancellation or state-machine
    /// errors, pass through untouched.
    #[must_use]
    pub fn with_query(self, query: impl Into<String>) -> Self {
        match self {
            SqlDbError::Query { .. }
            | SqlDbError::Cancelled
            | SqlDbError::DeadlineExceeded
            | SqlDbError::CallerError(_)
            | SqlDbError::ConfigError(_)
            | SqlDbError::NotSupported(_)
            | SqlDbError::WithinTransaction
            | SqlDbError::NotWithinTransaction
            | SqlDbError::TxAlreadyDone => self,
            other => SqlDbError::Query {
                query: query.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through query annotations and begin wrappers.
    #[must_use]
    pub fn root(&self) -> &SqlDbError {
        match self {
            SqlDbError::Query { source, .. } | SqlDbError::TxBegin(source) => source.root(),
            SqlDbError::RollbackFailed { error, .. } => error.root(),
            other => other,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            #[cfg(feature = "postgres")]
            SqlDbError::PostgresError(e) => classify_postgres(e),
            #[cfg(feature = "sqlite")]
            SqlDbError::SqliteError(e) => classify_sqlite(e),
            SqlDbError::PoolError(_) | SqlDbError::ConnectionError(_) => ErrorKind::Transient,
            SqlDbError::CallerError(_) | SqlDbError::ConversionError(_) => ErrorKind::Caller,
            SqlDbError::ConfigError(_) => ErrorKind::Configuration,
            SqlDbError::ShapeError(_) => ErrorKind::Shape,
            SqlDbError::Cancelled | SqlDbError::DeadlineExceeded => ErrorKind::Cancelled,
            SqlDbError::NotSupported(_) => ErrorKind::NotSupported,
            SqlDbError::WithinTransaction => ErrorKind::WithinTransaction,
            SqlDbError::NotWithinTransaction => ErrorKind::NotWithinTransaction,
            SqlDbError::TxAlreadyDone => ErrorKind::TxAlreadyDone,
            SqlDbError::NoRows => ErrorKind::NoRows,
            SqlDbError::Constraint { .. } => ErrorKind::Integrity,
            _ => ErrorKind::Driver,
        }
    }

    /// The violated constraint, if the driver reported an integrity error.
    #[must_use]
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self.root() {
            #[cfg(feature = "postgres")]
            SqlDbError::PostgresError(e) => postgres_constraint(e).map(|(kind, _)| kind),
            #[cfg(feature = "sqlite")]
            SqlDbError::SqliteError(e) => sqlite_constraint(e),
            SqlDbError::Constraint { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Constraint name as reported by the driver, when extractable.
    #[must_use]
    pub fn constraint_name(&self) -> Option<String> {
        match self.root() {
            #[cfg(feature = "postgres")]
            SqlDbError::PostgresError(e) => postgres_constraint(e).and_then(|(_, name)| name),
            SqlDbError::Constraint { constraint, .. } => constraint.clone(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::Unique)
    }

    #[must_use]
    pub fn is_foreign_key_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::ForeignKey)
    }

    #[must_use]
    pub fn is_not_null_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::NotNull)
    }

    #[must_use]
    pub fn is_check_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::Check)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    #[must_use]
    pub fn is_no_rows(&self) -> bool {
        self.kind() == ErrorKind::NoRows
    }

    #[must_use]
    pub fn is_already_done(&self) -> bool {
        self.kind() == ErrorKind::TxAlreadyDone
    }
}

#[cfg(feature = "postgres")]
fn postgres_constraint(e: &tokio_postgres::Error) -> Option<(ConstraintKind, Option<String>)> {
    use tokio_postgres::error::SqlState;

    let db = e.as_db_error()?;
    let code = db.code();
    let kind = if *code == SqlState::UNIQUE_VIOLATION {
        ConstraintKind::Unique
    } else if *code == SqlState::FOREIGN_KEY_VIOLATION {
        ConstraintKind::ForeignKey
    } else if *code == SqlState::NOT_NULL_VIOLATION {
        ConstraintKind::NotNull
    } else if *code == SqlState::CHECK_VIOLATION {
        ConstraintKind::Check
    } else if code.code().starts_with("23") {
        ConstraintKind::Other
    } else {
        return None;
    };
    Some((kind, db.constraint().map(ToString::to_string)))
}

#[cfg(feature = "postgres")]
fn classify_postgres(e: &tokio_postgres::Error) -> ErrorKind {
    if postgres_constraint(e).is_some() {
        return ErrorKind::Integrity;
    }
    if e.is_closed() {
        return ErrorKind::Transient;
    }
    match e.code() {
        Some(code) if code.code().starts_with("08") => ErrorKind::Transient,
        _ => ErrorKind::Driver,
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_constraint(e: &rusqlite::Error) -> Option<ConstraintKind> {
    use rusqlite::ffi;

    let rusqlite::Error::SqliteFailure(failure, _) = e else {
        return None;
    };
    if failure.code != rusqlite::ErrorCode::ConstraintViolation {
        return None;
    }
    Some(match failure.extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::Unique,
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
        ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
        ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
        _ => ConstraintKind::Other,
    })
}

#[cfg(feature = "sqlite")]
fn classify_sqlite(e: &rusqlite::Error) -> ErrorKind {
    if sqlite_constraint(e).is_some() {
        return ErrorKind::Integrity;
    }
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
            ErrorKind::Transient
        }
        _ => ErrorKind::Driver,
    }
}

#[cfg(feature = "postgres")]
impl From<bb8::RunError<tokio_postgres::Error>> for SqlDbError {
    fn from(err: bb8::RunError<tokio_postgres::Error>) -> Self {
        match err {
            bb8::RunError::User(e) => SqlDbError::PostgresError(e),
            bb8::RunError::TimedOut => {
                SqlDbError::PoolError("postgres pool checkout timed out".to_string())
            }
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<bb8::RunError<SqlDbError>> for SqlDbError {
    fn from(err: bb8::RunError<SqlDbError>) -> Self {
        match err {
            bb8::RunError::User(e) => e,
            bb8::RunError::TimedOut => {
                SqlDbError::PoolError("sqlite pool checkout timed out".to_string())
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
