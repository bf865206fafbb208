use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SqlDbError;

/// Cancellation and deadline carried by a connection handle.
///
/// Cloning shares the underlying token, so cancelling any clone cancels them all.
/// A child context derived with [`Context::with_timeout`] can be cancelled
/// without affecting its parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context that additionally expires after `timeout`.
    /// An earlier deadline already on `self` is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The error this context currently reports, if it is done.
    #[must_use]
    pub fn err(&self) -> Option<SqlDbError> {
        if self.token.is_cancelled() {
            Some(SqlDbError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(SqlDbError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// # Errors
    /// Returns `Cancelled` or `DeadlineExceeded` once the context is done.
    pub fn check(&self) -> Result<(), SqlDbError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drive `fut` until it completes or this context is done, whichever comes first.
    ///
    /// # Errors
    /// Returns the future's own error, or `Cancelled` / `DeadlineExceeded`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, SqlDbError>
    where
        F: Future<Output = Result<T, SqlDbError>>,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => Err(SqlDbError::Cancelled),
                res = tokio::time::timeout_at(deadline, fut) => {
                    res.unwrap_or(Err(SqlDbError::DeadlineExceeded))
                }
            },
            None => tokio::select! {
                () = self.token.cancelled() => Err(SqlDbError::Cancelled),
                res = fut => res,
            },
        }
    }
}
