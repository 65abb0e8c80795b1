use thiserror::Error;

/// Domain error taxonomy.
///
/// `Precondition` messages are safe to surface to the caller verbatim;
/// `Database` detail is for server-side logs only.
#[derive(Debug, Error)]
pub enum MarketError {
    /// The requested operation is not valid in the current state - wrong
    /// status for a transition, limit reached, OTP mismatch, flagged user,
    /// or no store manager in range. Never retried automatically.
    #[error("{message}")]
    Precondition { message: String },

    /// No matching row, including a guarded UPDATE that affected zero rows.
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl MarketError {
    pub fn precondition(message: impl Into<String>) -> Self {
        MarketError::Precondition {
            message: message.into(),
        }
    }

    /// Maps `RowNotFound` to the domain's `NotFound`, leaving other database
    /// errors intact.
    pub fn from_lookup(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MarketError::NotFound,
            other => MarketError::Database(other),
        }
    }

    /// True when the message is safe to show to the end user.
    pub fn is_client_safe(&self) -> bool {
        matches!(
            self,
            MarketError::Precondition { .. } | MarketError::NotFound
        )
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
