use thiserror::Error;

use crate::models::NaturalKey;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("no attendance record for {0}")]
    NotFound(NaturalKey),

    #[error("attendance already recorded for {0}")]
    DuplicateEntry(NaturalKey),

    #[error("{0}")]
    Forbidden(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    /// Stable tag reported next to the message in action responses.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::DuplicateEntry(_) => "duplicate_entry",
            LedgerError::Forbidden(_) => "forbidden",
            LedgerError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::UpstreamUnavailable(err.to_string())
    }
}
