use crate::{CardStatus, DrillState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("storage error: {0}")]
    Storage(&'static str),
    #[error("cannot {action} a {from} drill entry")]
    InvalidTransition {
        from: DrillState,
        action: &'static str,
    },
    #[error("card cannot move from {from} to {to}")]
    InvalidStatus { from: CardStatus, to: CardStatus },
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Logs the underlying error and collapses it into a `Storage` variant.
pub fn storage_err<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> CoreError {
    move |e| {
        tracing::error!(error = %e, "{what}");
        CoreError::Storage(what)
    }
}
