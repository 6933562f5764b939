use crate::host::HostError;
use crate::model::ModelError;
use crate::selection::{InvalidSelection, SelectionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    InvalidSelection(#[from] InvalidSelection),

    #[error("exceeded the limit of {limit} tool rounds")]
    IterationLimitExceeded { limit: usize },
}

/// Coarse classification of [`Error`] for callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Connection,
    Discovery,
    ToolNotFound,
    Invocation,
    Timeout,
    Model,
    InvalidSelection,
    IterationLimitExceeded,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Host(HostError::Connection { .. } | HostError::NotConnected(_)) => {
                ErrorKind::Connection
            }
            Self::Host(HostError::Discovery { .. }) => ErrorKind::Discovery,
            Self::Host(HostError::ToolNotFound(_)) => ErrorKind::ToolNotFound,
            Self::Host(HostError::Invocation { .. }) => ErrorKind::Invocation,
            Self::Host(HostError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Model(_) => ErrorKind::Model,
            Self::InvalidSelection(_) => ErrorKind::InvalidSelection,
            Self::IterationLimitExceeded { .. } => ErrorKind::IterationLimitExceeded,
        }
    }
}

impl From<SelectionError> for Error {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::Model(e) => Self::Model(e),
            SelectionError::Invalid(e) => Self::InvalidSelection(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn host_errors_keep_their_kind() {
        let err: Error = HostError::Timeout {
            tool: "slow".into(),
            elapsed: Duration::from_secs(30),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err: Error = HostError::NotConnected("x".into()).into();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn selection_errors_unwrap() {
        let err: Error = SelectionError::Model(ModelError::RateLimited("slow down".into())).into();
        assert_eq!(err.kind(), ErrorKind::Model);
        assert_eq!(err.to_string(), "rate limited: slow down");
    }
}
