use std::io;

use thiserror::Error;

use crate::stream::UserError;

#[derive(Debug, Clone, Error)]
pub enum Status {
    #[error("truncated stream: need {needed} bytes, {remaining} remaining")]
    TruncatedStream { needed: usize, remaining: usize },
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("object does not exist: {0}")]
    ObjectNotExist(String),
    #[error("facet does not exist: {identity} facet {facet:?}")]
    FacetNotExist { identity: String, facet: String },
    #[error("operation does not exist: {0}")]
    OperationNotExist(String),
    #[error("operation mode violation: {operation} declared {expected:?}, received {received:?}")]
    ModeViolation {
        operation: String,
        expected: crate::rpc::OperationMode,
        received: crate::rpc::OperationMode,
    },
    #[error("user exception: {}", .0.type_id())]
    UserException(UserError),
    #[error("unknown local exception: {0}")]
    UnknownLocalException(String),
    #[error("unknown user exception: {0}")]
    UnknownUserException(String),
    #[error("unknown exception: {0}")]
    UnknownException(String),
    #[error("duplicate definition: {0}")]
    DuplicateDefinition(String),
    #[error("operation {0} requires a twoway proxy")]
    TwowayOnly(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("bad config: {0}")]
    Config(String),
}

impl Status {
    /// Only transport failures are safe to replay, and only for idempotent operations.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Status::Transport(_))
    }

    pub fn truncated(needed: usize, remaining: usize) -> Status {
        Status::TruncatedStream { needed, remaining }
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        Status::Transport(e.to_string())
    }
}

pub trait Corrupting<T>: Sized {
    fn corrupted(message: T) -> Status;
}

impl Corrupting<String> for Status {
    fn corrupted(message: String) -> Status {
        Status::Corruption(message)
    }
}

impl Corrupting<&str> for Status {
    fn corrupted(message: &str) -> Status {
        Status::Corruption(String::from(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable() {
        assert!(Status::Transport("reset".into()).is_retryable());
        assert!(!Status::corrupted("bad").is_retryable());
        assert!(!Status::truncated(4, 1).is_retryable());
    }

    #[test]
    fn io_error_maps_to_transport() {
        let e = io::Error::new(io::ErrorKind::ConnectionReset, "peer gone");
        let status: Status = e.into();
        assert!(matches!(status, Status::Transport(_)));
    }
}
