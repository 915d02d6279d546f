use crate::domain::models::TransportKind;
use thiserror::Error;

/// Errors a caller of the coordinator can observe.
///
/// Only `Unreachable` and `SendFailed` are raised as discrete alerts; the rest
/// show up as status changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("{0} transport is not supported on this device")]
    TransportUnsupported(TransportKind),
    #[error("{0} counterpart not reachable")]
    Unreachable(TransportKind),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("local network access denied")]
    AuthorizationDenied,
}

impl LinkError {
    /// Whether this error should be shown to the user as a one-shot alert.
    pub fn is_alert(&self) -> bool {
        matches!(self, LinkError::Unreachable(_) | LinkError::SendFailed(_))
    }
}

/// Reasons an inbound payload could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("payload has no command key")]
    MissingCommand,
    #[error("command verb is empty")]
    EmptyCommand,
    #[error("unknown command verb: {0}")]
    UnknownVerb(String),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

/// Failures reported by a transport when handing off a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("counterpart not reachable")]
    NotReachable,
    #[error("no session")]
    NoSession,
    #[error("transport closed")]
    Closed,
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        LinkError::SendFailed(err.to_string())
    }
}
