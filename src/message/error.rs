//! Error taxonomy carried inside request completions

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of failure a request can terminate with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target device, channel or service is not registered
    #[error("receiver unreachable")]
    ReceiverUnreachable,

    /// Client side: the router cannot be reached
    #[error("core disconnected")]
    CoreDisconnected,

    /// Request was explicitly canceled
    #[error("canceled")]
    Canceled,

    /// Request cannot be canceled in its current state
    #[error("cancel not possible")]
    CantCancel,

    /// Handler failed to execute the command
    #[error("command failed")]
    CmdFailed,

    /// Operation is declared but unsupported
    #[error("not implemented")]
    NotImplemented,

    /// Group-addressed request names no group
    #[error("group not set")]
    GroupNotSet,

    /// Group is not present in the group table
    #[error("group unknown")]
    GroupUnknown,

    /// Group has not announced a leader yet
    #[error("group has no leader")]
    GroupWithoutLeader,

    /// Announced leader has no registered handler
    #[error("group leader unknown")]
    GroupLeaderUnknown,

    /// No group member acknowledged the command
    #[error("group unreachable")]
    GroupUnreachable,

    #[error("device unknown")]
    DeviceUnknown,

    #[error("channel unknown")]
    ChannelUnknown,

    #[error("timeout")]
    Timeout,

    #[error("not found")]
    NotFound,

    #[error("unknown error")]
    UnknownError,
}

/// Failure value delivered as the terminal completion of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescription {
    kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ErrorDescription {
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// Failure with a handler-supplied detail string
    #[must_use]
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::Canceled
    }
}

impl From<ErrorKind> for ErrorDescription {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for ErrorDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({detail})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ErrorDescription {}
