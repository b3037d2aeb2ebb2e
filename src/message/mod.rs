//! Message model shared by every component of the exchange
//!
//! Requests expect exactly one correlated completion, optionally preceded by
//! progress signals. Notifications are uncorrelated broadcasts.

mod error;
mod group;
mod ids;
mod notification;
mod request;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use error::{ErrorDescription, ErrorKind};
pub use group::{GroupReport, GroupSnapshot};
pub use ids::{ChannelId, DeviceId, GroupId};
pub use notification::{LogLevel, LogRecord, Notification, NotificationPtr};
pub use request::{
    Cancel, DeviceCommand, DeviceRequest, Destination, ObjectKind, PersistenceRequest,
    ProtocolDescription, Reply, Request, RequestBody, RequestKind, RequestPtr, RequestResult,
    RequestState, Response, StateSignal,
};

/// Process-wide source of request identifiers
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a request, unique for the lifetime of the process
///
/// Only [`Request`] constructors allocate new identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
