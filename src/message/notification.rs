//! Uncorrelated broadcast messages

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelId, DeviceId, GroupSnapshot};

/// Shared handle to an immutable notification
pub type NotificationPtr = Arc<Notification>;

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Human-readable event addressed to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    /// Component that produced the record
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    #[must_use]
    pub fn new(level: LogLevel, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level,
            source: source.into(),
            device: None,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn info(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, source, text)
    }

    #[must_use]
    pub fn for_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }
}

/// Broadcast emitted by handlers and the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Log(LogRecord),
    DeviceState {
        device: DeviceId,
        state: serde_json::Value,
    },
    ChannelState {
        channel: ChannelId,
        state: serde_json::Value,
    },
    Telemetry {
        device: DeviceId,
        item: serde_json::Value,
    },
    DeviceRegistered {
        device: DeviceId,
        registered: bool,
    },
    ChannelRegistered {
        channel: ChannelId,
        registered: bool,
    },
    DeviceActivated {
        device: DeviceId,
        active: bool,
    },
    ChannelActivated {
        channel: ChannelId,
        active: bool,
    },
    DeviceConnected {
        channel: ChannelId,
        device: DeviceId,
        connected: bool,
    },
    ProtocolRegistered {
        protocol: String,
    },
    GroupState(GroupSnapshot),
}

impl Notification {
    /// Wrap a log record
    #[must_use]
    pub fn log(record: LogRecord) -> NotificationPtr {
        Arc::new(Self::Log(record))
    }

    #[must_use]
    pub const fn as_log(&self) -> Option<&LogRecord> {
        match self {
            Self::Log(record) => Some(record),
            _ => None,
        }
    }

    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Log(_) => "log",
            Self::DeviceState { .. } => "device_state",
            Self::ChannelState { .. } => "channel_state",
            Self::Telemetry { .. } => "telemetry",
            Self::DeviceRegistered { .. } => "device_registered",
            Self::ChannelRegistered { .. } => "channel_registered",
            Self::DeviceActivated { .. } => "device_activated",
            Self::ChannelActivated { .. } => "channel_activated",
            Self::DeviceConnected { .. } => "device_connected",
            Self::ProtocolRegistered { .. } => "protocol_registered",
            Self::GroupState(_) => "group_state",
        }
    }
}
