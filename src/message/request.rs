//! Requests, their completions and intermediate state signals

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{ChannelId, DeviceId, ErrorDescription, GroupId, RequestId};

/// Shared handle to an immutable request
pub type RequestPtr = Arc<Request>;

/// Terminal completion of a request
pub type Reply = Result<Response, ErrorDescription>;

/// Coarse request discriminator used for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// CRUD-style access to stored objects
    Persistence,
    /// Operation addressed to a device or a group of devices
    Device,
}

/// A client-originated message expecting one correlated completion
///
/// Requests are immutable once built; the identifier is allocated by the
/// constructor and never changes.
#[derive(Debug, Serialize)]
pub struct Request {
    id: RequestId,
    body: RequestBody,
}

impl Request {
    /// Build a request, allocating a fresh identifier
    #[must_use]
    pub fn new(body: RequestBody) -> RequestPtr {
        Arc::new(Self {
            id: RequestId::next(),
            body,
        })
    }

    #[must_use]
    pub fn persistence(request: PersistenceRequest) -> RequestPtr {
        Self::new(RequestBody::Persistence(request))
    }

    /// Command addressed to a single device
    #[must_use]
    pub fn device(device: DeviceId, command: DeviceCommand) -> RequestPtr {
        Self::new(RequestBody::Device(DeviceRequest {
            destination: Destination::Device(device),
            command,
        }))
    }

    /// Command addressed to a group (`None` when no group is selected)
    #[must_use]
    pub fn group(group: Option<GroupId>, command: DeviceCommand) -> RequestPtr {
        Self::new(RequestBody::Device(DeviceRequest {
            destination: Destination::Group(group),
            command,
        }))
    }

    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub const fn body(&self) -> &RequestBody {
        &self.body
    }

    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self.body {
            RequestBody::Persistence(_) => RequestKind::Persistence,
            RequestBody::Device(_) => RequestKind::Device,
        }
    }

    /// Device-kind payload, if any
    #[must_use]
    pub const fn as_device(&self) -> Option<&DeviceRequest> {
        match &self.body {
            RequestBody::Device(req) => Some(req),
            RequestBody::Persistence(_) => None,
        }
    }

    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match &self.body {
            RequestBody::Persistence(req) => req.name(),
            RequestBody::Device(req) => req.command.name(),
        }
    }
}

/// Payload of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBody {
    Persistence(PersistenceRequest),
    Device(DeviceRequest),
}

/// Kind of stored object a persistence request operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Channel,
    Device,
    DeviceUi,
    Protocol,
    Firmware,
    TmSession,
    Radar,
}

/// Persistence service request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PersistenceRequest {
    Register {
        object: ObjectKind,
        #[serde(default)]
        data: serde_json::Value,
    },
    Unregister {
        object: ObjectKind,
        name: String,
    },
    List {
        object: ObjectKind,
    },
    Describe {
        object: ObjectKind,
        name: String,
    },
    DescribeList {
        object: ObjectKind,
    },
    Update {
        object: ObjectKind,
        name: String,
        data: serde_json::Value,
    },
    /// Register a channel and a device bound to it in one step
    RegisterChannelAndDevice {
        channel: serde_json::Value,
        device: serde_json::Value,
    },
    /// Activation has a live effect on the running device handler
    ActivateDevice { device: DeviceId, active: bool },
    /// Activation has a live effect on the running channel handler
    ActivateChannel { channel: ChannelId, active: bool },
}

impl PersistenceRequest {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::List { .. } => "list",
            Self::Describe { .. } => "describe",
            Self::DescribeList { .. } => "describe_list",
            Self::Update { .. } => "update",
            Self::RegisterChannelAndDevice { .. } => "register_channel_and_device",
            Self::ActivateDevice { .. } => "activate_device",
            Self::ActivateChannel { .. } => "activate_channel",
        }
    }
}

/// Where a device-kind request is delivered
///
/// A request targets either one device or one group, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Device(DeviceId),
    /// Group layer; `None` means no group has been selected
    Group(Option<GroupId>),
}

/// Device-kind request payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub destination: Destination,
    pub command: DeviceCommand,
}

impl DeviceRequest {
    /// Group the request is addressed to, flattened
    #[must_use]
    pub const fn group(&self) -> Option<GroupId> {
        match self.destination {
            Destination::Group(group) => group,
            Destination::Device(_) => None,
        }
    }
}

/// Command catalogue understood by device handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeviceCommand {
    GroupNew {
        members: Vec<DeviceId>,
    },
    GroupDelete,
    GroupAttach {
        device: DeviceId,
    },
    GroupDetach {
        device: DeviceId,
    },
    GroupSwitch {
        to: GroupId,
    },
    /// Protocol-specific command
    Command {
        component: String,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl DeviceCommand {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GroupNew { .. } => "group_new",
            Self::GroupDelete => "group_delete",
            Self::GroupAttach { .. } => "group_attach",
            Self::GroupDetach { .. } => "group_detach",
            Self::GroupSwitch { .. } => "group_switch",
            Self::Command { .. } => "command",
        }
    }

    /// Generic command with no arguments
    #[must_use]
    pub fn simple(component: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Command {
            component: component.into(),
            name: name.into(),
            args: serde_json::Value::Null,
        }
    }
}

/// Successful terminal completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Response {
    #[must_use]
    pub const fn new(request_id: RequestId, body: serde_json::Value) -> Self {
        Self { request_id, body }
    }

    #[must_use]
    pub const fn empty(request_id: RequestId) -> Self {
        Self::new(request_id, serde_json::Value::Null)
    }
}

/// Terminal result summarized in a state signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestResult {
    Done,
    Failed,
    Canceled,
}

/// Progress or terminal signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSignal {
    /// Percentage in `0..=99`
    Progress(u8),
    Finished(RequestResult),
}

/// Intermediate signal about an in-flight request
#[derive(Debug, Clone, Serialize)]
pub struct RequestState {
    request: RequestPtr,
    signal: StateSignal,
}

impl RequestState {
    /// Highest percentage a progress signal may carry
    pub const MAX_PROGRESS: u8 = 99;

    #[must_use]
    pub fn progress(request: RequestPtr, percent: u8) -> Self {
        Self {
            request,
            signal: StateSignal::Progress(percent.min(Self::MAX_PROGRESS)),
        }
    }

    #[must_use]
    pub const fn finished(request: RequestPtr, result: RequestResult) -> Self {
        Self {
            request,
            signal: StateSignal::Finished(result),
        }
    }

    #[must_use]
    pub const fn request(&self) -> &RequestPtr {
        &self.request
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request.id()
    }

    #[must_use]
    pub const fn signal(&self) -> StateSignal {
        self.signal
    }

    #[must_use]
    pub const fn result(&self) -> Option<RequestResult> {
        match self.signal {
            StateSignal::Finished(result) => Some(result),
            StateSignal::Progress(_) => None,
        }
    }

    #[must_use]
    pub const fn percent(&self) -> Option<u8> {
        match self.signal {
            StateSignal::Progress(p) => Some(p),
            StateSignal::Finished(_) => None,
        }
    }
}

/// Cancellation of an outstanding request
///
/// Carries the original request so the router can find its current owner.
#[derive(Debug, Clone, Serialize)]
pub struct Cancel {
    request: RequestPtr,
}

impl Cancel {
    #[must_use]
    pub const fn new(request: RequestPtr) -> Self {
        Self { request }
    }

    #[must_use]
    pub const fn request(&self) -> &RequestPtr {
        &self.request
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request.id()
    }
}

/// Protocol metadata announced when protocol plugins are loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDescription {
    pub name: String,
    #[serde(default)]
    pub info: String,
    /// Per-request timeout the protocol applies to its own devices
    pub timeout_ms: u64,
}
