//! Downstream handler interfaces
//!
//! Device handlers, channel handlers and the persistence service are plugged
//! into the router through the traits in this module. Each implementation runs
//! in its own task and drains its own mailbox one message at a time, so a
//! handler never needs internal locking.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::Result;
use crate::message::{
    Cancel, ChannelId, DeviceId, ErrorDescription, ErrorKind, GroupId, GroupReport, LogLevel,
    LogRecord, Notification, NotificationPtr, ProtocolDescription, RequestState,
};
use crate::promise::ResponsePromise;
use crate::router::RouterHandle;

/// Mailbox of a device handler
pub type DeviceSender = mpsc::UnboundedSender<DeviceMessage>;
/// Mailbox of a channel handler
pub type ChannelSender = mpsc::UnboundedSender<ChannelMessage>;
/// Mailbox of the persistence service
pub type PersistenceSender = mpsc::UnboundedSender<PersistenceMessage>;
/// Mailbox of a UI client
pub type UiSender = mpsc::UnboundedSender<UiEvent>;

/// Message delivered to a device handler
#[derive(Debug)]
pub enum DeviceMessage {
    Request(ResponsePromise),
    Cancel(Cancel),
    Group(GroupDirective),
}

/// Group membership change sent to one device during a group-wide operation
#[derive(Debug)]
pub struct GroupDirective {
    /// Target group; `None` lets the swarm pick the id of a new group
    pub group: Option<GroupId>,
    pub action: GroupAction,
    pub ack: oneshot::Sender<std::result::Result<(), ErrorDescription>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAction {
    Create { members: Vec<DeviceId> },
    Delete,
}

/// Message delivered to a channel handler
#[derive(Debug)]
pub enum ChannelMessage {
    Request(ResponsePromise),
    Cancel(Cancel),
}

/// Message delivered to the persistence service
#[derive(Debug)]
pub enum PersistenceMessage {
    Request(ResponsePromise),
    Cancel(Cancel),
    Notification(NotificationPtr),
    ProtocolsLoaded(Vec<ProtocolDescription>),
}

/// Event delivered to a UI client
#[derive(Debug, Clone)]
pub enum UiEvent {
    Notification(NotificationPtr),
    State(RequestState),
}

/// Handle given to a running handler for talking back to the router
#[derive(Debug, Clone)]
pub struct HandlerContext<Id> {
    id: Id,
    router: RouterHandle,
}

pub type DeviceContext = HandlerContext<DeviceId>;
pub type ChannelContext = HandlerContext<ChannelId>;
pub type PersistenceContext = HandlerContext<()>;

impl<Id> HandlerContext<Id> {
    #[must_use]
    pub const fn new(id: Id, router: RouterHandle) -> Self {
        Self { id, router }
    }

    #[must_use]
    pub const fn id(&self) -> &Id {
        &self.id
    }

    #[must_use]
    pub const fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Broadcast a notification through the router
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn notify(&self, notification: Notification) -> Result<()> {
        self.router.notify(notification).await
    }
}

impl DeviceContext {
    /// Emit a log line attributed to this device
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn log(&self, level: LogLevel, text: impl Into<String> + Send) -> Result<()> {
        let record = LogRecord::new(level, "device", text).for_device(self.id.clone());
        self.router.notify(Notification::Log(record)).await
    }

    /// Announce this device's current group membership
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn report_group(&self, report: GroupReport) -> Result<()> {
        self.router.report_group(self.id.clone(), report).await
    }
}

/// Protocol handler responsible for one physical device
#[async_trait]
pub trait DeviceHandler: Send + 'static {
    /// Serve a request; the promise must eventually be resolved or dropped
    async fn on_request(&mut self, ctx: &DeviceContext, promise: ResponsePromise);

    /// Cooperative cancellation of an earlier request
    async fn on_cancel(&mut self, ctx: &DeviceContext, cancel: Cancel) {
        tracing::debug!(device = %ctx.id(), request_id = %cancel.request_id(), "cancel ignored");
    }

    /// Apply a group membership change to this device
    async fn on_group(
        &mut self,
        ctx: &DeviceContext,
        group: Option<GroupId>,
        action: GroupAction,
    ) -> std::result::Result<(), ErrorDescription> {
        let _ = (ctx, group, action);
        Err(ErrorKind::NotImplemented.into())
    }
}

/// Transport handler responsible for one channel
#[async_trait]
pub trait ChannelHandler: Send + 'static {
    async fn on_request(&mut self, ctx: &ChannelContext, promise: ResponsePromise);

    async fn on_cancel(&mut self, ctx: &ChannelContext, cancel: Cancel) {
        tracing::debug!(channel = %ctx.id(), request_id = %cancel.request_id(), "cancel ignored");
    }
}

/// Storage backend for persistence-kind requests
#[async_trait]
pub trait PersistenceService: Send + 'static {
    async fn on_request(&mut self, ctx: &PersistenceContext, promise: ResponsePromise);

    async fn on_cancel(&mut self, _ctx: &PersistenceContext, _cancel: Cancel) {}

    /// Every notification broadcast by the router
    async fn on_notification(&mut self, _ctx: &PersistenceContext, _notification: NotificationPtr) {
    }

    /// Protocol metadata announced once plugins are loaded
    async fn on_protocols_loaded(
        &mut self,
        _ctx: &PersistenceContext,
        _protocols: Vec<ProtocolDescription>,
    ) {
    }
}

/// Register a device handler with the router and run its mailbox
///
/// The handler stops when the router drops its registration. Aborting the
/// returned task disconnects the device.
///
/// # Errors
///
/// Returns an error if the router has shut down.
pub async fn spawn_device<H: DeviceHandler>(
    router: &RouterHandle,
    device: DeviceId,
    mut handler: H,
) -> Result<JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.register_device(device.clone(), tx).await?;
    let ctx = HandlerContext::new(device, router.clone());

    Ok(tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                DeviceMessage::Request(promise) => handler.on_request(&ctx, promise).await,
                DeviceMessage::Cancel(cancel) => handler.on_cancel(&ctx, cancel).await,
                DeviceMessage::Group(GroupDirective { group, action, ack }) => {
                    let result = handler.on_group(&ctx, group, action).await;
                    let _ = ack.send(result);
                }
            }
        }
        tracing::debug!(device = %ctx.id(), "device handler stopped");
    }))
}

/// Register a channel handler with the router and run its mailbox
///
/// # Errors
///
/// Returns an error if the router has shut down.
pub async fn spawn_channel<H: ChannelHandler>(
    router: &RouterHandle,
    channel: ChannelId,
    mut handler: H,
) -> Result<JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.register_channel(channel.clone(), tx).await?;
    let ctx = HandlerContext::new(channel, router.clone());

    Ok(tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                ChannelMessage::Request(promise) => handler.on_request(&ctx, promise).await,
                ChannelMessage::Cancel(cancel) => handler.on_cancel(&ctx, cancel).await,
            }
        }
        tracing::debug!(channel = %ctx.id(), "channel handler stopped");
    }))
}

/// Register the persistence service with the router and run its mailbox
///
/// # Errors
///
/// Returns an error if the router has shut down.
pub async fn spawn_persistence<S: PersistenceService>(
    router: &RouterHandle,
    mut service: S,
) -> Result<JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.register_persistence(tx).await?;
    let ctx = HandlerContext::new((), router.clone());

    Ok(tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                PersistenceMessage::Request(promise) => service.on_request(&ctx, promise).await,
                PersistenceMessage::Cancel(cancel) => service.on_cancel(&ctx, cancel).await,
                PersistenceMessage::Notification(note) => {
                    service.on_notification(&ctx, note).await;
                }
                PersistenceMessage::ProtocolsLoaded(protocols) => {
                    service.on_protocols_loaded(&ctx, protocols).await;
                }
            }
        }
        tracing::debug!("persistence service stopped");
    }))
}
