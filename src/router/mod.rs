//! Central router
//!
//! The router is the single addressable entry point of the exchange. It owns
//! the registries of UI clients, device handlers, channel handlers and the
//! persistence service, spawns the group coordinator, and dispatches every
//! request, cancel and notification to the right destination.
//!
//! Every registered mailbox is monitored: when its receiver goes away the
//! router removes it from the registries and tells the UI clients.

mod handle;
mod registry;

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use handle::{PendingReply, RouterHandle};
pub use registry::Registrant;

use registry::Monitored;

use crate::group::{CoordinatorMessage, GroupCoordinator, GroupInfo};
use crate::handler::{
    ChannelMessage, ChannelSender, DeviceMessage, DeviceSender, PersistenceMessage,
    PersistenceSender, UiEvent, UiSender,
};
use crate::message::{
    Cancel, ChannelId, DeviceId, DeviceRequest, Destination, ErrorDescription, ErrorKind,
    GroupReport, LogLevel, LogRecord, Notification, NotificationPtr, PersistenceRequest,
    ProtocolDescription, Reply, RequestBody, RequestPtr, RequestState,
};
use crate::promise::ResponsePromise;

/// Log target used to mirror `Log` notifications
pub const DEVICE_LOG_TARGET: &str = "fleet_exchange::device_log";

/// Router tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Capacity of the router's inbound mailbox
    pub mailbox_capacity: usize,
    /// Period of the group coordinator's empty-group sweep
    pub group_sweep: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            group_sweep: Duration::from_secs(10),
        }
    }
}

/// Message accepted on the router's mailbox
#[derive(Debug)]
pub enum RouterMessage {
    Submit {
        request: RequestPtr,
        reply: oneshot::Sender<Reply>,
        progress: Option<mpsc::UnboundedSender<RequestState>>,
    },
    Cancel(Cancel),
    Notify(NotificationPtr),
    RegisterUi(UiSender),
    RegisterDevice { device: DeviceId, sender: DeviceSender },
    RegisterChannel { channel: ChannelId, sender: ChannelSender },
    RegisterPersistence(PersistenceSender),
    GroupReport { device: DeviceId, report: GroupReport },
    ProtocolsLoaded(Vec<ProtocolDescription>),
    Status(oneshot::Sender<RouterStatus>),
    Groups(oneshot::Sender<Vec<GroupInfo>>),
    Shutdown,
}

/// Internal event raised by watchers and the group coordinator
#[derive(Debug)]
pub enum RouterEvent {
    Notify(NotificationPtr),
    Down { registrant: Registrant, token: u64 },
}

/// Snapshot of the router's registries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStatus {
    pub ui_clients: usize,
    pub devices: Vec<DeviceId>,
    pub channels: Vec<ChannelId>,
    pub persistence: bool,
    pub coordinator: bool,
}

/// Router actor
pub struct Router {
    inbox: mpsc::Receiver<RouterMessage>,
    events_tx: mpsc::UnboundedSender<RouterEvent>,
    events: mpsc::UnboundedReceiver<RouterEvent>,
    states: mpsc::UnboundedReceiver<RequestState>,
    uis: HashMap<u64, Monitored<UiEvent>>,
    devices: HashMap<DeviceId, Monitored<DeviceMessage>>,
    channels: HashMap<ChannelId, Monitored<ChannelMessage>>,
    persistence: Option<Monitored<PersistenceMessage>>,
    coordinator: Option<Monitored<CoordinatorMessage>>,
    persistence_failed: bool,
    next_token: u64,
}

impl Router {
    /// Start a router and its group coordinator
    #[must_use]
    pub fn spawn(config: RouterConfig) -> (RouterHandle, JoinHandle<()>) {
        let (tx, inbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (events_tx, events) = mpsc::unbounded_channel();
        let (states_tx, states) = mpsc::unbounded_channel();

        let (coordinator, coordinator_tx) =
            GroupCoordinator::new(events_tx.clone(), states_tx, config.group_sweep);
        tokio::spawn(coordinator.run());

        let mut router = Self {
            inbox,
            events_tx,
            events,
            states,
            uis: HashMap::new(),
            devices: HashMap::new(),
            channels: HashMap::new(),
            persistence: None,
            coordinator: None,
            persistence_failed: false,
            next_token: 0,
        };
        let token = router.token();
        router.coordinator = Some(Monitored::watch(
            coordinator_tx,
            Registrant::Coordinator,
            token,
            router.events_tx.clone(),
        ));

        (RouterHandle::new(tx), tokio::spawn(router.run()))
    }

    async fn run(mut self) {
        tracing::info!("router started");

        loop {
            tokio::select! {
                msg = self.inbox.recv() => match msg {
                    Some(RouterMessage::Shutdown) | None => break,
                    Some(msg) => self.handle(msg),
                },
                Some(event) = self.events.recv() => {
                    if self.handle_event(event).is_break() {
                        break;
                    }
                }
                Some(state) = self.states.recv() => self.broadcast_state(&state),
            }
        }

        self.shutdown();
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn handle(&mut self, msg: RouterMessage) {
        match msg {
            RouterMessage::Submit {
                request,
                reply,
                progress,
            } => {
                let mut promise = ResponsePromise::new(request, reply);
                if let Some(progress) = progress {
                    promise = promise.with_progress(progress);
                }
                self.route(promise);
            }
            RouterMessage::Cancel(cancel) => self.route_cancel(cancel),
            RouterMessage::Notify(note) => self.broadcast(&note),
            RouterMessage::RegisterUi(sender) => {
                let token = self.token();
                let ui = Monitored::watch(sender, Registrant::Ui, token, self.events_tx.clone());
                self.uis.insert(token, ui);
                self.announce(format!("ui client connected ({} total)", self.uis.len()));
            }
            RouterMessage::RegisterDevice { device, sender } => {
                let token = self.token();
                self.coordinator_send(CoordinatorMessage::RegisterDevice {
                    device: device.clone(),
                    sender: sender.clone(),
                });
                let monitored = Monitored::watch(
                    sender,
                    Registrant::Device(device.clone()),
                    token,
                    self.events_tx.clone(),
                );
                if self.devices.insert(device.clone(), monitored).is_some() {
                    tracing::info!(device = %device, "device handler replaced");
                }
                self.announce(format!("device {device} connected"));
            }
            RouterMessage::RegisterChannel { channel, sender } => {
                let token = self.token();
                let monitored = Monitored::watch(
                    sender,
                    Registrant::Channel(channel.clone()),
                    token,
                    self.events_tx.clone(),
                );
                if self.channels.insert(channel.clone(), monitored).is_some() {
                    tracing::info!(channel = %channel, "channel handler replaced");
                }
                self.announce(format!("channel {channel} connected"));
            }
            RouterMessage::RegisterPersistence(sender) => {
                let token = self.token();
                self.persistence = Some(Monitored::watch(
                    sender,
                    Registrant::Persistence,
                    token,
                    self.events_tx.clone(),
                ));
                self.persistence_failed = false;
                self.announce("persistence service connected".to_string());
            }
            RouterMessage::GroupReport { device, report } => {
                self.coordinator_send(CoordinatorMessage::Report {
                    reporter: device,
                    report,
                });
            }
            RouterMessage::ProtocolsLoaded(protocols) => match &self.persistence {
                Some(persistence) => persistence.send(PersistenceMessage::ProtocolsLoaded(protocols)),
                None => tracing::warn!(count = protocols.len(), "no persistence service for protocol list"),
            },
            RouterMessage::Status(reply) => {
                let _ = reply.send(self.status());
            }
            RouterMessage::Groups(reply) => {
                // The coordinator answers directly; a missing coordinator drops the reply
                self.coordinator_send(CoordinatorMessage::Groups { reply });
            }
            RouterMessage::Shutdown => {}
        }
    }

    fn route(&self, mut promise: ResponsePromise) {
        let request = promise.request().clone();
        tracing::debug!(request_id = %request.id(), request = request.name(), "routing request");

        match request.body() {
            RequestBody::Persistence(PersistenceRequest::ActivateDevice { device, .. }) => {
                self.to_device(device, DeviceMessage::Request(promise));
            }
            RequestBody::Persistence(PersistenceRequest::ActivateChannel { channel, .. }) => {
                match self.channels.get(channel) {
                    Some(handle) => handle.send(ChannelMessage::Request(promise)),
                    None => {
                        let _ = promise.fail(unreachable_error(format!("channel {channel}")));
                    }
                }
            }
            RequestBody::Persistence(_) => match &self.persistence {
                Some(handle) => handle.send(PersistenceMessage::Request(promise)),
                None => {
                    let _ = promise.fail(unreachable_error("persistence service".to_string()));
                }
            },
            RequestBody::Device(DeviceRequest {
                destination: Destination::Device(device),
                ..
            }) => self.to_device(device, DeviceMessage::Request(promise)),
            RequestBody::Device(DeviceRequest {
                destination: Destination::Group(_),
                ..
            }) => match &self.coordinator {
                Some(coordinator) => coordinator.send(CoordinatorMessage::Command(promise)),
                None => {
                    let _ = promise.fail(unreachable_error("group coordinator".to_string()));
                }
            },
        }
    }

    fn to_device(&self, device: &DeviceId, msg: DeviceMessage) {
        match self.devices.get(device) {
            Some(handle) => handle.send(msg),
            None => {
                if let DeviceMessage::Request(mut promise) = msg {
                    let _ = promise.fail(unreachable_error(format!("device {device}")));
                }
            }
        }
    }

    /// Deliver a cancel to whichever handler owns the referenced request
    fn route_cancel(&self, cancel: Cancel) {
        let request = cancel.request().clone();
        tracing::debug!(request_id = %request.id(), "routing cancel");

        match request.body() {
            RequestBody::Persistence(PersistenceRequest::ActivateDevice { device, .. })
            | RequestBody::Device(DeviceRequest {
                destination: Destination::Device(device),
                ..
            }) => {
                if let Some(handle) = self.devices.get(device) {
                    handle.send(DeviceMessage::Cancel(cancel));
                }
            }
            RequestBody::Persistence(PersistenceRequest::ActivateChannel { channel, .. }) => {
                if let Some(handle) = self.channels.get(channel) {
                    handle.send(ChannelMessage::Cancel(cancel));
                }
            }
            RequestBody::Persistence(_) => {
                if let Some(handle) = &self.persistence {
                    handle.send(PersistenceMessage::Cancel(cancel));
                }
            }
            RequestBody::Device(DeviceRequest {
                destination: Destination::Group(_),
                ..
            }) => self.coordinator_send(CoordinatorMessage::Cancel(cancel)),
        }
    }

    fn handle_event(&mut self, event: RouterEvent) -> ControlFlow<()> {
        match event {
            RouterEvent::Notify(note) => {
                self.broadcast(&note);
                ControlFlow::Continue(())
            }
            RouterEvent::Down { registrant, token } => self.down(registrant, token),
        }
    }

    /// Remove a handle whose mailbox closed
    fn down(&mut self, registrant: Registrant, token: u64) -> ControlFlow<()> {
        let removed = match &registrant {
            Registrant::Ui => self.uis.remove(&token).is_some(),
            Registrant::Device(device) => {
                let current = self.devices.get(device).is_some_and(|h| h.token() == token);
                if current {
                    self.devices.remove(device);
                    self.coordinator_send(CoordinatorMessage::DeviceDown(device.clone()));
                }
                current
            }
            Registrant::Channel(channel) => {
                let current = self.channels.get(channel).is_some_and(|h| h.token() == token);
                if current {
                    self.channels.remove(channel);
                }
                current
            }
            Registrant::Persistence => {
                let current = self.persistence.as_ref().is_some_and(|h| h.token() == token);
                if current {
                    self.persistence = None;
                    self.persistence_failed = true;
                }
                current
            }
            Registrant::Coordinator => {
                let current = self.coordinator.as_ref().is_some_and(|h| h.token() == token);
                if current {
                    self.coordinator = None;
                    tracing::error!("group coordinator stopped, group requests will fail");
                }
                current
            }
        };

        if !removed {
            tracing::trace!(%registrant, token, "stale down event ignored");
            return ControlFlow::Continue(());
        }

        tracing::info!(%registrant, "handle disconnected");
        self.announce(format!("{registrant} disconnected"));

        if self.persistence_failed && self.devices.is_empty() && self.channels.is_empty() {
            tracing::warn!("persistence service down with no protocol handlers left, shutting down");
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Informational note to every UI client
    fn announce(&self, text: String) {
        let note: NotificationPtr = Notification::log(LogRecord::info("router", text));
        self.broadcast(&note);
    }

    fn broadcast(&self, note: &NotificationPtr) {
        if let Some(record) = note.as_log() {
            mirror_log(record);
        }
        for ui in self.uis.values() {
            ui.send(UiEvent::Notification(note.clone()));
        }
        if let Some(persistence) = &self.persistence {
            persistence.send(PersistenceMessage::Notification(note.clone()));
        }
    }

    fn broadcast_state(&self, state: &RequestState) {
        for ui in self.uis.values() {
            ui.send(UiEvent::State(state.clone()));
        }
    }

    fn coordinator_send(&self, msg: CoordinatorMessage) {
        match &self.coordinator {
            Some(coordinator) => coordinator.send(msg),
            None => tracing::debug!("group coordinator gone, message dropped"),
        }
    }

    fn status(&self) -> RouterStatus {
        let mut devices: Vec<_> = self.devices.keys().cloned().collect();
        devices.sort();
        let mut channels: Vec<_> = self.channels.keys().cloned().collect();
        channels.sort();

        RouterStatus {
            ui_clients: self.uis.len(),
            devices,
            channels,
            persistence: self.persistence.is_some(),
            coordinator: self.coordinator.is_some(),
        }
    }

    /// Drop every registration so dependents observe closure
    fn shutdown(&mut self) {
        tracing::info!(
            ui_clients = self.uis.len(),
            devices = self.devices.len(),
            channels = self.channels.len(),
            "router shutting down"
        );
        self.uis.clear();
        self.devices.clear();
        self.channels.clear();
        self.persistence = None;
        self.coordinator = None;
    }
}

fn unreachable_error(target: String) -> ErrorDescription {
    ErrorDescription::with_detail(ErrorKind::ReceiverUnreachable, format!("{target} not registered"))
}

/// Mirror a log record into tracing under the device log target
fn mirror_log(record: &LogRecord) {
    let device = record.device.as_ref().map(ToString::to_string).unwrap_or_default();
    match record.level {
        LogLevel::Debug => {
            tracing::debug!(target: DEVICE_LOG_TARGET, source = %record.source, device = %device, "{}", record.text);
        }
        LogLevel::Info => {
            tracing::info!(target: DEVICE_LOG_TARGET, source = %record.source, device = %device, "{}", record.text);
        }
        LogLevel::Warning => {
            tracing::warn!(target: DEVICE_LOG_TARGET, source = %record.source, device = %device, "{}", record.text);
        }
        LogLevel::Error => {
            tracing::error!(target: DEVICE_LOG_TARGET, source = %record.source, device = %device, "{}", record.text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeviceCommand, ObjectKind, Request};

    #[tokio::test]
    async fn unknown_device_fails_immediately() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let pending = router
            .submit(Request::device(DeviceId::new("d2"), DeviceCommand::simple("nav", "hold")))
            .await
            .unwrap();

        let err = pending.outcome().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReceiverUnreachable);
    }

    #[tokio::test]
    async fn persistence_without_service_is_unreachable() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let pending = router
            .submit(Request::persistence(PersistenceRequest::List {
                object: ObjectKind::Channel,
            }))
            .await
            .unwrap();

        assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::ReceiverUnreachable);
    }

    #[tokio::test]
    async fn registered_ui_receives_announcements() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
        router.register_ui(ui_tx).await.unwrap();

        let Some(UiEvent::Notification(note)) = ui_rx.recv().await else {
            panic!("expected notification");
        };
        assert!(note.as_log().unwrap().text.contains("ui client connected"));
    }

    #[tokio::test]
    async fn device_activation_goes_to_device_handle() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let (device_tx, mut device_rx) = mpsc::unbounded_channel();
        let (persistence_tx, mut persistence_rx) = mpsc::unbounded_channel();
        router.register_device(DeviceId::new("d1"), device_tx).await.unwrap();
        router.register_persistence(persistence_tx).await.unwrap();

        let _pending = router
            .submit(Request::persistence(PersistenceRequest::ActivateDevice {
                device: DeviceId::new("d1"),
                active: true,
            }))
            .await
            .unwrap();

        assert!(matches!(device_rx.recv().await, Some(DeviceMessage::Request(_))));

        // Persistence only saw notifications
        router.status().await.unwrap();
        while let Ok(msg) = persistence_rx.try_recv() {
            assert!(matches!(msg, PersistenceMessage::Notification(_)));
        }
    }

    #[tokio::test]
    async fn shutdown_closes_registered_mailboxes() {
        let (router, task) = Router::spawn(RouterConfig::default());
        let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
        router.register_ui(ui_tx).await.unwrap();
        router.shutdown().await.unwrap();
        task.await.unwrap();

        while ui_rx.recv().await.is_some() {}
        assert!(router.is_closed());
    }
}
