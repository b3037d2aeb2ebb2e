//! Cloneable address of the router

use tokio::sync::{mpsc, oneshot};

use crate::group::GroupInfo;
use crate::handler::{ChannelSender, DeviceSender, PersistenceSender, UiSender};
use crate::message::{
    Cancel, ChannelId, DeviceId, ErrorDescription, ErrorKind, GroupReport, LogRecord,
    Notification, ProtocolDescription, Reply, RequestId, RequestPtr, RequestState,
};
use crate::{Error, Result};

use super::{RouterMessage, RouterStatus};

/// Address of a running router
///
/// All interaction with the router goes through this handle. Calls enqueue a
/// message on the router's bounded mailbox and fail only once the router has
/// shut down.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterMessage>,
}

impl RouterHandle {
    pub(crate) const fn new(tx: mpsc::Sender<RouterMessage>) -> Self {
        Self { tx }
    }

    /// Whether the router has stopped accepting messages
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, msg: RouterMessage) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| Error::RouterClosed)
    }

    /// Submit a request and get its completion and progress receivers
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn submit(&self, request: RequestPtr) -> Result<PendingReply> {
        let id = request.id();
        let (reply, completion) = oneshot::channel();
        let (progress, states) = mpsc::unbounded_channel();
        self.submit_with(request, reply, Some(progress)).await?;
        Ok(PendingReply {
            id,
            completion,
            states,
        })
    }

    /// Submit a request delivering its completion to caller-owned channels
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down; `reply` is dropped.
    pub async fn submit_with(
        &self,
        request: RequestPtr,
        reply: oneshot::Sender<Reply>,
        progress: Option<mpsc::UnboundedSender<RequestState>>,
    ) -> Result<()> {
        self.send(RouterMessage::Submit {
            request,
            reply,
            progress,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn cancel(&self, cancel: Cancel) -> Result<()> {
        self.send(RouterMessage::Cancel(cancel)).await
    }

    /// Broadcast a notification to UI clients and the persistence service
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn notify(&self, notification: Notification) -> Result<()> {
        self.send(RouterMessage::Notify(notification.into())).await
    }

    /// Broadcast a log record
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn log(&self, record: LogRecord) -> Result<()> {
        self.notify(Notification::Log(record)).await
    }

    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn register_ui(&self, sender: UiSender) -> Result<()> {
        self.send(RouterMessage::RegisterUi(sender)).await
    }

    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn register_device(&self, device: DeviceId, sender: DeviceSender) -> Result<()> {
        self.send(RouterMessage::RegisterDevice { device, sender }).await
    }

    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn register_channel(&self, channel: ChannelId, sender: ChannelSender) -> Result<()> {
        self.send(RouterMessage::RegisterChannel { channel, sender }).await
    }

    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn register_persistence(&self, sender: PersistenceSender) -> Result<()> {
        self.send(RouterMessage::RegisterPersistence(sender)).await
    }

    /// Forward a device's group membership report to the coordinator
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn report_group(&self, device: DeviceId, report: GroupReport) -> Result<()> {
        self.send(RouterMessage::GroupReport { device, report }).await
    }

    /// Announce loaded protocol plugins to the persistence service
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn protocols_loaded(&self, protocols: Vec<ProtocolDescription>) -> Result<()> {
        self.send(RouterMessage::ProtocolsLoaded(protocols)).await
    }

    /// Snapshot of the router's registries
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn status(&self) -> Result<RouterStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterMessage::Status(reply)).await?;
        rx.await.map_err(|_| Error::RouterClosed)
    }

    /// Summaries of every known group
    ///
    /// # Errors
    ///
    /// Returns an error if the router or the group coordinator is gone.
    pub async fn groups(&self) -> Result<Vec<GroupInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterMessage::Groups(reply)).await?;
        rx.await.map_err(|_| Error::RouterClosed)
    }

    /// Ask the router to drop every registration and stop
    ///
    /// # Errors
    ///
    /// Returns an error if the router has already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(RouterMessage::Shutdown).await
    }
}

/// Receivers for one submitted request
#[derive(Debug)]
pub struct PendingReply {
    pub id: RequestId,
    pub completion: oneshot::Receiver<Reply>,
    pub states: mpsc::UnboundedReceiver<RequestState>,
}

impl PendingReply {
    /// Wait for the terminal completion
    pub async fn outcome(self) -> Reply {
        self.completion
            .await
            .unwrap_or_else(|_| Err(ErrorDescription::new(ErrorKind::CoreDisconnected)))
    }
}
