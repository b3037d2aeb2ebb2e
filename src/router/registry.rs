//! Monitored registrations

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::message::{ChannelId, DeviceId};

use super::RouterEvent;

/// Who a registration belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Registrant {
    Ui,
    Device(DeviceId),
    Channel(ChannelId),
    Persistence,
    Coordinator,
}

impl fmt::Display for Registrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ui => f.write_str("ui client"),
            Self::Device(id) => write!(f, "device {id}"),
            Self::Channel(id) => write!(f, "channel {id}"),
            Self::Persistence => f.write_str("persistence service"),
            Self::Coordinator => f.write_str("group coordinator"),
        }
    }
}

/// A registered mailbox plus the watcher that reports its closure
///
/// Dropping the registration stops the watcher, so a replaced or removed
/// handle never produces a `Down` event.
#[derive(Debug)]
pub struct Monitored<T> {
    sender: mpsc::UnboundedSender<T>,
    token: u64,
    watcher: AbortHandle,
}

impl<T: Send + 'static> Monitored<T> {
    /// Start watching `sender`; closure posts `Down(registrant, token)`
    pub fn watch(
        sender: mpsc::UnboundedSender<T>,
        registrant: Registrant,
        token: u64,
        events: mpsc::UnboundedSender<RouterEvent>,
    ) -> Self {
        let watched = sender.clone();
        let watcher = tokio::spawn(async move {
            watched.closed().await;
            let _ = events.send(RouterEvent::Down { registrant, token });
        })
        .abort_handle();

        Self {
            sender,
            token,
            watcher,
        }
    }
}

impl<T> Monitored<T> {
    pub const fn token(&self) -> u64 {
        self.token
    }

    /// Deliver a message; on a closed mailbox the message is dropped
    ///
    /// The watcher will report the closure separately.
    pub fn send(&self, msg: T) {
        if self.sender.send(msg).is_err() {
            tracing::trace!(token = self.token, "send to closed mailbox");
        }
    }
}

impl<T> Drop for Monitored<T> {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
