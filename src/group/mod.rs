//! Group coordinator
//!
//! Tracks dynamically formed device groups and forwards group-addressed
//! commands to the group's current leader. Group ids, terms and leaders come
//! from the devices themselves; the coordinator only records the newest report
//! per group and never advances a term on its own.

mod table;

use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{mpsc, oneshot};

pub use table::{GroupInfo, GroupTable};

use crate::handler::{DeviceMessage, DeviceSender, GroupAction, GroupDirective};
use crate::message::{
    Cancel, DeviceCommand, DeviceId, ErrorDescription, ErrorKind, GroupId, GroupReport,
    Notification, RequestState,
};
use crate::promise::ResponsePromise;
use crate::router::RouterEvent;

/// Mailbox of the coordinator
pub type CoordinatorSender = mpsc::UnboundedSender<CoordinatorMessage>;

/// Message handled by the coordinator
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Group-addressed device request
    Command(ResponsePromise),
    Cancel(Cancel),
    Report { reporter: DeviceId, report: GroupReport },
    RegisterDevice { device: DeviceId, sender: DeviceSender },
    DeviceDown(DeviceId),
    Groups { reply: oneshot::Sender<Vec<GroupInfo>> },
}

/// Actor owning the group table
pub struct GroupCoordinator {
    table: GroupTable,
    inbox: mpsc::UnboundedReceiver<CoordinatorMessage>,
    events: mpsc::UnboundedSender<RouterEvent>,
    states: mpsc::UnboundedSender<RequestState>,
    sweep_interval: Duration,
}

impl GroupCoordinator {
    /// Create a coordinator reporting back through the router's event queues
    #[must_use]
    pub fn new(
        events: mpsc::UnboundedSender<RouterEvent>,
        states: mpsc::UnboundedSender<RequestState>,
        sweep_interval: Duration,
    ) -> (Self, CoordinatorSender) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let coordinator = Self {
            table: GroupTable::new(),
            inbox,
            events,
            states,
            sweep_interval,
        };
        (coordinator, tx)
    }

    /// Run until every sender of the mailbox is dropped
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.tick().await;

        loop {
            tokio::select! {
                msg = self.inbox.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle(msg);
                }
                _ = sweep.tick() => {
                    let removed = self.table.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "swept empty groups");
                    }
                }
            }
        }

        tracing::debug!("group coordinator stopped");
    }

    fn handle(&mut self, msg: CoordinatorMessage) {
        match msg {
            CoordinatorMessage::Command(promise) => self.command(promise),
            CoordinatorMessage::Cancel(cancel) => self.cancel(cancel),
            CoordinatorMessage::Report { reporter, report } => self.report(&reporter, &report),
            CoordinatorMessage::RegisterDevice { device, sender } => {
                self.table.add_device(device, sender);
            }
            CoordinatorMessage::DeviceDown(device) => {
                if let Some(group) = self.table.remove_device(&device) {
                    tracing::info!(%group, device = %device, "last member gone, group removed");
                }
            }
            CoordinatorMessage::Groups { reply } => {
                let _ = reply.send(self.table.infos());
            }
        }
    }

    fn report(&mut self, reporter: &DeviceId, report: &GroupReport) {
        let Some(snapshot) = self.table.apply_report(reporter, report) else {
            return;
        };
        tracing::debug!(
            reporter = %reporter,
            group = ?snapshot.group,
            term = snapshot.term,
            leader = ?snapshot.leader,
            "group report applied"
        );
        let note = Notification::GroupState(snapshot);
        let _ = self.events.send(RouterEvent::Notify(note.into()));
    }

    fn command(&self, mut promise: ResponsePromise) {
        promise.set_default_error(ErrorKind::GroupUnreachable);
        promise.observe(self.states.clone());

        let request = promise.request().clone();
        let Some(req) = request.as_device() else {
            let _ = promise.fail(ErrorKind::NotImplemented);
            return;
        };
        let group = req.group();

        match &req.command {
            DeviceCommand::GroupNew { members } => {
                let targets = members
                    .iter()
                    .filter_map(|member| match self.table.sender(member) {
                        Some(sender) => Some((member.clone(), sender.clone())),
                        None => {
                            tracing::warn!(device = %member, "unknown device skipped in new group");
                            None
                        }
                    })
                    .collect();
                let action = GroupAction::Create {
                    members: members.clone(),
                };
                fan_out(promise, group, &action, targets);
            }
            DeviceCommand::GroupDelete => {
                let Some(group) = group else {
                    let _ = promise.fail(ErrorKind::GroupNotSet);
                    return;
                };
                if !self.table.contains_group(group) {
                    let _ = promise.fail(ErrorKind::GroupUnknown);
                    return;
                }
                let targets = self.table.members_of(group);
                fan_out(promise, Some(group), &GroupAction::Delete, targets);
            }
            DeviceCommand::GroupAttach { device } | DeviceCommand::GroupDetach { device } => {
                if let Err(kind) = self.table.leader(group) {
                    let _ = promise.fail(kind);
                } else if !self.table.contains_device(device) {
                    let _ = promise.fail(ErrorDescription::with_detail(
                        ErrorKind::DeviceUnknown,
                        device.to_string(),
                    ));
                } else {
                    self.forward_to_leader(group, promise);
                }
            }
            DeviceCommand::GroupSwitch { .. } => {
                let _ = promise.fail(ErrorKind::NotImplemented);
            }
            DeviceCommand::Command { .. } => self.forward_to_leader(group, promise),
        }
    }

    /// Hand the promise to the leader's device handler unmodified
    fn forward_to_leader(&self, group: Option<GroupId>, mut promise: ResponsePromise) {
        let (leader, sender) = match self.table.leader(group) {
            Ok(found) => found,
            Err(kind) => {
                let _ = promise.fail(kind);
                return;
            }
        };
        tracing::debug!(
            request_id = %promise.id(),
            group = ?group,
            leader = %leader,
            "forwarding to group leader"
        );
        // On a closed mailbox the returned promise is dropped and fails itself
        let _ = sender.send(DeviceMessage::Request(promise));
    }

    fn cancel(&self, cancel: Cancel) {
        let group = cancel.request().as_device().and_then(|req| req.group());
        match self.table.leader(group) {
            Ok((leader, sender)) => {
                tracing::debug!(request_id = %cancel.request_id(), leader = %leader, "forwarding cancel");
                let _ = sender.send(DeviceMessage::Cancel(cancel));
            }
            Err(kind) => {
                tracing::debug!(request_id = %cancel.request_id(), error = %kind, "cancel dropped");
            }
        }
    }
}

/// Send one directive per device and resolve on the first acknowledgement
///
/// Per-device failures are logged and do not stop the others. If no device
/// acknowledges, the promise is dropped and fails with its default error.
fn fan_out(
    promise: ResponsePromise,
    group: Option<GroupId>,
    action: &GroupAction,
    targets: Vec<(DeviceId, DeviceSender)>,
) {
    let mut acks = FuturesUnordered::new();
    for (device, sender) in targets {
        let (ack, ack_rx) = oneshot::channel();
        let directive = GroupDirective {
            group,
            action: action.clone(),
            ack,
        };
        if sender.send(DeviceMessage::Group(directive)).is_err() {
            tracing::warn!(device = %device, "device mailbox closed, skipped");
            continue;
        }
        acks.push(async move { (device, ack_rx.await) });
    }

    tokio::spawn(async move {
        let mut promise = promise;
        while let Some((device, ack)) = acks.next().await {
            match ack {
                Ok(Ok(())) => {
                    if !promise.is_resolved() {
                        let _ = promise.done();
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(device = %device, request_id = %promise.id(), error = %e, "group directive failed");
                }
                Err(_) => {
                    tracing::warn!(device = %device, request_id = %promise.id(), "device dropped group directive");
                }
            }
        }
    });
}
