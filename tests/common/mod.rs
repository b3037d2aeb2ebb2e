//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_exchange::handler::GroupAction;
use fleet_exchange::message::{
    Cancel, ChannelId, DeviceCommand, DeviceId, GroupId, NotificationPtr, PersistenceRequest,
    ProtocolDescription, RequestBody,
};
use fleet_exchange::{
    ChannelContext, ChannelHandler, DeviceContext, DeviceHandler, ErrorDescription, ErrorKind, PersistenceContext,
    PersistenceService, RequestId, ResponsePromise, Router, RouterConfig, RouterHandle,
    RouterStatus,
};
use serde_json::json;
use tokio::task::JoinHandle;

/// Start a router with default settings
pub fn start_router() -> (RouterHandle, JoinHandle<()>) {
    Router::spawn(RouterConfig::default())
}

/// Poll router status until `check` passes
pub async fn wait_for_status(router: &RouterHandle, check: impl Fn(&RouterStatus) -> bool) -> bool {
    for _ in 0..100 {
        if let Ok(status) = router.status().await
            && check(&status)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Wait until the router lists `device`
pub async fn wait_for_device(router: &RouterHandle, device: &str) -> bool {
    wait_for_status(router, |s| s.devices.iter().any(|d| d.as_str() == device)).await
}

/// Wait until the coordinator knows `group` with `leader`
pub async fn wait_for_leader(router: &RouterHandle, group: GroupId, leader: &str) -> bool {
    for _ in 0..100 {
        if let Ok(groups) = router.groups().await
            && groups
                .iter()
                .any(|g| g.group == group && g.leader.as_ref().is_some_and(|l| l.as_str() == leader))
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn device(id: &str) -> DeviceId {
    DeviceId::new(id)
}

pub fn channel(id: &str) -> ChannelId {
    ChannelId::new(id)
}

/// Wait until the router lists `channel`
pub async fn wait_for_channel(router: &RouterHandle, channel: &str) -> bool {
    wait_for_status(router, |s| s.channels.iter().any(|c| c.as_str() == channel)).await
}

/// Device that answers every command with its own id
///
/// Commands named `hold` stay pending until canceled.
#[derive(Default)]
pub struct EchoDevice {
    held: HashMap<RequestId, ResponsePromise>,
    reject_groups: bool,
}

impl EchoDevice {
    /// Device whose group directives always fail
    pub fn rejecting_groups() -> Self {
        Self {
            reject_groups: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl DeviceHandler for EchoDevice {
    async fn on_request(&mut self, ctx: &DeviceContext, mut promise: ResponsePromise) {
        let request = promise.request().clone();
        let body = match request.body() {
            RequestBody::Device(req) => match &req.command {
                DeviceCommand::Command { name, .. } if name == "hold" => {
                    promise.report_progress(10);
                    self.held.insert(promise.id(), promise);
                    return;
                }
                DeviceCommand::Command { name, .. } => {
                    json!({ "device": ctx.id().as_str(), "command": name })
                }
                other => json!({ "device": ctx.id().as_str(), "command": other.name() }),
            },
            RequestBody::Persistence(PersistenceRequest::ActivateDevice { active, .. }) => {
                json!({ "device": ctx.id().as_str(), "active": active })
            }
            RequestBody::Persistence(_) => {
                let _ = promise.fail(ErrorKind::NotImplemented);
                return;
            }
        };
        let _ = promise.resolve(body);
    }

    async fn on_cancel(&mut self, _ctx: &DeviceContext, cancel: Cancel) {
        if let Some(mut promise) = self.held.remove(&cancel.request_id()) {
            let _ = promise.cancel();
        }
    }

    async fn on_group(
        &mut self,
        _ctx: &DeviceContext,
        _group: Option<GroupId>,
        _action: GroupAction,
    ) -> Result<(), ErrorDescription> {
        if self.reject_groups {
            Err(ErrorKind::CmdFailed.into())
        } else {
            Ok(())
        }
    }
}

/// Channel that confirms activation and holds deactivation
///
/// Deactivating waits for the link to drain, so the request stays pending
/// until it is canceled.
#[derive(Default)]
pub struct SerialChannel {
    held: HashMap<RequestId, ResponsePromise>,
}

#[async_trait]
impl ChannelHandler for SerialChannel {
    async fn on_request(&mut self, ctx: &ChannelContext, mut promise: ResponsePromise) {
        let request = promise.request().clone();
        match request.body() {
            RequestBody::Persistence(PersistenceRequest::ActivateChannel { active: true, .. }) => {
                let _ = promise.resolve(json!({ "channel": ctx.id().as_str(), "active": true }));
            }
            RequestBody::Persistence(PersistenceRequest::ActivateChannel { active: false, .. }) => {
                promise.report_progress(5);
                self.held.insert(promise.id(), promise);
            }
            _ => {
                let _ = promise.fail(ErrorKind::NotImplemented);
            }
        }
    }

    async fn on_cancel(&mut self, _ctx: &ChannelContext, cancel: Cancel) {
        if let Some(mut promise) = self.held.remove(&cancel.request_id()) {
            let _ = promise.cancel();
        }
    }
}

/// What the in-memory persistence service has seen
#[derive(Default)]
pub struct PersistenceLog {
    pub notifications: Vec<NotificationPtr>,
    pub registered: Vec<serde_json::Value>,
    pub protocols: Vec<ProtocolDescription>,
}

/// Persistence service keeping everything in memory
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    pub log: Arc<Mutex<PersistenceLog>>,
}

#[async_trait]
impl PersistenceService for MemoryPersistence {
    async fn on_request(&mut self, _ctx: &PersistenceContext, mut promise: ResponsePromise) {
        let request = promise.request().clone();
        let RequestBody::Persistence(req) = request.body() else {
            let _ = promise.fail(ErrorKind::NotImplemented);
            return;
        };
        match req {
            PersistenceRequest::Register { data, .. } => {
                self.log.lock().unwrap().registered.push(data.clone());
                let _ = promise.done();
            }
            PersistenceRequest::List { .. } => {
                let items = self.log.lock().unwrap().registered.clone();
                let _ = promise.resolve(json!(items));
            }
            _ => {
                let _ = promise.fail(ErrorDescription::with_detail(ErrorKind::NotFound, req.name()));
            }
        }
    }

    async fn on_notification(&mut self, _ctx: &PersistenceContext, notification: NotificationPtr) {
        self.log.lock().unwrap().notifications.push(notification);
    }

    async fn on_protocols_loaded(
        &mut self,
        _ctx: &PersistenceContext,
        protocols: Vec<ProtocolDescription>,
    ) {
        self.log.lock().unwrap().protocols = protocols;
    }
}

/// Poll a condition on the persistence log
pub async fn wait_for_log(
    persistence: &MemoryPersistence,
    check: impl Fn(&PersistenceLog) -> bool,
) -> bool {
    for _ in 0..100 {
        if check(&*persistence.log.lock().unwrap()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
