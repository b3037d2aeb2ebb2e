//! End-to-end routing tests against a live router

use std::time::Duration;

use fleet_exchange::handler::UiEvent;
use fleet_exchange::message::{
    Cancel, DeviceCommand, GroupId, GroupReport, LogLevel, Notification, ObjectKind,
    PersistenceRequest, ProtocolDescription, RequestResult, StateSignal,
};
use fleet_exchange::{ErrorKind, Request, spawn_channel, spawn_device, spawn_persistence};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

mod common;
use common::{
    EchoDevice, MemoryPersistence, SerialChannel, channel, device, start_router,
    wait_for_channel, wait_for_device, wait_for_leader, wait_for_log, wait_for_status,
};

fn report(group: u64, term: u64, leader: Option<&str>, members: &[&str]) -> GroupReport {
    GroupReport {
        group: Some(GroupId::new(group)),
        term,
        leader: leader.map(device),
        members: members.iter().copied().map(device).collect(),
    }
}

#[tokio::test]
async fn device_request_reaches_handler() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();

    let pending = router
        .submit(Request::device(device("uav-1"), DeviceCommand::simple("nav", "takeoff")))
        .await
        .unwrap();
    let response = pending.outcome().await.unwrap();

    assert_eq!(response.body, json!({ "device": "uav-1", "command": "takeoff" }));
}

#[tokio::test]
async fn unknown_device_fails_unreachable() {
    let (router, _task) = start_router();

    let pending = router
        .submit(Request::device(device("ghost"), DeviceCommand::simple("nav", "land")))
        .await
        .unwrap();
    let error = pending.outcome().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::ReceiverUnreachable);
    assert!(error.to_string().contains("ghost"));
}

#[tokio::test]
async fn persistence_request_without_service_fails() {
    let (router, _task) = start_router();

    let pending = router
        .submit(Request::persistence(PersistenceRequest::List {
            object: ObjectKind::Device,
        }))
        .await
        .unwrap();

    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::ReceiverUnreachable);
}

#[tokio::test]
async fn group_command_goes_to_leader() {
    let (router, _task) = start_router();
    for id in ["uav-1", "uav-2"] {
        spawn_device(&router, device(id), EchoDevice::default()).await.unwrap();
    }
    router
        .report_group(device("uav-1"), report(7, 1, Some("uav-2"), &["uav-1", "uav-2"]))
        .await
        .unwrap();
    assert!(wait_for_leader(&router, GroupId::new(7), "uav-2").await);

    let pending = router
        .submit(Request::group(Some(GroupId::new(7)), DeviceCommand::simple("nav", "rtl")))
        .await
        .unwrap();
    let response = pending.outcome().await.unwrap();

    assert_eq!(response.body["device"], "uav-2");
}

#[tokio::test]
async fn group_errors_name_the_missing_piece() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();
    spawn_device(&router, device("uav-2"), EchoDevice::default()).await.unwrap();

    // Group 1 has no leader, group 2 is led by a device without a handler
    router
        .report_group(device("uav-1"), report(1, 1, None, &["uav-1"]))
        .await
        .unwrap();
    router
        .report_group(device("uav-2"), report(2, 1, Some("ghost"), &["uav-2", "ghost"]))
        .await
        .unwrap();
    assert!(wait_for_leader(&router, GroupId::new(2), "ghost").await);

    let cases = [
        (None, ErrorKind::GroupNotSet),
        (Some(GroupId::new(99)), ErrorKind::GroupUnknown),
        (Some(GroupId::new(1)), ErrorKind::GroupWithoutLeader),
        (Some(GroupId::new(2)), ErrorKind::GroupLeaderUnknown),
    ];
    for (group, expected) in cases {
        let pending = router
            .submit(Request::group(group, DeviceCommand::simple("nav", "hold")))
            .await
            .unwrap();
        assert_eq!(pending.outcome().await.unwrap_err().kind(), expected, "group {group:?}");
    }

    let pending = router
        .submit(Request::group(
            Some(GroupId::new(1)),
            DeviceCommand::GroupDelete,
        ))
        .await
        .unwrap();
    assert_ok!(pending.outcome().await);
}

#[tokio::test]
async fn group_new_resolves_on_first_ack() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::rejecting_groups()).await.unwrap();
    spawn_device(&router, device("uav-2"), EchoDevice::default()).await.unwrap();

    let pending = router
        .submit(Request::group(
            None,
            DeviceCommand::GroupNew {
                members: vec![device("uav-1"), device("uav-2"), device("ghost")],
            },
        ))
        .await
        .unwrap();

    assert_ok!(pending.outcome().await);
}

#[tokio::test]
async fn group_new_fails_when_nobody_acks() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::rejecting_groups()).await.unwrap();

    let pending = router
        .submit(Request::group(
            None,
            DeviceCommand::GroupNew {
                members: vec![device("uav-1")],
            },
        ))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::GroupUnreachable);

    let pending = router
        .submit(Request::group(
            None,
            DeviceCommand::GroupNew {
                members: vec![device("ghost")],
            },
        ))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::GroupUnreachable);
}

#[tokio::test]
async fn cancel_reaches_owner_and_is_idempotent() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();

    let request = Request::device(device("uav-1"), DeviceCommand::simple("mission", "hold"));
    let mut pending = router.submit(request.clone()).await.unwrap();

    // The handler owns the promise once it has reported progress
    let state = pending.states.recv().await.unwrap();
    assert_eq!(state.signal(), StateSignal::Progress(10));

    router.cancel(Cancel::new(request.clone())).await.unwrap();
    router.cancel(Cancel::new(request)).await.unwrap();

    let error = pending.completion.await.unwrap().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Canceled);
}

#[tokio::test]
async fn disconnected_device_fails_held_requests_and_leaves_registry() {
    let (router, _task) = start_router();
    let handler = spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();

    let mut pending = router
        .submit(Request::device(device("uav-1"), DeviceCommand::simple("mission", "hold")))
        .await
        .unwrap();
    pending.states.recv().await.unwrap();

    handler.abort();

    let error = pending.outcome().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ReceiverUnreachable);
    assert!(wait_for_status(&router, |s| s.devices.is_empty()).await);

    let pending = router
        .submit(Request::device(device("uav-1"), DeviceCommand::simple("nav", "land")))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::ReceiverUnreachable);
}

#[tokio::test]
async fn reregistered_device_survives_stale_disconnect() {
    let (router, _task) = start_router();
    let old = spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();
    spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();
    assert!(wait_for_device(&router, "uav-1").await);

    old.abort();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pending = router
        .submit(Request::device(device("uav-1"), DeviceCommand::simple("nav", "land")))
        .await
        .unwrap();
    assert_ok!(pending.outcome().await);
}

#[tokio::test]
async fn activation_goes_to_the_live_handler() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();

    let pending = router
        .submit(Request::persistence(PersistenceRequest::ActivateDevice {
            device: device("uav-1"),
            active: false,
        }))
        .await
        .unwrap();
    let response = pending.outcome().await.unwrap();
    assert_eq!(response.body, json!({ "device": "uav-1", "active": false }));

    let pending = router
        .submit(Request::persistence(PersistenceRequest::ActivateChannel {
            channel: "serial-0".into(),
            active: true,
        }))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::ReceiverUnreachable);
}

#[tokio::test]
async fn channel_activation_reaches_live_channel() {
    let (router, _task) = start_router();
    spawn_channel(&router, channel("serial-0"), SerialChannel::default()).await.unwrap();
    assert!(wait_for_channel(&router, "serial-0").await);

    let pending = router
        .submit(Request::persistence(PersistenceRequest::ActivateChannel {
            channel: channel("serial-0"),
            active: true,
        }))
        .await
        .unwrap();
    let response = pending.outcome().await.unwrap();

    assert_eq!(response.body, json!({ "channel": "serial-0", "active": true }));
}

#[tokio::test]
async fn channel_cancel_reaches_owner() {
    let (router, _task) = start_router();
    spawn_channel(&router, channel("serial-0"), SerialChannel::default()).await.unwrap();

    let request = Request::persistence(PersistenceRequest::ActivateChannel {
        channel: channel("serial-0"),
        active: false,
    });
    let mut pending = router.submit(request.clone()).await.unwrap();
    assert_eq!(pending.states.recv().await.unwrap().signal(), StateSignal::Progress(5));

    router.cancel(Cancel::new(request)).await.unwrap();

    let error = pending.completion.await.unwrap().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Canceled);
}

#[tokio::test]
async fn disconnected_channel_leaves_registry() {
    let (router, _task) = start_router();
    let handler = spawn_channel(&router, channel("serial-0"), SerialChannel::default())
        .await
        .unwrap();

    let mut pending = router
        .submit(Request::persistence(PersistenceRequest::ActivateChannel {
            channel: channel("serial-0"),
            active: false,
        }))
        .await
        .unwrap();
    pending.states.recv().await.unwrap();

    handler.abort();

    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::ReceiverUnreachable);
    assert!(wait_for_status(&router, |s| s.channels.is_empty()).await);

    let pending = router
        .submit(Request::persistence(PersistenceRequest::ActivateChannel {
            channel: channel("serial-0"),
            active: true,
        }))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::ReceiverUnreachable);
}

#[tokio::test]
async fn persistence_serves_requests_and_records_notifications() {
    let (router, _task) = start_router();
    let persistence = MemoryPersistence::default();
    spawn_persistence(&router, persistence.clone()).await.unwrap();

    let pending = router
        .submit(Request::persistence(PersistenceRequest::Register {
            object: ObjectKind::Device,
            data: json!({ "name": "uav-1" }),
        }))
        .await
        .unwrap();
    pending.outcome().await.unwrap();

    let pending = router
        .submit(Request::persistence(PersistenceRequest::List {
            object: ObjectKind::Device,
        }))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap().body, json!([{ "name": "uav-1" }]));

    router
        .notify(Notification::DeviceRegistered {
            device: device("uav-1"),
            registered: true,
        })
        .await
        .unwrap();
    router
        .protocols_loaded(vec![ProtocolDescription {
            name: "mavlink".to_string(),
            info: String::new(),
            timeout_ms: 500,
        }])
        .await
        .unwrap();

    assert!(
        wait_for_log(&persistence, |log| {
            log.protocols.len() == 1
                && log
                    .notifications
                    .iter()
                    .any(|n| matches!(**n, Notification::DeviceRegistered { .. }))
        })
        .await
    );
}

#[tokio::test]
async fn device_logs_are_broadcast() {
    let (router, _task) = start_router();
    let persistence = MemoryPersistence::default();
    spawn_persistence(&router, persistence.clone()).await.unwrap();

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    router.register_ui(ui_tx).await.unwrap();

    let ctx = fleet_exchange::DeviceContext::new(device("uav-1"), router.clone());
    ctx.log(LogLevel::Warning, "battery low").await.unwrap();

    let mut seen = false;
    while let Some(UiEvent::Notification(note)) = ui_rx.recv().await {
        if let Some(record) = note.as_log()
            && record.text == "battery low"
        {
            assert_eq!(record.device, Some(device("uav-1")));
            seen = true;
            break;
        }
    }
    assert!(seen);
    assert!(
        wait_for_log(&persistence, |log| log
            .notifications
            .iter()
            .any(|n| n.as_log().is_some_and(|r| r.text == "battery low")))
        .await
    );
}

#[tokio::test]
async fn group_reports_and_outcomes_reach_ui_clients() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    router.register_ui(ui_tx).await.unwrap();

    router
        .report_group(device("uav-1"), report(3, 2, Some("uav-1"), &["uav-1", "uav-9"]))
        .await
        .unwrap();
    let request = Request::group(Some(GroupId::new(3)), DeviceCommand::simple("nav", "loiter"));
    let pending = router.submit(request.clone()).await.unwrap();
    pending.outcome().await.unwrap();

    let mut snapshot = None;
    let mut finished = None;
    while snapshot.is_none() || finished.is_none() {
        match tokio::time::timeout(Duration::from_secs(2), ui_rx.recv()).await {
            Ok(Some(UiEvent::Notification(note))) => {
                if let Notification::GroupState(s) = &*note {
                    snapshot = Some(s.clone());
                }
            }
            Ok(Some(UiEvent::State(state))) => {
                if state.request_id() == request.id() {
                    finished = state.result();
                }
            }
            _ => break,
        }
    }

    let snapshot = snapshot.unwrap();
    assert_eq!(snapshot.leader, Some(device("uav-1")));
    assert_eq!(snapshot.members, vec![device("uav-1")]);
    assert_eq!(snapshot.unknown_members, vec![device("uav-9")]);
    assert_eq!(finished, Some(RequestResult::Done));
}

#[tokio::test]
async fn stale_group_report_is_ignored() {
    let (router, _task) = start_router();
    for id in ["uav-1", "uav-2"] {
        spawn_device(&router, device(id), EchoDevice::default()).await.unwrap();
    }

    router
        .report_group(device("uav-1"), report(5, 4, Some("uav-1"), &["uav-1", "uav-2"]))
        .await
        .unwrap();
    router
        .report_group(device("uav-2"), report(5, 3, Some("uav-2"), &["uav-1", "uav-2"]))
        .await
        .unwrap();

    let groups = router.groups().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].term, 4);
    assert_eq!(groups[0].leader, Some(device("uav-1")));
}

#[tokio::test]
async fn persistence_loss_without_handlers_stops_router() {
    let (router, task) = start_router();
    let persistence = spawn_persistence(&router, MemoryPersistence::default()).await.unwrap();
    assert!(wait_for_status(&router, |s| s.persistence).await);

    persistence.abort();

    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(router.status().await.is_err());
}

#[tokio::test]
async fn persistence_loss_with_live_devices_keeps_running() {
    let (router, _task) = start_router();
    spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();
    let persistence = spawn_persistence(&router, MemoryPersistence::default()).await.unwrap();
    assert!(wait_for_status(&router, |s| s.persistence).await);

    persistence.abort();
    assert!(wait_for_status(&router, |s| !s.persistence).await);

    let pending = router
        .submit(Request::device(device("uav-1"), DeviceCommand::simple("nav", "land")))
        .await
        .unwrap();
    assert_ok!(pending.outcome().await);
}

#[tokio::test]
async fn shutdown_drops_handlers() {
    let (router, task) = start_router();
    let handler = spawn_device(&router, device("uav-1"), EchoDevice::default()).await.unwrap();

    router.shutdown().await.unwrap();
    task.await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), handler).await.unwrap().unwrap();
    assert_err!(router.submit(Request::device(device("uav-1"), DeviceCommand::GroupDelete)).await);
}

#[tokio::test]
async fn group_lifecycle_from_formation_to_removal() {
    let (router, _task) = start_router();
    let d1 = spawn_device(&router, device("d1"), EchoDevice::default()).await.unwrap();
    let d2 = spawn_device(&router, device("d2"), EchoDevice::default()).await.unwrap();

    let pending = router
        .submit(Request::group(
            None,
            DeviceCommand::GroupNew {
                members: vec![device("d1"), device("d2")],
            },
        ))
        .await
        .unwrap();
    assert_ok!(pending.outcome().await);

    // The swarm settles on group 1 led by d1
    router.report_group(device("d1"), report(1, 1, Some("d1"), &["d1", "d2"])).await.unwrap();
    router.report_group(device("d2"), report(1, 1, Some("d1"), &["d1", "d2"])).await.unwrap();
    let pending = router
        .submit(Request::group(Some(GroupId::new(1)), DeviceCommand::simple("nav", "rtl")))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap().body["device"], "d1");

    router.report_group(device("d2"), report(1, 0, Some("d2"), &["d1", "d2"])).await.unwrap();
    let groups = router.groups().await.unwrap();
    assert_eq!(groups[0].leader, Some(device("d1")));
    assert_eq!(groups[0].confirmed, vec![device("d1"), device("d2")]);

    d1.abort();
    d2.abort();
    assert!(wait_for_status(&router, |s| s.devices.is_empty()).await);
    assert!(router.groups().await.unwrap().is_empty());

    let pending = router
        .submit(Request::group(Some(GroupId::new(1)), DeviceCommand::simple("nav", "rtl")))
        .await
        .unwrap();
    assert_eq!(pending.outcome().await.unwrap_err().kind(), ErrorKind::GroupUnknown);
}
