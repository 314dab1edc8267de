//! 服务端测试：启动流程、广播参数和读请求处理

mod common;

use blelink_core::ble::peripheral::AdvertiseMode;
use blelink_core::workflow::drive_server;
use blelink_core::{
    AdvertisementSpec, BleError, BleEvent, BleServer, CHAR_UUID, ChannelListener,
    GattServiceSpec, GattStatus, LinkState, ReadRequest, SERVICE_UUID, ServerEvent, ServerState,
};
use common::{FakeAdapter, FakePeripheral, PeripheralCall, drain};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

fn server(
    adapter: &Arc<FakeAdapter>,
    peripheral: &Arc<FakePeripheral>,
) -> (BleServer, mpsc::Receiver<BleEvent>) {
    let mut server = BleServer::new(adapter.clone(), peripheral.clone());
    let (listener, rx) = ChannelListener::new();
    server.add_listener(Arc::new(listener));
    (server, rx)
}

fn read_request(request_id: u32, offset: usize, characteristic: Uuid) -> ServerEvent {
    ServerEvent::ReadRequest(ReadRequest {
        device: "11:22:33:44:55:66".to_string(),
        request_id,
        offset,
        characteristic,
    })
}

#[tokio::test]
async fn test_unavailable_adapter_reports_error_without_advertising() {
    let adapter = FakeAdapter::new(false, false);
    let peripheral = FakePeripheral::new();
    let (mut server, mut rx) = server(&adapter, &peripheral);

    server.start().await.unwrap();

    assert_eq!(
        drain(&mut rx),
        vec![BleEvent::Error("Bluetooth is not available".to_string())]
    );
    assert!(peripheral.calls().is_empty());
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_disabled_adapter_requests_enable_then_starts() {
    let adapter = FakeAdapter::new(true, false);
    let peripheral = FakePeripheral::new();
    let (mut server, mut rx) = server(&adapter, &peripheral);

    server.start().await.unwrap();
    assert_eq!(drain(&mut rx), vec![BleEvent::EnableBluetooth]);
    assert_eq!(server.state(), ServerState::AwaitingEnable);
    assert!(peripheral.calls().is_empty());

    adapter.set_enabled(true);
    server.on_enable_result(true).await.unwrap();

    assert_eq!(adapter.availability_checks.load(Ordering::SeqCst), 2);
    assert_eq!(server.state(), ServerState::Running);
}

#[tokio::test]
async fn test_start_advertises_and_registers_service() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, _rx) = server(&adapter, &peripheral);

    server.start().await.unwrap();

    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(
        peripheral.calls(),
        vec![
            PeripheralCall::SetLocalName("MyAdapter".to_string()),
            PeripheralCall::StartAdvertising(AdvertisementSpec {
                local_name: "MyAdapter".to_string(),
                service_uuids: vec![SERVICE_UUID],
                include_name: true,
                connectable: true,
                mode: AdvertiseMode::LowLatency,
            }),
            PeripheralCall::OpenGattServer(GattServiceSpec::exchange()),
        ]
    );
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, _rx) = server(&adapter, &peripheral);

    server.start().await.unwrap();
    assert!(matches!(
        server.start().await,
        Err(BleError::AlreadyActive(_))
    ));
    assert_eq!(
        peripheral.count(|c| matches!(c, PeripheralCall::OpenGattServer(_))),
        1
    );
}

#[tokio::test]
async fn test_start_while_awaiting_enable_is_rejected() {
    let adapter = FakeAdapter::new(true, false);
    let peripheral = FakePeripheral::new();
    let (mut server, mut rx) = server(&adapter, &peripheral);

    server.start().await.unwrap();
    assert!(matches!(
        server.start().await,
        Err(BleError::AlreadyActive(_))
    ));

    assert_eq!(drain(&mut rx), vec![BleEvent::EnableBluetooth]);
    assert_eq!(server.state(), ServerState::AwaitingEnable);
    assert!(peripheral.calls().is_empty());
}

#[tokio::test]
async fn test_advertising_failure_is_not_fatal() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    peripheral.fail_advertise.store(true, Ordering::SeqCst);
    let (mut server, mut rx) = server(&adapter, &peripheral);

    server.start().await.unwrap();

    assert_eq!(server.state(), ServerState::Running);
    assert!(drain(&mut rx).is_empty());
    assert_eq!(
        peripheral.count(|c| matches!(c, PeripheralCall::OpenGattServer(_))),
        1
    );

    // 广播没有开始，停止时不再注销
    server.stop().await;
    assert_eq!(peripheral.count(|c| *c == PeripheralCall::StopAdvertising), 0);
    assert_eq!(peripheral.count(|c| *c == PeripheralCall::CloseGattServer), 1);
}

#[tokio::test]
async fn test_gatt_open_failure_stops_advertising() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    peripheral.fail_open.store(true, Ordering::SeqCst);
    let (mut server, _rx) = server(&adapter, &peripheral);

    assert!(server.start().await.is_err());
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(peripheral.count(|c| *c == PeripheralCall::StopAdvertising), 1);
}

#[tokio::test]
async fn test_read_returns_default_payload() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, _rx) = server(&adapter, &peripheral);
    server.start().await.unwrap();

    server.handle_event(read_request(3, 0, CHAR_UUID)).await;

    let responses = peripheral.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].request_id, 3);
    assert_eq!(responses[0].status, GattStatus::Success);
    assert_eq!(responses[0].offset, 0);
    assert_eq!(responses[0].value, b"Hello from Server");
}

#[tokio::test]
async fn test_set_data_changes_next_read() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, _rx) = server(&adapter, &peripheral);
    server.start().await.unwrap();

    server.set_data("Updated").await;
    server.handle_event(read_request(1, 0, CHAR_UUID)).await;

    assert_eq!(peripheral.responses()[0].value, b"Updated");
}

#[tokio::test]
async fn test_unknown_characteristic_gets_no_response() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, mut rx) = server(&adapter, &peripheral);
    server.start().await.unwrap();

    let other = Uuid::from_u128(0x00002a38_0000_1000_8000_00805f9b34fb);
    server.handle_event(read_request(9, 0, other)).await;

    assert!(peripheral.responses().is_empty());
    assert!(drain(&mut rx).is_empty());
    assert_eq!(server.state(), ServerState::Running);
}

#[tokio::test]
async fn test_read_honours_offset() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, _rx) = server(&adapter, &peripheral);
    server.start().await.unwrap();

    server.handle_event(read_request(1, 6, CHAR_UUID)).await;
    server.handle_event(read_request(2, 100, CHAR_UUID)).await;

    let responses = peripheral.responses();
    assert_eq!(responses[0].status, GattStatus::Success);
    assert_eq!(responses[0].offset, 6);
    assert_eq!(responses[0].value, b"from Server");

    assert_eq!(responses[1].status, GattStatus::InvalidOffset);
    assert_eq!(responses[1].offset, 100);
    assert!(responses[1].value.is_empty());
}

#[tokio::test]
async fn test_connection_events_do_not_change_state() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, mut rx) = server(&adapter, &peripheral);
    server.start().await.unwrap();

    for state in [LinkState::Connected, LinkState::Disconnected] {
        server
            .handle_event(ServerEvent::ConnectionStateChanged {
                device: "11:22:33:44:55:66".to_string(),
                state,
            })
            .await;
    }

    assert_eq!(server.state(), ServerState::Running);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let adapter = FakeAdapter::ready();
    let peripheral = FakePeripheral::new();
    let (mut server, _rx) = server(&adapter, &peripheral);

    server.stop().await;
    assert!(peripheral.calls().is_empty());

    server.start().await.unwrap();
    server.stop().await;
    server.stop().await;

    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(peripheral.count(|c| *c == PeripheralCall::StopAdvertising), 1);
    assert_eq!(peripheral.count(|c| *c == PeripheralCall::CloseGattServer), 1);
}

#[tokio::test]
async fn test_drive_server_applies_updates_and_answers_reads() {
    let adapter = FakeAdapter::ready();
    let (responses_tx, mut responses_rx) = mpsc::channel(8);
    let peripheral = FakePeripheral::forwarding(responses_tx);
    let server = BleServer::new(adapter.clone(), peripheral.clone());
    let payload = server.payload();

    let (radio_tx, radio_rx) = mpsc::channel(8);
    let (updates_tx, updates_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (ui, _ui_rx) = ChannelListener::new();

    let driver = async {
        updates_tx.send("Updated".to_string()).await.unwrap();
        while payload.get().await != "Updated" {
            tokio::task::yield_now().await;
        }

        radio_tx.send(read_request(1, 0, CHAR_UUID)).await.unwrap();
        let response = responses_rx.recv().await.unwrap();
        let _ = stop_tx.send(());
        response
    };
    let shutdown = async {
        let _ = stop_rx.await;
    };

    let (result, response) = tokio::join!(
        drive_server(server, adapter, radio_rx, updates_rx, &ui, shutdown),
        driver
    );

    result.unwrap();
    assert_eq!(response.value, b"Updated");
    assert_eq!(peripheral.count(|c| *c == PeripheralCall::CloseGattServer), 1);
}

#[tokio::test]
async fn test_drive_server_fails_when_adapter_missing() {
    let adapter = FakeAdapter::new(false, false);
    let peripheral = FakePeripheral::new();
    let server = BleServer::new(adapter.clone(), peripheral.clone());
    let (_radio_tx, radio_rx) = mpsc::channel(8);
    let (_updates_tx, updates_rx) = mpsc::channel(8);
    let (ui, mut ui_rx) = ChannelListener::new();

    let result = drive_server(
        server,
        adapter,
        radio_rx,
        updates_rx,
        &ui,
        std::future::pending(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(
        drain(&mut ui_rx),
        vec![BleEvent::Error("Bluetooth is not available".to_string())]
    );
    assert!(peripheral.calls().is_empty());
}
