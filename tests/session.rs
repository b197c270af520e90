//! End-to-end session tests over a real WebSocket.

mod common;

use std::time::Duration;

use ble_gatt_proxy::transport::{SimulatedTransport, TransportCapability, TransportError, TransportKind};
use ble_gatt_proxy::{ProxyOptions, ProxyServer};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use common::{LAMP, NOTIFY_CHAR, SENSOR, SERVICE, TestClient, WRITE_CHAR, mac, simulated_backend, start_server};

// ============================================================================
// Protocol Errors
// ============================================================================

#[tokio::test]
async fn malformed_frames_yield_one_error_each() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    client.send_text("{\"type\":").await;
    let event = client.recv().await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["details"]["code"], "malformedJson");

    let event = client.request(json!({"type": "teleport"})).await;
    assert_eq!(event["details"]["code"], "schemaInvalid");
    assert_eq!(event["details"]["field"], "type");

    let event = client
        .request(json!({"type": "connect", "deviceAddress": "zz:11:22:33:44:55"}))
        .await;
    assert_eq!(event["details"]["field"], "deviceAddress");

    client.send_message(Message::Binary(vec![0xFF].into())).await;
    assert_eq!(client.recv().await["type"], "error");

    // Nothing extra was queued and the session still serves commands
    assert!(client.try_recv(Duration::from_millis(100)).await.is_none());
    let event = client.request(json!({"type": "disconnect"})).await;
    assert_eq!(event["type"], "disconnected");

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn write_before_connect_never_reaches_transport() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    let event = client
        .request(json!({"type": "write", "characteristicUuid": "X", "data": "AQID", "withResponse": true}))
        .await;

    assert_eq!(event["type"], "error");
    assert_eq!(event["error"], "Write failed: No active connection - connect first");
    assert_eq!(event["details"]["code"], "notConnected");
    assert!(transport.writes().is_empty());

    server.shutdown().await;
}

// ============================================================================
// Device Lifecycle
// ============================================================================

#[tokio::test]
async fn write_passes_payload_unmodified() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    let event = client
        .request(json!({"type": "connect", "serviceUuid": SERVICE}))
        .await;
    assert_eq!(event["type"], "connected");
    assert_eq!(event["deviceAddress"], SENSOR);
    assert_eq!(event["services"], json!([SERVICE]));

    let event = client
        .request(json!({"type": "write", "characteristicUuid": WRITE_CHAR, "data": "AQID", "withResponse": true}))
        .await;
    assert_eq!(event["type"], "status");
    assert_eq!(event["message"], format!("Wrote 3 bytes to {WRITE_CHAR}"));

    let writes = transport.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].characteristic_uuid, WRITE_CHAR);
    assert_eq!(writes[0].data, vec![1, 2, 3]);
    assert!(writes[0].with_response);

    server.shutdown().await;
}

#[tokio::test]
async fn reconnect_replaces_previous_connection() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    let first = client
        .request(json!({"type": "connect", "deviceAddress": SENSOR}))
        .await;
    assert_eq!(first["deviceAddress"], SENSOR);

    let second = client
        .request(json!({"type": "connect", "deviceAddress": LAMP}))
        .await;
    assert_eq!(second["deviceAddress"], LAMP);

    assert_eq!(transport.connects(), vec![mac(SENSOR), mac(LAMP)]);
    assert_eq!(transport.disconnects().len(), 1);
    assert_eq!(transport.open_links(), 1);

    let registry = server.registry().expect("registry");
    assert_eq!(registry.connection_count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn connect_timeout_is_reported_and_nothing_stored() {
    let transport = simulated_backend();
    transport.set_connect_delay(Duration::from_secs(5));
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    let event = client.request(json!({"type": "connect"})).await;

    assert_eq!(event["type"], "error");
    assert_eq!(event["details"]["code"], "connectionTimeout");
    assert_eq!(event["details"]["timeoutMs"], 300);
    assert!(
        event["error"]
            .as_str()
            .expect("message")
            .starts_with("Connect failed: Connection timeout after 300ms")
    );
    assert_eq!(server.registry().expect("registry").connection_count(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn transport_failure_keeps_session_alive() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    client.request(json!({"type": "connect"})).await;
    transport.set_write_failure(Some(TransportError::gatt("write not permitted")));

    let event = client
        .request(json!({"type": "write", "characteristicUuid": WRITE_CHAR, "data": "AA=="}))
        .await;
    assert_eq!(event["error"], "Write failed: GATT error: write not permitted");
    assert_eq!(event["details"]["operation"], "write");

    transport.set_write_failure(None);
    let event = client
        .request(json!({"type": "write", "characteristicUuid": WRITE_CHAR, "data": "AA=="}))
        .await;
    assert_eq!(event["type"], "status");

    server.shutdown().await;
}

#[tokio::test]
async fn closing_socket_releases_device() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    client.request(json!({"type": "connect"})).await;
    assert_eq!(transport.open_links(), 1);

    client.close().await;

    let registry = server.registry().expect("registry");
    for _ in 0..50 {
        if registry.connection_count() == 0 && transport.open_links() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(registry.connection_count(), 0);
    assert_eq!(transport.open_links(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn closing_socket_survives_failed_disconnect() {
    let transport = simulated_backend();
    transport.set_disconnect_failure(Some(TransportError::gatt("link lost")));
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    client.request(json!({"type": "connect"})).await;
    client.close().await;

    let registry = server.registry().expect("registry");
    for _ in 0..50 {
        if server.session_count() == 0 && registry.pending_releases() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(server.session_count(), 0);
    assert_eq!(registry.connection_count(), 0);
    assert_eq!(registry.router().binding_count(), 0);
    // The backend refused, so its link stays open
    assert_eq!(transport.open_links(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_waits_for_inflight_disconnect() {
    let transport = simulated_backend();
    transport.set_disconnect_delay(Duration::from_millis(300));
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    client.request(json!({"type": "connect"})).await;
    client.send(json!({"type": "disconnect"})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.shutdown().await;

    assert_eq!(server.registry().expect("registry").connection_count(), 0);
    assert_eq!(transport.open_links(), 0);
    assert_eq!(transport.disconnects().len(), 1);
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn notifications_follow_subscription() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    client.request(json!({"type": "connect", "deviceAddress": SENSOR})).await;

    let event = client
        .request(json!({"type": "subscribe", "characteristicUuid": NOTIFY_CHAR}))
        .await;
    assert_eq!(event["message"], format!("Subscribed to {NOTIFY_CHAR}"));
    assert_eq!(event["deviceName"], "Sensor");

    for value in 0..5u8 {
        transport.emit_notification(&mac(SENSOR), NOTIFY_CHAR, &[value]);
    }
    for value in 0..5u8 {
        let event = client.recv().await;
        assert_eq!(event["type"], "notification");
        assert_eq!(event["characteristicUuid"], NOTIFY_CHAR);
        assert_eq!(event["data"], base64_of(&[value]));
    }

    let event = client
        .request(json!({"type": "unsubscribe", "characteristicUuid": NOTIFY_CHAR}))
        .await;
    assert_eq!(event["message"], format!("Unsubscribed from {NOTIFY_CHAR}"));

    // Device keeps notifying; the session must not see it
    assert_eq!(transport.emit_notification(&mac(SENSOR), NOTIFY_CHAR, &[0xEE]), 1);
    assert!(client.try_recv(Duration::from_millis(200)).await.is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn notifications_stay_with_owning_session() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut owner = TestClient::connect_ready(&server.ws_url()).await;
    let mut bystander = TestClient::connect_ready(&server.ws_url()).await;

    owner.request(json!({"type": "connect", "deviceAddress": SENSOR})).await;
    owner
        .request(json!({"type": "subscribe", "characteristicUuid": NOTIFY_CHAR}))
        .await;
    bystander.request(json!({"type": "connect", "deviceAddress": LAMP})).await;

    transport.emit_notification(&mac(SENSOR), NOTIFY_CHAR, &[7]);

    assert_eq!(owner.recv().await["type"], "notification");
    assert!(bystander.try_recv(Duration::from_millis(200)).await.is_none());

    server.shutdown().await;
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn discovery_keeps_strongest_source() -> anyhow::Result<()> {
    let transport = simulated_backend();
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    let event = client.request(json!({"type": "discover", "timeout": 0.05})).await;
    assert_eq!(event["type"], "discovered");

    let devices = event["devices"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("devices is not an array: {event}"))?;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["macAddress"], SENSOR);
    assert_eq!(devices[0]["bestSource"], "proxy-b");
    assert_eq!(devices[0]["rssi"], -45);
    assert_eq!(devices[0]["advertisementData"], "AgEG");
    assert!(devices[0]["lastSeen"].is_string());
    assert!(devices[1].get("advertisementData").is_none());

    assert_eq!(server.status().expect("status").devices_discovered, 2);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn discovery_failure_on_every_source() {
    let transport = simulated_backend();
    transport.fail_discovery("proxy-a", TransportError::source_unavailable("proxy-a", "unreachable"));
    transport.fail_discovery("proxy-b", TransportError::source_unavailable("proxy-b", "unreachable"));
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    let event = client.request(json!({"type": "discover"})).await;
    assert_eq!(event["type"], "error");
    assert!(event["error"].as_str().expect("message").starts_with("Discovery failed: "));

    server.shutdown().await;
}

// ============================================================================
// Server
// ============================================================================

#[tokio::test]
async fn unavailable_transport_reports_and_closes() -> anyhow::Result<()> {
    common::init_logging();
    let server = ProxyServer::bind(
        ProxyOptions::default(),
        TransportCapability::unavailable("Bluetooth adapter not found"),
    )
    .await?;

    let mut client = TestClient::connect(&server.ws_url()).await;

    let event = client.recv().await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["error"], "BLE proxy not available: Bluetooth adapter not found");
    assert!(client.try_recv(Duration::from_millis(500)).await.is_none());
    assert!(server.status().is_none());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_releases_every_device() {
    let transport = simulated_backend();
    let server = start_server(&transport).await;

    let mut first = TestClient::connect_ready(&server.ws_url()).await;
    let mut second = TestClient::connect_ready(&server.ws_url()).await;
    first.request(json!({"type": "connect", "deviceAddress": SENSOR})).await;
    second.request(json!({"type": "connect", "deviceAddress": LAMP})).await;
    assert_eq!(transport.open_links(), 2);

    server.shutdown().await;

    assert_eq!(server.registry().expect("registry").connection_count(), 0);
    assert_eq!(server.session_count(), 0);
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn local_backend_connects_through_adapter() {
    let transport = std::sync::Arc::new(
        SimulatedTransport::new(TransportKind::Local).with_device(
            ble_gatt_proxy::transport::SimulatedDevice::new(mac(SENSOR), "Sensor")
                .with_service(SERVICE)
                .seen_by(ble_gatt_proxy::transport::simulated::LOCAL_ADAPTER, -55),
        ),
    );
    let server = start_server(&transport).await;
    let mut client = TestClient::connect_ready(&server.ws_url()).await;

    let event = client.request(json!({"type": "connect"})).await;
    assert_eq!(event["deviceAddress"], SENSOR);

    let registry = server.registry().expect("registry");
    assert_eq!(registry.status().mode, TransportKind::Local);

    server.shutdown().await;
}

// ============================================================================
// Helpers
// ============================================================================

fn base64_of(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
