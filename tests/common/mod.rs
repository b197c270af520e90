//! Shared utilities for integration tests.
//!
//! Provides common functionality used across the suite:
//! - Logging initialization
//! - A proxy server backed by a simulated transport
//! - A minimal JSON WebSocket client

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Once};
use std::time::Duration;

use ble_gatt_proxy::identifiers::MacAddress;
use ble_gatt_proxy::transport::{ProxyInfo, SimulatedDevice, SimulatedTransport, Transport, TransportCapability, TransportKind};
use ble_gatt_proxy::{ProxyOptions, ProxyServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

pub const SERVICE: &str = "0000fff0-0000-1000-8000-00805f9b34fb";
pub const WRITE_CHAR: &str = "0000fff2-0000-1000-8000-00805f9b34fb";
pub const NOTIFY_CHAR: &str = "0000fff1-0000-1000-8000-00805f9b34fb";
pub const SENSOR: &str = "AA:BB:CC:DD:EE:01";
pub const LAMP: &str = "AA:BB:CC:DD:EE:02";

const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

static LOGGING: Once = Once::new();

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging once per test binary.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ble_gatt_proxy=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Parses a MAC address.
pub fn mac(raw: &str) -> MacAddress {
    MacAddress::parse(raw).expect("valid address")
}

/// Two proxies and two devices; the sensor is strongest via `proxy-b`.
pub fn simulated_backend() -> Arc<SimulatedTransport> {
    Arc::new(
        SimulatedTransport::new(TransportKind::Esphome)
            .with_source(ProxyInfo::new("proxy-a", "192.168.1.40"))
            .with_source(ProxyInfo::new("proxy-b", "192.168.1.41"))
            .with_device(
                SimulatedDevice::new(mac(SENSOR), "Sensor")
                    .with_service(SERVICE)
                    .with_characteristics(WRITE_CHAR, NOTIFY_CHAR)
                    .seen_by("proxy-a", -60)
                    .seen_by("proxy-b", -45)
                    .with_advertisement(vec![0x02, 0x01, 0x06]),
            )
            .with_device(
                SimulatedDevice::new(mac(LAMP), "Lamp")
                    .with_service(SERVICE)
                    .seen_by("proxy-a", -70),
            ),
    )
}

/// Starts a server over `transport` with short timeouts.
pub async fn start_server(transport: &Arc<SimulatedTransport>) -> Arc<ProxyServer> {
    init_logging();

    let options = ProxyOptions::builder()
        .connection_timeout(Duration::from_millis(300))
        .discovery_timeout(Duration::from_millis(50))
        .build()
        .expect("valid options");

    ProxyServer::bind(
        options,
        TransportCapability::Available(Arc::clone(transport) as Arc<dyn Transport>),
    )
    .await
    .expect("server bind")
}

// ============================================================================
// TestClient
// ============================================================================

/// JSON WebSocket client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connects to `url`.
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        Self { ws }
    }

    /// Connects and consumes the initial `status` event.
    pub async fn connect_ready(url: &str) -> Self {
        let mut client = Self::connect(url).await;
        let ready = client.recv().await;
        assert_eq!(ready["type"], "status");
        assert_eq!(ready["message"], "BLE proxy ready");
        client
    }

    /// Sends one text frame.
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .expect("send frame");
    }

    /// Sends one JSON command.
    pub async fn send(&mut self, command: Value) {
        self.send_text(&command.to_string()).await;
    }

    /// Sends a command and returns its response.
    pub async fn request(&mut self, command: Value) -> Value {
        self.send(command).await;
        self.recv().await
    }

    /// Receives the next JSON event.
    pub async fn recv(&mut self) -> Value {
        self.try_recv(EVENT_TIMEOUT)
            .await
            .expect("event before timeout")
    }

    /// Receives the next JSON event, or `None` on timeout or close.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Value> {
        loop {
            let message = timeout(wait, self.ws.next()).await.ok()??.ok()?;

            match message {
                Message::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).expect("json event"));
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Sends a raw WebSocket message.
    pub async fn send_message(&mut self, message: Message) {
        self.ws.send(message).await.expect("send message");
    }

    /// Closes the socket.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
