//! Session receive loop and command dispatch.
//!
//! # Event Loop
//!
//! The session runs one task that handles:
//!
//! - Incoming frames from the client (commands, close, errors)
//! - Termination of its writer task (client write failures)
//!
//! Every text frame produces exactly one direct response. Failures become
//! `error` events and never end the session.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{Command, Event, codec};
use crate::registry::ConnectionRegistry;

use super::{Outbound, SessionCapability, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Status message sent when a session becomes ready.
pub const READY_MESSAGE: &str = "BLE proxy ready";

/// Reason reported for client-requested disconnects.
pub const DISCONNECT_REASON: &str = "User requested disconnect";

// ============================================================================
// Session
// ============================================================================

/// One client WebSocket session.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID.
    id: SessionId,
    /// Backend access, shared by all sessions.
    capability: SessionCapability,
    /// Lifecycle state.
    state: SessionState,
}

impl Session {
    /// Creates an idle session with a fresh ID.
    #[must_use]
    pub fn new(capability: SessionCapability) -> Self {
        Self {
            id: SessionId::generate(),
            capability,
            state: SessionState::Idle,
        }
    }

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }
}

// ============================================================================
// Session - Event Loop
// ============================================================================

impl Session {
    /// Serves the client until the socket closes.
    ///
    /// Consumes the session; on return it is `Closed` and owns no device.
    pub async fn run<S>(mut self, ws_stream: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_write, mut ws_read) = ws_stream.split();
        let (outbound, mut writer) = Outbound::spawn(self.id, ws_write);

        let registry = match &self.capability {
            SessionCapability::Ready(registry) => Arc::clone(registry),
            SessionCapability::Unavailable { reason } => {
                warn!(session_id = %self.id, reason = %reason, "BLE proxy unavailable, closing session");
                let _ = outbound.send(Event::from_error(&Error::transport_unavailable(reason.clone())));

                self.state = SessionState::Closed;
                drop(outbound);
                let _ = writer.await;
                return;
            }
        };

        self.state = SessionState::Ready;
        registry.router().attach_session(self.id, outbound.clone());
        let _ = outbound.send(Event::status(false, None, READY_MESSAGE));

        info!(session_id = %self.id, "Session ready");

        let mut writer_done = false;

        loop {
            tokio::select! {
                // Incoming frames from the client
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let response = self.handle_text(&registry, text.as_str()).await;
                            if let Err(e) = outbound.send(response) {
                                debug!(session_id = %self.id, error = %e, "Outbound closed");
                                break;
                            }
                        }

                        Some(Ok(Message::Binary(data))) => {
                            debug!(session_id = %self.id, bytes = data.len(), "Rejected binary frame");
                            let error = Error::malformed_json("binary frames are not supported");
                            if let Err(e) = outbound.send(Event::from_error(&error)) {
                                debug!(session_id = %self.id, error = %e, "Outbound closed");
                                break;
                            }
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(session_id = %self.id, ?frame, "WebSocket closed by client");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(session_id = %self.id, error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!(session_id = %self.id, "WebSocket stream ended");
                            break;
                        }

                        // Ignore Ping, Pong, Frame
                        Some(Ok(_)) => {}
                    }
                }

                // Writer stopped on a failed send
                _ = &mut writer => {
                    writer_done = true;
                    debug!(session_id = %self.id, "Writer stopped");
                    break;
                }
            }
        }

        self.state = SessionState::Closed;
        self.teardown(&registry).await;

        drop(outbound);
        if !writer_done {
            let _ = writer.await;
        }

        info!(session_id = %self.id, "Session closed");
    }

    /// Releases everything the session holds. Never fails.
    async fn teardown(&self, registry: &ConnectionRegistry) {
        registry.router().detach_session(self.id);

        if registry.disconnect(self.id).await {
            info!(session_id = %self.id, "Device released on session close");
        }
    }
}

// ============================================================================
// Session - Dispatch
// ============================================================================

impl Session {
    /// Turns one text frame into its response event.
    async fn handle_text(&self, registry: &ConnectionRegistry, text: &str) -> Event {
        let command = match codec::decode(text) {
            Ok(command) => command,
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "Rejected frame");
                return Event::from_error(&e);
            }
        };

        debug!(session_id = %self.id, %command, "Command received");

        let label = command.label();
        match self.dispatch(registry, command).await {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id = %self.id, command = label, error = %e, "Command failed");
                Event::command_failed(label, &e)
            }
        }
    }

    /// Runs one command against the registry.
    async fn dispatch(&self, registry: &ConnectionRegistry, command: Command) -> Result<Event> {
        match command {
            Command::Connect {
                service_uuid,
                device_address,
            } => {
                let summary = registry
                    .connect(self.id, service_uuid.as_deref(), device_address.as_ref())
                    .await?;

                Ok(Event::Connected {
                    device_name: summary.device_name,
                    device_address: summary.device_address,
                    services: summary.services,
                })
            }

            Command::Disconnect => {
                registry.disconnect(self.id).await;

                Ok(Event::Disconnected {
                    reason: DISCONNECT_REASON.to_string(),
                })
            }

            Command::Write {
                characteristic_uuid,
                data,
                with_response,
            } => {
                let outcome = registry
                    .write(self.id, &characteristic_uuid, &data, with_response)
                    .await?;

                let mut message = format!("Wrote {} bytes to {characteristic_uuid}", outcome.bytes_written);
                if let Some(expected) = outcome.expected_characteristic {
                    message.push_str(&format!(" (expected write characteristic {expected})"));
                }

                Ok(self.connected_status(registry, message).await)
            }

            Command::Subscribe {
                characteristic_uuid,
            } => {
                registry.subscribe(self.id, &characteristic_uuid).await?;

                Ok(self
                    .connected_status(registry, format!("Subscribed to {characteristic_uuid}"))
                    .await)
            }

            Command::Unsubscribe {
                characteristic_uuid,
            } => {
                registry.unsubscribe(self.id, &characteristic_uuid).await?;

                Ok(self
                    .connected_status(registry, format!("Unsubscribed from {characteristic_uuid}"))
                    .await)
            }

            Command::Discover {
                service_uuid,
                timeout,
            } => {
                let devices = registry
                    .discover_devices(service_uuid.as_deref(), timeout)
                    .await?;

                Ok(Event::Discovered { devices })
            }
        }
    }

    /// Builds a status event naming the connected device.
    async fn connected_status(&self, registry: &ConnectionRegistry, message: String) -> Event {
        let device_name = registry
            .connection(self.id)
            .await
            .map(|summary| summary.display_name());

        Event::status(true, device_name, message)
    }
}

// ============================================================================
// Tests
// ============================================================================
