//! Control-plane WebSocket connection.
//!
//! [`ConnectionManager`] keeps a single connection to
//! `<base>/printer/socket` alive: it connects with a bearer credential,
//! forwards inbound desired-id lists to the agent, writes the agent's
//! outbound frames, and reconnects after a fixed delay whenever the
//! connection closes or fails to open.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use printlink_core::protocol::parse_desired_jobs;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::agent::AgentHandle;

/// Close code reported when the connection ended without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame that carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection label, logged whenever it changes, and the last error that
/// goes into the next disconnect label.
#[derive(Debug)]
struct ConnectionState {
    label: String,
    last_error: String,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            label: "Disconnected".to_string(),
            last_error: "none".to_string(),
        }
    }
}

impl ConnectionState {
    /// A connection opened: the last error resets to `OK`.
    fn opened(&mut self, url: &str) -> bool {
        self.last_error = "OK".to_string();
        self.set(connected_label(url))
    }

    fn record_error(&mut self, error: impl ToString) {
        self.last_error = error.to_string();
    }

    fn closed(&mut self, code: u16) -> bool {
        let label = disconnect_label(code, &self.last_error);
        self.set(label)
    }

    /// Update the label. Returns `false` when it is unchanged.
    fn set(&mut self, label: String) -> bool {
        if self.label == label {
            return false;
        }
        tracing::info!("{label}");
        self.label = label;
        true
    }
}

fn connected_label(url: &str) -> String {
    format!("Connected to {url}")
}

fn disconnect_label(code: u16, last_error: &str) -> String {
    format!("Disconnected ({code}): {last_error}")
}

/// Code for a session ended by an inbound close frame.
fn close_code(frame: Option<&CloseFrame<'_>>) -> u16 {
    frame
        .map(|f| u16::from(f.code))
        .unwrap_or(NO_STATUS_RECEIVED)
}

/// How a session ended.
enum SessionEnd {
    Closed(u16),
    Cancelled,
}

pub struct ConnectionManager {
    url: String,
    token: String,
    reconnect_delay: Duration,
    agent: AgentHandle,
    state: ConnectionState,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        reconnect_delay: Duration,
        agent: AgentHandle,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            reconnect_delay,
            agent,
            state: ConnectionState::default(),
        }
    }

    /// Connect, serve, and reconnect until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tracing::debug!(endpoint = %self.url, "Connecting to control plane");

            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.connect() => result,
            };

            let code = match connected {
                Ok(ws_stream) => {
                    self.state.opened(&self.url);

                    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                    self.agent.connection_opened(frames_tx);
                    let end = self.run_session(ws_stream, frames_rx, &cancel).await;
                    self.agent.connection_closed();

                    match end {
                        SessionEnd::Closed(code) => code,
                        SessionEnd::Cancelled => return,
                    }
                }
                Err(e) => {
                    self.state.record_error(e);
                    ABNORMAL_CLOSURE
                }
            };

            self.state.closed(code);

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn connect(&self) -> Result<WsStream, ConnectionError> {
        let request = build_request(&self.url, &self.token)?;
        let (ws_stream, _response) = connect_async(request).await?;
        Ok(ws_stream)
    }

    /// Drive one open connection: forward outbound frames and dispatch
    /// inbound ones until the socket closes.
    async fn run_session(
        &mut self,
        ws_stream: WsStream,
        mut frames_rx: mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws_stream.split();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                frame = frames_rx.recv() => {
                    let Some(frame) = frame else {
                        // Agent has gone away.
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Cancelled;
                    };
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        tracing::warn!(error = %e, "WebSocket send error");
                        self.state.record_error(e);
                        return SessionEnd::Closed(ABNORMAL_CLOSURE);
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Close(frame))) => {
                            return SessionEnd::Closed(close_code(frame.as_ref()));
                        }
                        Some(Ok(_)) => {
                            // Ping / Pong handled by tungstenite; binary ignored.
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket receive error");
                            self.state.record_error(e);
                            return SessionEnd::Closed(ABNORMAL_CLOSURE);
                        }
                        None => return SessionEnd::Closed(ABNORMAL_CLOSURE),
                    }
                }
            }
        }
    }

    /// Parse an inbound desired-id list and hand it to the agent.
    ///
    /// Malformed frames are logged and dropped; the previous list stays
    /// authoritative.
    fn handle_frame(&self, text: &str) {
        match parse_desired_jobs(text) {
            Ok(ids) => {
                tracing::debug!(count = ids.len(), "Received desired job list");
                self.agent.desired_jobs(ids);
            }
            Err(e) => {
                tracing::warn!(error = %e, raw = %text, "Discarding malformed frame");
            }
        }
    }
}

/// Build the handshake request with the bearer credential attached.
fn build_request(url: &str, token: &str) -> Result<Request, ConnectionError> {
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    Ok(request)
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("{0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid credential header: {0}")]
    InvalidCredential(#[from] InvalidHeaderValue),
}
