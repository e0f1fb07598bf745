use std::io;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use secarch_contracts::chat::InboundEvent;
use secarch_engine::Orchestrator;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect as websocket_connect, Message as WsMessage, WebSocket};

use crate::shutdown::ShutdownHandle;
use crate::slack::SlackClient;

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

const READ_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// One decoded Socket Mode frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Hello,
    Disconnect { reason: String },
    Event { envelope_id: String, event: InboundEvent },
    Other { envelope_id: Option<String>, kind: String },
}

pub fn parse_frame(raw: &str) -> Result<Frame> {
    let envelope: Value = serde_json::from_str(raw).context("socket frame is not JSON")?;
    let kind = envelope
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let envelope_id = envelope
        .get("envelope_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    match kind.as_str() {
        "hello" => Ok(Frame::Hello),
        "disconnect" => Ok(Frame::Disconnect {
            reason: envelope
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string(),
        }),
        "events_api" => {
            let Some(envelope_id) = envelope_id else {
                bail!("events_api frame without envelope_id");
            };
            let event = InboundEvent::from_value(&envelope).context("malformed event payload")?;
            Ok(Frame::Event { envelope_id, event })
        }
        _ => Ok(Frame::Other { envelope_id, kind }),
    }
}

pub fn ack_payload(envelope_id: &str) -> Value {
    json!({ "envelope_id": envelope_id })
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Socket Mode receive loop. Events are handled one at a time, each after its
/// envelope has been acknowledged.
pub struct SocketModeLoop<'a> {
    slack: &'a SlackClient,
    orchestrator: &'a Orchestrator,
    shutdown: ShutdownHandle,
}

impl<'a> SocketModeLoop<'a> {
    pub fn new(slack: &'a SlackClient, orchestrator: &'a Orchestrator, shutdown: ShutdownHandle) -> Self {
        Self {
            slack,
            orchestrator,
            shutdown,
        }
    }

    pub fn run(&self) -> Result<()> {
        while !self.shutdown.is_triggered() {
            let outcome = self
                .slack
                .open_socket_url()
                .map_err(anyhow::Error::new)
                .and_then(|url| self.session(&url));
            match outcome {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Reconnect) => info!("reconnecting socket"),
                Err(err) => {
                    error!(error = %format!("{err:#}"), "socket session failed");
                    thread::sleep(RECONNECT_DELAY);
                }
            }
        }
        info!("socket loop stopped");
        Ok(())
    }

    fn session(&self, url: &str) -> Result<SessionEnd> {
        let request = url
            .into_client_request()
            .context("invalid socket mode URL")?;
        let (mut ws, _) = websocket_connect(request).context("failed to connect socket mode websocket")?;
        set_socket_read_timeout(&mut ws, Some(READ_POLL_INTERVAL));
        info!("socket mode connected");

        loop {
            if self.shutdown.is_triggered() {
                let _ = ws.close(None);
                return Ok(SessionEnd::Shutdown);
            }
            let message = match ws.read() {
                Ok(message) => message,
                Err(tungstenite::Error::Io(err)) if is_poll_timeout(&err) => continue,
                Err(err) if is_tungstenite_transport_error(&err) => {
                    warn!(error = %err, "socket closed");
                    return Ok(SessionEnd::Reconnect);
                }
                Err(err) => return Err(err).context("socket read failed"),
            };
            match message {
                WsMessage::Text(text) => {
                    if let Some(end) = self.handle_text(&mut ws, text.as_str())? {
                        return Ok(end);
                    }
                }
                WsMessage::Close(frame) => {
                    info!(?frame, "socket closed by server");
                    return Ok(SessionEnd::Reconnect);
                }
                _ => {}
            }
        }
    }

    fn handle_text(&self, ws: &mut Socket, raw: &str) -> Result<Option<SessionEnd>> {
        let frame = match parse_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring unreadable frame");
                return Ok(None);
            }
        };
        match frame {
            Frame::Hello => info!("socket mode hello"),
            Frame::Disconnect { reason } => {
                info!(reason = %reason, "server requested disconnect");
                return Ok(Some(SessionEnd::Reconnect));
            }
            Frame::Event { envelope_id, event } => {
                send_json(ws, &ack_payload(&envelope_id))?;
                if event.should_handle() {
                    info!(event_type = %event.event_type, channel = ?event.channel, "handling event");
                    let outcome = self.orchestrator.handle_event(&event, self.slack);
                    info!(request_id = %outcome.request_id, state = %outcome.final_state(), "event handled");
                } else {
                    debug!(event_type = %event.event_type, "event ignored");
                }
            }
            Frame::Other { envelope_id, kind } => {
                if let Some(envelope_id) = envelope_id {
                    send_json(ws, &ack_payload(&envelope_id))?;
                }
                debug!(kind = %kind, "unhandled frame type");
            }
        }
        Ok(None)
    }
}

fn send_json(ws: &mut Socket, value: &Value) -> Result<()> {
    let raw = serde_json::to_string(value).context("failed to serialize socket payload")?;
    ws.send(WsMessage::Text(raw.into()))
        .context("failed to send socket payload")
}

fn set_socket_read_timeout(ws: &mut Socket, timeout: Option<Duration>) {
    match ws.get_mut() {
        MaybeTlsStream::Plain(stream) => {
            let _ = stream.set_read_timeout(timeout);
        }
        MaybeTlsStream::Rustls(stream) => {
            let _ = stream.get_mut().set_read_timeout(timeout);
        }
        _ => {}
    }
}

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn is_tungstenite_transport_error(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::NotConnected
        ),
        tungstenite::Error::Tls(_) => true,
        _ => false,
    }
}
