//! Push-channel frame encoding.
//!
//! Two framings are supported over a WebSocket text stream:
//!
//! - `json`: one `{"event": "<name>", "data": {...}}` object per frame.
//! - `socketio`: the subset of Engine.IO v4 / Socket.IO needed by a client
//!   on the default namespace (open `0{...}`, namespace connect `40`,
//!   events `42["<name>", {...}]`, ping `2` / pong `3`).

use crate::models::{AgentUpdate, AnalysisComplete};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use super::ChannelError;

/// Client packet that joins the default Socket.IO namespace.
pub const NAMESPACE_CONNECT: &str = "40";

/// Engine.IO pong reply.
pub const PONG: &str = "3";

/// Wire framing used on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Socket.IO v4 over a raw WebSocket transport
    #[default]
    #[value(name = "socketio")]
    SocketIo,
    /// Plain JSON envelopes
    Json,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::SocketIo => write!(f, "socketio"),
            Protocol::Json => write!(f, "json"),
        }
    }
}

/// Named event received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    AgentUpdate(AgentUpdate),
    AnalysisComplete(AnalysisComplete),
    /// The backend's analysis thread failed as a whole.
    AnalysisError {
        patient_id: Option<String>,
        error: String,
    },
    ConnectionStatus {
        status: String,
    },
    Subscribed {
        patient_id: Option<String>,
    },
    /// Synthesized locally when the socket goes away.
    Disconnected,
    /// Synthesized locally when a slow subscriber missed events.
    Lagged {
        skipped: u64,
    },
    /// Any other named event; kept for logging.
    Other {
        name: String,
    },
}

impl ChannelEvent {
    /// Build an event from its wire name and payload.
    pub fn from_named(name: &str, data: Value) -> Result<Self, ChannelError> {
        let decode_err = |e: serde_json::Error| ChannelError::Decode(format!("{}: {}", name, e));

        let event = match name {
            "agent_update" => ChannelEvent::AgentUpdate(serde_json::from_value(data).map_err(decode_err)?),
            "analysis_complete" => {
                ChannelEvent::AnalysisComplete(serde_json::from_value(data).map_err(decode_err)?)
            }
            "analysis_error" => ChannelEvent::AnalysisError {
                patient_id: string_field(&data, "patient_id"),
                error: string_field(&data, "error").unwrap_or_else(|| "Unknown error".to_string()),
            },
            "connection_status" => ChannelEvent::ConnectionStatus {
                status: string_field(&data, "status").unwrap_or_default(),
            },
            "subscribed" => ChannelEvent::Subscribed {
                patient_id: string_field(&data, "patient_id"),
            },
            other => ChannelEvent::Other {
                name: other.to_string(),
            },
        };

        Ok(event)
    }

    /// Session the event is addressed to, when the payload names one.
    pub fn patient_id(&self) -> Option<&str> {
        match self {
            ChannelEvent::AgentUpdate(update) => update.patient_id.as_deref(),
            ChannelEvent::AnalysisComplete(done) => done.patient_id.as_deref(),
            ChannelEvent::AnalysisError { patient_id, .. }
            | ChannelEvent::Subscribed { patient_id } => patient_id.as_deref(),
            _ => None,
        }
    }

    /// Events without a patient id are delivered to every session.
    pub fn belongs_to(&self, session_id: &str) -> bool {
        self.patient_id().map_or(true, |id| id == session_id)
    }
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// A decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(ChannelEvent),
    /// Engine.IO open packet.
    Open,
    /// Socket.IO namespace connect acknowledgement.
    NamespaceConnected,
    /// Engine.IO ping; must be answered with [`PONG`].
    Ping,
    /// Server closed the session or namespace.
    Close,
    Ignored,
}

/// Encode a named client event.
pub fn encode_event(protocol: Protocol, name: &str, data: &Value) -> String {
    match protocol {
        Protocol::Json => json!({ "event": name, "data": data }).to_string(),
        Protocol::SocketIo => format!("42{}", json!([name, data])),
    }
}

/// Decode one text frame.
pub fn decode(protocol: Protocol, text: &str) -> Result<Frame, ChannelError> {
    match protocol {
        Protocol::Json => decode_json(text),
        Protocol::SocketIo => decode_socketio(text),
    }
}

fn decode_json(text: &str) -> Result<Frame, ChannelError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ChannelError::Decode(e.to_string()))?;

    let Some(name) = value.get("event").and_then(Value::as_str) else {
        return Err(ChannelError::Decode("frame has no event name".to_string()));
    };
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    Ok(Frame::Event(ChannelEvent::from_named(name, data)?))
}

fn decode_socketio(text: &str) -> Result<Frame, ChannelError> {
    let mut chars = text.chars();
    let frame = match chars.next() {
        Some('0') => Frame::Open,
        Some('1') => Frame::Close,
        Some('2') => Frame::Ping,
        Some('4') => decode_socketio_packet(chars.as_str())?,
        _ => Frame::Ignored,
    };
    Ok(frame)
}

/// Socket.IO packet carried in an Engine.IO message.
fn decode_socketio_packet(packet: &str) -> Result<Frame, ChannelError> {
    let mut chars = packet.chars();
    let kind = chars.next();
    let body = skip_namespace(chars.as_str());

    match kind {
        Some('0') => Ok(Frame::NamespaceConnected),
        Some('1') => Ok(Frame::Close),
        Some('2') => {
            // Optional ack id precedes the payload
            let payload = body.trim_start_matches(|c: char| c.is_ascii_digit());
            let parts: Vec<Value> = serde_json::from_str(payload)
                .map_err(|e| ChannelError::Decode(e.to_string()))?;

            let mut parts = parts.into_iter();
            let name = match parts.next() {
                Some(Value::String(name)) => name,
                _ => return Err(ChannelError::Decode("event packet has no name".to_string())),
            };
            let data = parts.next().unwrap_or(Value::Null);

            Ok(Frame::Event(ChannelEvent::from_named(&name, data)?))
        }
        Some('4') => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| string_field(&v, "message"))
                .unwrap_or_else(|| body.to_string());
            Err(ChannelError::Handshake(message))
        }
        _ => Ok(Frame::Ignored),
    }
}

/// Strip a `/namespace,` prefix if present.
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}
