//! Engine.IO v4 / Socket.IO v5 text framing, default namespace only.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::clash::error::PushError;

pub const PONG: &str = "3";

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Engine.IO handshake with the server's heartbeat settings.
    Open {
        ping_interval: Duration,
        ping_timeout: Duration,
    },
    /// Engine.IO close.
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connect acknowledged.
    Connect,
    ConnectError(String),
    /// Server-side namespace disconnect.
    Disconnect,
    Event { name: String, args: Vec<Value> },
    /// Well-formed but irrelevant to us (acks, binary, upgrade probes).
    Ignored,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPayload {
    ping_interval: u64,
    ping_timeout: u64,
}

pub fn decode(text: &str) -> Result<Frame, PushError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| PushError::Protocol("empty frame".to_string()))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let open: OpenPayload = serde_json::from_str(rest)
                .map_err(|e| PushError::Protocol(format!("bad open payload: {e}")))?;
            Ok(Frame::Open {
                ping_interval: Duration::from_millis(open.ping_interval),
                ping_timeout: Duration::from_millis(open.ping_timeout),
            })
        }
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_socket(rest),
        '5' => Ok(Frame::Ignored),
        '6' => Ok(Frame::Noop),
        other => Err(PushError::Protocol(format!("unknown engine packet {other}"))),
    }
}

fn decode_socket(packet: &str) -> Result<Frame, PushError> {
    let mut chars = packet.chars();
    let kind = chars
        .next()
        .ok_or_else(|| PushError::Protocol("empty socket packet".to_string()))?;
    let body = skip_namespace_and_id(chars.as_str());

    match kind {
        '0' => Ok(Frame::Connect),
        '1' => Ok(Frame::Disconnect),
        '2' => {
            let value: Value = serde_json::from_str(body)
                .map_err(|e| PushError::Protocol(format!("bad event payload: {e}")))?;
            let Value::Array(mut items) = value else {
                return Err(PushError::Protocol("event payload is not an array".to_string()));
            };
            if items.is_empty() {
                return Err(PushError::Protocol("event without a name".to_string()));
            }
            let name = match items.remove(0) {
                Value::String(s) => s,
                other => return Err(PushError::Protocol(format!("event name {other}"))),
            };
            Ok(Frame::Event { name, args: items })
        }
        '3' | '5' | '6' => Ok(Frame::Ignored),
        '4' => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.to_string());
            Ok(Frame::ConnectError(message))
        }
        other => Err(PushError::Protocol(format!("unknown socket packet {other}"))),
    }
}

/// Skip an optional `/nsp,` prefix and an optional numeric ack id.
fn skip_namespace_and_id(s: &str) -> &str {
    let s = if s.starts_with('/') {
        s.split_once(',').map(|(_, rest)| rest).unwrap_or("")
    } else {
        s
    };
    s.trim_start_matches(|c: char| c.is_ascii_digit())
}

pub fn encode_connect() -> String {
    "40".to_string()
}

pub fn encode_disconnect() -> String {
    "41".to_string()
}

pub fn encode_event(name: &str, payload: &Value) -> String {
    format!("42{}", json!([name, payload]))
}
