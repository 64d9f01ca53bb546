//! Console streaming protocol types.
//!
//! JSON frames exchanged over the console WebSocket:
//!
//! ```text
//! server → client   {"type":"status","data":"Opening console channel..."}
//!                   {"type":"screen","data":"<base64 PNG>"}
//! client → server   {"type":"input","action":"key","data":{"keyCode":13}}
//!                   {"type":"input","action":"mouse","data":{"x":100,"y":200,"click":"left"}}
//! ```
//!
//! Inbound frames of any other shape are ignored, never rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vm::{ConsoleInput, MouseButton};

/// Upper bound of the normalized pointer range on both axes.
pub const POINTER_MAX: i64 = u16::MAX as i64;

// ---------------------------------------------------------------------------
// Outbound (vmdeck → client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Human-readable progress line shown while the session comes up.
    Status(String),
    /// One display frame as base64 PNG.
    Screen(String),
}

impl ServerMessage {
    /// Serialize to JSON string for transmission.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Inbound (client → vmdeck)
// ---------------------------------------------------------------------------

/// Loosely-typed inbound frame. Only `type == "input"` carries meaning.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    /// The input event this frame describes, if any.
    pub fn to_input(&self) -> Option<ConsoleInput> {
        if self.msg_type != "input" {
            return None;
        }
        match self.action.as_deref()? {
            "key" => {
                let key_code = self.data.get("keyCode")?.as_u64()?;
                Some(ConsoleInput::Key {
                    key_code: u32::try_from(key_code).ok()?,
                })
            }
            "mouse" => Some(ConsoleInput::Mouse {
                x: pointer_axis(self.data.get("x")?)?,
                y: pointer_axis(self.data.get("y")?)?,
                click: match self.data.get("click").and_then(Value::as_str) {
                    Some("left") => Some(MouseButton::Left),
                    _ => None,
                },
            }),
            _ => None,
        }
    }
}

/// Parse one text frame from the client. `None` for anything that is not a
/// well-formed input message.
pub fn parse_client_message(text: &str) -> Option<ConsoleInput> {
    serde_json::from_str::<ClientFrame>(text).ok()?.to_input()
}

/// Clamp a coordinate into 0..=65535. Accepts integers and floats.
fn pointer_axis(value: &Value) -> Option<u16> {
    let raw = match value.as_i64() {
        Some(i) => i,
        None => value.as_f64().filter(|f| f.is_finite())?.round() as i64,
    };
    u16::try_from(raw.clamp(0, POINTER_MAX)).ok()
}
