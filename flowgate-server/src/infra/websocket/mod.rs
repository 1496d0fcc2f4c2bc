//! Client side of the event bus: what browsers send over `/ws`.

use serde::{Deserialize, Serialize};

/// Control frames a client may send after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

/// Acknowledgement sent back for each control frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameAck<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: &'static str,
    pub channel: &'a str,
    pub ok: bool,
}

/// Split a `channels=a,b` query value into channel names, dropping blanks.
pub fn parse_channels(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
