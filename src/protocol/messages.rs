// ABOUTME: Protocol message type definitions and serialization
// ABOUTME: Supports radio-state, track-change, listeners-update, sync-time and client requests

use crate::protocol::track::Track;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Top-level protocol message envelope
///
/// Serialized as `{"type": "<name>", "payload": {...}}`. Requests without a
/// payload serialize as `{"type": "<name>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    /// Full broadcast state, sent on connect and on request
    #[serde(rename = "radio-state")]
    RadioState(RadioState),

    /// A new track went on air
    #[serde(rename = "track-change")]
    TrackChange(TrackChange),

    /// Connected listener count changed
    #[serde(rename = "listeners-update")]
    ListenersUpdate(ListenersUpdate),

    /// Position reply to a sync-position request
    #[serde(rename = "sync-time")]
    SyncTime(SyncTime),

    /// Client asks for a fresh radio-state
    #[serde(rename = "get-current-state")]
    GetCurrentState,

    /// Client asks for a sync-time reply
    #[serde(rename = "sync-position")]
    SyncPosition,
}

impl Message {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Protocol name of this message
    pub fn name(&self) -> &'static str {
        match self {
            Message::RadioState(_) => "radio-state",
            Message::TrackChange(_) => "track-change",
            Message::ListenersUpdate(_) => "listeners-update",
            Message::SyncTime(_) => "sync-time",
            Message::GetCurrentState => "get-current-state",
            Message::SyncPosition => "sync-position",
        }
    }
}

/// radio-state payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioState {
    /// Track on air
    pub track: Arc<Track>,
    /// Connected listeners
    pub listener_count: u64,
    /// When the track went on air (server ms since Unix epoch)
    pub track_start_timestamp: i64,
    /// Seconds into the track at `server_time`
    pub current_position: f64,
    /// Server time this payload was built (ms since Unix epoch)
    pub server_time: i64,
}

/// track-change payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackChange {
    /// Track now on air
    pub track: Arc<Track>,
    /// Connected listeners
    pub listener_count: u64,
    /// When the track went on air (server ms since Unix epoch)
    pub track_start_timestamp: i64,
    /// Server time this payload was built (ms since Unix epoch)
    pub server_time: i64,
}

impl TrackChange {
    /// Seconds into the track at `server_time`, never negative
    pub fn position_at_send(&self) -> f64 {
        ((self.server_time - self.track_start_timestamp) as f64 / 1000.0).max(0.0)
    }
}

/// listeners-update payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenersUpdate {
    /// Connected listeners
    pub count: u64,
}

/// sync-time payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTime {
    /// Seconds into the current track at `server_time`
    pub current_position: f64,
    /// Server time this payload was built (ms since Unix epoch)
    pub server_time: i64,
}
