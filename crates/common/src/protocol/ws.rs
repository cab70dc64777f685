// WebSocket message types for the room relay protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `type` tag that registers a connection into a room.
pub const JOIN_TYPE: &str = "join";

/// An inbound relay frame.
///
/// `room` and `type` are mandatory; `to`, `from` and `peerId` are optional
/// routing hints. Every other field is application payload and is preserved
/// verbatim in `extra`, so the relay can forward signaling and chat frames
/// without understanding them. Unknown `type` values are legal — the tag is
/// an open string, not a closed enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub room: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Target peer id for a directed relay; absent means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Peer id requested on join; the server generates one when absent.
    #[serde(default, rename = "peerId", skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Parse a raw text frame.
    ///
    /// Returns `None` when the frame is not a JSON object or lacks a
    /// non-empty `room` or `type`. Malformed frames are dropped without any
    /// reply to the sender.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|envelope| !envelope.room.is_empty() && !envelope.kind.is_empty())
    }

    pub fn is_join(&self) -> bool {
        self.kind == JOIN_TYPE
    }
}

/// Frames synthesized by the server itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SystemEvent {
    /// Unicast acknowledgement of a join, sent to the joiner only.
    #[serde(rename = "joined")]
    Joined {
        room: String,
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// Broadcast to the room after a join (the joiner included).
    #[serde(rename = "peer-joined")]
    PeerJoined {
        room: String,
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// Broadcast to the remaining room members after a connection closes.
    #[serde(rename = "peer-left")]
    PeerLeft {
        room: String,
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// Broadcast when a stream is ended or force-ended.
    #[serde(rename = "stream-ended")]
    StreamEnded {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
}
