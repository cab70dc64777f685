// Core domain types shared across the Primal Live crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role, ordered `Viewer < Creator < Admin`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Viewer,
    Creator,
    Admin,
}

impl Role {
    /// Whether this role grants at least the capabilities of `required`.
    pub fn allows(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Viewer => 0,
            Self::Creator => 1,
            Self::Admin => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "VIEWER",
            Self::Creator => "CREATOR",
            Self::Admin => "ADMIN",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "VIEWER" => Some(Self::Viewer),
            "CREATOR" => Some(Self::Creator),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Staff badge shown next to chat messages; empty for viewers.
    pub const fn badge(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Creator => "CREATOR",
            Self::Viewer => "",
        }
    }
}

/// How a stream's media reaches the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestType {
    /// Browser-side capture, signaled peer-to-peer through the relay.
    Webrtc,
    /// External encoder ingest, provisioned outside this server.
    Rtmp,
}

impl IngestType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webrtc => "WEBRTC",
            Self::Rtmp => "RTMP",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "WEBRTC" => Some(Self::Webrtc),
            "RTMP" => Some(Self::Rtmp),
            _ => None,
        }
    }
}

/// Public view of an account (never carries the password hash).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: Role,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// A live stream and its lifecycle state.
///
/// The stream id doubles as the relay room id and the presence room id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub id: Uuid,
    pub creator_id: Uuid,
    /// Joined in from the creator's account on read paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_username: Option<String>,
    pub title: String,
    pub ingest_type: IngestType,
    pub is_live: bool,
    /// Derived from presence heartbeats; written back on every heartbeat.
    pub viewer_count: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub created_at: i64,
}

/// A persisted chat message, enriched with the sender's current staff badge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    /// Username at send time; renames do not rewrite history.
    pub username_snapshot: String,
    pub message: String,
    pub badge: String,
    pub created_at: i64,
}

/// Metadata for a recorded stream registered by the upload pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VodRecord {
    pub id: Uuid,
    pub stream_id: Option<Uuid>,
    pub creator_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_username: Option<String>,
    pub title: String,
    pub file_path: String,
    pub created_at: i64,
}
