// Viewer presence, derived from heartbeats with a freshness window.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A presence record older than this (relative to the evaluating heartbeat)
/// is stale and evicted.
pub const FRESHNESS_WINDOW_MS: i64 = 75_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PresenceRecord {
    user_id: Option<Uuid>,
    last_seen_at: i64,
}

/// Per-room last-seen markers for anonymous viewing sessions.
///
/// At most one record exists per `(room, session_id)` pair; the upsert, the
/// eviction sweep and the count all happen under one write lock, so
/// concurrent heartbeats for the same session can never double-count.
/// Eviction rides on heartbeat cadence: a room nobody heartbeats keeps its
/// last-known count until the next heartbeat or an explicit `clear`.
#[derive(Debug, Default)]
pub struct PresenceStore {
    rooms: RwLock<HashMap<String, HashMap<String, PresenceRecord>>>,
}

impl PresenceStore {
    /// Record a heartbeat for `(room, session_id)`, evict every record in
    /// the room that fell out of the freshness window, and return the live
    /// viewer count.
    pub async fn heartbeat(&self, room: &str, session_id: &str, user_id: Option<Uuid>) -> usize {
        self.heartbeat_at(room, session_id, user_id, Utc::now().timestamp_millis()).await
    }

    async fn heartbeat_at(
        &self,
        room: &str,
        session_id: &str,
        user_id: Option<Uuid>,
        now: i64,
    ) -> usize {
        let mut rooms = self.rooms.write().await;
        let records = rooms.entry(room.to_owned()).or_default();
        records.insert(session_id.to_owned(), PresenceRecord { user_id, last_seen_at: now });

        let cutoff = now - FRESHNESS_WINDOW_MS;
        records.retain(|_, record| record.last_seen_at >= cutoff);
        records.len()
    }

    /// Drop every presence record for `room` (stream ended or force-ended).
    pub async fn clear(&self, room: &str) {
        self.rooms.write().await.remove(room);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_heartbeats_count_a_session_once() {
        let store = PresenceStore::default();
        assert_eq!(store.heartbeat_at("s1", "session-a", None, 1_000).await, 1);
        assert_eq!(store.heartbeat_at("s1", "session-a", None, 30_000).await, 1);
        assert_eq!(store.heartbeat_at("s1", "session-a", None, 60_000).await, 1);
    }

    #[tokio::test]
    async fn distinct_sessions_accumulate() {
        let store = PresenceStore::default();
        assert_eq!(store.heartbeat_at("s1", "session-a", None, 1_000).await, 1);
        assert_eq!(store.heartbeat_at("s1", "session-b", None, 2_000).await, 2);
        assert_eq!(store.heartbeat_at("s1", "session-c", Some(Uuid::new_v4()), 3_000).await, 3);
    }

    #[tokio::test]
    async fn stale_sessions_are_evicted_on_the_next_heartbeat() {
        let store = PresenceStore::default();
        store.heartbeat_at("s1", "session-a", None, 1_000).await;

        // session-b's heartbeat lands 75s+ after session-a's last pulse.
        let count = store.heartbeat_at("s1", "session-b", None, 1_000 + FRESHNESS_WINDOW_MS + 1).await;
        assert_eq!(count, 1);

        // A record exactly on the window edge survives.
        store.heartbeat_at("s2", "edge", None, 10_000).await;
        let count = store.heartbeat_at("s2", "other", None, 10_000 + FRESHNESS_WINDOW_MS).await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn a_session_returning_after_the_window_counts_again() {
        let store = PresenceStore::default();
        store.heartbeat_at("s1", "session-a", None, 1_000).await;
        let count =
            store.heartbeat_at("s1", "session-a", None, 1_000 + FRESHNESS_WINDOW_MS * 2).await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn rooms_are_independent() {
        let store = PresenceStore::default();
        assert_eq!(store.heartbeat_at("s1", "session-a", None, 1_000).await, 1);
        assert_eq!(store.heartbeat_at("s2", "session-a", None, 1_000).await, 1);
    }

    #[tokio::test]
    async fn clear_resets_the_room() {
        let store = PresenceStore::default();
        store.heartbeat_at("s1", "session-a", None, 1_000).await;
        store.heartbeat_at("s1", "session-b", None, 1_000).await;

        store.clear("s1").await;
        assert_eq!(store.heartbeat_at("s1", "session-c", None, 2_000).await, 1);
    }

    #[tokio::test]
    async fn concurrent_heartbeats_for_one_session_never_duplicate() {
        let store = std::sync::Arc::new(PresenceStore::default());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.heartbeat("s1", "session-a", None).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.expect("heartbeat task should not panic"), 1);
        }
    }
}
