// Room membership registry.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Connections receive outbound frames as pre-encoded text through an
/// unbounded channel; a closed receiver marks the transport unwritable.
pub type OutboundSender = mpsc::UnboundedSender<String>;

/// A connection's place in a room, fixed by its `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembership {
    pub room: String,
    pub peer_id: String,
}

#[derive(Debug)]
struct ConnectionRecord {
    outbound: OutboundSender,
    membership: Option<RoomMembership>,
}

/// Tracks every open relay connection and the per-room membership sets.
///
/// Rooms exist only as keys here: one is created implicitly by the first
/// join and pruned when its last connection leaves. All mutation happens
/// under a single write lock, so join/leave races cannot corrupt the
/// membership sets; fan-out snapshots are taken under the read lock and
/// sends happen after it is released.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<Uuid, ConnectionRecord>,
    rooms: HashMap<String, HashSet<Uuid>>,
}

impl RoomRegistry {
    /// Track a freshly opened, not-yet-joined connection.
    pub async fn register(&self, connection_id: Uuid, outbound: OutboundSender) {
        let mut inner = self.inner.write().await;
        inner
            .connections
            .insert(connection_id, ConnectionRecord { outbound, membership: None });
    }

    /// Put a connection into `room` under `requested_peer_id`, generating a
    /// fresh peer id when none is requested. Returns the assigned peer id,
    /// or `None` for an unregistered connection.
    ///
    /// A second join moves the connection: membership is last-write-wins and
    /// the previous room's set entry is removed, so a connection is never in
    /// two rooms at once.
    pub async fn join(
        &self,
        connection_id: Uuid,
        room: &str,
        requested_peer_id: Option<&str>,
    ) -> Option<String> {
        let mut inner = self.inner.write().await;
        detach(&mut inner, connection_id);

        let peer_id = requested_peer_id
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let RegistryInner { connections, rooms } = &mut *inner;
        let record = connections.get_mut(&connection_id)?;
        record.membership =
            Some(RoomMembership { room: room.to_owned(), peer_id: peer_id.clone() });
        rooms.entry(room.to_owned()).or_default().insert(connection_id);

        Some(peer_id)
    }

    /// Drop a connection entirely, detaching it from its room first.
    ///
    /// Returns the membership the connection held, if any; callers use it to
    /// announce `peer-left`. Safe to call for never-joined or unknown
    /// connections.
    pub async fn leave(&self, connection_id: Uuid) -> Option<RoomMembership> {
        let mut inner = self.inner.write().await;
        let membership = detach(&mut inner, connection_id);
        inner.connections.remove(&connection_id);
        membership
    }

    /// Snapshot of every connection currently in `room`; empty for unknown
    /// rooms.
    pub async fn connections_in(&self, room: &str) -> Vec<(Uuid, OutboundSender)> {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|connection_id| {
                inner
                    .connections
                    .get(connection_id)
                    .map(|record| (*connection_id, record.outbound.clone()))
            })
            .collect()
    }

    /// Every connection in `room` registered under `peer_id`. More than one
    /// can match: peer-id uniqueness is not enforced, and routing addresses
    /// all of them.
    pub async fn senders_for_peer(
        &self,
        room: &str,
        peer_id: &str,
    ) -> Vec<(Uuid, OutboundSender)> {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|connection_id| {
                let record = inner.connections.get(connection_id)?;
                let membership = record.membership.as_ref()?;
                (membership.peer_id == peer_id)
                    .then(|| (*connection_id, record.outbound.clone()))
            })
            .collect()
    }

    pub async fn sender_for(&self, connection_id: Uuid) -> Option<OutboundSender> {
        let inner = self.inner.read().await;
        inner.connections.get(&connection_id).map(|record| record.outbound.clone())
    }

    pub async fn peer_id_for(&self, connection_id: Uuid) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&connection_id)
            .and_then(|record| record.membership.as_ref())
            .map(|membership| membership.peer_id.clone())
    }
}

/// Remove a connection from its room set (pruning an emptied room) and clear
/// its membership, returning what it held.
fn detach(inner: &mut RegistryInner, connection_id: Uuid) -> Option<RoomMembership> {
    let record = inner.connections.get_mut(&connection_id)?;
    let membership = record.membership.take()?;

    if let Some(members) = inner.rooms.get_mut(&membership.room) {
        members.remove(&connection_id);
        if members.is_empty() {
            inner.rooms.remove(&membership.room);
        }
    }

    Some(membership)
}
