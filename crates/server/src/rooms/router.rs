// Envelope routing: join handling, targeted relay, and room broadcast.

use std::sync::Arc;

use primal_common::protocol::ws::{Envelope, SystemEvent};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics;
use crate::rooms::registry::RoomRegistry;

/// Moves envelopes between the connections the registry knows about.
///
/// Routing is fire-and-forget: a recipient whose transport is gone is
/// skipped without aborting the rest of a fan-out, and no protocol error is
/// ever sent back for an undeliverable or malformed frame. Within one room,
/// frames reach each recipient in dispatch order; nothing is guaranteed
/// across rooms.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<RoomRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Route one inbound text frame from `connection_id`.
    ///
    /// Frames that fail to parse or lack `room`/`type` are dropped silently.
    /// `join` frames register the connection; `to`-addressed frames go to
    /// every connection matching that peer id in the room; everything else
    /// is broadcast to the whole room, the sender included. Relayed frames
    /// are forwarded as the original raw text, byte for byte.
    pub async fn dispatch(&self, connection_id: Uuid, raw: &str) {
        let Some(envelope) = Envelope::parse(raw) else {
            metrics::record_ws_event("drop");
            debug!(%connection_id, "dropped unparseable frame");
            return;
        };

        if envelope.is_join() {
            self.handle_join(connection_id, &envelope).await;
            return;
        }

        match envelope.to.as_deref() {
            Some(to) => {
                metrics::record_ws_event("relay");
                for (_, sender) in self.registry.senders_for_peer(&envelope.room, to).await {
                    let _ = sender.send(raw.to_owned());
                }
            }
            None => {
                metrics::record_ws_event("broadcast");
                self.broadcast_raw(&envelope.room, raw).await;
            }
        }
    }

    async fn handle_join(&self, connection_id: Uuid, envelope: &Envelope) {
        let Some(peer_id) = self
            .registry
            .join(connection_id, &envelope.room, envelope.peer_id.as_deref())
            .await
        else {
            // The connection closed before the join was processed.
            return;
        };

        metrics::record_ws_event("join");
        debug!(%connection_id, room = %envelope.room, peer_id = %peer_id, "peer joined room");

        self.unicast(
            connection_id,
            &SystemEvent::Joined { room: envelope.room.clone(), peer_id: peer_id.clone() },
        )
        .await;
        self.broadcast_system(
            &envelope.room,
            &SystemEvent::PeerJoined { room: envelope.room.clone(), peer_id },
        )
        .await;
    }

    /// Deliver a server-synthesized event to every connection in `room`.
    /// Exposed to stream lifecycle handlers for `stream-ended` and chat
    /// fan-out.
    pub async fn broadcast_system<T: Serialize>(&self, room: &str, event: &T) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(error) => {
                warn!(room, %error, "failed to encode system event");
                return;
            }
        };
        metrics::record_ws_event("system");
        self.broadcast_raw(room, &text).await;
    }

    /// Deregister a closed connection and announce `peer-left` to whatever
    /// room it occupied. The transport layer calls this exactly once per
    /// connection.
    pub async fn handle_disconnect(&self, connection_id: Uuid) {
        let Some(membership) = self.registry.leave(connection_id).await else {
            return;
        };

        metrics::record_ws_event("peer-left");
        debug!(%connection_id, room = %membership.room, peer_id = %membership.peer_id, "peer left room");

        self.broadcast_system(
            &membership.room,
            &SystemEvent::PeerLeft {
                room: membership.room.clone(),
                peer_id: membership.peer_id.clone(),
            },
        )
        .await;
    }

    async fn broadcast_raw(&self, room: &str, text: &str) {
        for (_, sender) in self.registry.connections_in(room).await {
            // A closed channel means the transport went away; skip it.
            let _ = sender.send(text.to_owned());
        }
    }

    async fn unicast<T: Serialize>(&self, connection_id: Uuid, event: &T) {
        let Some(sender) = self.registry.sender_for(connection_id).await else {
            return;
        };
        if let Ok(text) = serde_json::to_string(event) {
            let _ = sender.send(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct TestPeer {
        connection_id: Uuid,
        receiver: mpsc::UnboundedReceiver<String>,
    }

    impl TestPeer {
        fn next_json(&mut self) -> Value {
            let frame = self.receiver.try_recv().expect("a frame should be queued");
            serde_json::from_str(&frame).expect("frames are JSON")
        }

        fn assert_empty(&mut self) {
            assert!(self.receiver.try_recv().is_err(), "no frame should be queued");
        }
    }

    async fn connect(registry: &RoomRegistry) -> TestPeer {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        registry.register(connection_id, sender).await;
        TestPeer { connection_id, receiver }
    }

    async fn join(router: &MessageRouter, peer: &mut TestPeer, room: &str, peer_id: &str) {
        router
            .dispatch(
                peer.connection_id,
                &json!({"room": room, "type": "join", "peerId": peer_id}).to_string(),
            )
            .await;
        // Drain the joined ack and the self-addressed peer-joined.
        assert_eq!(peer.next_json()["type"], "joined");
        assert_eq!(peer.next_json()["type"], "peer-joined");
    }

    fn setup() -> (Arc<RoomRegistry>, MessageRouter) {
        let registry = Arc::new(RoomRegistry::default());
        let router = MessageRouter::new(registry.clone());
        (registry, router)
    }

    #[tokio::test]
    async fn join_acks_the_joiner_and_announces_to_the_room() {
        let (registry, router) = setup();
        let mut first = connect(&registry).await;
        join(&router, &mut first, "s1", "a").await;

        let mut second = connect(&registry).await;
        router
            .dispatch(second.connection_id, r#"{"room":"s1","type":"join","peerId":"b"}"#)
            .await;

        let joined = second.next_json();
        assert_eq!(joined, json!({"type": "joined", "room": "s1", "peerId": "b"}));

        // Broadcast goes to the post-join membership, the joiner included.
        let announced_to_first = first.next_json();
        assert_eq!(announced_to_first, json!({"type": "peer-joined", "room": "s1", "peerId": "b"}));
        let announced_to_second = second.next_json();
        assert_eq!(announced_to_second["type"], "peer-joined");
    }

    #[tokio::test]
    async fn join_without_peer_id_generates_one() {
        let (registry, router) = setup();
        let mut peer = connect(&registry).await;
        router.dispatch(peer.connection_id, r#"{"room":"s1","type":"join"}"#).await;

        let joined = peer.next_json();
        let peer_id = joined["peerId"].as_str().expect("peerId should be a string");
        assert!(Uuid::parse_str(peer_id).is_ok());

        let announced = peer.next_json();
        assert_eq!(announced["peerId"], joined["peerId"]);
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_including_the_sender() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        let mut b = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;
        join(&router, &mut b, "s1", "b").await;
        a.next_json(); // b's peer-joined announcement

        let raw = r#"{"room":"s1","type":"chat","message":"hi"}"#;
        router.dispatch(b.connection_id, raw).await;

        let received_by_a = a.receiver.try_recv().expect("a should receive the chat frame");
        assert_eq!(received_by_a, raw, "frames are relayed byte for byte");
        let received_by_b: Value = b.next_json();
        assert_eq!(received_by_b["message"], "hi");
    }

    #[tokio::test]
    async fn targeted_relay_reaches_only_matching_peers() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        let mut b1 = connect(&registry).await;
        let mut b2 = connect(&registry).await;
        let mut c = connect(&registry).await;
        let mut other_room = connect(&registry).await;

        join(&router, &mut a, "s1", "a").await;
        join(&router, &mut b1, "s1", "b").await;
        join(&router, &mut b2, "s1", "b").await;
        join(&router, &mut c, "s1", "c").await;
        join(&router, &mut other_room, "s2", "b").await;
        for peer in [&mut a, &mut b1, &mut b2, &mut c] {
            while peer.receiver.try_recv().is_ok() {}
        }

        let raw = r#"{"room":"s1","type":"offer","to":"b","from":"a","sdp":"v=0"}"#;
        router.dispatch(a.connection_id, raw).await;

        assert_eq!(b1.receiver.try_recv().expect("b1 should receive the offer"), raw);
        assert_eq!(b2.receiver.try_recv().expect("b2 should receive the offer"), raw);
        a.assert_empty();
        c.assert_empty();
        other_room.assert_empty();
    }

    #[tokio::test]
    async fn targeted_relay_to_unknown_peer_is_a_silent_noop() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;

        router
            .dispatch(a.connection_id, r#"{"room":"s1","type":"offer","to":"ghost"}"#)
            .await;
        a.assert_empty();
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_without_a_reply() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;

        router.dispatch(a.connection_id, "not json at all").await;
        router.dispatch(a.connection_id, r#"{"type":"chat"}"#).await;
        router.dispatch(a.connection_id, r#"{"room":"s1"}"#).await;
        a.assert_empty();

        // The connection still works afterwards.
        router.dispatch(a.connection_id, r#"{"room":"s1","type":"note","n":1}"#).await;
        assert_eq!(a.next_json()["n"], 1);
    }

    #[tokio::test]
    async fn disconnect_announces_peer_left_exactly_once() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        let mut b = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;
        join(&router, &mut b, "s1", "b").await;
        a.next_json(); // b's peer-joined announcement

        router.handle_disconnect(b.connection_id).await;
        router.handle_disconnect(b.connection_id).await;

        let left = a.next_json();
        assert_eq!(left, json!({"type": "peer-left", "room": "s1", "peerId": "b"}));
        a.assert_empty();

        assert!(registry.connections_in("s1").await.len() == 1);
    }

    #[tokio::test]
    async fn disconnect_of_an_unjoined_connection_announces_nothing() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        let unjoined = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;

        router.handle_disconnect(unjoined.connection_id).await;
        a.assert_empty();
    }

    #[tokio::test]
    async fn closed_transports_are_skipped_during_fanout() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        let mut gone = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;
        join(&router, &mut gone, "s1", "gone").await;
        a.next_json(); // gone's peer-joined announcement

        // Drop the receiver: the transport is no longer writable, but the
        // connection has not yet been reaped.
        drop(gone.receiver);

        router
            .dispatch(a.connection_id, r#"{"room":"s1","type":"chat","message":"still here"}"#)
            .await;
        assert_eq!(a.next_json()["message"], "still here");
    }

    #[tokio::test]
    async fn system_broadcast_reaches_the_room() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        let mut b = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;
        join(&router, &mut b, "s1", "b").await;
        a.next_json(); // b's peer-joined announcement

        router
            .broadcast_system("s1", &SystemEvent::StreamEnded { stream_id: "s1".into() })
            .await;

        assert_eq!(a.next_json(), json!({"type": "stream-ended", "streamId": "s1"}));
        assert_eq!(b.next_json()["type"], "stream-ended");
    }

    #[tokio::test]
    async fn frames_from_unjoined_connections_still_route_by_room() {
        let (registry, router) = setup();
        let mut a = connect(&registry).await;
        let lurker = connect(&registry).await;
        join(&router, &mut a, "s1", "a").await;

        router
            .dispatch(lurker.connection_id, r#"{"room":"s1","type":"chat","message":"psst"}"#)
            .await;
        assert_eq!(a.next_json()["message"], "psst");
    }
}
