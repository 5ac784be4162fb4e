//! Session gateway: turns client events into registry and room operations.
//!
//! Each connected member owns one outbox. Every message the gateway
//! produces (replies, errors, broadcasts) goes through outboxes, so the
//! gateway can be driven in tests without any transport:
//!
//! ```text
//! dispatch(member, event) ──► handler ──► Registry / Room ──► outboxes
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use canvas_core::{BoardError, Diff, DiffPolicy};
use tokio::sync::RwLock;

use crate::error::CollabError;
use crate::protocol::{ClientEvent, MemberId, RoomId, ServerEvent, NOT_JOINED, ROOM_EXISTS};
use crate::registry::RoomRegistry;
use crate::room::{Inbox, Outbox, DEFAULT_OUTBOX_CAPACITY};

/// Handle returned by [`Gateway::connect`].
pub struct MemberConnection {
    pub member_id: MemberId,
    /// Every event addressed to this member, in delivery order.
    pub events: Inbox,
}

/// Client-visible event for a failed operation, if there is one.
pub fn error_event(error: &CollabError) -> Option<ServerEvent> {
    match error {
        CollabError::RoomNotFound(_) => Some(ServerEvent::invalid_room()),
        CollabError::DuplicateRoom(_) => Some(ServerEvent::RoomConflict(ROOM_EXISTS.to_string())),
        CollabError::NotJoined(_) => Some(ServerEvent::NotJoined(NOT_JOINED.to_string())),
        CollabError::Board(e @ BoardError::DiffOutOfRange { .. }) => {
            Some(ServerEvent::InvalidStroke(e.to_string()))
        }
        CollabError::Board(e) => Some(ServerEvent::Error(e.to_string())),
        CollabError::UnknownMember(_) | CollabError::OutboxFull(_) => None,
    }
}

pub struct Gateway {
    registry: Arc<RoomRegistry>,
    outboxes: RwLock<HashMap<MemberId, Outbox>>,
    diff_policy: DiffPolicy,
    outbox_capacity: usize,
}

impl Gateway {
    pub fn new(registry: Arc<RoomRegistry>, diff_policy: DiffPolicy) -> Self {
        Self {
            registry,
            outboxes: RwLock::new(HashMap::new()),
            diff_policy,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }

    /// Bound every member's queue to `capacity` undelivered events.
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    pub fn outbox_capacity(&self) -> usize {
        self.outbox_capacity
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn diff_policy(&self) -> DiffPolicy {
        self.diff_policy
    }

    /// Register a new member. No room is joined.
    pub async fn connect(&self) -> MemberConnection {
        let member_id = MemberId::new();
        let (tx, rx) = Outbox::channel(self.outbox_capacity);
        self.outboxes.write().await.insert(member_id, tx);
        log::debug!("{member_id} connected");
        MemberConnection { member_id, events: rx }
    }

    /// Forget a member's outbox. Rooms it joined are not left; the transport
    /// issues explicit `leave`s first.
    pub async fn disconnect(&self, member: &MemberId) -> bool {
        let removed = self.outboxes.write().await.remove(member).is_some();
        if removed {
            log::debug!("{member} disconnected");
        }
        removed
    }

    pub async fn connected_members(&self) -> usize {
        self.outboxes.read().await.len()
    }

    /// Queue an event for one member behind anything already pending.
    pub async fn send_to(&self, member: &MemberId, event: ServerEvent) -> bool {
        match self.outboxes.read().await.get(member) {
            Some(outbox) => outbox.deliver(Arc::new(event)).is_ok(),
            None => false,
        }
    }

    async fn outbox(&self, member: &MemberId) -> Result<Outbox, CollabError> {
        self.outboxes
            .read()
            .await
            .get(member)
            .cloned()
            .ok_or(CollabError::UnknownMember(*member))
    }

    /// Handle one client event. Failures are also reported to the requester
    /// as the matching error event.
    pub async fn dispatch(&self, member: MemberId, event: ClientEvent) -> Result<(), CollabError> {
        let outbox = self.outbox(&member).await?;

        let result = match event {
            ClientEvent::Join { room_id } => self.on_join(member, &outbox, room_id).await,
            ClientEvent::SendStroke { room_id, diffs } => {
                self.on_send_stroke(member, room_id, diffs).await
            }
            ClientEvent::Leave { room_id } => self.on_leave(member, room_id).await,
            ClientEvent::CreateRoom { room_id } => self.on_create_room(&outbox, room_id).await,
        };

        if let Err(e) = &result {
            log::debug!("{member}: {e}");
            if let Some(reply) = error_event(e) {
                deliver(&outbox, reply);
            }
        }
        result
    }

    async fn on_join(&self, member: MemberId, outbox: &Outbox, room_id: RoomId) -> Result<(), CollabError> {
        let room = self.registry.get_room(&room_id).await?;
        room.join(member, outbox.clone()).await?;
        Ok(())
    }

    async fn on_send_stroke(
        &self,
        member: MemberId,
        room_id: RoomId,
        diffs: Vec<Diff>,
    ) -> Result<(), CollabError> {
        let room = self.registry.get_room(&room_id).await?;
        let receipt = room.commit_stroke(&member, diffs, self.diff_policy).await?;
        log::trace!(
            "{member} stroke in room {room_id}: {} applied, {} skipped, {} recipients",
            receipt.outcome.applied,
            receipt.outcome.skipped,
            receipt.delivered
        );
        if receipt.now_empty {
            self.registry.remove_if_empty(&room).await;
        }
        Ok(())
    }

    async fn on_leave(&self, member: MemberId, room_id: RoomId) -> Result<(), CollabError> {
        let room = self.registry.get_room(&room_id).await?;
        let departure = room.remove_member(&member).await?;
        if departure.now_empty {
            self.registry.remove_if_empty(&room).await;
        }
        Ok(())
    }

    async fn on_create_room(&self, outbox: &Outbox, room_id: RoomId) -> Result<(), CollabError> {
        let room_id = self.create_room(room_id).await?;
        deliver(outbox, ServerEvent::RoomCreated { room_id });
        Ok(())
    }

    /// Administrative create-room: returns the id on success.
    pub async fn create_room(&self, room_id: RoomId) -> Result<RoomId, CollabError> {
        self.registry.create_room(room_id.clone()).await?;
        Ok(room_id)
    }
}

fn deliver(outbox: &Outbox, event: ServerEvent) {
    if let Err(e) = outbox.deliver(Arc::new(event)) {
        log::debug!("Dropping reply: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ROOM_NOT_FOUND;

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(RoomRegistry::new(10, 10).unwrap()), DiffPolicy::Skip)
    }

    fn drain(conn: &mut MemberConnection) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = conn.events.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn join(room: &str) -> ClientEvent {
        ClientEvent::Join { room_id: room.into() }
    }

    fn leave(room: &str) -> ClientEvent {
        ClientEvent::Leave { room_id: room.into() }
    }

    fn stroke(room: &str, diffs: &[Diff]) -> ClientEvent {
        ClientEvent::SendStroke { room_id: room.into(), diffs: diffs.to_vec() }
    }

    fn strokes_in(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::BroadcastStroke { .. }))
            .count()
    }

    fn board_of(events: &[ServerEvent]) -> Vec<i64> {
        events
            .iter()
            .find_map(|e| match e {
                ServerEvent::InitializeBoard { board } => Some(board.data.clone()),
                _ => None,
            })
            .expect("initialize-board")
    }

    #[tokio::test]
    async fn test_join_initializes_board_for_new_client() {
        let gw = gateway();
        gw.create_room("testid".into()).await.unwrap();
        let mut c1 = gw.connect().await;
        gw.dispatch(c1.member_id, join("testid")).await.unwrap();
        gw.registry()
            .update_room_board(&"testid".into(), vec![Diff::new(0, 100)], DiffPolicy::Skip)
            .await
            .unwrap();

        let mut c2 = gw.connect().await;
        gw.dispatch(c2.member_id, join("testid")).await.unwrap();

        assert_eq!(board_of(&drain(&mut c2))[0], 100);
        // The first member got its own (empty) board, then the stroke.
        let first = drain(&mut c1);
        assert_eq!(board_of(&first)[0], 0);
        assert_eq!(
            first.last(),
            Some(&ServerEvent::BroadcastStroke { diffs: vec![Diff::new(0, 100)] })
        );
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let gw = gateway();
        let mut c = gw.connect().await;
        let err = gw.dispatch(c.member_id, join("missing")).await.unwrap_err();

        assert_eq!(err, CollabError::RoomNotFound("missing".into()));
        assert_eq!(drain(&mut c), vec![ServerEvent::InvalidRoom(ROOM_NOT_FOUND.into())]);
    }

    #[tokio::test]
    async fn test_boards_separate_per_room() {
        let gw = gateway();
        gw.create_room("room1".into()).await.unwrap();
        gw.create_room("room2".into()).await.unwrap();
        let mut c1 = gw.connect().await;
        let mut c2 = gw.connect().await;
        gw.dispatch(c1.member_id, join("room1")).await.unwrap();
        gw.dispatch(c2.member_id, join("room2")).await.unwrap();
        drain(&mut c2);

        gw.dispatch(c1.member_id, stroke("room1", &[Diff::new(0, 100)]))
            .await
            .unwrap();

        let board1 = gw.registry().get_room(&"room1".into()).await.unwrap().get_board().await;
        let board2 = gw.registry().get_room(&"room2".into()).await.unwrap().get_board().await;
        assert_eq!(board1.data[0], 100);
        assert_eq!(board2.data[0], 0);
        assert!(drain(&mut c2).is_empty());
        assert_eq!(drain(&mut c1).len(), 2);
    }

    #[tokio::test]
    async fn test_stroke_to_unknown_room() {
        let gw = gateway();
        gw.create_room("testroom".into()).await.unwrap();
        let mut c = gw.connect().await;

        let result = gw.dispatch(c.member_id, stroke("test", &[])).await;
        assert!(result.is_err());
        assert_eq!(drain(&mut c), vec![ServerEvent::invalid_room()]);
    }

    #[tokio::test]
    async fn test_stroke_broadcast_to_all_members() {
        let gw = gateway();
        gw.create_room("room1".into()).await.unwrap();
        let mut c1 = gw.connect().await;
        let mut c2 = gw.connect().await;
        gw.dispatch(c1.member_id, join("room1")).await.unwrap();
        gw.dispatch(c2.member_id, join("room1")).await.unwrap();
        drain(&mut c1);
        drain(&mut c2);

        let diffs = [Diff::new(0, 100)];
        gw.dispatch(c1.member_id, stroke("room1", &diffs)).await.unwrap();

        let expected = ServerEvent::BroadcastStroke { diffs: diffs.to_vec() };
        assert_eq!(drain(&mut c1), vec![expected.clone()]);
        assert_eq!(drain(&mut c2), vec![expected]);
    }

    #[tokio::test]
    async fn test_stroke_without_join() {
        let gw = gateway();
        gw.create_room("room1".into()).await.unwrap();
        let mut c = gw.connect().await;

        let err = gw
            .dispatch(c.member_id, stroke("room1", &[Diff::new(0, 1)]))
            .await
            .unwrap_err();
        assert_eq!(err, CollabError::NotJoined("room1".into()));
        assert_eq!(drain(&mut c), vec![ServerEvent::NotJoined(NOT_JOINED.into())]);
    }

    #[tokio::test]
    async fn test_reject_policy_reports_invalid_stroke() {
        let gw = Gateway::new(Arc::new(RoomRegistry::new(2, 2).unwrap()), DiffPolicy::Reject);
        gw.create_room("r".into()).await.unwrap();
        let mut c = gw.connect().await;
        gw.dispatch(c.member_id, join("r")).await.unwrap();
        drain(&mut c);

        let result = gw.dispatch(c.member_id, stroke("r", &[Diff::new(4, 1)])).await;
        assert!(matches!(result, Err(CollabError::Board(_))));
        let events = drain(&mut c);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::InvalidStroke(_)));
    }

    #[tokio::test]
    async fn test_leave_unknown_room() {
        let gw = gateway();
        let mut c = gw.connect().await;
        assert!(gw.dispatch(c.member_id, leave("test")).await.is_err());
        assert_eq!(drain(&mut c), vec![ServerEvent::invalid_room()]);
    }

    #[tokio::test]
    async fn test_no_update_after_leave() {
        let gw = gateway();
        gw.create_room("room1".into()).await.unwrap();
        let mut c1 = gw.connect().await;
        let mut c2 = gw.connect().await;
        gw.dispatch(c1.member_id, join("room1")).await.unwrap();
        gw.dispatch(c2.member_id, join("room1")).await.unwrap();

        gw.dispatch(c1.member_id, leave("room1")).await.unwrap();
        drain(&mut c1);
        drain(&mut c2);

        gw.dispatch(c2.member_id, stroke("room1", &[Diff::new(0, 100)]))
            .await
            .unwrap();

        assert!(drain(&mut c1).is_empty());
        assert_eq!(drain(&mut c2).len(), 1);

        // The leaver can no longer draw.
        let err = gw
            .dispatch(c1.member_id, stroke("room1", &[Diff::new(1, 1)]))
            .await
            .unwrap_err();
        assert_eq!(err, CollabError::NotJoined("room1".into()));
    }

    #[tokio::test]
    async fn test_last_leave_purges_room() {
        let gw = gateway();
        gw.create_room("room".into()).await.unwrap();
        let mut c = gw.connect().await;
        gw.dispatch(c.member_id, join("room")).await.unwrap();

        gw.dispatch(c.member_id, leave("room")).await.unwrap();

        assert!(!gw.registry().get_rooms().await.contains(&"room".into()));
        // Success sends nothing besides the earlier initialize-board.
        assert_eq!(drain(&mut c).len(), 1);
    }

    #[tokio::test]
    async fn test_leave_by_non_member_keeps_room() {
        let gw = gateway();
        gw.create_room("room".into()).await.unwrap();
        let c = gw.connect().await;
        gw.dispatch(c.member_id, leave("room")).await.unwrap();
        assert_eq!(gw.registry().room_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_room_event() {
        let gw = gateway();
        let mut c = gw.connect().await;
        gw.dispatch(c.member_id, ClientEvent::CreateRoom { room_id: "testID".into() })
            .await
            .unwrap();
        assert_eq!(
            drain(&mut c),
            vec![ServerEvent::RoomCreated { room_id: "testID".into() }]
        );

        let err = gw
            .dispatch(c.member_id, ClientEvent::CreateRoom { room_id: "testID".into() })
            .await
            .unwrap_err();
        assert_eq!(err, CollabError::DuplicateRoom("testID".into()));
        assert_eq!(drain(&mut c), vec![ServerEvent::RoomConflict(ROOM_EXISTS.into())]);
    }

    #[tokio::test]
    async fn test_unknown_member() {
        let gw = gateway();
        let stranger = MemberId::new();
        let err = gw.dispatch(stranger, join("r")).await.unwrap_err();
        assert_eq!(err, CollabError::UnknownMember(stranger));
    }

    #[tokio::test]
    async fn test_disconnect_does_not_leave() {
        let gw = gateway();
        gw.create_room("r".into()).await.unwrap();
        let c = gw.connect().await;
        gw.dispatch(c.member_id, join("r")).await.unwrap();

        assert!(gw.disconnect(&c.member_id).await);
        assert!(!gw.disconnect(&c.member_id).await);
        assert_eq!(gw.connected_members().await, 0);

        let room = gw.registry().get_room(&"r".into()).await.unwrap();
        assert!(room.is_member(&c.member_id).await);
    }

    #[tokio::test]
    async fn test_stalled_member_is_dropped_from_room() {
        let gw = gateway().with_outbox_capacity(4);
        assert_eq!(gw.outbox_capacity(), 4);
        gw.create_room("room".into()).await.unwrap();
        let mut drawer = gw.connect().await;
        let mut stalled = gw.connect().await;
        gw.dispatch(drawer.member_id, join("room")).await.unwrap();
        gw.dispatch(stalled.member_id, join("room")).await.unwrap();

        for i in 0..10 {
            gw.dispatch(drawer.member_id, stroke("room", &[Diff::new(i, 1)]))
                .await
                .unwrap();
            assert_eq!(strokes_in(&drain(&mut drawer)), 1);
        }

        let room = gw.registry().get_room(&"room".into()).await.unwrap();
        assert!(!room.is_member(&stalled.member_id).await);
        assert!(room.is_member(&drawer.member_id).await);
        assert!(stalled.events.is_overflowed());
        assert!(stalled.events.recv().await.is_none());
        assert_eq!(room.get_board().await.data[..10], [1; 10]);
    }

    #[tokio::test]
    async fn test_evicting_only_member_purges_room() {
        let gw = gateway().with_outbox_capacity(1);
        gw.create_room("room".into()).await.unwrap();
        let c = gw.connect().await;
        gw.dispatch(c.member_id, join("room")).await.unwrap();

        gw.dispatch(c.member_id, stroke("room", &[Diff::new(0, 1)]))
            .await
            .unwrap();
        assert_eq!(gw.registry().room_count().await, 0);
    }

    #[test]
    fn test_error_event_mapping() {
        assert_eq!(
            error_event(&CollabError::RoomNotFound("x".into())),
            Some(ServerEvent::invalid_room())
        );
        assert!(matches!(
            error_event(&CollabError::Board(BoardError::InvalidDimensions { width: 0, height: 0 })),
            Some(ServerEvent::Error(_))
        ));
        assert_eq!(error_event(&CollabError::UnknownMember(MemberId::new())), None);
        assert_eq!(error_event(&CollabError::OutboxFull(MemberId::new())), None);
    }
}
