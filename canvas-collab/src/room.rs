//! One drawing room: an authoritative board plus its members' outboxes.
//!
//! Every mutation (join, leave, stroke) runs under the room's own lock, and
//! fan-out happens inside the same lock hold. Members therefore observe
//! strokes in the single order they were applied, and a joiner's snapshot
//! lines up exactly with the first broadcast it receives.
//!
//! Delivery is a non-blocking `try_send` into each member's bounded outbox;
//! the lock is never held across socket I/O. A member whose outbox is full
//! is evicted from the room and its inbox reports the overflow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use canvas_core::{ApplyOutcome, Board, BoardSnapshot, Diff, DiffPolicy};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, Notify, RwLock, RwLockWriteGuard};

use crate::error::CollabError;
use crate::protocol::{MemberId, RoomId, ServerEvent};

/// Default number of undelivered events a member may have queued.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Overflow flag shared by both halves of a member queue.
#[derive(Debug, Default)]
struct OverflowSignal {
    overflowed: AtomicBool,
    notify: Notify,
}

/// Why an event could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Undelivered {
    /// The member stopped draining its queue; it has been flagged.
    Full,
    /// The receiving side is gone.
    Closed,
}

/// Sending half of a member's event queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Arc<ServerEvent>>,
    signal: Arc<OverflowSignal>,
}

/// Receiving half of a member's event queue.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Arc<ServerEvent>>,
    signal: Arc<OverflowSignal>,
}

impl Outbox {
    /// Bounded queue holding at most `capacity` events (minimum one).
    pub fn channel(capacity: usize) -> (Outbox, Inbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let signal = Arc::new(OverflowSignal::default());
        (
            Outbox { tx, signal: signal.clone() },
            Inbox { rx, signal },
        )
    }

    /// Queue an event without waiting. A full queue marks the member as
    /// overflowed, which ends its inbox.
    pub fn deliver(&self, event: Arc<ServerEvent>) -> Result<(), Undelivered> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.signal.overflowed.store(true, Ordering::Release);
                self.signal.notify.notify_one();
                Err(Undelivered::Full)
            }
            Err(TrySendError::Closed(_)) => Err(Undelivered::Closed),
        }
    }

    pub fn is_overflowed(&self) -> bool {
        self.signal.overflowed.load(Ordering::Acquire)
    }
}

impl Inbox {
    /// Next queued event. `None` once the queue is closed or the member
    /// overflowed; the connection should then be dropped.
    pub async fn recv(&mut self) -> Option<Arc<ServerEvent>> {
        if self.is_overflowed() {
            return None;
        }
        tokio::select! {
            event = self.rx.recv() => event,
            _ = self.signal.notify.notified() => None,
        }
    }

    pub fn try_recv(&mut self) -> Result<Arc<ServerEvent>, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn is_overflowed(&self) -> bool {
        self.signal.overflowed.load(Ordering::Acquire)
    }

    /// Number of events waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Statistics for monitoring a room.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub strokes_committed: u64,
    pub diffs_skipped: u64,
    pub active_members: usize,
}

/// Counters bumped on the stroke path without taking the state lock again.
struct AtomicRoomStats {
    strokes_committed: AtomicU64,
    diffs_skipped: AtomicU64,
}

impl AtomicRoomStats {
    fn new() -> Self {
        Self {
            strokes_committed: AtomicU64::new(0),
            diffs_skipped: AtomicU64::new(0),
        }
    }
}

/// Result of removing a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// The member was joined before the call.
    pub was_member: bool,
    /// This removal left the room without members; the caller should purge it.
    pub now_empty: bool,
}

/// Result of committing a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeReceipt {
    pub outcome: ApplyOutcome,
    /// Members the broadcast was handed to.
    pub delivered: usize,
    /// Members dropped because their outbox was full or closed.
    pub evicted: usize,
    /// Evictions left the room without members; the caller should purge it.
    pub now_empty: bool,
}

struct RoomState {
    board: Board,
    members: HashMap<MemberId, Outbox>,
    /// Set once the registry drops the room; stale handles must not revive it.
    closed: bool,
}

/// A named drawing session.
pub struct Room {
    id: RoomId,
    state: RwLock<RoomState>,
    stats: AtomicRoomStats,
}

impl Room {
    /// Wrap a freshly created board with empty membership.
    pub fn new(id: RoomId, board: Board) -> Self {
        Self {
            id,
            state: RwLock::new(RoomState {
                board,
                members: HashMap::new(),
                closed: false,
            }),
            stats: AtomicRoomStats::new(),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    async fn write_open(&self) -> Result<RwLockWriteGuard<'_, RoomState>, CollabError> {
        let state = self.state.write().await;
        if state.closed {
            return Err(CollabError::RoomNotFound(self.id.clone()));
        }
        Ok(state)
    }

    /// Add a member without sending it the board.
    ///
    /// Returns `false` when the member was already present (its outbox is
    /// replaced).
    pub async fn add_member(&self, member: MemberId, outbox: Outbox) -> Result<bool, CollabError> {
        let mut state = self.write_open().await?;
        Ok(state.members.insert(member, outbox).is_none())
    }

    /// Add a member and hand it `initialize-board` in one step.
    ///
    /// The snapshot contains every stroke committed before this call took the
    /// lock; every later stroke reaches the member as a broadcast.
    ///
    /// Fails with `OutboxFull` when the member's queue cannot take the board;
    /// the member is then not added.
    pub async fn join(&self, member: MemberId, outbox: Outbox) -> Result<BoardSnapshot, CollabError> {
        let mut state = self.write_open().await?;
        let snapshot = state.board.snapshot();

        let init = ServerEvent::InitializeBoard { board: snapshot.clone() };
        match outbox.deliver(Arc::new(init)) {
            Ok(()) => {}
            Err(Undelivered::Full) => {
                log::warn!("{member} cannot keep up; refusing join to room {}", self.id);
                return Err(CollabError::OutboxFull(member));
            }
            Err(Undelivered::Closed) => {
                log::debug!("{member} went away while joining room {}", self.id);
            }
        }
        state.members.insert(member, outbox);

        log::info!(
            "{member} joined room {} ({} members)",
            self.id,
            state.members.len()
        );
        Ok(snapshot)
    }

    /// Remove a member. The room never deletes itself; `now_empty` tells the
    /// caller to ask the registry for a purge.
    pub async fn remove_member(&self, member: &MemberId) -> Result<Departure, CollabError> {
        let mut state = self.write_open().await?;
        let was_member = state.members.remove(member).is_some();
        if was_member {
            log::info!(
                "{member} left room {} ({} members)",
                self.id,
                state.members.len()
            );
        }
        Ok(Departure {
            was_member,
            now_empty: was_member && state.members.is_empty(),
        })
    }

    /// Apply a stroke to the board without broadcasting it.
    pub async fn apply_stroke(
        &self,
        diffs: &[Diff],
        policy: DiffPolicy,
    ) -> Result<ApplyOutcome, CollabError> {
        let mut state = self.write_open().await?;
        Ok(state.board.apply_diffs(diffs, policy)?)
    }

    /// Apply a member's stroke and broadcast it to every member, sender
    /// included. Only joined members may draw.
    pub async fn commit_stroke(
        &self,
        sender: &MemberId,
        diffs: Vec<Diff>,
        policy: DiffPolicy,
    ) -> Result<StrokeReceipt, CollabError> {
        let mut state = self.write_open().await?;
        if !state.members.contains_key(sender) {
            return Err(CollabError::NotJoined(self.id.clone()));
        }
        self.apply_and_fan_out(&mut state, diffs, policy)
    }

    /// Apply and broadcast a stroke that did not come from a member.
    pub async fn broadcast_stroke(
        &self,
        diffs: Vec<Diff>,
        policy: DiffPolicy,
    ) -> Result<StrokeReceipt, CollabError> {
        let mut state = self.write_open().await?;
        self.apply_and_fan_out(&mut state, diffs, policy)
    }

    fn apply_and_fan_out(
        &self,
        state: &mut RoomState,
        diffs: Vec<Diff>,
        policy: DiffPolicy,
    ) -> Result<StrokeReceipt, CollabError> {
        let outcome = state.board.apply_diffs(&diffs, policy)?;

        self.stats.strokes_committed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .diffs_skipped
            .fetch_add(outcome.skipped as u64, Ordering::Relaxed);

        let event = Arc::new(ServerEvent::BroadcastStroke { diffs });
        let mut delivered = 0;
        let mut stalled = Vec::new();
        for (member, outbox) in &state.members {
            match outbox.deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(Undelivered::Full) => {
                    log::warn!("Evicting {member} from room {}: outbox full", self.id);
                    stalled.push(*member);
                }
                Err(Undelivered::Closed) => {
                    log::debug!("Outbox of {member} in room {} is closed", self.id);
                    stalled.push(*member);
                }
            }
        }
        for member in &stalled {
            state.members.remove(member);
        }

        Ok(StrokeReceipt {
            outcome,
            delivered,
            evicted: stalled.len(),
            now_empty: !stalled.is_empty() && state.members.is_empty(),
        })
    }

    /// Current board contents.
    pub async fn get_board(&self) -> BoardSnapshot {
        self.state.read().await.board.snapshot()
    }

    pub async fn member_ids(&self) -> Vec<MemberId> {
        self.state.read().await.members.keys().copied().collect()
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    pub async fn is_member(&self, member: &MemberId) -> bool {
        self.state.read().await.members.contains_key(member)
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    pub async fn stats(&self) -> RoomStats {
        let state = self.state.read().await;
        RoomStats {
            strokes_committed: self.stats.strokes_committed.load(Ordering::Relaxed),
            diffs_skipped: self.stats.diffs_skipped.load(Ordering::Relaxed),
            active_members: state.members.len(),
        }
    }

    /// Close the room and drop every member. Returns how many were dropped.
    pub(crate) async fn close(&self) -> usize {
        let mut state = self.state.write().await;
        state.closed = true;
        let dropped = state.members.len();
        state.members.clear();
        dropped
    }

    /// Close the room only if nobody is in it.
    pub(crate) async fn close_if_empty(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.members.is_empty() {
            return false;
        }
        state.closed = true;
        true
    }
}
