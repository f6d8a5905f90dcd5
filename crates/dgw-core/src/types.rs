use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of schedulable endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Physical device queue.
    Queue,
    /// Logical channel tag backed by a device queue.
    Tag,
    /// Multicast group of other entities; owns no physical queue.
    Group,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Queue => "queue",
            EntityKind::Tag => "tag",
            EntityKind::Group => "group",
        }
    }
}

/// Queue-subtype discriminator.
///
/// Client-class queues treat an inner hardware error as fatal.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    #[default]
    Local,
    Client,
    Remote,
}

impl QueueType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueType::Local => "local",
            QueueType::Client => "client",
            QueueType::Remote => "remote",
        }
    }
}

/// Transfer direction of an entity: producer side or consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Recv,
}

/// Routing-table selector.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TableIndex {
    #[default]
    Primary,
    Extra,
}

impl TableIndex {
    /// Numeric table slot (0 = primary, 1 = extra).
    pub fn slot(self) -> usize {
        match self {
            TableIndex::Primary => 0,
            TableIndex::Extra => 1,
        }
    }
}

/// Fan-out policy of a group entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    /// One member picked from the route key.
    #[default]
    Hash,
    /// Every member.
    Broadcast,
    /// Member chosen by the external decision service.
    Dynamic,
}

/// Entity identity.
///
/// Recipients are matched with [`EntityKey::same_endpoint`], which ignores
/// the direction; the full key (direction included) addresses the entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: u32,
    pub device_id: u32,
    pub queue_type: QueueType,
    pub direction: Direction,
}

impl EntityKey {
    pub fn new(
        kind: EntityKind,
        id: u32,
        device_id: u32,
        queue_type: QueueType,
        direction: Direction,
    ) -> Self {
        Self {
            kind,
            id,
            device_id,
            queue_type,
            direction,
        }
    }

    /// Local send-side queue on `device_id`.
    pub fn send_queue(id: u32, device_id: u32) -> Self {
        Self::new(EntityKind::Queue, id, device_id, QueueType::Local, Direction::Send)
    }

    /// Local recv-side queue on `device_id`.
    pub fn recv_queue(id: u32, device_id: u32) -> Self {
        Self::new(EntityKind::Queue, id, device_id, QueueType::Local, Direction::Recv)
    }

    /// Structural identity: kind + id + device id + queue subtype.
    pub fn same_endpoint(&self, other: &EntityKey) -> bool {
        self.kind == other.kind
            && self.id == other.id
            && self.device_id == other.device_id
            && self.queue_type == other.queue_type
    }

    pub fn is_group(&self) -> bool {
        self.kind == EntityKind::Group
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Send => "send",
            Direction::Recv => "recv",
        };
        write!(
            f,
            "{}:{}@{}/{}/{}",
            self.kind.as_str(),
            self.id,
            self.device_id,
            self.queue_type.as_str(),
            direction
        )
    }
}

/// Opaque hardware buffer reference; forwarded or freed, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BufferHandle(pub u64);

/// Transaction id + route label read from a dequeued buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub trans_id: u64,
    pub route_label: u32,
}

impl RouteKey {
    pub fn new(trans_id: u64, route_label: u32) -> Self {
        Self {
            trans_id,
            route_label,
        }
    }

    /// Stable bucket in `0..buckets` for hash fan-out. Returns 0 when `buckets` is 0.
    pub fn bucket(&self, buckets: usize) -> usize {
        if buckets == 0 {
            return 0;
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.trans_id.to_le_bytes());
        hasher.update(&self.route_label.to_le_bytes());
        let digest = hasher.finalize();
        let mut word = [0_u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(word) % buckets as u64) as usize
    }
}

/// Per-entity finite-state-machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmState {
    Idle,
    Peek,
    TryPush,
    Push,
    WaitPush,
    Full,
    Error,
}

impl FsmState {
    pub const ALL: [FsmState; 7] = [
        FsmState::Idle,
        FsmState::Peek,
        FsmState::TryPush,
        FsmState::Push,
        FsmState::WaitPush,
        FsmState::Full,
        FsmState::Error,
    ];
}

/// Outcome of a state transition or message.
///
/// Several non-success values are ordinary control flow, so this is not an
/// error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmStatus {
    Success,
    /// Retryable failure; the scheduler re-invokes later.
    Failed,
    /// Progress impossible right now; stay and retry.
    KeepState,
    /// Destination saturated; resolved by a full-to-not-full signal.
    DestFull,
    /// Destination reported a fatal condition; quarantine follows.
    ErrorPending,
    /// Fatal to the entity.
    Error,
}

impl FsmStatus {
    pub fn is_success(self) -> bool {
        self == FsmStatus::Success
    }
}

/// Inbound message kinds handled by `process_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Push,
    FullToNotFull,
    Recover,
}
