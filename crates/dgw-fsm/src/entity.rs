use std::collections::{BTreeSet, VecDeque};

use dgw_core::{
    BufferHandle, Direction, EntityKey, EntityKind, FsmState, FsmStatus, GroupPolicy,
    MessageKind, RouteKey, TableIndex,
};

use crate::config::DispatchConfig;
use crate::data_obj::DataObjRef;
use crate::hooks::{hooks_for, EntityHooks};

/// Construction material for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMaterial {
    pub key: EntityKey,
    pub table_index: TableIndex,
    /// Scheduling-config key handed to the decision service.
    pub sched_cfg_key: u32,
    /// Only meaningful for group entities.
    pub group_policy: GroupPolicy,
}

impl EntityMaterial {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            table_index: TableIndex::Primary,
            sched_cfg_key: 0,
            group_policy: GroupPolicy::default(),
        }
    }

    pub fn with_table(mut self, table_index: TableIndex) -> Self {
        self.table_index = table_index;
        self
    }

    pub fn with_sched_cfg_key(mut self, sched_cfg_key: u32) -> Self {
        self.sched_cfg_key = sched_cfg_key;
        self
    }

    pub fn with_policy(mut self, group_policy: GroupPolicy) -> Self {
        self.group_policy = group_policy;
        self
    }
}

/// One schedulable endpoint and its delivery bookkeeping.
#[derive(Debug)]
pub struct Entity {
    pub(crate) key: EntityKey,
    pub(crate) table_index: TableIndex,
    pub(crate) sched_cfg_key: u32,
    pub(crate) group_policy: GroupPolicy,
    pub(crate) state: FsmState,
    pub(crate) ref_count: u32,
    pub(crate) schedule_count: u32,
    pub(crate) waiting_decision: bool,
    pub(crate) waiting_since: u64,
    pub(crate) buffer: Option<BufferHandle>,
    pub(crate) route: RouteKey,
    pub(crate) last_msg: Option<MessageKind>,
    pub(crate) send_list: VecDeque<DataObjRef>,
    pub(crate) recv_list: VecDeque<DataObjRef>,
    pub(crate) paused_toward: BTreeSet<EntityKey>,
    pub(crate) hal_error_count: u32,
    pub(crate) member_cursor: usize,
    pub(crate) copy_ref: bool,
}

impl Entity {
    pub fn new(material: EntityMaterial) -> Self {
        Self {
            key: material.key,
            table_index: material.table_index,
            sched_cfg_key: material.sched_cfg_key,
            group_policy: material.group_policy,
            state: home_state(material.key.direction),
            ref_count: 1,
            schedule_count: 0,
            waiting_decision: false,
            waiting_since: 0,
            buffer: None,
            route: RouteKey::default(),
            last_msg: None,
            send_list: VecDeque::new(),
            recv_list: VecDeque::new(),
            paused_toward: BTreeSet::new(),
            hal_error_count: 0,
            member_cursor: 0,
            copy_ref: false,
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn kind(&self) -> EntityKind {
        self.key.kind
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Resting state: Idle for producers, WaitPush for consumers.
    pub fn home_state(&self) -> FsmState {
        home_state(self.key.direction)
    }

    pub fn table_index(&self) -> TableIndex {
        self.table_index
    }

    pub fn sched_cfg_key(&self) -> u32 {
        self.sched_cfg_key
    }

    pub fn group_policy(&self) -> GroupPolicy {
        self.group_policy
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn schedule_count(&self) -> u32 {
        self.schedule_count
    }

    /// Consecutive failed status polls; only the first
    /// `hal_error_log_limit` of a run are logged.
    pub fn hal_error_count(&self) -> u32 {
        self.hal_error_count
    }

    pub fn is_waiting_decision(&self) -> bool {
        self.waiting_decision
    }

    pub fn waiting_since(&self) -> u64 {
        self.waiting_since
    }

    /// Buffer currently held in the dequeue slot.
    pub fn current_buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    pub fn route(&self) -> RouteKey {
        self.route
    }

    pub fn last_msg(&self) -> Option<MessageKind> {
        self.last_msg
    }

    pub fn is_copy_ref(&self) -> bool {
        self.copy_ref
    }

    pub fn send_list(&self) -> impl Iterator<Item = &DataObjRef> {
        self.send_list.iter()
    }

    pub fn recv_list(&self) -> impl Iterator<Item = &DataObjRef> {
        self.recv_list.iter()
    }

    pub fn send_list_len(&self) -> usize {
        self.send_list.len()
    }

    pub fn recv_list_len(&self) -> usize {
        self.recv_list.len()
    }

    /// Producers currently paused toward this set of destinations.
    pub fn paused_toward(&self) -> impl Iterator<Item = &EntityKey> {
        self.paused_toward.iter()
    }

    pub fn hooks(&self) -> &'static dyn EntityHooks {
        hooks_for(self.key.kind)
    }

    pub fn add_data_obj_to_send_list(&mut self, obj: DataObjRef) {
        self.send_list.push_back(obj);
    }

    /// Idempotent: the same data object is queued at most once.
    pub fn add_data_obj_to_recv_list(&mut self, obj: DataObjRef) -> bool {
        if self.recv_list.iter().any(|queued| queued.ptr_eq(&obj)) {
            return false;
        }
        self.recv_list.push_back(obj);
        true
    }

    pub fn remove_data_obj_from_send_list(&mut self) -> Option<DataObjRef> {
        self.send_list.pop_front()
    }

    /// Pops fully delivered objects off the outgoing front and clears the
    /// decision wait once nothing is outstanding.
    pub(crate) fn pop_drained_front(&mut self) {
        while self
            .send_list
            .front()
            .is_some_and(|front| front.recipient_count() == 0)
        {
            self.send_list.pop_front();
        }
        if self.send_list.is_empty() {
            self.waiting_decision = false;
        }
    }

    /// Admission control for Peek.
    ///
    /// `Failed` sends the entity back to Idle to flush a pending decision,
    /// `KeepState` keeps it in Peek until the outgoing front drains.
    pub fn allow_deque(&self, config: &DispatchConfig) -> FsmStatus {
        if self.schedule_count >= config.schedule_quota {
            return FsmStatus::Failed;
        }
        let outstanding = !self.send_list.is_empty() && !self.waiting_decision;
        if outstanding || self.send_list.len() > config.send_list_high_water {
            return if self.waiting_decision {
                FsmStatus::Failed
            } else {
                FsmStatus::KeepState
            };
        }
        FsmStatus::Success
    }
}

fn home_state(direction: Direction) -> FsmState {
    match direction {
        Direction::Send => FsmState::Idle,
        Direction::Recv => FsmState::WaitPush,
    }
}

#[cfg(test)]
mod tests {
    use super::{Entity, EntityMaterial};
    use crate::config::DispatchConfig;
    use crate::data_obj::DataObjFactory;
    use dgw_core::{BufferHandle, EntityKey, FsmState, FsmStatus};

    fn producer() -> Entity {
        Entity::new(EntityMaterial::new(EntityKey::send_queue(1, 0)))
    }

    #[test]
    fn initial_state_follows_direction() {
        assert_eq!(producer().state(), FsmState::Idle);
        let consumer = Entity::new(EntityMaterial::new(EntityKey::recv_queue(2, 0)));
        assert_eq!(consumer.state(), FsmState::WaitPush);
    }

    #[test]
    fn recv_list_insertion_is_idempotent() {
        let mut factory = DataObjFactory::new(8);
        let mut consumer = Entity::new(EntityMaterial::new(EntityKey::recv_queue(2, 0)));
        let obj = factory
            .create(EntityKey::send_queue(1, 0), BufferHandle(1))
            .expect("room");

        assert!(consumer.add_data_obj_to_recv_list(obj.clone()));
        assert!(!consumer.add_data_obj_to_recv_list(obj.clone()));
        assert_eq!(consumer.recv_list_len(), 1);

        let other = factory
            .create(EntityKey::send_queue(1, 0), BufferHandle(1))
            .expect("room");
        assert!(consumer.add_data_obj_to_recv_list(other));
        assert_eq!(consumer.recv_list_len(), 2);
    }

    #[test]
    fn admission_cap_holds_until_reset() {
        let cfg = DispatchConfig {
            schedule_quota: 2,
            ..Default::default()
        };
        let mut entity = producer();
        assert_eq!(entity.allow_deque(&cfg), FsmStatus::Success);
        entity.schedule_count = 2;
        assert_eq!(entity.allow_deque(&cfg), FsmStatus::Failed);
        entity.schedule_count = 0;
        assert_eq!(entity.allow_deque(&cfg), FsmStatus::Success);
    }

    #[test]
    fn outstanding_backlog_keeps_or_fails_by_decision_wait() {
        let cfg = DispatchConfig {
            send_list_high_water: 1,
            ..Default::default()
        };
        let mut factory = DataObjFactory::new(8);
        let mut entity = producer();
        let obj = factory.create(*entity.key(), BufferHandle(1)).expect("room");
        obj.add_recipient(EntityKey::recv_queue(2, 0));
        entity.add_data_obj_to_send_list(obj);

        assert_eq!(entity.allow_deque(&cfg), FsmStatus::KeepState);

        entity.waiting_decision = true;
        assert_eq!(entity.allow_deque(&cfg), FsmStatus::Success);

        let second = factory.create(*entity.key(), BufferHandle(2)).expect("room");
        second.add_recipient(EntityKey::recv_queue(2, 0));
        entity.add_data_obj_to_send_list(second);
        assert_eq!(entity.allow_deque(&cfg), FsmStatus::Failed);
    }

    #[test]
    fn popping_drained_front_clears_decision_wait() {
        let mut factory = DataObjFactory::new(8);
        let mut entity = producer();
        let obj = factory.create(*entity.key(), BufferHandle(1)).expect("room");
        entity.add_data_obj_to_send_list(obj);
        entity.waiting_decision = true;

        entity.pop_drained_front();
        assert_eq!(entity.send_list_len(), 0);
        assert!(!entity.is_waiting_decision());
    }
}
