#![allow(dead_code)]

use dgw_core::{
    BufferHandle, Direction, EntityKey, EntityKind, FsmState, FsmStatus, GroupPolicy, MessageKind,
    QueueType, RouteKey, TableIndex,
};
use dgw_fsm::{DispatchConfig, Dispatcher, EntityMaterial, Externals};
use dgw_hal::{BindRelation, DispatchStats, InMemoryDecisionService, InMemoryHardware};

/// Dispatcher wired to in-memory collaborators.
pub struct Rig {
    pub hw: InMemoryHardware,
    pub routes: BindRelation,
    pub decisions: InMemoryDecisionService,
    pub stats: DispatchStats,
    pub dispatcher: Dispatcher,
}

impl Rig {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            hw: InMemoryHardware::default(),
            routes: BindRelation::default(),
            decisions: InMemoryDecisionService::default(),
            stats: DispatchStats::default(),
            dispatcher: Dispatcher::new(config),
        }
    }

    pub fn with_ext<R>(&mut self, f: impl FnOnce(&mut Dispatcher, &mut Externals<'_>) -> R) -> R {
        let mut ext = Externals {
            hal: &mut self.hw,
            routes: &mut self.routes,
            decisions: &mut self.decisions,
            stats: &mut self.stats,
        };
        f(&mut self.dispatcher, &mut ext)
    }

    pub fn message(&mut self, key: EntityKey, msg: MessageKind) -> FsmStatus {
        self.with_ext(|dispatcher, ext| dispatcher.process_message(&key, msg, ext))
    }

    pub fn push(&mut self, key: EntityKey) -> FsmStatus {
        self.message(key, MessageKind::Push)
    }

    pub fn change_state(&mut self, key: EntityKey, next: FsmState) -> FsmStatus {
        self.with_ext(|dispatcher, ext| dispatcher.change_state(&key, next, ext))
    }

    /// Registers a hardware queue and its entity.
    pub fn queue(&mut self, key: EntityKey, capacity: usize) -> EntityKey {
        self.hw.add_queue(key.device_id, key.id, capacity);
        self.dispatcher.create_entity(EntityMaterial::new(key))
    }

    pub fn group(&mut self, id: u32, policy: GroupPolicy, members: Vec<EntityKey>) -> EntityKey {
        let key = group_key(id);
        self.dispatcher.create_entity(
            EntityMaterial::new(key)
                .with_policy(policy)
                .with_sched_cfg_key(id + 100),
        );
        self.dispatcher
            .create_group(id, members)
            .expect("group should register");
        key
    }

    pub fn bind(&mut self, src: EntityKey, dst: EntityKey) {
        assert!(self.routes.bind(src, dst, TableIndex::Primary));
    }

    pub fn inject(&mut self, src: EntityKey, trans_id: u64) -> BufferHandle {
        self.hw
            .inject(src.device_id, src.id, RouteKey::new(trans_id, 0))
            .expect("inject should succeed")
    }

    pub fn state(&self, key: EntityKey) -> FsmState {
        self.dispatcher.state_of(&key).expect("entity should exist")
    }

    pub fn send_len(&self, key: EntityKey) -> usize {
        self.dispatcher
            .entity(&key)
            .map(|e| e.send_list_len())
            .expect("entity should exist")
    }

    pub fn recv_len(&self, key: EntityKey) -> usize {
        self.dispatcher
            .entity(&key)
            .map(|e| e.recv_list_len())
            .expect("entity should exist")
    }

    pub fn delivered(&self, key: EntityKey) -> usize {
        self.hw.queue_len(key.device_id, key.id)
    }
}

pub fn src(id: u32) -> EntityKey {
    EntityKey::send_queue(id, 0)
}

pub fn dst(id: u32) -> EntityKey {
    EntityKey::recv_queue(id, 0)
}

pub fn group_key(id: u32) -> EntityKey {
    EntityKey::new(EntityKind::Group, id, 0, QueueType::Local, Direction::Recv)
}
