use dgw_core::{BufferHandle, EntityKey, FsmState, FsmStatus, MessageKind};
use dgw_hal::{DecisionService, HardwareQueue, RoutingTable, Statistics};
use tracing::{debug, error, warn};

use crate::config::DispatchConfig;
use crate::data_obj::{DataObjFactory, DataObjRef};
use crate::entity::Entity;
use crate::hooks::hooks_for;
use crate::registry::{StateRegistry, Step};
use crate::table::EntityTable;

/// Collaborators borrowed for one dispatcher call.
pub struct Externals<'e> {
    pub hal: &'e mut dyn HardwareQueue,
    pub routes: &'e mut dyn RoutingTable,
    pub decisions: &'e mut dyn DecisionService,
    pub stats: &'e mut dyn Statistics,
}

/// Process-wide scheduling flags written by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalFlags {
    /// Set whenever any entity enters Full.
    pub full_entity_exists: bool,
}

/// Execution context handed to state behaviors and entity hooks.
///
/// Entities refer to each other by key only, so any entity may be advanced
/// from inside another entity's transition.
pub struct Fsm<'a, 'e> {
    pub(crate) table: &'a mut EntityTable,
    pub(crate) registry: &'a StateRegistry,
    pub(crate) config: &'a DispatchConfig,
    pub(crate) flags: &'a mut GlobalFlags,
    pub(crate) factory: &'a mut DataObjFactory,
    pub(crate) ext: &'a mut Externals<'e>,
}

impl<'a, 'e> Fsm<'a, 'e> {
    pub fn config(&self) -> &DispatchConfig {
        self.config
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&Entity> {
        self.table.get(key)
    }

    pub fn entity_mut(&mut self, key: &EntityKey) -> Option<&mut Entity> {
        self.table.get_mut(key)
    }

    pub fn table(&self) -> &EntityTable {
        &*self.table
    }

    pub fn externals(&mut self) -> &mut Externals<'e> {
        &mut *self.ext
    }

    pub fn flags_mut(&mut self) -> &mut GlobalFlags {
        &mut *self.flags
    }

    /// Dispatches a message to the behavior registered for the entity's
    /// current state and kind.
    pub fn process_message(&mut self, key: &EntityKey, msg: MessageKind) -> FsmStatus {
        let Some(entity) = self.table.get(key) else {
            warn!("{:?} for unknown entity {}", msg, key);
            return FsmStatus::Failed;
        };
        let (state, kind) = (entity.state, entity.key.kind);
        if msg == MessageKind::FullToNotFull && state != FsmState::Full {
            debug!("{} not full, ignoring full-to-not-full", key);
            return FsmStatus::Success;
        }
        let registry = self.registry;
        let Some(behavior) = registry.lookup(state, kind) else {
            error!("no behavior registered for {:?}/{:?} ({})", state, kind, key);
            return FsmStatus::Failed;
        };
        let step = behavior.process_message(self, key, msg);
        self.resolve(key, step)
    }

    /// Enters `next` and runs its entry action, following any chained
    /// transitions it requests.
    pub fn change_state(&mut self, key: &EntityKey, next: FsmState) -> FsmStatus {
        let mut next = next;
        let mut forced = None;
        loop {
            let Some(entity) = self.table.get_mut(key) else {
                warn!("state change for unknown entity {}", key);
                return FsmStatus::Failed;
            };
            debug!("{}: {:?} -> {:?}", key, entity.state, next);
            entity.state = next;
            let kind = entity.key.kind;
            let registry = self.registry;
            let Some(behavior) = registry.lookup(next, kind) else {
                error!("no behavior registered for {:?}/{:?} ({})", next, kind, key);
                return FsmStatus::Failed;
            };
            match behavior.pre_process(self, key) {
                Step::Done(status) => return forced.unwrap_or(status),
                Step::Goto(state) => next = state,
                Step::GotoThen(state, status) => {
                    forced = Some(status);
                    next = state;
                }
            }
        }
    }

    pub(crate) fn resolve(&mut self, key: &EntityKey, step: Step) -> FsmStatus {
        match step {
            Step::Done(status) => status,
            Step::Goto(state) => self.change_state(key, state),
            Step::GotoThen(state, status) => {
                self.change_state(key, state);
                status
            }
        }
    }

    /// Queues `obj` on `recipient` and pushes it. A fatal answer from the
    /// recipient withdraws it from `obj`.
    pub fn push_to(
        &mut self,
        producer: &EntityKey,
        recipient: &EntityKey,
        obj: &DataObjRef,
    ) -> FsmStatus {
        match self.table.get_mut(recipient) {
            Some(entity) => {
                entity.add_data_obj_to_recv_list(obj.clone());
            }
            None => {
                warn!("recipient {} vanished, detaching", recipient);
                self.detach_recipient(producer, recipient, obj);
                return FsmStatus::Failed;
            }
        }
        let status = self.process_message(recipient, MessageKind::Push);
        if status == FsmStatus::Error {
            self.detach_recipient(producer, recipient, obj);
        }
        status
    }

    /// Removes `consumer` from `obj`, frees the buffer when it was the last
    /// recipient, and pops drained objects off the producer's outgoing front.
    ///
    /// A consumer that is not registered is a no-op for `obj`.
    pub fn detach_recipient(
        &mut self,
        producer: &EntityKey,
        consumer: &EntityKey,
        obj: &DataObjRef,
    ) -> bool {
        let removed = obj.remove_recipient(consumer);
        if removed && obj.recipient_count() == 0 {
            obj.release(&mut *self.ext.hal);
        }
        if let Some(entity) = self.table.get_mut(producer) {
            entity.pop_drained_front();
        }
        removed
    }

    /// Detaches `consumer` from the producer's front outgoing object.
    pub fn remove_recv_entity_from_send_list(
        &mut self,
        producer: &EntityKey,
        consumer: &EntityKey,
    ) -> bool {
        let front = self
            .table
            .get(producer)
            .and_then(|entity| entity.send_list.front().cloned());
        match front {
            Some(obj) => self.detach_recipient(producer, consumer, &obj),
            None => false,
        }
    }

    /// Resumes every producer still paused toward `dest`.
    pub fn resume_paused_producers(&mut self, dest: &EntityKey) {
        let paused: Vec<EntityKey> = self
            .table
            .iter()
            .filter(|entity| entity.paused_toward.contains(dest))
            .map(|entity| *entity.key())
            .collect();
        for producer in paused {
            hooks_for(producer.kind).resume_subscribe(self, &producer, dest);
        }
    }

    pub(crate) fn free_buffer(&mut self, buffer: BufferHandle) {
        self.ext.hal.free_buffer(buffer);
    }
}
