use dgw_core::{DgwError, EntityKey, FsmState, FsmStatus, MessageKind};
use dgw_hal::DecisionResponse;
use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::context::{Externals, Fsm, GlobalFlags};
use crate::data_obj::{DataObjFactory, DataObjRef, DataObjStats};
use crate::entity::{Entity, EntityMaterial};
use crate::registry::StateRegistry;
use crate::states::drain_resolved_front;
use crate::table::{EntityTable, Release};

/// Stateful dispatcher facade.
///
/// Owns the entity table, state registry, config, data-object factory and
/// global flags. Every call that may move buffers borrows the collaborators
/// through [`Externals`].
pub struct Dispatcher {
    table: EntityTable,
    registry: StateRegistry,
    config: DispatchConfig,
    flags: GlobalFlags,
    factory: DataObjFactory,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_registry(config, StateRegistry::default())
    }

    pub fn with_registry(config: DispatchConfig, registry: StateRegistry) -> Self {
        Self {
            table: EntityTable::default(),
            registry,
            factory: DataObjFactory::new(config.max_data_objs),
            config,
            flags: GlobalFlags::default(),
        }
    }

    fn fsm<'a, 'e>(&'a mut self, ext: &'a mut Externals<'e>) -> Fsm<'a, 'e> {
        Fsm {
            table: &mut self.table,
            registry: &self.registry,
            config: &self.config,
            flags: &mut self.flags,
            factory: &mut self.factory,
            ext,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry_mut(&mut self) -> &mut StateRegistry {
        &mut self.registry
    }

    pub fn table(&self) -> &EntityTable {
        &self.table
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&Entity> {
        self.table.get(key)
    }

    pub fn state_of(&self, key: &EntityKey) -> Option<FsmState> {
        self.table.get(key).map(Entity::state)
    }

    pub fn exists_full_entity(&self) -> bool {
        self.flags.full_entity_exists
    }

    pub fn clear_full_flag(&mut self) {
        self.flags.full_entity_exists = false;
    }

    pub fn data_obj_stats(&self) -> DataObjStats {
        self.factory.stats()
    }

    pub fn data_objs_in_flight(&self) -> usize {
        self.factory.in_flight()
    }

    /// Creates an entity (or bumps its reference count) and returns its key.
    pub fn create_entity(&mut self, material: EntityMaterial) -> EntityKey {
        self.table.create_entity(material);
        material.key
    }

    /// Drops one reference to `key`. On the last reference the entity is
    /// removed and every buffer it still holds is released. Returns true
    /// when the entity was removed.
    pub fn delete_entity(&mut self, key: &EntityKey, ext: &mut Externals<'_>) -> bool {
        let entity = match self.table.release(key) {
            Release::Removed(entity) => entity,
            Release::Retained(remaining) => {
                debug!("{} still referenced {} times", key, remaining);
                return false;
            }
            Release::Unknown => return false,
        };
        let mut fsm = self.fsm(ext);
        withdraw_outgoing(&mut fsm, &entity);
        discard_incoming(&mut fsm, &entity);
        detach_everywhere(&mut fsm, key);
        fsm.resume_paused_producers(key);
        if let Some(buffer) = entity.current_buffer() {
            fsm.free_buffer(buffer);
        }
        info!("deleted entity {}", key);
        true
    }

    pub fn create_group(&mut self, group_id: u32, members: Vec<EntityKey>) -> Result<bool, DgwError> {
        self.table.create_group(group_id, members)
    }

    pub fn delete_group(&mut self, group_id: u32) -> bool {
        self.table.delete_group(group_id)
    }

    pub fn group_members(&self, group_id: u32) -> &[EntityKey] {
        self.table.group_members(group_id)
    }

    pub fn process_message(
        &mut self,
        key: &EntityKey,
        msg: MessageKind,
        ext: &mut Externals<'_>,
    ) -> FsmStatus {
        self.fsm(ext).process_message(key, msg)
    }

    pub fn change_state(
        &mut self,
        key: &EntityKey,
        next: FsmState,
        ext: &mut Externals<'_>,
    ) -> FsmStatus {
        self.fsm(ext).change_state(key, next)
    }

    /// Admission check for `key`; `Failed` for unknown entities.
    pub fn allow_deque(&self, key: &EntityKey) -> FsmStatus {
        self.table
            .get(key)
            .map(|entity| entity.allow_deque(&self.config))
            .unwrap_or(FsmStatus::Failed)
    }

    pub fn remove_recv_entity_from_send_list(
        &mut self,
        producer: &EntityKey,
        consumer: &EntityKey,
        ext: &mut Externals<'_>,
    ) -> bool {
        self.fsm(ext).remove_recv_entity_from_send_list(producer, consumer)
    }

    /// Resolves dynamic-group recipients from a decision response, then
    /// pushes whatever became deliverable on the producer's outgoing front.
    pub fn apply_decision(
        &mut self,
        response: &DecisionResponse,
        ext: &mut Externals<'_>,
    ) -> Result<FsmStatus, DgwError> {
        let producer = response.producer;
        if !self.table.contains(&producer) {
            return Err(DgwError::UnknownEntity(producer));
        }
        for choice in &response.choices {
            let members = self.table.group_members(choice.group.id);
            if members.is_empty() {
                return Err(DgwError::UnknownGroup(choice.group.id));
            }
            if !members.iter().any(|m| m.same_endpoint(&choice.member)) {
                return Err(DgwError::InvalidInput("chosen member is not in the group"));
            }
            let pending = self.table.get(&producer).and_then(|entity| {
                entity
                    .send_list()
                    .find(|obj| obj.has_recipient(&choice.group))
                    .cloned()
            });
            match pending {
                Some(obj) => {
                    obj.replace_recipient(&choice.group, choice.member);
                }
                None => debug!("stale decision for {} on {}", producer, choice.group),
            }
        }
        let mut fsm = self.fsm(ext);
        Ok(drain_resolved_front(&mut fsm, &producer))
    }

    /// Producers whose pending decision is older than the configured timeout.
    pub fn overdue_decisions(&self, now: u64) -> Vec<EntityKey> {
        self.table
            .iter()
            .filter(|entity| {
                entity.is_waiting_decision()
                    && now.saturating_sub(entity.waiting_since())
                        >= self.config.decision_timeout_steps
            })
            .map(|entity| *entity.key())
            .collect()
    }
}

/// Pulls a removed producer's data objects out of every recipient and
/// frees their buffers.
fn withdraw_outgoing(fsm: &mut Fsm<'_, '_>, removed: &Entity) {
    for obj in removed.send_list() {
        for recipient in obj.recipients() {
            if let Some(entity) = fsm.entity_mut(&recipient) {
                entity.recv_list.retain(|queued| !queued.ptr_eq(obj));
            }
        }
        obj.clear_recipients();
        obj.clear_producer();
        obj.release(&mut *fsm.ext.hal);
    }
}

/// Releases a removed consumer's incoming backlog through the producers.
fn discard_incoming(fsm: &mut Fsm<'_, '_>, removed: &Entity) {
    let key = *removed.key();
    for obj in removed.recv_list() {
        match obj.producer() {
            Some(producer) => {
                fsm.detach_recipient(&producer, &key, obj);
            }
            None => {
                if obj.remove_recipient(&key) && obj.recipient_count() == 0 {
                    obj.release(&mut *fsm.ext.hal);
                }
            }
        }
    }
}

/// Removes `consumer` from registrations not yet pushed into its queue.
fn detach_everywhere(fsm: &mut Fsm<'_, '_>, consumer: &EntityKey) {
    let mut pending: Vec<(EntityKey, DataObjRef)> = Vec::new();
    for entity in fsm.table.iter() {
        for obj in entity.send_list() {
            if obj.has_recipient(consumer) {
                pending.push((*entity.key(), obj.clone()));
            }
        }
    }
    for (producer, obj) in pending {
        fsm.detach_recipient(&producer, consumer, &obj);
    }
}
