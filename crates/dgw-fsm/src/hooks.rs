use dgw_core::{EntityKey, EntityKind, FsmState, FsmStatus, GroupPolicy, RouteKey};
use dgw_hal::{DecisionRequest, Dequeued, GroupRequest, HalError};
use tracing::{debug, warn};

use crate::context::Fsm;
use crate::data_obj::DataObjRef;

/// Destination classification produced during TryPush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DstBuckets {
    /// Can be pushed right away.
    pub ready: Vec<EntityKey>,
    /// Waits for an external decision (dynamic groups).
    pub needs_decision: Vec<EntityKey>,
    /// Quarantined; handled through `ab_process_in_try_push`.
    pub abnormal: Vec<EntityKey>,
}

impl DstBuckets {
    fn push_ready(&mut self, key: EntityKey) {
        if !self.ready.iter().any(|r| r.same_endpoint(&key)) {
            self.ready.push(key);
        }
    }
}

/// Per-kind polymorphic entity behavior called by the states.
///
/// Defaults are the base no-op/success behavior.
pub trait EntityHooks: Sync {
    /// Classifies `dst` (and, for groups, its members) into buckets.
    fn select_dst_entities(
        &self,
        _fsm: &Fsm<'_, '_>,
        dst: &EntityKey,
        _route: RouteKey,
        out: &mut DstBuckets,
    ) {
        out.push_ready(*dst);
    }

    /// Delivers one data object into `entity`'s physical destination.
    fn send_data(&self, _fsm: &mut Fsm<'_, '_>, _entity: &EntityKey, _obj: &DataObjRef) -> FsmStatus {
        FsmStatus::Success
    }

    /// Asks `producer` to stop subscribing while `dest` is full.
    fn pause_subscribe(&self, _fsm: &mut Fsm<'_, '_>, _producer: &EntityKey, _dest: &EntityKey) {}

    /// Undoes an earlier `pause_subscribe` toward `dest`.
    fn resume_subscribe(&self, _fsm: &mut Fsm<'_, '_>, _producer: &EntityKey, _dest: &EntityKey) {}

    /// Adds this destination to a pending decision request.
    fn reprocess_in_try_push(
        &self,
        _fsm: &Fsm<'_, '_>,
        _dst: &EntityKey,
        _src: &EntityKey,
        _route: RouteKey,
        _request: &mut Option<DecisionRequest>,
        _config_key: &mut Option<u32>,
    ) -> FsmStatus {
        FsmStatus::Success
    }

    /// Handles this destination being abnormal during a producer's TryPush.
    fn ab_process_in_try_push(&self, _fsm: &mut Fsm<'_, '_>, _entity: &EntityKey) -> FsmStatus {
        FsmStatus::Success
    }

    /// Dequeues the next inbound buffer for a producer.
    fn dequeue(&self, _fsm: &mut Fsm<'_, '_>, _entity: &EntityKey) -> Result<Option<Dequeued>, HalError> {
        Ok(None)
    }
}

/// Hooks for entities backed by one physical queue (queues and tags).
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleHooks;

/// Hooks for multicast groups.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupHooks;

static SIMPLE_HOOKS: SimpleHooks = SimpleHooks;
static GROUP_HOOKS: GroupHooks = GroupHooks;

pub fn hooks_for(kind: EntityKind) -> &'static dyn EntityHooks {
    match kind {
        EntityKind::Queue | EntityKind::Tag => &SIMPLE_HOOKS,
        EntityKind::Group => &GROUP_HOOKS,
    }
}

fn is_errored(fsm: &Fsm<'_, '_>, key: &EntityKey) -> bool {
    fsm.entity(key)
        .map(|entity| entity.state() == FsmState::Error)
        .unwrap_or(true)
}

impl EntityHooks for SimpleHooks {
    fn select_dst_entities(
        &self,
        fsm: &Fsm<'_, '_>,
        dst: &EntityKey,
        _route: RouteKey,
        out: &mut DstBuckets,
    ) {
        if is_errored(fsm, dst) {
            out.abnormal.push(*dst);
        } else {
            out.push_ready(*dst);
        }
    }

    fn send_data(&self, fsm: &mut Fsm<'_, '_>, entity: &EntityKey, obj: &DataObjRef) -> FsmStatus {
        let zero_copy = fsm.config.zero_copy_single_recipient && obj.recipient_count() == 1;
        let hal = &mut *fsm.ext.hal;
        let buffer = if zero_copy {
            obj.buffer()
        } else {
            match hal.copy_ref(obj.buffer()) {
                Ok(copy) => copy,
                Err(err) => {
                    warn!("copy of {:?} for {} failed: {}", obj.buffer(), entity, err);
                    return FsmStatus::Failed;
                }
            }
        };
        match hal.enqueue(entity.device_id, entity.id, buffer) {
            Ok(()) => {
                if zero_copy {
                    obj.set_maintain();
                }
                FsmStatus::Success
            }
            Err(err) => {
                if !zero_copy {
                    hal.free_buffer(buffer);
                }
                match err {
                    HalError::QueueFull => FsmStatus::DestFull,
                    HalError::NotExist => FsmStatus::ErrorPending,
                    other => {
                        debug!("enqueue into {} failed: {}", entity, other);
                        FsmStatus::Failed
                    }
                }
            }
        }
    }

    fn pause_subscribe(&self, fsm: &mut Fsm<'_, '_>, producer: &EntityKey, dest: &EntityKey) {
        let Some(entity) = fsm.table.get_mut(producer) else {
            return;
        };
        let first = entity.paused_toward.is_empty();
        if !entity.paused_toward.insert(*dest) || !first {
            return;
        }
        if let Err(err) = fsm.ext.hal.pause_subscribe(producer.device_id, producer.id) {
            warn!("pause subscribe for {} failed: {}", producer, err);
        }
    }

    fn resume_subscribe(&self, fsm: &mut Fsm<'_, '_>, producer: &EntityKey, dest: &EntityKey) {
        let Some(entity) = fsm.table.get_mut(producer) else {
            return;
        };
        if !entity.paused_toward.remove(dest) || !entity.paused_toward.is_empty() {
            return;
        }
        if let Err(err) = fsm.ext.hal.resume_subscribe(producer.device_id, producer.id) {
            warn!("resume subscribe for {} failed: {}", producer, err);
        }
    }

    fn dequeue(&self, fsm: &mut Fsm<'_, '_>, entity: &EntityKey) -> Result<Option<Dequeued>, HalError> {
        fsm.ext.hal.dequeue(entity.device_id, entity.id)
    }
}

impl EntityHooks for GroupHooks {
    fn select_dst_entities(
        &self,
        fsm: &Fsm<'_, '_>,
        dst: &EntityKey,
        route: RouteKey,
        out: &mut DstBuckets,
    ) {
        let Some(group) = fsm.entity(dst) else {
            out.abnormal.push(*dst);
            return;
        };
        if group.state() == FsmState::Error {
            out.abnormal.push(*dst);
            return;
        }
        let members = fsm.table.group_members(dst.id);
        if members.is_empty() {
            warn!("group {} has no members", dst);
            out.abnormal.push(*dst);
            return;
        }
        match group.group_policy() {
            GroupPolicy::Hash => {
                let member = members[route.bucket(members.len())];
                if is_errored(fsm, &member) {
                    out.abnormal.push(*dst);
                } else {
                    out.push_ready(member);
                }
            }
            GroupPolicy::Broadcast => {
                if members.iter().any(|m| is_errored(fsm, m)) {
                    out.abnormal.push(*dst);
                } else {
                    for member in members {
                        out.push_ready(*member);
                    }
                }
            }
            GroupPolicy::Dynamic => {
                if members.iter().all(|m| is_errored(fsm, m)) {
                    out.abnormal.push(*dst);
                } else {
                    out.needs_decision.push(*dst);
                }
            }
        }
    }

    fn reprocess_in_try_push(
        &self,
        fsm: &Fsm<'_, '_>,
        dst: &EntityKey,
        src: &EntityKey,
        route: RouteKey,
        request: &mut Option<DecisionRequest>,
        config_key: &mut Option<u32>,
    ) -> FsmStatus {
        let Some(group) = fsm.entity(dst) else {
            return FsmStatus::Failed;
        };
        let candidates: Vec<EntityKey> = fsm
            .table
            .group_members(dst.id)
            .iter()
            .filter(|m| !is_errored(fsm, m))
            .copied()
            .collect();
        if candidates.is_empty() {
            return FsmStatus::Failed;
        }
        request
            .get_or_insert_with(|| DecisionRequest {
                producer: *src,
                route,
                groups: Vec::new(),
            })
            .groups
            .push(GroupRequest {
                group: *dst,
                candidates,
            });
        *config_key = Some(group.sched_cfg_key());
        FsmStatus::Success
    }

    fn ab_process_in_try_push(&self, fsm: &mut Fsm<'_, '_>, entity: &EntityKey) -> FsmStatus {
        if fsm.entity(entity).map(|e| e.state()) == Some(FsmState::Error) {
            return FsmStatus::Error;
        }
        fsm.change_state(entity, FsmState::Error)
    }

    fn dequeue(&self, fsm: &mut Fsm<'_, '_>, entity: &EntityKey) -> Result<Option<Dequeued>, HalError> {
        let members = fsm.table.group_members(entity.id).to_vec();
        if members.is_empty() {
            return Ok(None);
        }
        let start = fsm
            .entity(entity)
            .map(|e| e.member_cursor)
            .unwrap_or(0);
        for offset in 0..members.len() {
            let index = (start + offset) % members.len();
            let member = members[index];
            match fsm.ext.hal.dequeue(member.device_id, member.id) {
                Ok(Some(item)) => {
                    if let Some(group) = fsm.table.get_mut(entity) {
                        group.member_cursor = (index + 1) % members.len();
                    }
                    return Ok(Some(item));
                }
                Ok(None) => {}
                Err(err) => debug!("group {} skipping member {}: {}", entity, member, err),
            }
        }
        Ok(None)
    }
}
