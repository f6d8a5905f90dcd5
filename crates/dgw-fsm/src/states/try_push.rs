use dgw_core::{EntityKey, FsmState, FsmStatus, MessageKind};
use dgw_hal::DecisionRequest;
use tracing::{debug, warn};

use crate::context::Fsm;
use crate::hooks::{hooks_for, DstBuckets};
use crate::registry::{StateBehavior, Step};

/// Producer-side fan-out of the buffer held in the dequeue slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct TryPushState;

fn try_push(fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
    let Some(entity) = fsm.entity(key) else {
        return Step::Done(FsmStatus::Failed);
    };
    let Some(buffer) = entity.current_buffer() else {
        return Step::Goto(FsmState::Peek);
    };
    let route = entity.route();
    let table_index = entity.table_index();
    let sched_cfg_key = entity.sched_cfg_key();
    let first_data = entity.send_list_len() == 0;

    let destinations = fsm.ext.routes.lookup_destinations(key, table_index);
    if destinations.is_empty() {
        debug!("{} has no bindings, dropping {:?}", key, buffer);
        fsm.free_buffer(buffer);
        if let Some(entity) = fsm.entity_mut(key) {
            entity.buffer = None;
        }
        return Step::Goto(FsmState::Peek);
    }

    let mut buckets = DstBuckets::default();
    for dst in &destinations {
        match fsm.entity(dst) {
            Some(target) => target
                .hooks()
                .select_dst_entities(fsm, dst, route, &mut buckets),
            None => warn!("{} bound to unknown destination {}", key, dst),
        }
    }

    if !fsm.factory.has_room() {
        warn!("data object pool exhausted, {} retries later", key);
        return Step::Done(FsmStatus::Failed);
    }

    let mut errored = false;
    let mut request: Option<DecisionRequest> = None;
    let mut config_key: Option<u32> = None;
    let mut pending_groups = Vec::new();
    for group in &buckets.needs_decision {
        let status = hooks_for(group.kind).reprocess_in_try_push(
            fsm,
            group,
            key,
            route,
            &mut request,
            &mut config_key,
        );
        if status.is_success() {
            pending_groups.push(*group);
        } else {
            warn!("{} could not request a decision for {}: {:?}", key, group, status);
            errored = true;
        }
    }

    if let Some(request) = request {
        let cfg = config_key.unwrap_or(sched_cfg_key);
        if let Err(err) = fsm.ext.decisions.submit(cfg, table_index, &request) {
            warn!("decision submit for {} failed: {}", key, err);
            return Step::Done(FsmStatus::Failed);
        }
        let now = fsm.ext.decisions.now();
        if let Some(entity) = fsm.entity_mut(key) {
            entity.waiting_since = now;
            entity.waiting_decision = true;
        }
    }

    let Some(obj) = fsm.factory.create(*key, buffer) else {
        warn!("data object pool exhausted, {} retries later", key);
        return Step::Done(FsmStatus::Failed);
    };
    let mut push_now = Vec::new();
    for ready in &buckets.ready {
        obj.add_recipient(*ready);
        if first_data {
            push_now.push(*ready);
        }
    }
    for group in pending_groups {
        obj.add_recipient(group);
    }

    if let Some(entity) = fsm.entity_mut(key) {
        entity.buffer = None;
        if obj.recipient_count() > 0 {
            entity.add_data_obj_to_send_list(obj.clone());
        }
    }
    if obj.recipient_count() == 0 {
        obj.release(&mut *fsm.ext.hal);
    }

    for recipient in &push_now {
        if fsm.push_to(key, recipient, &obj) == FsmStatus::Error {
            warn!("{} rejected push from {}", recipient, key);
            errored = true;
        }
    }

    for abnormal in &buckets.abnormal {
        let status = hooks_for(abnormal.kind).ab_process_in_try_push(fsm, abnormal);
        if !status.is_success() {
            errored = true;
        }
    }

    if errored {
        Step::GotoThen(FsmState::Idle, FsmStatus::Error)
    } else {
        Step::Goto(FsmState::Peek)
    }
}

impl StateBehavior for TryPushState {
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
        try_push(fsm, key)
    }

    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, _msg: MessageKind) -> Step {
        try_push(fsm, key)
    }
}
