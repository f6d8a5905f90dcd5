use dgw_core::{EntityKey, FsmState, FsmStatus, MessageKind, QueueType};
use dgw_hal::{HalError, QueueStatus};
use tracing::warn;

use crate::context::Fsm;
use crate::registry::{StateBehavior, Step};

/// Producer resting state: polls the hardware queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleState;

/// Idle override for groups, which have no physical queue to poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupIdleState;

fn reset_schedule(fsm: &mut Fsm<'_, '_>, key: &EntityKey) {
    if let Some(entity) = fsm.entity_mut(key) {
        entity.schedule_count = 0;
    }
}

/// Pushes the outgoing front to its resolved, non-group recipients for as
/// long as the front keeps draining.
pub fn drain_resolved_front(fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> FsmStatus {
    let mut status = FsmStatus::Success;
    loop {
        let Some(entity) = fsm.entity(key) else {
            return FsmStatus::Failed;
        };
        let before = entity.send_list_len();
        let Some(front) = entity.send_list.front().cloned() else {
            break;
        };
        let targets: Vec<EntityKey> = front
            .recipients()
            .into_iter()
            .filter(|r| !r.is_group())
            .collect();
        for target in targets {
            if fsm.push_to(key, &target, &front) == FsmStatus::Error {
                status = FsmStatus::Error;
            }
        }
        let after = fsm.entity(key).map(|e| e.send_list_len()).unwrap_or(0);
        if after >= before || !status.is_success() {
            break;
        }
    }
    status
}

/// Services a pending decision. Returns a step when Idle must stop here.
fn service_pending_decision(fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Option<Step> {
    reset_schedule(fsm, key);
    let waiting = fsm.entity(key).map(|e| e.is_waiting_decision())?;
    if !waiting {
        return None;
    }
    let status = drain_resolved_front(fsm, key);
    let backlog = fsm.entity(key).map(|e| e.send_list_len()).unwrap_or(0);
    if !status.is_success() || backlog > fsm.config().send_list_high_water {
        return Some(Step::Done(status));
    }
    None
}

impl StateBehavior for IdleState {
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
        reset_schedule(fsm, key);
        Step::Done(FsmStatus::Success)
    }

    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, _msg: MessageKind) -> Step {
        if let Some(step) = service_pending_decision(fsm, key) {
            return step;
        }
        match fsm.ext.hal.queue_status(key.device_id, key.id) {
            Ok(status) => {
                if let Some(entity) = fsm.entity_mut(key) {
                    entity.hal_error_count = 0;
                }
                match status {
                    QueueStatus::Normal => Step::Goto(FsmState::Peek),
                    QueueStatus::Empty => Step::Done(FsmStatus::Success),
                }
            }
            Err(HalError::NotExist) => Step::Goto(FsmState::Error),
            Err(HalError::Inner) if key.queue_type == QueueType::Client => {
                Step::Goto(FsmState::Error)
            }
            Err(err) => {
                let limit = fsm.config().hal_error_log_limit;
                if let Some(entity) = fsm.entity_mut(key) {
                    entity.hal_error_count = entity.hal_error_count.saturating_add(1);
                    if entity.hal_error_count <= limit {
                        warn!(
                            "status poll for {} failed ({} of {} logged): {}",
                            key, entity.hal_error_count, limit, err
                        );
                    }
                }
                Step::Done(FsmStatus::Failed)
            }
        }
    }
}

impl StateBehavior for GroupIdleState {
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
        reset_schedule(fsm, key);
        Step::Done(FsmStatus::Success)
    }

    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, _msg: MessageKind) -> Step {
        if let Some(step) = service_pending_decision(fsm, key) {
            return step;
        }
        Step::Goto(FsmState::Peek)
    }
}
