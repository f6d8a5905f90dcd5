use dgw_core::{EntityKey, FsmState, FsmStatus, MessageKind};
use tracing::warn;

use crate::context::Fsm;
use crate::registry::{StateBehavior, Step};

/// Admission-gated dequeue into the entity's buffer slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeekState;

fn admit_and_dequeue(fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
    let Some(entity) = fsm.entity(key) else {
        return Step::Done(FsmStatus::Failed);
    };
    if entity.current_buffer().is_some() {
        if let Some(entity) = fsm.entity_mut(key) {
            entity.schedule_count += 1;
        }
        return Step::Goto(FsmState::TryPush);
    }
    match entity.allow_deque(fsm.config()) {
        FsmStatus::Success => {}
        FsmStatus::KeepState => return Step::Done(FsmStatus::Success),
        _ => return Step::Goto(FsmState::Idle),
    }
    let hooks = entity.hooks();
    match hooks.dequeue(fsm, key) {
        Ok(Some(item)) => {
            if let Some(entity) = fsm.entity_mut(key) {
                entity.buffer = Some(item.buffer);
                entity.route = item.route;
                entity.schedule_count += 1;
            }
            Step::Goto(FsmState::TryPush)
        }
        Ok(None) => Step::Goto(FsmState::Idle),
        Err(err) => {
            warn!("dequeue from {} failed: {}", key, err);
            Step::Goto(FsmState::Error)
        }
    }
}

impl StateBehavior for PeekState {
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
        admit_and_dequeue(fsm, key)
    }

    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, _msg: MessageKind) -> Step {
        admit_and_dequeue(fsm, key)
    }
}
