use dgw_core::{EntityKey, FsmState, FsmStatus, MessageKind};
use tracing::debug;

use crate::context::Fsm;
use crate::registry::{StateBehavior, Step};

/// Consumer resting state; only a push wakes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaitPushState;

impl StateBehavior for WaitPushState {
    fn pre_process(&self, _fsm: &mut Fsm<'_, '_>, _key: &EntityKey) -> Step {
        Step::Done(FsmStatus::Success)
    }

    fn process_message(&self, _fsm: &mut Fsm<'_, '_>, key: &EntityKey, msg: MessageKind) -> Step {
        match msg {
            MessageKind::Push => Step::Goto(FsmState::Push),
            other => {
                debug!("{} waiting for push, ignoring {:?}", key, other);
                Step::Done(FsmStatus::Success)
            }
        }
    }
}
