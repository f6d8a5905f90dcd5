use dgw_core::{EntityKey, FsmState, FsmStatus, MessageKind};

use crate::context::Fsm;
use crate::hooks::hooks_for;
use crate::registry::{StateBehavior, Step};

/// Destination saturated; pushes accumulate until full-to-not-full.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullState;

impl StateBehavior for FullState {
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
        fsm.flags_mut().full_entity_exists = true;
        if !fsm.config().pause_subscriptions_while_full {
            return Step::Done(FsmStatus::Success);
        }
        let producers: Vec<EntityKey> = fsm
            .entity(key)
            .map(|entity| entity.recv_list().filter_map(|obj| obj.producer()).collect())
            .unwrap_or_default();
        for producer in producers {
            hooks_for(producer.kind).pause_subscribe(fsm, &producer, key);
        }
        Step::Done(FsmStatus::Success)
    }

    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, msg: MessageKind) -> Step {
        match msg {
            MessageKind::FullToNotFull => {
                if let Some(entity) = fsm.entity_mut(key) {
                    entity.last_msg = Some(msg);
                }
                Step::Goto(FsmState::Push)
            }
            MessageKind::Push | MessageKind::Recover => Step::Done(FsmStatus::Success),
        }
    }
}
