use dgw_core::{EntityKey, FsmState, FsmStatus, MessageKind};
use tracing::debug;

use crate::context::Fsm;
use crate::hooks::hooks_for;
use crate::registry::{StateBehavior, Step};

/// Consumer-side drain of the incoming queue through `send_data`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PushState;

fn drain_incoming(fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
    let pause_policy = fsm.config().pause_subscriptions_while_full;
    loop {
        let Some(entity) = fsm.entity(key) else {
            return Step::Done(FsmStatus::Failed);
        };
        let Some(obj) = entity.recv_list.front().cloned() else {
            if pause_policy {
                fsm.resume_paused_producers(key);
            }
            if let Some(entity) = fsm.entity_mut(key) {
                entity.last_msg = None;
            }
            break;
        };
        let resuming = entity.last_msg() == Some(MessageKind::FullToNotFull);
        let hooks = entity.hooks();
        let producer = obj.producer().filter(|p| fsm.entity(p).is_some());
        let Some(producer) = producer else {
            debug!("{} dropping data object {} with no live producer", key, obj.id());
            if let Some(entity) = fsm.entity_mut(key) {
                entity.recv_list.pop_front();
            }
            continue;
        };

        fsm.ext.stats.record_enqueue(key);
        match hooks.send_data(fsm, key, &obj) {
            FsmStatus::Success => {
                if resuming && pause_policy {
                    hooks_for(producer.kind).resume_subscribe(fsm, &producer, key);
                }
                fsm.detach_recipient(&producer, key, &obj);
                if let Some(entity) = fsm.entity_mut(key) {
                    entity.recv_list.pop_front();
                }
            }
            FsmStatus::KeepState => break,
            status => {
                fsm.ext.stats.record_failure(key);
                match status {
                    FsmStatus::DestFull => return Step::Goto(FsmState::Full),
                    FsmStatus::ErrorPending => return Step::Goto(FsmState::Error),
                    _ => break,
                }
            }
        }
    }
    // An interrupted drain keeps `last_msg` so the next one still resumes.
    let home = fsm
        .entity(key)
        .map(|entity| entity.home_state())
        .unwrap_or(FsmState::WaitPush);
    Step::Goto(home)
}

impl StateBehavior for PushState {
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
        drain_incoming(fsm, key)
    }

    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, _msg: MessageKind) -> Step {
        drain_incoming(fsm, key)
    }
}
