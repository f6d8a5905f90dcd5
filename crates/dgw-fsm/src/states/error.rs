use dgw_core::{EntityKey, FsmState, FsmStatus, MessageKind};
use tracing::warn;

use crate::context::Fsm;
use crate::registry::{StateBehavior, Step};

/// Quarantine: the incoming backlog is discarded and the entity reported
/// abnormal until an external recover.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorState;

fn quarantine(fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
    let Some(entity) = fsm.entity_mut(key) else {
        return Step::Done(FsmStatus::Error);
    };
    let backlog: Vec<_> = entity.recv_list.drain(..).collect();
    let table_index = entity.table_index();
    let discarded = backlog.len();
    for obj in backlog {
        match obj.producer() {
            Some(producer) => {
                fsm.detach_recipient(&producer, key, &obj);
            }
            None => {
                obj.remove_recipient(key);
                if obj.recipient_count() == 0 {
                    obj.release(&mut *fsm.ext.hal);
                }
            }
        }
    }
    fsm.resume_paused_producers(key);
    fsm.ext.routes.mark_abnormal(key, key.direction, table_index);
    warn!("{} quarantined, discarded {} queued data objects", key, discarded);
    Step::Done(FsmStatus::Error)
}

impl StateBehavior for ErrorState {
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step {
        quarantine(fsm, key)
    }

    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, msg: MessageKind) -> Step {
        match msg {
            MessageKind::Recover => Step::Goto(FsmState::Push),
            _ => quarantine(fsm, key),
        }
    }
}
