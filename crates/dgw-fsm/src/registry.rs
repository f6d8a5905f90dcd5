use std::collections::HashMap;
use std::sync::Arc;

use dgw_core::{EntityKey, EntityKind, FsmState, FsmStatus, MessageKind};

use crate::context::Fsm;
use crate::states::{
    ErrorState, FullState, GroupIdleState, IdleState, PeekState, PushState, TryPushState,
    WaitPushState,
};

/// Result of running a state behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Stay in the current state and report a status.
    Done(FsmStatus),
    /// Enter another state; its entry action decides the status.
    Goto(FsmState),
    /// Enter another state but report the given status regardless.
    GotoThen(FsmState, FsmStatus),
}

/// Stateless transition logic for one (state, kind) combination.
pub trait StateBehavior: Send + Sync {
    /// Entry action, run by `change_state`.
    fn pre_process(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey) -> Step;
    /// Reaction to an inbound message while in this state.
    fn process_message(&self, fsm: &mut Fsm<'_, '_>, key: &EntityKey, msg: MessageKind) -> Step;
}

/// Table from (state, kind) to a shared behavior instance.
pub struct StateRegistry {
    behaviors: HashMap<(FsmState, EntityKind), Arc<dyn StateBehavior>>,
}

impl Default for StateRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let idle: Arc<dyn StateBehavior> = Arc::new(IdleState);
        let peek: Arc<dyn StateBehavior> = Arc::new(PeekState);
        let try_push: Arc<dyn StateBehavior> = Arc::new(TryPushState);
        let push: Arc<dyn StateBehavior> = Arc::new(PushState);
        let wait_push: Arc<dyn StateBehavior> = Arc::new(WaitPushState);
        let full: Arc<dyn StateBehavior> = Arc::new(FullState);
        let error: Arc<dyn StateBehavior> = Arc::new(ErrorState);
        for kind in [EntityKind::Queue, EntityKind::Tag, EntityKind::Group] {
            registry.register(FsmState::Idle, kind, Arc::clone(&idle));
            registry.register(FsmState::Peek, kind, Arc::clone(&peek));
            registry.register(FsmState::TryPush, kind, Arc::clone(&try_push));
            registry.register(FsmState::Push, kind, Arc::clone(&push));
            registry.register(FsmState::WaitPush, kind, Arc::clone(&wait_push));
            registry.register(FsmState::Full, kind, Arc::clone(&full));
            registry.register(FsmState::Error, kind, Arc::clone(&error));
        }
        registry.register(FsmState::Idle, EntityKind::Group, Arc::new(GroupIdleState));
        registry
    }
}

impl StateRegistry {
    /// Registry with no behaviors at all.
    pub fn empty() -> Self {
        Self {
            behaviors: HashMap::new(),
        }
    }

    /// Installs or overrides the behavior for one combination.
    pub fn register(&mut self, state: FsmState, kind: EntityKind, behavior: Arc<dyn StateBehavior>) {
        self.behaviors.insert((state, kind), behavior);
    }

    pub fn unregister(&mut self, state: FsmState, kind: EntityKind) -> Option<Arc<dyn StateBehavior>> {
        self.behaviors.remove(&(state, kind))
    }

    pub fn lookup(&self, state: FsmState, kind: EntityKind) -> Option<&dyn StateBehavior> {
        self.behaviors.get(&(state, kind)).map(|b| b.as_ref())
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::StateRegistry;
    use dgw_core::{EntityKind, FsmState};

    #[test]
    fn default_registry_covers_every_combination() {
        let registry = StateRegistry::default();
        assert_eq!(registry.len(), FsmState::ALL.len() * 3);
        for state in FsmState::ALL {
            for kind in [EntityKind::Queue, EntityKind::Tag, EntityKind::Group] {
                assert!(registry.lookup(state, kind).is_some(), "{state:?}/{kind:?}");
            }
        }
    }

    #[test]
    fn unregister_leaves_a_gap() {
        let mut registry = StateRegistry::default();
        assert!(registry.unregister(FsmState::Full, EntityKind::Tag).is_some());
        assert!(registry.lookup(FsmState::Full, EntityKind::Tag).is_none());
        assert!(registry.lookup(FsmState::Full, EntityKind::Queue).is_some());
    }
}
