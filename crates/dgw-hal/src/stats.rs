use std::collections::BTreeMap;

use dgw_core::EntityKey;

/// Profiling counters fed by the dispatcher.
///
/// Implementations must never influence control flow.
pub trait Statistics {
    /// One `send_data` attempt toward `entity`.
    fn record_enqueue(&mut self, _entity: &EntityKey) {}
    /// One failed `send_data` attempt toward `entity`.
    fn record_failure(&mut self, _entity: &EntityKey) {}
}

/// Statistics sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatistics;

impl Statistics for NoopStatistics {}

/// Enqueue/failure counters, totalled and per entity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    /// Total `send_data` attempts.
    pub enqueue_attempts: u64,
    /// Total failed `send_data` attempts.
    pub enqueue_failures: u64,
    per_entity: BTreeMap<EntityKey, (u64, u64)>,
}

impl DispatchStats {
    /// Returns `(attempts, failures)` recorded for one entity.
    pub fn for_entity(&self, entity: &EntityKey) -> (u64, u64) {
        self.per_entity.get(entity).copied().unwrap_or_default()
    }
}

impl Statistics for DispatchStats {
    fn record_enqueue(&mut self, entity: &EntityKey) {
        self.enqueue_attempts += 1;
        self.per_entity.entry(*entity).or_default().0 += 1;
    }

    fn record_failure(&mut self, entity: &EntityKey) {
        self.enqueue_failures += 1;
        self.per_entity.entry(*entity).or_default().1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchStats, Statistics};
    use dgw_core::EntityKey;

    #[test]
    fn counters_track_totals_and_per_entity() {
        let mut stats = DispatchStats::default();
        let a = EntityKey::recv_queue(1, 0);
        let b = EntityKey::recv_queue(2, 0);
        stats.record_enqueue(&a);
        stats.record_enqueue(&a);
        stats.record_failure(&a);
        stats.record_enqueue(&b);

        assert_eq!(stats.enqueue_attempts, 3);
        assert_eq!(stats.enqueue_failures, 1);
        assert_eq!(stats.for_entity(&a), (2, 1));
        assert_eq!(stats.for_entity(&b), (1, 0));
        assert_eq!(stats.for_entity(&EntityKey::recv_queue(9, 0)), (0, 0));
    }
}
