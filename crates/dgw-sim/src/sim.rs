use std::collections::{BTreeMap, VecDeque};

use dgw_core::{Direction, EntityKey, FsmState, FsmStatus, MessageKind, RouteKey};
use dgw_fsm::{Dispatcher, EntityMaterial, Externals};
use dgw_hal::{
    BindRelation, DecisionRequest, DecisionResponse, DecisionService, DispatchStats, GroupChoice,
    InMemoryDecisionService, InMemoryHardware,
};
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::report::{DataObjReport, EntityReport, SimReport};
use crate::scenario::Scenario;

/// Counters for one or more simulation steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepSummary {
    /// Buffers fed into source queues.
    pub injected: u64,
    /// Buffers taken out of destination queues by the consumer emulation.
    pub consumed: u64,
    /// Full-to-not-full signals sent.
    pub resumed: u64,
    pub decisions_answered: u64,
    /// Push messages that did not return `Success`.
    pub push_failures: u64,
    /// Producers whose decision is overdue after this step.
    pub overdue: u64,
}

impl StepSummary {
    fn absorb(&mut self, other: StepSummary) {
        self.injected += other.injected;
        self.consumed += other.consumed;
        self.resumed += other.resumed;
        self.decisions_answered += other.decisions_answered;
        self.push_failures += other.push_failures;
        self.overdue = other.overdue;
    }
}

/// Outer scheduling loop driving a [`Dispatcher`] over in-memory hardware.
pub struct SimLoop {
    hw: InMemoryHardware,
    routes: BindRelation,
    decisions: InMemoryDecisionService,
    stats: DispatchStats,
    dispatcher: Dispatcher,
    names: BTreeMap<EntityKey, String>,
    by_name: BTreeMap<String, EntityKey>,
    producers: Vec<EntityKey>,
    sinks: Vec<EntityKey>,
    inbound: BTreeMap<EntityKey, u64>,
    pending: VecDeque<(u64, DecisionRequest)>,
    decision_delay: u64,
    drain_per_step: usize,
    answer_cursor: usize,
    next_trans_id: u64,
    steps_run: u64,
    delivered: BTreeMap<EntityKey, u64>,
    totals: StepSummary,
}

impl SimLoop {
    /// Builds hardware queues, entities, groups and bindings for `scenario`.
    pub fn new(scenario: &Scenario) -> Result<Self, SimError> {
        scenario.validate()?;
        let mut sim = Self {
            hw: InMemoryHardware::default(),
            routes: BindRelation::default(),
            decisions: InMemoryDecisionService::default(),
            stats: DispatchStats::default(),
            dispatcher: Dispatcher::new(scenario.dispatch.clone()),
            names: BTreeMap::new(),
            by_name: BTreeMap::new(),
            producers: Vec::new(),
            sinks: Vec::new(),
            inbound: BTreeMap::new(),
            pending: VecDeque::new(),
            decision_delay: scenario.decision_delay,
            drain_per_step: scenario.drain_per_step,
            answer_cursor: 0,
            next_trans_id: 0,
            steps_run: 0,
            delivered: BTreeMap::new(),
            totals: StepSummary::default(),
        };

        for queue in &scenario.queues {
            let key = queue.key();
            sim.hw.add_queue(queue.device, queue.id, queue.capacity);
            sim.dispatcher.create_entity(
                EntityMaterial::new(key)
                    .with_table(queue.table)
                    .with_sched_cfg_key(queue.sched_cfg_key),
            );
            match queue.direction {
                Direction::Send => sim.producers.push(key),
                Direction::Recv => sim.sinks.push(key),
            }
            if queue.inbound > 0 {
                sim.inbound.insert(key, queue.inbound);
            }
            sim.name(key, &queue.name);
        }

        for group in &scenario.groups {
            let key = group.key();
            let members = group
                .members
                .iter()
                .map(|name| {
                    scenario
                        .key_of(name)
                        .ok_or_else(|| SimError::UnknownName(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            sim.dispatcher.create_group(group.id, members)?;
            sim.dispatcher.create_entity(
                EntityMaterial::new(key)
                    .with_table(group.table)
                    .with_sched_cfg_key(group.sched_cfg_key.unwrap_or(group.id))
                    .with_policy(group.policy),
            );
            if group.direction == Direction::Send {
                sim.producers.push(key);
            }
            sim.name(key, &group.name);
        }

        for binding in &scenario.bindings {
            let from = sim.lookup(&binding.from)?;
            let to = sim.lookup(&binding.to)?;
            if !sim.routes.bind(from, to, binding.table) {
                warn!("binding {} -> {} declared twice", binding.from, binding.to);
            }
        }

        info!(
            "simulation ready: {} producers, {} sinks, {} groups",
            sim.producers.len(),
            sim.sinks.len(),
            scenario.groups.len()
        );
        Ok(sim)
    }

    fn name(&mut self, key: EntityKey, name: &str) {
        self.names.insert(key, name.to_string());
        self.by_name.insert(name.to_string(), key);
    }

    fn lookup(&self, name: &str) -> Result<EntityKey, SimError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownName(name.to_string()))
    }

    fn split(&mut self) -> (&mut Dispatcher, Externals<'_>) {
        (
            &mut self.dispatcher,
            Externals {
                hal: &mut self.hw,
                routes: &mut self.routes,
                decisions: &mut self.decisions,
                stats: &mut self.stats,
            },
        )
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn hardware(&self) -> &InMemoryHardware {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut InMemoryHardware {
        &mut self.hw
    }

    pub fn key(&self, name: &str) -> Option<EntityKey> {
        self.by_name.get(name).copied()
    }

    pub fn steps_run(&self) -> u64 {
        self.steps_run
    }

    pub fn totals(&self) -> StepSummary {
        self.totals
    }

    /// Buffers the consumer emulation has taken from `name`'s queue.
    pub fn delivered_to(&self, name: &str) -> u64 {
        self.key(name)
            .and_then(|key| self.delivered.get(&key).copied())
            .unwrap_or(0)
    }

    /// Adds `count` buffers to the inbound budget of a source queue.
    pub fn add_inbound(&mut self, name: &str, count: u64) -> Result<(), SimError> {
        let key = self.lookup(name)?;
        *self.inbound.entry(key).or_default() += count;
        Ok(())
    }

    /// Sends one message outside the regular loop, e.g. `Recover`.
    pub fn send(&mut self, name: &str, msg: MessageKind) -> Result<FsmStatus, SimError> {
        let key = self.lookup(name)?;
        let (dispatcher, mut ext) = self.split();
        Ok(dispatcher.process_message(&key, msg, &mut ext))
    }

    /// One tick of the outer scheduling loop.
    pub fn step(&mut self) -> StepSummary {
        let mut summary = StepSummary {
            injected: self.feed_inbound(),
            consumed: self.consume(),
            resumed: self.signal_not_full(),
            decisions_answered: self.answer_decisions(),
            ..StepSummary::default()
        };
        for producer in self.producers.clone() {
            let (dispatcher, mut ext) = self.split();
            let status = dispatcher.process_message(&producer, MessageKind::Push, &mut ext);
            if !status.is_success() {
                debug!("push to {} returned {:?}", producer, status);
                summary.push_failures += 1;
            }
        }
        self.decisions.advance(1);
        summary.overdue = self
            .dispatcher
            .overdue_decisions(self.decisions.now())
            .len() as u64;
        self.steps_run += 1;
        self.totals.absorb(summary);
        summary
    }

    pub fn run(&mut self, steps: u64) -> SimReport {
        for _ in 0..steps {
            self.step();
        }
        self.report()
    }

    /// Runs until nothing is left to move or `max_steps` is reached.
    /// Returns whether the loop went quiet.
    pub fn run_until_quiet(&mut self, max_steps: u64) -> bool {
        for _ in 0..max_steps {
            if self.is_quiet() {
                return true;
            }
            self.step();
        }
        self.is_quiet()
    }

    /// No inbound budget, no queued source buffers, no live data objects
    /// and no unanswered decisions.
    pub fn is_quiet(&self) -> bool {
        self.inbound.values().all(|remaining| *remaining == 0)
            && self
                .producers
                .iter()
                .all(|key| self.hw.queue_len(key.device_id, key.id) == 0)
            && self.dispatcher.data_objs_in_flight() == 0
            && self.pending.is_empty()
            && self.decisions.pending() == 0
    }

    fn feed_inbound(&mut self) -> u64 {
        let mut injected = 0;
        for (key, remaining) in self.inbound.iter_mut() {
            while *remaining > 0 && self.hw.has_room(key.device_id, key.id) {
                self.next_trans_id += 1;
                let route = RouteKey::new(self.next_trans_id, key.id);
                match self.hw.inject(key.device_id, key.id, route) {
                    Ok(_) => {
                        *remaining -= 1;
                        injected += 1;
                    }
                    Err(err) => {
                        warn!("inbound for {} stalled: {}", key, err);
                        break;
                    }
                }
            }
        }
        injected
    }

    fn consume(&mut self) -> u64 {
        let mut consumed = 0;
        for sink in &self.sinks {
            let taken = self
                .hw
                .take_delivered(sink.device_id, sink.id, self.drain_per_step)
                .len() as u64;
            *self.delivered.entry(*sink).or_default() += taken;
            consumed += taken;
        }
        consumed
    }

    fn signal_not_full(&mut self) -> u64 {
        if !self.dispatcher.exists_full_entity() {
            return 0;
        }
        let full: Vec<EntityKey> = self
            .dispatcher
            .table()
            .iter()
            .filter(|entity| entity.state() == FsmState::Full)
            .map(|entity| *entity.key())
            .collect();
        let mut resumed = 0;
        for key in full {
            if !self.hw.has_room(key.device_id, key.id) {
                continue;
            }
            let (dispatcher, mut ext) = self.split();
            dispatcher.process_message(&key, MessageKind::FullToNotFull, &mut ext);
            resumed += 1;
        }
        let still_full = self
            .dispatcher
            .table()
            .iter()
            .any(|entity| entity.state() == FsmState::Full);
        if !still_full {
            self.dispatcher.clear_full_flag();
        }
        resumed
    }

    fn answer_decisions(&mut self) -> u64 {
        let now = self.decisions.now();
        let submitted = self.decisions.take_submitted();
        self.pending
            .extend(submitted.into_iter().map(|(_, _, request)| (now, request)));

        let mut answered = 0;
        while let Some((since, _)) = self.pending.front() {
            if now.saturating_sub(*since) < self.decision_delay {
                break;
            }
            let Some((_, request)) = self.pending.pop_front() else {
                break;
            };
            let mut choices = Vec::with_capacity(request.groups.len());
            for group in &request.groups {
                if group.candidates.is_empty() {
                    continue;
                }
                let member = group.candidates[self.answer_cursor % group.candidates.len()];
                self.answer_cursor = self.answer_cursor.wrapping_add(1);
                choices.push(GroupChoice {
                    group: group.group,
                    member,
                });
            }
            let response = DecisionResponse {
                producer: request.producer,
                choices,
            };
            let (dispatcher, mut ext) = self.split();
            match dispatcher.apply_decision(&response, &mut ext) {
                Ok(_) => answered += 1,
                Err(err) => warn!("decision for {} dropped: {}", request.producer, err),
            }
        }
        answered
    }

    pub fn report(&self) -> SimReport {
        let counters = self.hw.counters();
        let objs = self.dispatcher.data_obj_stats();
        let entities = self
            .dispatcher
            .table()
            .iter()
            .map(|entity| {
                let key = *entity.key();
                EntityReport {
                    name: self.names.get(&key).cloned().unwrap_or_default(),
                    key: key.to_string(),
                    state: entity.state(),
                    send_backlog: entity.send_list_len(),
                    recv_backlog: entity.recv_list_len(),
                    delivered: self.delivered.get(&key).copied().unwrap_or(0),
                }
            })
            .collect();
        SimReport {
            steps: self.steps_run,
            injected: counters.originals,
            delivered: counters.consumed,
            freed_originals: counters.freed_originals,
            freed_copies: counters.freed_copies,
            double_frees: counters.double_frees,
            outstanding_buffers: self.hw.outstanding(),
            data_objs: DataObjReport {
                created: objs.created,
                released: objs.released,
                maintained: objs.maintained,
                in_flight: self.dispatcher.data_objs_in_flight(),
            },
            enqueue_attempts: self.stats.enqueue_attempts,
            enqueue_failures: self.stats.enqueue_failures,
            decisions_answered: self.totals.decisions_answered,
            push_failures: self.totals.push_failures,
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SimLoop;
    use crate::scenario::Scenario;
    use dgw_core::{FsmState, MessageKind};

    const PIPE: &str = r#"
drain_per_step = 1

[[queues]]
name = "in"
id = 1
direction = "send"
inbound = 6

[[queues]]
name = "out"
id = 2
direction = "recv"
capacity = 2

[[bindings]]
from = "in"
to = "out"
"#;

    #[test]
    fn slow_consumer_cycles_through_full() {
        let scenario = Scenario::parse(PIPE).expect("scenario should parse");
        let mut sim = SimLoop::new(&scenario).expect("sim should build");

        let first = sim.step();
        assert_eq!(first.injected, 6);
        assert_eq!(
            sim.dispatcher().state_of(&sim.key("out").expect("out")),
            Some(FsmState::Full)
        );

        assert!(sim.run_until_quiet(50));
        assert_eq!(sim.delivered_to("out") + sim.hardware().queue_len(0, 2) as u64, 6);
        let report = sim.report();
        assert_eq!(report.injected, 6);
        assert_eq!(report.freed_originals, 6);
        assert_eq!(report.double_frees, 0);
        assert!(sim.totals().resumed > 0);
    }

    #[test]
    fn recover_reopens_a_quarantined_sink() {
        let scenario = Scenario::parse(PIPE).expect("scenario should parse");
        let mut sim = SimLoop::new(&scenario).expect("sim should build");
        sim.hardware_mut().set_enqueue_fault(0, 2, Some(dgw_hal::HalError::NotExist));
        sim.step();
        let out = sim.key("out").expect("out");
        assert_eq!(sim.dispatcher().state_of(&out), Some(FsmState::Error));

        sim.hardware_mut().set_enqueue_fault(0, 2, None);
        sim.send("out", MessageKind::Recover).expect("known entity");
        assert_eq!(sim.dispatcher().state_of(&out), Some(FsmState::WaitPush));
        assert!(sim.send("missing", MessageKind::Push).is_err());
    }
}
