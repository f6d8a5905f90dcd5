#![no_main]

use dgw_core::{
    Direction, EntityKey, EntityKind, GroupPolicy, MessageKind, QueueType, RouteKey, TableIndex,
};
use dgw_fsm::{DispatchConfig, Dispatcher, EntityMaterial, Externals};
use dgw_hal::{
    BindRelation, DecisionResponse, DispatchStats, GroupChoice, HalError, InMemoryDecisionService,
    InMemoryHardware,
};
use libfuzzer_sys::fuzz_target;

const SOURCES: [u32; 2] = [1, 2];
const SINKS: [u32; 3] = [10, 11, 12];
const GROUP: u32 = 50;

fuzz_target!(|data: &[u8]| {
    let mut hw = InMemoryHardware::default();
    let mut routes = BindRelation::default();
    let mut decisions = InMemoryDecisionService::default();
    let mut stats = DispatchStats::default();
    let mut dispatcher = Dispatcher::new(DispatchConfig {
        schedule_quota: 4,
        pause_subscriptions_while_full: data.first().is_some_and(|b| b & 1 == 1),
        zero_copy_single_recipient: data.first().is_some_and(|b| b & 2 == 2),
        ..DispatchConfig::default()
    });

    let sources: Vec<EntityKey> = SOURCES.iter().map(|id| EntityKey::send_queue(*id, 0)).collect();
    let sinks: Vec<EntityKey> = SINKS.iter().map(|id| EntityKey::recv_queue(*id, 0)).collect();
    let group = EntityKey::new(EntityKind::Group, GROUP, 0, QueueType::Local, Direction::Recv);
    for key in sources.iter().chain(&sinks) {
        hw.add_queue(key.device_id, key.id, 4);
        dispatcher.create_entity(EntityMaterial::new(*key));
    }
    let policy = match data.get(1).copied().unwrap_or(0) % 3 {
        0 => GroupPolicy::Hash,
        1 => GroupPolicy::Broadcast,
        _ => GroupPolicy::Dynamic,
    };
    dispatcher.create_entity(EntityMaterial::new(group).with_policy(policy));
    let _ = dispatcher.create_group(GROUP, sinks[1..].to_vec());
    routes.bind(sources[0], sinks[0], TableIndex::Primary);
    routes.bind(sources[0], group, TableIndex::Primary);
    routes.bind(sources[1], group, TableIndex::Primary);

    let mut trans_id = 0_u64;
    let mut cursor = 0_usize;
    for pair in data.get(2..).unwrap_or(&[]).chunks(2) {
        let op = pair[0];
        let arg = pair.get(1).copied().unwrap_or(0) as usize;
        let source = sources[arg % sources.len()];
        let sink = sinks[arg % sinks.len()];
        match op % 9 {
            0 => {
                trans_id += 1;
                let _ = hw.inject(0, source.id, RouteKey::new(trans_id, 0));
            }
            1 | 2 | 3 => {
                let (key, msg) = match op % 9 {
                    1 => (source, MessageKind::Push),
                    2 => (sink, MessageKind::FullToNotFull),
                    _ => (sink, MessageKind::Recover),
                };
                let mut ext = Externals {
                    hal: &mut hw,
                    routes: &mut routes,
                    decisions: &mut decisions,
                    stats: &mut stats,
                };
                let _ = dispatcher.process_message(&key, msg, &mut ext);
            }
            4 => hw.set_capacity(0, sink.id, arg % 6),
            5 => {
                let _ = hw.take_delivered(0, sink.id, arg % 4 + 1);
            }
            6 => {
                let fault = (arg % 2 == 0).then_some(HalError::NotExist);
                hw.set_enqueue_fault(0, sink.id, fault);
            }
            7 => {
                for (_, _, request) in decisions.take_submitted() {
                    let choices = request
                        .groups
                        .iter()
                        .filter(|g| !g.candidates.is_empty())
                        .map(|g| {
                            cursor += 1;
                            GroupChoice {
                                group: g.group,
                                member: g.candidates[cursor % g.candidates.len()],
                            }
                        })
                        .collect();
                    let response = DecisionResponse {
                        producer: request.producer,
                        choices,
                    };
                    let mut ext = Externals {
                        hal: &mut hw,
                        routes: &mut routes,
                        decisions: &mut decisions,
                        stats: &mut stats,
                    };
                    let _ = dispatcher.apply_decision(&response, &mut ext);
                }
            }
            _ => {
                let mut ext = Externals {
                    hal: &mut hw,
                    routes: &mut routes,
                    decisions: &mut decisions,
                    stats: &mut stats,
                };
                if dispatcher.delete_entity(&sink, &mut ext) {
                    dispatcher.create_entity(EntityMaterial::new(sink));
                }
            }
        }
    }

    assert_eq!(hw.counters().double_frees, 0);
    let objs = dispatcher.data_obj_stats();
    assert!(objs.released + objs.maintained <= objs.created);
});
