mod common;

use common::{dst, src, Rig};
use dgw_core::{
    DgwError, Direction, EntityKey, EntityKind, FsmState, FsmStatus, GroupPolicy, QueueType,
    RouteKey, TableIndex,
};
use dgw_fsm::{DispatchConfig, EntityMaterial};
use dgw_hal::{DecisionError, DecisionResponse, GroupChoice};

fn choose(producer: EntityKey, group: EntityKey, member: EntityKey) -> DecisionResponse {
    DecisionResponse {
        producer,
        choices: vec![GroupChoice { group, member }],
    }
}

#[test]
fn hash_group_routes_each_buffer_to_its_bucket() {
    let mut rig = Rig::new(DispatchConfig::default());
    let p = rig.queue(src(1), 16);
    let members = vec![rig.queue(dst(2), 16), rig.queue(dst(3), 16)];
    let g = rig.group(10, GroupPolicy::Hash, members.clone());
    rig.bind(p, g);

    let mut expected = [0usize; 2];
    for trans_id in 0..6 {
        rig.inject(p, trans_id);
        expected[RouteKey::new(trans_id, 0).bucket(2)] += 1;
    }

    assert_eq!(rig.push(p), FsmStatus::Success);
    assert_eq!(rig.delivered(members[0]), expected[0]);
    assert_eq!(rig.delivered(members[1]), expected[1]);
    assert_eq!(rig.dispatcher.data_obj_stats().released, 6);
    assert_eq!(rig.state(g), FsmState::WaitPush);
}

#[test]
fn broadcast_group_copies_to_every_member() {
    let mut rig = Rig::new(DispatchConfig::default());
    let p = rig.queue(src(1), 8);
    let a = rig.queue(dst(2), 8);
    let b = rig.queue(dst(3), 8);
    let g = rig.group(11, GroupPolicy::Broadcast, vec![a, b]);
    rig.bind(p, g);
    let buffer = rig.inject(p, 7);

    assert_eq!(rig.push(p), FsmStatus::Success);
    assert_eq!(rig.delivered(a), 1);
    assert_eq!(rig.delivered(b), 1);
    assert_eq!(rig.hw.counters().copies, 2);
    assert!(rig.hw.is_released(buffer));
    assert_eq!(rig.send_len(p), 0);
}

#[test]
fn broadcast_with_errored_member_quarantines_group() {
    let mut rig = Rig::new(DispatchConfig::default());
    let p = rig.queue(src(1), 8);
    let a = rig.queue(dst(2), 8);
    let b = rig.queue(dst(3), 8);
    let g = rig.group(12, GroupPolicy::Broadcast, vec![a, b]);
    rig.bind(p, g);
    assert_eq!(rig.change_state(b, FsmState::Error), FsmStatus::Error);
    let buffer = rig.inject(p, 1);

    assert_eq!(rig.push(p), FsmStatus::Error);

    assert_eq!(rig.state(p), FsmState::Idle);
    assert_eq!(rig.state(g), FsmState::Error);
    assert_eq!(rig.delivered(a), 0);
    assert!(rig.hw.is_released(buffer));
    assert_eq!(rig.routes.relation_count(TableIndex::Primary), 0);
    assert_eq!(rig.hw.counters().double_frees, 0);
}

#[test]
fn hash_group_with_errored_chosen_member_is_abnormal() {
    let mut rig = Rig::new(DispatchConfig::default());
    let p = rig.queue(src(1), 8);
    let members = vec![rig.queue(dst(2), 8), rig.queue(dst(3), 8)];
    let g = rig.group(13, GroupPolicy::Hash, members.clone());
    rig.bind(p, g);
    let chosen = members[RouteKey::new(42, 0).bucket(2)];
    rig.change_state(chosen, FsmState::Error);
    rig.inject(p, 42);

    assert_eq!(rig.push(p), FsmStatus::Error);
    assert_eq!(rig.state(g), FsmState::Error);
    assert_eq!(rig.dispatcher.data_obj_stats().released, 1);
}

#[test]
fn dynamic_group_waits_for_decisions_in_producer_order() {
    let mut rig = Rig::new(DispatchConfig::default());
    let p = rig.queue(src(1), 8);
    let q3 = rig.queue(dst(3), 8);
    let m4 = rig.queue(dst(4), 8);
    let m5 = rig.queue(dst(5), 8);
    let g = rig.group(20, GroupPolicy::Dynamic, vec![m4, m5]);
    rig.bind(p, q3);
    rig.bind(p, g);
    rig.inject(p, 1);
    rig.inject(p, 2);

    assert_eq!(rig.push(p), FsmStatus::Success);

    let submitted = rig.decisions.take_submitted();
    assert_eq!(submitted.len(), 2);
    let (cfg_key, table, request) = &submitted[0];
    assert_eq!((*cfg_key, *table), (120, TableIndex::Primary));
    assert_eq!(request.producer, p);
    assert_eq!(request.groups[0].group, g);
    assert_eq!(request.groups[0].candidates, vec![m4, m5]);

    let entity = rig.dispatcher.entity(&p).expect("producer should exist");
    assert!(entity.is_waiting_decision());
    let counts: Vec<usize> = entity.send_list().map(|obj| obj.recipient_count()).collect();
    assert_eq!(counts, vec![1, 2]);
    // the second buffer may not overtake the first at q3
    assert_eq!(rig.delivered(q3), 1);

    let first = rig.with_ext(|d, ext| d.apply_decision(&choose(p, g, m4), ext));
    assert_eq!(first, Ok(FsmStatus::Success));
    assert_eq!(rig.delivered(m4), 1);
    assert_eq!(rig.delivered(q3), 2);
    assert_eq!(rig.send_len(p), 1);

    let second = rig.with_ext(|d, ext| d.apply_decision(&choose(p, g, m5), ext));
    assert_eq!(second, Ok(FsmStatus::Success));
    assert_eq!(rig.delivered(m5), 1);
    assert_eq!(rig.send_len(p), 0);
    assert!(!rig
        .dispatcher
        .entity(&p)
        .expect("producer should exist")
        .is_waiting_decision());
    assert_eq!(rig.dispatcher.data_obj_stats().released, 2);
    assert_eq!(rig.dispatcher.data_objs_in_flight(), 0);
}

#[test]
fn stale_and_invalid_decisions_are_reported() {
    let mut rig = Rig::new(DispatchConfig::default());
    let p = rig.queue(src(1), 8);
    let m4 = rig.queue(dst(4), 8);
    let outsider = rig.queue(dst(6), 8);
    let g = rig.group(21, GroupPolicy::Dynamic, vec![m4]);
    rig.bind(p, g);

    let unknown = src(99);
    assert_eq!(
        rig.with_ext(|d, ext| d.apply_decision(&choose(unknown, g, m4), ext)),
        Err(DgwError::UnknownEntity(unknown))
    );
    assert_eq!(
        rig.with_ext(|d, ext| d.apply_decision(&choose(p, common::group_key(77), m4), ext)),
        Err(DgwError::UnknownGroup(77))
    );
    assert_eq!(
        rig.with_ext(|d, ext| d.apply_decision(&choose(p, g, outsider), ext)),
        Err(DgwError::InvalidInput("chosen member is not in the group"))
    );
    assert_eq!(
        rig.with_ext(|d, ext| d.apply_decision(&choose(p, g, m4), ext)),
        Ok(FsmStatus::Success)
    );
    assert_eq!(rig.delivered(m4), 0);
}

#[test]
fn overdue_decisions_follow_configured_timeout() {
    let mut rig = Rig::new(DispatchConfig {
        decision_timeout_steps: 10,
        ..Default::default()
    });
    let p = rig.queue(src(1), 8);
    let m4 = rig.queue(dst(4), 8);
    let g = rig.group(22, GroupPolicy::Dynamic, vec![m4]);
    rig.bind(p, g);
    rig.decisions.set_now(5);
    rig.inject(p, 1);

    rig.push(p);
    assert_eq!(rig.dispatcher.entity(&p).map(|e| e.waiting_since()), Some(5));
    assert!(rig.dispatcher.overdue_decisions(14).is_empty());
    assert_eq!(rig.dispatcher.overdue_decisions(15), vec![p]);

    let withdrawn = rig.with_ext(|d, ext| d.remove_recv_entity_from_send_list(&p, &g, ext));
    assert!(withdrawn);
    assert_eq!(rig.send_len(p), 0);
    assert!(rig.dispatcher.overdue_decisions(15).is_empty());
    assert_eq!(rig.dispatcher.data_obj_stats().released, 1);
}

#[test]
fn failed_decision_submit_keeps_buffer_in_try_push() {
    let mut rig = Rig::new(DispatchConfig::default());
    let p = rig.queue(src(1), 8);
    let m4 = rig.queue(dst(4), 8);
    let g = rig.group(23, GroupPolicy::Dynamic, vec![m4]);
    rig.bind(p, g);
    let buffer = rig.inject(p, 1);
    rig.decisions.set_failure(Some(DecisionError::Unavailable));

    assert_eq!(rig.push(p), FsmStatus::Failed);
    assert_eq!(rig.state(p), FsmState::TryPush);
    assert_eq!(
        rig.dispatcher.entity(&p).and_then(|e| e.current_buffer()),
        Some(buffer)
    );
    assert_eq!(rig.dispatcher.data_obj_stats().created, 0);
    assert!(!rig.hw.is_released(buffer));

    rig.decisions.set_failure(None);
    assert_eq!(rig.push(p), FsmStatus::Success);
    assert_eq!(rig.state(p), FsmState::Idle);
    assert_eq!(rig.decisions.pending(), 1);
    assert_eq!(rig.send_len(p), 1);
}

#[test]
fn exhausted_pool_retries_without_losing_the_buffer() {
    let mut rig = Rig::new(DispatchConfig {
        max_data_objs: 0,
        ..Default::default()
    });
    let p = rig.queue(src(1), 8);
    let q2 = rig.queue(dst(2), 8);
    rig.bind(p, q2);
    let buffer = rig.inject(p, 1);

    assert_eq!(rig.push(p), FsmStatus::Failed);
    assert_eq!(rig.state(p), FsmState::TryPush);
    assert!(!rig.hw.is_released(buffer));
    assert_eq!(rig.delivered(q2), 0);
}

#[test]
fn group_producer_round_robins_member_queues() {
    let mut rig = Rig::new(DispatchConfig::default());
    let out = rig.queue(dst(8), 8);
    let group = EntityKey::new(EntityKind::Group, 30, 0, QueueType::Local, Direction::Send);
    rig.dispatcher.create_entity(EntityMaterial::new(group));
    let (m6, m7) = (src(6), src(7));
    rig.hw.add_queue(0, 6, 8);
    rig.hw.add_queue(0, 7, 8);
    rig.dispatcher
        .create_group(30, vec![m6, m7])
        .expect("group should register");
    rig.bind(group, out);
    let a = rig.inject(m6, 1);
    let b = rig.inject(m6, 2);
    let c = rig.inject(m7, 3);

    assert_eq!(rig.state(group), FsmState::Idle);
    assert_eq!(rig.push(group), FsmStatus::Success);

    assert_eq!(rig.delivered(out), 3);
    assert_eq!(rig.state(group), FsmState::Idle);
    assert_eq!(rig.hw.take_delivered(0, 8, 8).len(), 3);
    for original in [a, b, c] {
        assert!(rig.hw.is_released(original));
    }
}
