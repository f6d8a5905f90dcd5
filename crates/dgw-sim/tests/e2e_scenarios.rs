use std::path::PathBuf;

use dgw_core::FsmState;
use dgw_sim::{Scenario, SimLoop, SimReport};

fn load(name: &str) -> SimLoop {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name);
    let scenario = Scenario::load(&path).expect("bundled scenario should load");
    SimLoop::new(&scenario).expect("bundled scenario should build")
}

/// Runs to quiescence, then lets the consumers empty their queues.
fn settle(sim: &mut SimLoop) -> SimReport {
    assert!(sim.run_until_quiet(5_000), "simulation should go quiet");
    sim.run(100)
}

fn assert_clean(report: &SimReport) {
    assert_eq!(report.double_frees, 0);
    assert_eq!(report.outstanding_buffers, 0);
    assert_eq!(report.data_objs.in_flight, 0);
    assert!(report.ledger_balanced());
    assert!(report
        .entities
        .iter()
        .all(|entity| entity.state != FsmState::Error));
}

#[test]
fn broadcast_scenario_mirrors_every_buffer() {
    let mut sim = load("broadcast.toml");
    let report = settle(&mut sim);

    assert_clean(&report);
    assert_eq!(report.injected, 64);
    assert_eq!(sim.delivered_to("left"), 64);
    assert_eq!(sim.delivered_to("right"), 64);
    assert_eq!(report.freed_originals, 64);
}

#[test]
fn backpressure_scenario_drains_through_full_cycles() {
    let mut sim = load("backpressure.toml");
    let report = settle(&mut sim);

    assert_clean(&report);
    assert_eq!(sim.delivered_to("sink"), 80);
    assert!(sim.totals().resumed > 0);
    assert!(report.enqueue_failures > 0);
    let hw = sim.hardware();
    assert!(hw.counters().pause_calls > 0);
    assert!(!hw.is_paused(0, 1));
    assert!(!hw.is_paused(0, 2));
}

#[test]
fn dynamic_scenario_balances_workers_and_keeps_other_lanes_whole() {
    let mut sim = load("dynamic.toml");
    let report = settle(&mut sim);

    assert_clean(&report);
    assert_eq!(report.decisions_answered, 100);
    assert_eq!(sim.delivered_to("audit"), 100);
    assert_eq!(sim.delivered_to("shard-0") + sim.delivered_to("shard-1"), 100);
    assert_eq!(sim.delivered_to("worker-a"), 50);
    assert_eq!(sim.delivered_to("worker-b"), 50);
    assert_eq!(sim.totals().overdue, 0);
}
