#![no_main]

use dgw_sim::{Scenario, SimLoop};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(scenario) = Scenario::parse(text) else {
        return;
    };
    let bounded = scenario
        .queues
        .iter()
        .all(|q| q.capacity <= 256 && q.inbound <= 256);
    if !bounded {
        return;
    }
    if let Ok(mut sim) = SimLoop::new(&scenario) {
        let report = sim.run(scenario.steps.min(16));
        assert_eq!(report.double_frees, 0);
    }
});
