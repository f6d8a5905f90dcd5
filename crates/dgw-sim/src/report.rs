use std::fmt;

use dgw_core::FsmState;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataObjReport {
    pub created: u64,
    pub released: u64,
    pub maintained: u64,
    pub in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub name: String,
    pub key: String,
    pub state: FsmState,
    pub send_backlog: usize,
    pub recv_backlog: usize,
    /// Buffers consumed from this entity's queue.
    pub delivered: u64,
}

/// End-of-run summary printed by the `dgw-sim` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimReport {
    pub steps: u64,
    pub injected: u64,
    pub delivered: u64,
    pub freed_originals: u64,
    pub freed_copies: u64,
    pub double_frees: u64,
    /// Buffers neither freed nor consumed, including those still queued.
    pub outstanding_buffers: usize,
    pub data_objs: DataObjReport,
    pub enqueue_attempts: u64,
    pub enqueue_failures: u64,
    pub decisions_answered: u64,
    pub push_failures: u64,
    pub entities: Vec<EntityReport>,
}

impl SimReport {
    /// Every created data object is either released, maintained or alive.
    pub fn ledger_balanced(&self) -> bool {
        let objs = &self.data_objs;
        objs.released + objs.maintained + objs.in_flight as u64 >= objs.created
            && objs.released + objs.maintained <= objs.created
    }
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "steps:            {}", self.steps)?;
        writeln!(f, "injected:         {}", self.injected)?;
        writeln!(f, "delivered:        {}", self.delivered)?;
        writeln!(
            f,
            "freed:            {} originals, {} copies ({} double frees)",
            self.freed_originals, self.freed_copies, self.double_frees
        )?;
        writeln!(f, "outstanding:      {}", self.outstanding_buffers)?;
        writeln!(
            f,
            "data objects:     {} created, {} released, {} maintained, {} in flight",
            self.data_objs.created,
            self.data_objs.released,
            self.data_objs.maintained,
            self.data_objs.in_flight
        )?;
        writeln!(
            f,
            "enqueues:         {} attempted, {} failed",
            self.enqueue_attempts, self.enqueue_failures
        )?;
        writeln!(f, "decisions:        {}", self.decisions_answered)?;
        writeln!(f, "push failures:    {}", self.push_failures)?;
        for entity in &self.entities {
            writeln!(
                f,
                "  {:<12} {:<28} {:<9?} out={} in={} delivered={}",
                entity.name,
                entity.key,
                entity.state,
                entity.send_backlog,
                entity.recv_backlog,
                entity.delivered
            )?;
        }
        Ok(())
    }
}
