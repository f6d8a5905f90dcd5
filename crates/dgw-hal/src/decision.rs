use dgw_core::{EntityKey, RouteKey, TableIndex};
use serde::{Deserialize, Serialize};

use crate::error::DecisionError;

/// Candidate members of one dynamic group awaiting a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub group: EntityKey,
    pub candidates: Vec<EntityKey>,
}

/// Pending load-balancing request for one producer buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub producer: EntityKey,
    pub route: RouteKey,
    pub groups: Vec<GroupRequest>,
}

/// Member chosen for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChoice {
    pub group: EntityKey,
    pub member: EntityKey,
}

/// Decision service answer for one earlier request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub producer: EntityKey,
    pub choices: Vec<GroupChoice>,
}

/// External dynamic-scheduling decision service contract.
pub trait DecisionService {
    /// Submits a request under a scheduling-config key.
    fn submit(
        &mut self,
        config_key: u32,
        table: TableIndex,
        request: &DecisionRequest,
    ) -> Result<(), DecisionError>;
    /// Current service timestamp in abstract steps.
    fn now(&self) -> u64;
}

/// In-memory decision service recording submissions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDecisionService {
    submitted: Vec<(u32, TableIndex, DecisionRequest)>,
    failure: Option<DecisionError>,
    now_step: u64,
}

impl InMemoryDecisionService {
    /// Makes every following `submit` fail with `failure` (or clears it).
    pub fn set_failure(&mut self, failure: Option<DecisionError>) {
        self.failure = failure;
    }

    pub fn set_now(&mut self, now_step: u64) {
        self.now_step = now_step;
    }

    pub fn advance(&mut self, steps: u64) {
        self.now_step += steps;
    }

    /// Drains and returns all submissions captured so far.
    pub fn take_submitted(&mut self) -> Vec<(u32, TableIndex, DecisionRequest)> {
        std::mem::take(&mut self.submitted)
    }

    pub fn pending(&self) -> usize {
        self.submitted.len()
    }
}

impl DecisionService for InMemoryDecisionService {
    fn submit(
        &mut self,
        config_key: u32,
        table: TableIndex,
        request: &DecisionRequest,
    ) -> Result<(), DecisionError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        self.submitted.push((config_key, table, request.clone()));
        Ok(())
    }

    fn now(&self) -> u64 {
        self.now_step
    }
}
