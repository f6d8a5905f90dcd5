use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use dgw_core::{Direction, EntityKey, EntityKind, GroupPolicy, QueueType, TableIndex};
use dgw_fsm::DispatchConfig;
use serde::Deserialize;

use crate::error::SimError;

/// A hardware queue and the entity scheduled on it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSpec {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub device: u32,
    pub direction: Direction,
    #[serde(default)]
    pub queue_type: QueueType,
    /// Schedule the queue as a tag instead of a plain queue.
    #[serde(default)]
    pub tag: bool,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Buffers arriving on this queue over the whole run.
    #[serde(default)]
    pub inbound: u64,
    #[serde(default)]
    pub table: TableIndex,
    #[serde(default)]
    pub sched_cfg_key: u32,
}

impl QueueSpec {
    pub fn key(&self) -> EntityKey {
        let kind = if self.tag {
            EntityKind::Tag
        } else {
            EntityKind::Queue
        };
        EntityKey::new(kind, self.id, self.device, self.queue_type, self.direction)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub policy: GroupPolicy,
    /// Queue names, in member order.
    pub members: Vec<String>,
    /// `send` makes the group a producer that drains its members.
    #[serde(default = "default_group_direction")]
    pub direction: Direction,
    #[serde(default)]
    pub table: TableIndex,
    /// Defaults to the group id.
    #[serde(default)]
    pub sched_cfg_key: Option<u32>,
}

impl GroupSpec {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(EntityKind::Group, self.id, 0, QueueType::Local, self.direction)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSpec {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub table: TableIndex,
}

/// A complete simulation setup loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default = "default_steps")]
    pub steps: u64,
    /// Buffers each destination consumer takes per step.
    #[serde(default = "default_drain_per_step")]
    pub drain_per_step: usize,
    /// Steps a decision request waits before it is answered.
    #[serde(default)]
    pub decision_delay: u64,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

fn default_capacity() -> usize {
    64
}

fn default_group_direction() -> Direction {
    Direction::Recv
}

fn default_steps() -> u64 {
    100
}

fn default_drain_per_step() -> usize {
    8
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path).map_err(|source| SimError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parses and validates a scenario.
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let scenario: Scenario = toml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let mut names = BTreeSet::new();
        let mut addresses = BTreeSet::new();
        for queue in &self.queues {
            if !names.insert(queue.name.as_str()) {
                return Err(SimError::DuplicateName(queue.name.clone()));
            }
            if !addresses.insert((queue.device, queue.id)) {
                return Err(SimError::DuplicateQueue {
                    device: queue.device,
                    id: queue.id,
                });
            }
        }
        for group in &self.groups {
            if !names.insert(group.name.as_str()) {
                return Err(SimError::DuplicateName(group.name.clone()));
            }
            if let Some(missing) = group
                .members
                .iter()
                .find(|member| self.queue(member).is_none())
            {
                return Err(SimError::UnknownName(missing.clone()));
            }
        }
        for binding in &self.bindings {
            for name in [&binding.from, &binding.to] {
                if !names.contains(name.as_str()) {
                    return Err(SimError::UnknownName(name.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|queue| queue.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&GroupSpec> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// Entity key declared under `name`, queue or group.
    pub fn key_of(&self, name: &str) -> Option<EntityKey> {
        self.queue(name)
            .map(QueueSpec::key)
            .or_else(|| self.group(name).map(GroupSpec::key))
    }
}
