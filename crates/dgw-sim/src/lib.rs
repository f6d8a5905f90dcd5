//! Scenario-driven outer scheduling loop for the dispatcher.
//!
//! A [`Scenario`] describes queues, groups and bindings in TOML; [`SimLoop`]
//! feeds inbound traffic, emulates consumers, answers dynamic decisions and
//! pushes every producer once per step over in-memory hardware.

pub mod error;
pub mod report;
pub mod scenario;
pub mod sim;

pub use error::SimError;
pub use report::{DataObjReport, EntityReport, SimReport};
pub use scenario::{BindingSpec, GroupSpec, QueueSpec, Scenario};
pub use sim::{SimLoop, StepSummary};
