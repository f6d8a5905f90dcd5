//! Collaborator contracts for the data-gateway dispatcher.
//!
//! The dispatcher only depends on the hardware queue, routing table,
//! decision service, and statistics traits defined in this crate. Each
//! module also ships an in-memory implementation for tests and simulation.

pub mod decision;
pub mod error;
pub mod hardware;
pub mod routing;
pub mod stats;

pub use decision::{
    DecisionRequest, DecisionResponse, DecisionService, GroupChoice, GroupRequest,
    InMemoryDecisionService,
};
pub use error::{DecisionError, HalError};
pub use hardware::{Dequeued, HardwareCounters, HardwareQueue, InMemoryHardware, QueueStatus};
pub use routing::{BindRelation, RoutingTable};
pub use stats::{DispatchStats, NoopStatistics, Statistics};
