//! Per-entity state-machine dispatcher for hardware data buffers.
//!
//! Entities (device queues, tags, groups) each cycle through
//! `Idle -> Peek -> TryPush` on the producer side and
//! `WaitPush -> Push -> {Full, Error}` on the consumer side. The
//! [`Dispatcher`] owns the entity table and is driven cooperatively by an
//! outer scheduling loop; collaborators are borrowed per call through
//! [`Externals`].

pub mod config;
pub mod context;
pub mod data_obj;
pub mod dispatcher;
pub mod entity;
pub mod hooks;
pub mod registry;
pub mod states;
pub mod table;

pub use config::DispatchConfig;
pub use context::{Externals, Fsm, GlobalFlags};
pub use data_obj::{DataObjFactory, DataObjRef, DataObjStats};
pub use dispatcher::Dispatcher;
pub use entity::{Entity, EntityMaterial};
pub use hooks::{hooks_for, DstBuckets, EntityHooks, GroupHooks, SimpleHooks};
pub use registry::{StateBehavior, StateRegistry, Step};
pub use table::{EntityTable, Release};
