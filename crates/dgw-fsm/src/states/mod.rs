//! State behaviors, one stateless unit struct per state.

mod error;
mod full;
mod idle;
mod peek;
mod push;
mod try_push;
mod wait_push;

pub use error::ErrorState;
pub use full::FullState;
pub use idle::{drain_resolved_front, GroupIdleState, IdleState};
pub use peek::PeekState;
pub use push::PushState;
pub use try_push::TryPushState;
pub use wait_push::WaitPushState;
