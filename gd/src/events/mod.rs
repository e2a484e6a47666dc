//! Event system for run observability
//!
//! Every significant transition in a run emits a [`PoolEvent`] to a
//! broadcast bus. Consumers (the CLI progress printer, tests) subscribe;
//! listeners are advisory and must not block the driver.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use types::PoolEvent;
