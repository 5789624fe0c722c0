// Event pipeline: every mutation commits its rows and session events in one
// store transaction, then fans the events out to live subscribers. Fan-out
// order matches commit order because both happen under the bus's write lock.

mod bus;
mod filter;

pub use bus::{EventBus, Subscription, DEFAULT_CAPACITY};
pub use filter::EventFilter;
