//! Fixed-window rate limiting on top of the wire client.

mod key;
mod limiter;
mod memory;
mod policy;
mod store;

pub use key::{CounterKey, DEFAULT_KEY_PREFIX};
pub use limiter::{LimitError, RateLimiter, StoreFailure};
pub use memory::{CallCounts, MemorySession, MemoryStore};
pub use policy::{Admission, Decision, FailureMode, Policy};
pub use store::{CounterStore, HandshakeError, StoreConnector, WireConnector};
