//! Retry, backoff and failure escalation for the store and the broker link.

mod backoff;
mod store;

pub use backoff::{Backoff, RetryPolicy, BACKOFF_FACTOR};
pub use store::{StoreGuard, StoreHealth, StoreSource};
