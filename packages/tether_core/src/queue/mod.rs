//! Work queues shared with the embedded polling script.
//!
//! Two flavors with deliberately different consumption rules:
//!
//! - [`FireAndForgetQueue`]: the consumer's poll takes everything (pop-all).
//! - [`CorrelatedQueue`]: polls only peek; an entry leaves the pending list
//!   when its response is matched or its waiter times out, never otherwise.

mod correlated;
mod fire_and_forget;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use correlated::{CorrelatedQueue, LookupOutcome, LookupResponse, PendingLookup};
pub use fire_and_forget::{FireAndForgetQueue, TeleportCommand, TeleportTarget};

/// Lock ignoring poison. No critical section leaves the queue half-updated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
