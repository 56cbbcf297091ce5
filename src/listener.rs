//! Local fan-out of [`LeadershipEvent`]s to in-process subscribers.

use crate::model::LeadershipEvent;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// A local subscriber to leadership changes.
///
/// Delivery may occur on the dispatcher thread; implementations must be
/// non-blocking or accept delivery delay.
pub trait LeadershipEventListener: Send + Sync {
    fn leadership_event(&self, event: &LeadershipEvent);
}

/// Registry of local listeners. `add`/`remove` are idempotent; dispatch
/// invokes every current listener in registration order and isolates
/// one listener's panic from the rest.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn LeadershipEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn LeadershipEventListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LeadershipEventListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Fan out `event` to every current listener. A listener that panics
    /// is logged and does not prevent delivery to the remaining ones.
    pub fn dispatch(&self, event: &LeadershipEvent) {
        // Snapshot under the lock, then dispatch outside of it: a
        // listener calling back into add_listener/remove_listener must
        // not deadlock against this read lock.
        let snapshot = self.listeners.read().clone();
        for listener in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| listener.leadership_event(event)));
            if result.is_err() {
                error!(topic = %event.subject.topic, "leadership event listener panicked");
            }
        }
    }
}
