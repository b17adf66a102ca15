//! Listener registries and fan-out
//!
//! Dispatch iterates over a snapshot taken when the event is delivered, so a
//! listener may register or remove listeners (itself included) from inside a
//! callback. A panicking listener is isolated and reported back to the caller.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: u64,
    active: AtomicBool,
    callback: Callback<T>,
}

/// Ordered set of callbacks for one kind of event
pub struct ListenerRegistry<T> {
    next_id: AtomicU64,
    slots: Mutex<Vec<Arc<Slot<T>>>>,
}

/// A listener that panicked during dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener_id: u64,
    pub message: String,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Arc<Slot<T>>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a listener; the handle removes it again
    pub fn register<F>(self: &Arc<Self>, callback: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots().push(Arc::new(Slot {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        }));

        let registry: Weak<dyn Deregister> = Arc::downgrade(self) as Weak<dyn Deregister>;
        ListenerHandle { id, registry }
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Invoke every registered listener with `event`
    pub fn dispatch(&self, event: &T) -> Vec<ListenerFailure> {
        let snapshot: Vec<Arc<Slot<T>>> = self.slots().clone();
        let mut failures = Vec::new();

        for slot in snapshot {
            // Removed by an earlier listener of this same dispatch
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (slot.callback)(event))) {
                failures.push(ListenerFailure {
                    listener_id: slot.id,
                    message: panic_message(panic.as_ref()),
                });
            }
        }
        failures
    }

    pub fn clear(&self) {
        for slot in self.slots().drain(..) {
            slot.active.store(false, Ordering::Release);
        }
    }
}

trait Deregister: Send + Sync {
    fn deregister(&self, id: u64) -> bool;
}

impl<T: 'static> Deregister for ListenerRegistry<T> {
    fn deregister(&self, id: u64) -> bool {
        let mut slots = self.slots();
        match slots.iter().position(|slot| slot.id == id) {
            Some(index) => {
                let slot = slots.remove(index);
                slot.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

/// Deregistration handle returned by every `add_*_listener`
///
/// Dropping the handle leaves the listener registered; call
/// [`ListenerHandle::remove`] to deregister it.
#[must_use = "dropping the handle keeps the listener registered; call remove() to deregister"]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<dyn Deregister>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deregister the listener. Returns false if it was already gone.
    pub fn remove(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.deregister(self.id))
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}
