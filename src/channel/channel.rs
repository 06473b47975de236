use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::{debug, error, trace};

/// A registered callback. Cloning the `Arc` keeps its identity, which is what
/// [`Channel::off_listener`] matches on.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifies one registration on a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Outcome of a single [`Channel::emit`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Emission {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked. Their panics were caught and logged.
    pub panicked: usize,
}

struct Registry<E> {
    next_id: u64,
    entries: Vec<(ListenerId, Listener<E>)>,
}

/// A typed publish/subscribe channel.
///
/// Handles are cheap to clone and all clones share the same registrations.
pub struct Channel<E> {
    registry: Arc<RwLock<Registry<E>>>,
}

impl<E: 'static> Channel<E> {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener. Registering the same listener twice produces two
    /// registrations, and it will be invoked twice per emission.
    pub fn on(&self, listener: Listener<E>) -> ListenerId {
        let mut registry = self.write();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push((id, listener));
        debug!(listener = id.0, total = registry.entries.len(), "listener registered");
        id
    }

    /// Remove the registration with the given id.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.write();
        match registry.entries.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                registry.entries.remove(index);
                debug!(listener = id.0, total = registry.entries.len(), "listener removed");
                true
            }
            None => false,
        }
    }

    /// Remove the first registration of `listener`, compared by pointer.
    pub fn off_listener(&self, listener: &Listener<E>) -> bool {
        let mut registry = self.write();
        let position = registry
            .entries
            .iter()
            .position(|(_, entry)| Arc::ptr_eq(entry, listener));
        match position {
            Some(index) => {
                let (id, _) = registry.entries.remove(index);
                debug!(listener = id.0, total = registry.entries.len(), "listener removed");
                true
            }
            None => false,
        }
    }

    /// Register a closure and get back a guard that deregisters it on drop.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.on(Arc::new(callback));
        let registry = Arc::downgrade(&self.registry);
        Subscription::new(move || remove_from(&registry, id))
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// The registration list is snapshotted before delivery, so listeners may
    /// subscribe or unsubscribe from inside a callback; the change applies to
    /// the next emission.
    pub fn emit(&self, event: &E) -> Emission {
        let listeners: Vec<Listener<E>> = self
            .read()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut emission = Emission::default();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => emission.delivered += 1,
                Err(payload) => {
                    emission.panicked += 1;
                    error!(
                        panic = panic_message(&*payload),
                        "listener panicked during emission"
                    );
                }
            }
        }
        trace!(
            delivered = emission.delivered,
            panicked = emission.panicked,
            "emission finished"
        );
        emission
    }

    /// Number of active registrations.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.write().entries.clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<E>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<E>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: 'static> Default for Channel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Channel<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E> fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self
            .registry
            .read()
            .map(|registry| registry.entries.len())
            .unwrap_or_default();
        f.debug_struct("Channel").field("listeners", &listeners).finish()
    }
}

fn remove_from<E>(registry: &Weak<RwLock<Registry<E>>>, id: ListenerId) {
    if let Some(registry) = registry.upgrade() {
        let mut registry = registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.entries.retain(|(entry, _)| *entry != id);
        debug!(listener = id.0, total = registry.entries.len(), "listener unsubscribed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// RAII handle for a channel registration.
///
/// Dropping the handle deregisters the listener. Use [`Subscription::detach`]
/// to keep it registered for the lifetime of the channel.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Deregister now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keep the listener registered after this handle goes away.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
