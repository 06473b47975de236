use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::debug;

use super::next::Next;
use super::shared::SharedState;
use crate::channel::Subscription;

/// Identifies one [`Binding`] of a shared state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

/// Binding lifecycle notifications, delivered on
/// [`SharedState::lifecycle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Mounted(BindingId),
    Unmounted(BindingId),
}

/// A binding's copy of the state, the value a component renders from.
struct Local<T> {
    value: RwLock<T>,
    revision: AtomicU64,
    seen: AtomicU64,
}

impl<T> Local<T> {
    fn store(&self, value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
        self.revision.fetch_add(1, Ordering::SeqCst);
    }
}

/// A component's view of shared state, the equivalent of calling the hook
/// inside a component.
///
/// Creating a binding mounts it: it copies the committed value into its local
/// cell and mirrors every later commit there. Dropping it unmounts: the
/// mirror is removed and will never be called again.
pub struct Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: BindingId,
    state: SharedState<T>,
    local: Arc<Local<T>>,
    subscription: Option<Subscription>,
}

impl<T> Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(super) fn mount(state: &SharedState<T>) -> Self {
        // No commit can land between the snapshot and the subscription.
        let _commit = state.inner.commit.lock();

        let id = BindingId(state.inner.next_binding.fetch_add(1, Ordering::SeqCst));
        let local = Arc::new(Local {
            value: RwLock::new(state.get_state()),
            revision: AtomicU64::new(0),
            seen: AtomicU64::new(0),
        });

        let mirror = Arc::clone(&local);
        let subscription = state
            .channel()
            .subscribe(move |value: &T| mirror.store(value.clone()));

        debug!(binding = id.0, "binding mounted");
        state.lifecycle().emit(&Lifecycle::Mounted(id));

        Self {
            id,
            state: state.clone(),
            local,
            subscription: Some(subscription),
        }
    }

    /// This binding's identifier, as reported on [`SharedState::lifecycle`].
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// The value this binding last observed.
    pub fn value(&self) -> T {
        self.local
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call `f` with a snapshot of the local value. `f` may set or dispatch.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value())
    }

    /// The `(value, setter)` pair a component renders with.
    pub fn state(&self) -> (T, Setter<T>) {
        (self.value(), self.setter())
    }

    pub fn setter(&self) -> Setter<T> {
        Setter {
            state: self.state.clone(),
            local: Arc::downgrade(&self.local),
        }
    }

    /// How many times the local value has been written since mount.
    pub fn revision(&self) -> u64 {
        self.local.revision.load(Ordering::SeqCst)
    }

    /// Whether the local value changed since the last call. Hosts poll this to
    /// decide when to re-render.
    pub fn take_changed(&self) -> bool {
        let revision = self.local.revision.load(Ordering::SeqCst);
        self.local.seen.swap(revision, Ordering::SeqCst) != revision
    }

    /// The shared state this binding belongs to.
    pub fn shared(&self) -> &SharedState<T> {
        &self.state
    }
}

impl<T> Drop for Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        debug!(binding = self.id.0, "binding unmounted");
        self.state.lifecycle().emit(&Lifecycle::Unmounted(self.id));
    }
}

impl<T> fmt::Debug for Binding<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("value", &self.value())
            .field("revision", &self.revision())
            .finish()
    }
}

/// Writes to shared state on behalf of a binding.
///
/// Same effect as [`SharedState::dispatch`], except the binding's own local
/// value is updated before listeners are notified.
pub struct Setter<T> {
    state: SharedState<T>,
    local: Weak<Local<T>>,
}

impl<T> Setter<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Propose a new state. Called from a listener, the commit is queued
    /// like any other nested dispatch.
    pub fn set(&self, next: impl Into<Next<T>>) {
        let local = Weak::clone(&self.local);
        self.state.commit(
            next.into(),
            Some(Box::new(move |committed: &T| {
                if let Some(local) = local.upgrade() {
                    local.store(committed.clone());
                }
            })),
        );
    }

    /// Shorthand for `set(Next::update(f))`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.set(Next::update(f));
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            local: Weak::clone(&self.local),
        }
    }
}
