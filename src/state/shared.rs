use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use super::binding::{Binding, Lifecycle};
use super::next::Next;
use crate::channel::{Channel, Subscription};
use crate::error::Result;
use crate::middleware::{apply, FilterChain, Middleware};

/// Runs against the committed value just before it is emitted.
pub(super) type BeforeEmit<T> = Box<dyn FnOnce(&T) + Send>;

struct Pending<T> {
    next: Next<T>,
    before_emit: Option<BeforeEmit<T>>,
}

/// Dispatches made while a commit is running on the owning thread.
pub(super) struct CommitQueue<T> {
    draining: bool,
    pending: VecDeque<Pending<T>>,
}

pub(super) struct Inner<T> {
    value: RwLock<T>,
    filters: FilterChain<T>,
    // Held for a whole drain. Re-entrant so listeners and updates may dispatch.
    pub(super) commit: ReentrantMutex<RefCell<CommitQueue<T>>>,
    changes: Channel<T>,
    lifecycle: Channel<Lifecycle>,
    commits: AtomicU64,
    pub(super) next_binding: AtomicU64,
}

/// Resets the queue when a drain ends, including by panic.
struct Draining<'a, T>(&'a RefCell<CommitQueue<T>>);

impl<T> Drop for Draining<'_, T> {
    fn drop(&mut self) {
        let mut queue = self.0.borrow_mut();
        queue.draining = false;
        queue.pending.clear();
    }
}

/// One piece of state shared by any number of bindings and listeners.
///
/// `SharedState` is a handle: clones refer to the same value, filter chain and
/// channels. Every write goes through one commit path that resolves the
/// proposed value, runs it through the filter chain, stores it and emits it to
/// listeners before returning.
///
/// A dispatch made from inside a listener, an update function or a filter is
/// queued and committed once the running emission has reached every
/// listener, so all listeners observe commits in the same order.
///
/// # Example
///
/// ```
/// use anystate::{create_state, Next};
///
/// let counter = create_state(0, Vec::new()).unwrap();
/// let _log = counter.on_change(|n| println!("count = {n}"));
///
/// counter.dispatch(5);
/// counter.dispatch(Next::update(|n: &i32| n + 1));
/// assert_eq!(counter.get_state(), 6);
/// ```
pub struct SharedState<T> {
    pub(super) inner: Arc<Inner<T>>,
}

impl<T> SharedState<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Shared state with no middleware.
    pub fn new(initial: T) -> Self {
        Self::from_parts(initial, FilterChain::new(), Channel::new())
    }

    /// Start a [`StateBuilder`].
    pub fn builder(initial: T) -> StateBuilder<T> {
        StateBuilder::new(initial)
    }

    fn from_parts(initial: T, filters: FilterChain<T>, changes: Channel<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(initial),
                filters,
                commit: ReentrantMutex::new(RefCell::new(CommitQueue {
                    draining: false,
                    pending: VecDeque::new(),
                })),
                changes,
                lifecycle: Channel::new(),
                commits: AtomicU64::new(0),
                next_binding: AtomicU64::new(0),
            }),
        }
    }

    /// Propose a new state: a plain value or a [`Next::update`].
    pub fn dispatch(&self, next: impl Into<Next<T>>) {
        self.commit(next.into(), None);
    }

    /// Shorthand for `dispatch(Next::update(f))`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.dispatch(Next::update(f));
    }

    /// The most recently committed value.
    pub fn get_state(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call `f` with a snapshot of the committed value. `f` may dispatch.
    pub fn with_state<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.get_state())
    }

    /// Listen for committed values.
    ///
    /// The listener stays registered only while the returned [`Subscription`]
    /// is alive: `let _ = state.on_change(..)` unsubscribes at once. Call
    /// [`Subscription::detach`] for a permanent listener.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(callback)
    }

    /// Bind a component to this state. See [`Binding`].
    pub fn bind(&self) -> Binding<T> {
        Binding::mount(self)
    }

    /// The raw change channel.
    pub fn channel(&self) -> &Channel<T> {
        &self.inner.changes
    }

    /// Mount and unmount notifications for bindings.
    pub fn lifecycle(&self) -> &Channel<Lifecycle> {
        &self.inner.lifecycle
    }

    /// Number of listeners on the change channel, bindings included.
    pub fn listener_count(&self) -> usize {
        self.inner.changes.len()
    }

    /// Number of commits since construction.
    pub fn commits(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// The only write path.
    ///
    /// The outermost call on a thread drains the queue; nested calls enqueue
    /// and return.
    pub(super) fn commit(&self, next: Next<T>, before_emit: Option<BeforeEmit<T>>) {
        let guard = self.inner.commit.lock();
        {
            let mut queue = guard.borrow_mut();
            queue.pending.push_back(Pending { next, before_emit });
            if queue.draining {
                trace!(queued = queue.pending.len(), "dispatch queued behind running commit");
                return;
            }
            queue.draining = true;
        }

        let _draining = Draining(&*guard);
        loop {
            let pending = guard.borrow_mut().pending.pop_front();
            match pending {
                Some(pending) => self.commit_one(pending),
                None => break,
            }
        }
    }

    /// Resolve, filter, store, run `before_emit`, emit. No lock on the value
    /// is held while user code runs.
    fn commit_one(&self, pending: Pending<T>) {
        let Pending { next, before_emit } = pending;

        let previous = self.get_state();
        let value = self.inner.filters.apply(next.resolve(&previous));
        *self.inner.value.write().unwrap_or_else(PoisonError::into_inner) = value.clone();
        let sequence = self.inner.commits.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(before_emit) = before_emit {
            before_emit(&value);
        }
        let emission = self.inner.changes.emit(&value);
        trace!(
            sequence,
            delivered = emission.delivered,
            panicked = emission.panicked,
            "state committed"
        );
    }
}

impl<T> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SharedState");
        match self.inner.value.try_read() {
            Ok(value) => debug.field("value", &*value),
            Err(_) => debug.field("value", &"<locked>"),
        };
        debug
            .field("filters", &self.inner.filters.len())
            .field("listeners", &self.inner.changes.len())
            .finish()
    }
}

/// Create shared state, installing `middlewares` in order.
///
/// The first middleware error is returned and no state is created.
pub fn create_state<T>(
    initial: T,
    middlewares: Vec<Box<dyn Middleware<T>>>,
) -> Result<SharedState<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let changes = Channel::new();
    let count = middlewares.len();
    let (initial, filters) = apply(initial, middlewares, &changes)?;
    debug!(middlewares = count, filters = filters.len(), "shared state created");
    Ok(SharedState::from_parts(initial, filters, changes))
}

/// Fluent construction of [`SharedState`].
///
/// ```
/// use anystate::persist::{create_persistent, local_store, MemoryStore};
/// use anystate::StateBuilder;
///
/// let state = StateBuilder::new(0u32)
///     .with(create_persistent(local_store(MemoryStore::new(), "count")))
///     .build()
///     .unwrap();
/// state.dispatch(3);
/// assert_eq!(state.get_state(), 3);
/// ```
pub struct StateBuilder<T> {
    initial: T,
    middlewares: Vec<Box<dyn Middleware<T>>>,
}

impl<T> StateBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start from `initial` with no middleware.
    pub fn new(initial: T) -> Self {
        Self {
            initial,
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware.
    pub fn with<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<T> + 'static,
    {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// Append an already boxed middleware, such as one from
    /// [`middleware::filter`](crate::middleware::filter).
    pub fn with_boxed(mut self, middleware: Box<dyn Middleware<T>>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Install the middleware in order and create the state.
    pub fn build(self) -> Result<SharedState<T>> {
        create_state(self.initial, self.middlewares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::middleware::{filter, from_fn};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter {
        count: i32,
    }

    #[test]
    fn dispatch_commits_and_emits() {
        let state = SharedState::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = state.on_change(move |n| seen_clone.lock().unwrap().push(*n));

        state.dispatch(1);
        state.dispatch(2);

        assert_eq!(state.get_state(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(state.commits(), 2);
    }

    #[test]
    fn function_dispatch_sees_previous_state() {
        let state = SharedState::new(Counter { count: 0 });
        state.dispatch(Next::update(|prev: &Counter| Counter {
            count: prev.count + 1,
        }));
        assert_eq!(state.get_state(), Counter { count: 1 });

        state.update(|prev| Counter {
            count: prev.count * 10,
        });
        assert_eq!(state.with_state(|c| c.count), 10);
    }

    #[test]
    fn getter_matches_fold_over_dispatches() {
        let state = create_state(1, vec![filter(|n: i64| n.min(1_000))]).unwrap();
        let mut expected = 1i64;

        for step in 0..20i64 {
            if step % 3 == 0 {
                state.dispatch(step);
                expected = step.min(1_000);
            } else {
                state.update(move |prev| prev * 2 + step);
                expected = (expected * 2 + step).min(1_000);
            }
            assert_eq!(state.get_state(), expected);
        }
    }

    #[test]
    fn doubling_filter_applies_to_dispatch_but_not_initial() {
        let state = create_state(1, vec![filter(|n: i32| n * 2)]).unwrap();
        assert_eq!(state.get_state(), 1);
        state.dispatch(5);
        assert_eq!(state.get_state(), 10);
    }

    #[test]
    fn listeners_receive_filtered_value() {
        let state = create_state(0, vec![filter(|n: i32| n + 100)]).unwrap();
        let last = Arc::new(Mutex::new(None));
        let last_clone = last.clone();
        let _sub = state.on_change(move |n| *last_clone.lock().unwrap() = Some(*n));

        state.dispatch(1);
        assert_eq!(*last.lock().unwrap(), Some(101));
    }

    #[test]
    fn middleware_error_aborts_creation() {
        let result = create_state(
            0,
            vec![from_fn(|_: i32, _: &mut FilterChain<i32>, _: &Channel<i32>| {
                Err(Error::middleware("validate", "initial out of range"))
            })],
        );
        assert!(matches!(result, Err(Error::Middleware { name, .. }) if name == "validate"));
    }

    #[test]
    fn unsubscribed_listener_is_not_called_again() {
        let state = SharedState::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let sub = state.on_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        state.dispatch(1);
        sub.unsubscribe();
        state.dispatch(2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.listener_count(), 0);
    }

    #[test]
    fn discarded_subscription_unsubscribes_at_once() {
        let state = SharedState::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let _ = state.on_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        state.dispatch(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.listener_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let state = SharedState::new(0);
        let _bad = state.on_change(|_| panic!("listener failure"));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let _good = state.on_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        state.dispatch(1);
        state.dispatch(2);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.get_state(), 2);
    }

    #[test]
    fn listener_may_dispatch_reentrantly() {
        let state = SharedState::new(0);
        let inner = state.clone();
        let _clamp = state.on_change(move |n| {
            if *n > 10 {
                inner.dispatch(10);
            }
        });

        state.dispatch(50);
        assert_eq!(state.get_state(), 10);
        assert_eq!(state.commits(), 2);
    }

    #[test]
    fn nested_dispatch_reaches_later_listeners_in_commit_order() {
        let state = SharedState::new(0);
        let inner = state.clone();
        let clamp_seen = Arc::new(Mutex::new(Vec::new()));
        let clamp_seen_clone = clamp_seen.clone();
        let _clamp = state.on_change(move |n| {
            clamp_seen_clone.lock().unwrap().push(*n);
            if *n > 10 {
                inner.dispatch(10);
            }
        });

        let later_seen = Arc::new(Mutex::new(Vec::new()));
        let later_seen_clone = later_seen.clone();
        let _later = state.on_change(move |n| later_seen_clone.lock().unwrap().push(*n));
        let binding = state.bind();

        state.dispatch(50);

        assert_eq!(*clamp_seen.lock().unwrap(), vec![50, 10]);
        assert_eq!(*later_seen.lock().unwrap(), vec![50, 10]);
        assert_eq!(binding.value(), 10);
        assert_eq!(binding.revision(), 2);
        assert_eq!(state.get_state(), 10);
    }

    #[test]
    fn update_function_may_dispatch() {
        let state = SharedState::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = state.on_change(move |n| seen_clone.lock().unwrap().push(*n));

        let (done, finished) = mpsc::channel();
        let worker = state.clone();
        thread::spawn(move || {
            let inner = worker.clone();
            worker.update(move |n| {
                inner.dispatch(100);
                n + 1
            });
            done.send(()).unwrap();
        });
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("dispatch from an update function deadlocked");

        assert_eq!(*seen.lock().unwrap(), vec![1, 100]);
        assert_eq!(state.get_state(), 100);
    }

    #[test]
    fn with_state_callback_may_dispatch() {
        let state = SharedState::new(1);
        let (done, finished) = mpsc::channel();
        let worker = state.clone();
        thread::spawn(move || {
            worker.with_state(|n| worker.dispatch(n + 1));
            done.send(()).unwrap();
        });
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("dispatch from with_state deadlocked");

        assert_eq!(state.get_state(), 2);
    }

    #[test]
    fn panicking_update_does_not_wedge_the_queue() {
        let state = SharedState::new(0);
        let worker = state.clone();
        let result = thread::spawn(move || worker.update(|_| panic!("update failure"))).join();
        assert!(result.is_err());

        state.dispatch(4);
        assert_eq!(state.get_state(), 4);
    }

    #[test]
    fn concurrent_dispatches_are_all_committed() {
        let state = SharedState::new(0usize);
        let emissions = Arc::new(AtomicUsize::new(0));
        let emissions_clone = emissions.clone();
        let _sub = state.on_change(move |_| {
            emissions_clone.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        state.update(|n| n + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(state.get_state(), 1_000);
        assert_eq!(emissions.load(Ordering::SeqCst), 1_000);
    }

    #[test]
    fn builder_installs_in_order() {
        let state = StateBuilder::new(2)
            .with_boxed(filter(|n: i32| n + 1))
            .with_boxed(filter(|n: i32| n * 3))
            .build()
            .unwrap();

        state.dispatch(1);
        assert_eq!(state.get_state(), 6);
    }

    #[test]
    fn debug_shows_value() {
        let state = SharedState::new(3);
        let text = format!("{state:?}");
        assert!(text.contains("value: 3"));
    }
}
