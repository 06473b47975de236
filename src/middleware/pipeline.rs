use crate::channel::Channel;
use crate::error::Result;
use tracing::debug;

/// A stage of the filter chain.
pub type Filter<T> = Box<dyn Fn(T) -> T + Send + Sync>;

/// Ordered filters applied to every committed transition.
///
/// Filters can only be registered while middleware is being installed; the
/// shared state owns the chain immutably afterwards.
pub struct FilterChain<T> {
    filters: Vec<Filter<T>>,
}

impl<T> FilterChain<T> {
    pub(crate) fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Append a filter to the end of the chain.
    pub fn register<F>(&mut self, filter: F)
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.filters.push(Box::new(filter));
    }

    /// Run `value` through every filter, first registered first.
    pub fn apply(&self, value: T) -> T {
        self.filters.iter().fold(value, |value, filter| filter(value))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// A construction-time stage of shared state.
///
/// `install` runs exactly once. It receives the value produced by the previous
/// stage, may register filters and channel listeners, and returns the value
/// handed to the next stage. An error aborts construction.
pub trait Middleware<T> {
    fn install(
        self: Box<Self>,
        initial: T,
        filters: &mut FilterChain<T>,
        channel: &Channel<T>,
    ) -> Result<T>;

    /// Name used in log output.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T, F> Middleware<T> for F
where
    F: FnOnce(T, &mut FilterChain<T>, &Channel<T>) -> Result<T>,
{
    fn install(
        self: Box<Self>,
        initial: T,
        filters: &mut FilterChain<T>,
        channel: &Channel<T>,
    ) -> Result<T> {
        (*self)(initial, filters, channel)
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}

/// Box a closure as a middleware.
pub fn from_fn<T, F>(f: F) -> Box<dyn Middleware<T>>
where
    T: 'static,
    F: FnOnce(T, &mut FilterChain<T>, &Channel<T>) -> Result<T> + 'static,
{
    Box::new(f)
}

/// A middleware that only registers `f` as a filter.
///
/// ```
/// use anystate::{create_state, middleware};
///
/// let state = create_state(1, vec![middleware::filter(|n: i32| n * 2)]).unwrap();
/// state.dispatch(5);
/// assert_eq!(state.get_state(), 10);
/// ```
pub fn filter<T, F>(f: F) -> Box<dyn Middleware<T>>
where
    T: 'static,
    F: Fn(T) -> T + Send + Sync + 'static,
{
    from_fn(move |initial: T, filters: &mut FilterChain<T>, _: &Channel<T>| {
        filters.register(f);
        Ok(initial)
    })
}

/// Install `middlewares` in order, threading the starting value through them.
///
/// Returns the adopted starting value and the assembled filter chain.
pub fn apply<T: 'static>(
    initial: T,
    middlewares: Vec<Box<dyn Middleware<T>>>,
    channel: &Channel<T>,
) -> Result<(T, FilterChain<T>)> {
    let mut filters = FilterChain::new();
    let mut current = initial;

    for middleware in middlewares {
        let name = middleware.name();
        current = match middleware.install(current, &mut filters, channel) {
            Ok(value) => value,
            Err(err) => {
                debug!(middleware = name, error = %err, "middleware install failed");
                return Err(err);
            }
        };
        debug!(middleware = name, filters = filters.len(), "middleware installed");
    }

    Ok((current, filters))
}
