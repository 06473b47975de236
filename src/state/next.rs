use std::fmt;

/// A proposed next state.
///
/// `Update` is a pure replacement: it receives the previous value and returns a
/// whole new one. There is no in-place mutation of the committed value.
pub enum Next<T> {
    /// Replace the state with this value.
    Value(T),
    /// Compute the next state from the previous one.
    Update(Box<dyn FnOnce(&T) -> T + Send>),
}

impl<T> Next<T> {
    /// Build an `Update` from a closure.
    pub fn update<F>(f: F) -> Self
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        Next::Update(Box::new(f))
    }

    /// Compute the next value against `previous`.
    pub fn resolve(self, previous: &T) -> T {
        match self {
            Next::Value(value) => value,
            Next::Update(f) => f(previous),
        }
    }
}

impl<T> From<T> for Next<T> {
    fn from(value: T) -> Self {
        Next::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Next<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Next::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Next::Update(_) => f.write_str("Update(..)"),
        }
    }
}
