use std::sync::Arc;

use tracing::debug;

use crate::channel::Channel;
use crate::error::Result;
use crate::middleware::{FilterChain, Middleware};

/// A synchronous backend that stores one value.
///
/// `get` returns `None` when nothing is stored, so a stored `0`, `false` or
/// empty string is still a value.
pub trait PersistentEngine<T> {
    fn get(&self) -> Option<T>;
    fn set(&self, value: &T);
}

impl<T, E> PersistentEngine<T> for Arc<E>
where
    E: PersistentEngine<T> + ?Sized,
{
    fn get(&self) -> Option<T> {
        (**self).get()
    }

    fn set(&self, value: &T) {
        (**self).set(value)
    }
}

/// Persistence middleware. See [`create_persistent`].
pub struct Persist<E> {
    engine: Option<E>,
}

/// Persist state through `engine`.
///
/// Passing `None` (for example because [`local_store`](crate::persist::local_store)
/// found storage unavailable) yields an inert middleware: the initial value is
/// kept and no filter is registered.
pub fn create_persistent<E>(engine: Option<E>) -> Persist<E> {
    Persist { engine }
}

impl<T, E> Middleware<T> for Persist<E>
where
    T: 'static,
    E: PersistentEngine<T> + Send + Sync + 'static,
{
    fn install(
        self: Box<Self>,
        initial: T,
        filters: &mut FilterChain<T>,
        _channel: &Channel<T>,
    ) -> Result<T> {
        let Some(engine) = self.engine else {
            debug!("no persistence engine, keeping initial state");
            return Ok(initial);
        };

        let stored = engine.get();
        debug!(restored = stored.is_some(), "persistence installed");

        filters.register(move |value: T| {
            engine.set(&value);
            value
        });
        Ok(stored.unwrap_or(initial))
    }

    fn name(&self) -> &'static str {
        "persist"
    }
}
