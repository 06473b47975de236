use std::fmt::Debug;
use std::sync::Arc;

use tracing::info;

use super::pipeline::{FilterChain, Middleware};
use crate::channel::Channel;
use crate::error::Result;

/// Destination for logged transitions: `(prefix, value)`.
pub type LogSink<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

/// Observes every committed value and writes it to a sink.
///
/// Registers no filter and leaves the starting value alone.
pub struct Logger<T> {
    prefix: String,
    sink: LogSink<T>,
}

impl<T: 'static> Logger<T> {
    /// Log through an injected sink instead of `tracing`.
    pub fn with_sink<F>(prefix: impl Into<String>, sink: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        Self {
            prefix: prefix.into(),
            sink: Arc::new(sink),
        }
    }
}

impl<T: 'static> Middleware<T> for Logger<T> {
    fn install(
        self: Box<Self>,
        initial: T,
        _filters: &mut FilterChain<T>,
        channel: &Channel<T>,
    ) -> Result<T> {
        let Logger { prefix, sink } = *self;
        channel
            .subscribe(move |value: &T| sink(&prefix, value))
            .detach();
        Ok(initial)
    }

    fn name(&self) -> &'static str {
        "logger"
    }
}

/// A logger that reports each committed value at `info` level.
pub fn create_logger<T>(prefix: impl Into<String>) -> Logger<T>
where
    T: Debug + 'static,
{
    Logger::with_sink(prefix, |prefix: &str, value: &T| {
        info!(prefix, value = ?value, "state changed");
    })
}
