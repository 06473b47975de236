//! Middleware run once when shared state is created.
//!
//! Each middleware may replace the starting value and register filters that
//! every later transition passes through, in installation order.

mod logger;
mod pipeline;

pub use logger::{create_logger, LogSink, Logger};
pub use pipeline::{apply, filter, from_fn, Filter, FilterChain, Middleware};
