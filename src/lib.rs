//! # anystate
//!
//! Shared state for UI components: one value, read and written by any number
//! of independent consumers.
//!
//! ## Pieces
//!
//! - [`Channel`] - typed, synchronous publish/subscribe with per-listener
//!   panic isolation
//! - [`Next`] - a proposed next state, either a value or a pure update
//!   function of the previous one
//! - [`middleware`] - construction-time stages that can replace the starting
//!   value and register filters for every later transition
//! - [`persist`] - a middleware that restores and saves state through a
//!   pluggable backend, plus key/value backends for it
//! - [`SharedState`] - the accessor tying it together, with component
//!   [`Binding`]s and imperative `dispatch` / `on_change` / `get_state`
//!
//! ## Example
//!
//! ```
//! use anystate::middleware::create_logger;
//! use anystate::persist::{create_persistent, local_store, MemoryStore};
//! use anystate::StateBuilder;
//!
//! let storage = MemoryStore::new();
//! let count = StateBuilder::new(0u32)
//!     .with(create_logger("count"))
//!     .with(create_persistent(local_store(storage.clone(), "count")))
//!     .build()
//!     .unwrap();
//!
//! let view = count.bind();
//! let (value, set_value) = view.state();
//! assert_eq!(value, 0);
//!
//! set_value.update(|n| n + 1);
//! assert_eq!(view.value(), 1);
//! assert_eq!(count.get_state(), 1);
//! ```

pub mod channel;
pub mod error;
pub mod middleware;
pub mod persist;
pub mod state;

// Re-export main types for convenience
pub use channel::{Channel, Subscription};
pub use error::{Error, Result, StorageError};
pub use middleware::{FilterChain, Middleware};
pub use state::{create_state, Binding, Lifecycle, Next, Setter, SharedState, StateBuilder};
