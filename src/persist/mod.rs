//! Optional persistence for shared state.
//!
//! [`create_persistent`] turns a [`PersistentEngine`] into a middleware that
//! adopts a previously saved value at startup and saves every committed value.
//! [`local_store`] builds an engine on top of any [`KeyValueStore`].

mod local;
mod persistent;

pub use local::{local_store, FileStore, KeyValueStore, LocalStore, MemoryStore, PROBE_KEY};
pub use persistent::{create_persistent, Persist, PersistentEngine};
