//! Shared state and component bindings.
//!
//! [`create_state`] builds a [`SharedState`] from an initial value and a list
//! of middleware. Components call [`SharedState::bind`] to get a [`Binding`]
//! holding a local copy that follows every commit; code outside components
//! uses `dispatch`, `on_change` and `get_state` directly.

mod binding;
mod next;
mod shared;

pub use binding::{Binding, BindingId, Lifecycle, Setter};
pub use next::Next;
pub use shared::{create_state, SharedState, StateBuilder};
