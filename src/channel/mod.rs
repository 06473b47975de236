//! Typed notification channels.
//!
//! A channel fans a payload out to every registered listener, synchronously and
//! in registration order. Listener panics are isolated so one failing listener
//! never drops delivery to the others.

mod channel;

pub use channel::{Channel, Emission, Listener, ListenerId, Subscription};
