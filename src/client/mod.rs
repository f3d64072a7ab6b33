//! The `client` module defines the representation of a subscriber connected
//! to the hub.
//!
//! It provides the `Subscriber` struct, which encapsulates the state of a
//! single SSE connection: its identifier, requested selectors, granted scope
//! and the bounded channel updates are pushed through.

pub mod pubsub_client;
pub use pubsub_client::{Delivery, Subscriber, SubscriberId, SubscriptionFilter};
