//! The `broker` module is the hub's core: topic matching, the subscriber
//! registry and the dispatcher that fans updates out.

pub mod engine;
pub mod events;
pub mod hub;
pub mod message;
pub mod registry;
pub mod topic;

pub use engine::{DispatchOutcome, Dispatcher};
pub use hub::Hub;
pub use message::{BacklogEntry, Update};
pub use registry::SubscriptionRegistry;
pub use topic::TopicSelector;
