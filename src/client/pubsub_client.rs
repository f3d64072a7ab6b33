//! Subscriber representation
//!
//! `Subscriber` models one live SSE connection. It holds the sending side of
//! a bounded per-connection queue the dispatcher pushes into, the compiled
//! filter deciding which updates the connection may see, and a cancellation
//! token the connection task watches.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Scope;
use crate::broker::message::{BacklogEntry, Update};
use crate::broker::topic::TopicSelector;

pub type SubscriberId = String;

/// What a subscription asked for and what its JWT allows.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub selectors: Vec<TopicSelector>,
    /// Selectors from the JWT `subscribe` claim; empty means public only.
    pub scope: Scope,
}

impl SubscriptionFilter {
    pub fn new(selectors: Vec<TopicSelector>, scope: Scope) -> Self {
        Self { selectors, scope }
    }

    /// Some topic of `update` matches some requested selector.
    pub fn is_interested(&self, update: &Update) -> bool {
        self.matches_topics(&update.topics)
    }

    pub fn matches_topics(&self, topics: &[String]) -> bool {
        topics
            .iter()
            .any(|topic| self.selectors.iter().any(|s| s.matches(topic)))
    }

    /// Public updates always pass; private ones need a scope match on a topic.
    pub fn is_authorized(&self, update: &Update) -> bool {
        !update.private || self.scope.matches_any(&update.topics)
    }

    pub fn can_receive(&self, update: &Update) -> bool {
        self.is_interested(update) && self.is_authorized(update)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue is full: the consumer is too slow to keep.
    Full,
    /// The receiving side is gone.
    Closed,
}

#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    /// Raw selectors as requested, in request order.
    pub topics: Vec<String>,
    pub filter: SubscriptionFilter,
    /// The JWT `mercure.payload`, if any.
    pub payload: Option<Value>,
    pub last_event_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    sender: Sender<BacklogEntry>,
    cancel: CancellationToken,
}

impl Subscriber {
    /// Create a subscriber and the receiving side of its delivery queue.
    ///
    /// The cancellation token is a child of `shutdown`, so cancelling the
    /// hub cancels every connection.
    pub fn new(
        topics: Vec<String>,
        scope: Scope,
        payload: Option<Value>,
        last_event_id: Option<String>,
        capacity: usize,
        shutdown: &CancellationToken,
    ) -> (Self, Receiver<BacklogEntry>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let selectors = topics.iter().map(|t| TopicSelector::compile(t)).collect();
        let subscriber = Self {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            filter: SubscriptionFilter::new(selectors, scope),
            topics,
            payload,
            last_event_id,
            connected_at: Utc::now(),
            sender,
            cancel: shutdown.child_token(),
        };
        (subscriber, receiver)
    }

    /// Push without waiting; never blocks the dispatcher.
    pub fn deliver(&self, entry: &BacklogEntry) -> Delivery {
        match self.sender.try_send(entry.clone()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
