//! Subscription documents
//!
//! When the subscriptions feature is on, every connect and disconnect is
//! published as a private update whose topic is the subscription's IRI:
//!
//! ```text
//! /.well-known/mercure/subscriptions/{topic}/{subscriber}
//! ```
//!
//! with both segments percent-encoded. The same JSON-LD documents back the
//! subscriptions API.

use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;

use super::message::Update;
use crate::client::Subscriber;

pub const SUBSCRIPTIONS_PATH: &str = "/.well-known/mercure/subscriptions";
pub const JSONLD_CONTEXT: &str = "https://mercure.rocks/";

/// Percent-encode one path segment; a space becomes `%20`, never `+`.
pub fn encode_segment(raw: &str) -> String {
    // a literal `+` is already `%2B`, so any `+` left stands for a space
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub fn subscription_iri(topic: &str, subscriber: &str) -> String {
    format!(
        "{SUBSCRIPTIONS_PATH}/{}/{}",
        encode_segment(topic),
        encode_segment(subscriber)
    )
}

pub fn topic_collection_iri(topic: &str) -> String {
    format!("{SUBSCRIPTIONS_PATH}/{}", encode_segment(topic))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionDocument {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<&'static str>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub topic: String,
    pub subscriber: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SubscriptionDocument {
    pub fn new(subscriber: &Subscriber, topic: &str, active: bool) -> Self {
        Self {
            context: None,
            id: subscription_iri(topic, &subscriber.id),
            kind: "Subscription",
            topic: topic.to_string(),
            subscriber: subscriber.id.clone(),
            active,
            payload: subscriber.payload.clone(),
        }
    }

    pub fn with_context(mut self) -> Self {
        self.context = Some(JSONLD_CONTEXT);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionCollection {
    #[serde(rename = "@context")]
    pub context: &'static str,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "lastEventID")]
    pub last_event_id: String,
    pub subscriptions: Vec<SubscriptionDocument>,
}

impl SubscriptionCollection {
    pub fn new(id: String, last_event_id: String, subscriptions: Vec<SubscriptionDocument>) -> Self {
        Self {
            context: JSONLD_CONTEXT,
            id,
            kind: "Subscriptions",
            last_event_id,
            subscriptions,
        }
    }
}

/// One document per selector the subscriber asked for.
pub fn documents(subscriber: &Subscriber, active: bool) -> Vec<SubscriptionDocument> {
    subscriber
        .topics
        .iter()
        .map(|topic| SubscriptionDocument::new(subscriber, topic, active))
        .collect()
}

/// The private updates announcing that `subscriber` connected or left.
pub fn subscription_updates(subscriber: &Subscriber, active: bool) -> Vec<Update> {
    documents(subscriber, active)
        .into_iter()
        .filter_map(|document| {
            let data = match serde_json::to_string(&document.clone().with_context()) {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(subscriber = %subscriber.id, error = %err, "failed to encode subscription event");
                    return None;
                }
            };
            let mut update = Update::new(vec![document.id], data);
            update.private = true;
            Some(update)
        })
        .collect()
}
