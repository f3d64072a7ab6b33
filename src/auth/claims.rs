//! Mercure JWT claims and the scopes derived from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::broker::topic::TopicSelector;

/// The `mercure` object of a hub JWT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MercureClaim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Vec<String>>,
    /// Arbitrary data exposed to other subscribers through subscription events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Decoded JWT payload: the `mercure` claim plus everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mercure: Option<MercureClaim>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publish,
    Subscribe,
}

impl AuthorizationClaims {
    pub fn new(publish: Vec<String>, subscribe: Vec<String>) -> Self {
        Self {
            mercure: Some(MercureClaim {
                publish: Some(publish),
                subscribe: Some(subscribe),
                payload: None,
            }),
            additional: Map::new(),
        }
    }

    /// Selectors granted for `role`. An absent array grants nothing.
    pub fn scope(&self, role: Role) -> Scope {
        let selectors = self.mercure.as_ref().and_then(|claim| match role {
            Role::Publish => claim.publish.as_ref(),
            Role::Subscribe => claim.subscribe.as_ref(),
        });
        selectors.map(|raw| Scope::new(raw)).unwrap_or_default()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.mercure.as_ref().and_then(|claim| claim.payload.as_ref())
    }

    pub fn subject(&self) -> Option<&str> {
        self.additional.get("sub").and_then(Value::as_str)
    }
}

/// A compiled set of selectors a JWT grants.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    selectors: Vec<TopicSelector>,
}

impl Scope {
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            selectors: raw
                .into_iter()
                .map(|s| TopicSelector::compile(s.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn allows_any(&self) -> bool {
        self.selectors.iter().any(TopicSelector::is_wildcard)
    }

    /// True if some selector in the scope matches `topic`.
    pub fn matches(&self, topic: &str) -> bool {
        self.selectors.iter().any(|s| s.matches(topic))
    }

    /// True if at least one of `topics` is matched.
    pub fn matches_any<S: AsRef<str>>(&self, topics: &[S]) -> bool {
        self.allows_any() || topics.iter().any(|t| self.matches(t.as_ref()))
    }

    /// True if every one of `topics` is matched.
    pub fn covers_all<S: AsRef<str>>(&self, topics: &[S]) -> bool {
        self.allows_any() || topics.iter().all(|t| self.matches(t.as_ref()))
    }
}
