//! Update definitions for the hub
//!
//! `Update` is the canonical internal representation of one published
//! message. Fields:
//! - `id`: unique within the retained backlog; left empty by the publisher to
//!   let the backlog assign the sequence-derived id
//! - `topics`: IRIs this update concerns, at least one, first one canonical
//! - `data`: payload passed through verbatim, usually JSON
//! - `private`: only subscribers whose JWT scope matches a topic receive it
//! - `event_type`, `retry`: optional SSE `event:` and `retry:` fields
//!
//! Updates are immutable once appended; the backlog hands them around as
//! `Arc<Update>` inside a `BacklogEntry`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::utils::error::HubError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub id: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub private: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

impl Update {
    /// A public update without SSE metadata; the hub assigns the id.
    pub fn new(topics: Vec<String>, data: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            topics,
            data: data.into(),
            private: false,
            event_type: None,
            retry: None,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Drop duplicate topics keeping the first occurrence, then reject
    /// updates without a topic or with line breaks in `id` or `type`.
    pub fn normalize(mut self) -> Result<Self, HubError> {
        let mut seen = std::collections::HashSet::new();
        self.topics.retain(|topic| seen.insert(topic.clone()));
        if self.topics.is_empty() || self.topics.iter().any(String::is_empty) {
            return Err(HubError::validation("at least one non-empty topic is required"));
        }
        if has_line_break(&self.id) {
            return Err(HubError::validation("id must not contain line breaks"));
        }
        if self.event_type.as_deref().is_some_and(has_line_break) {
            return Err(HubError::validation("type must not contain line breaks"));
        }
        Ok(self)
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

/// One retained update and its position in the global order.
#[derive(Debug, Clone)]
pub struct BacklogEntry {
    /// Strictly increasing in insertion order.
    pub sequence: u64,
    /// Milliseconds since UNIX epoch, set on append.
    pub published_at: i64,
    pub update: Arc<Update>,
}
