//! In-memory backlog.
//!
//! Entries live in a `VecDeque` ordered by sequence, with an id index for
//! `Last-Event-ID` lookups. Appends take the write lock, evict from the front
//! and return; replays take the read lock only long enough to resolve the
//! cursor and clone the entries after it. Expiry and subscriber filtering
//! run once the lock is released.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::{
    BacklogStore, EARLIEST, Evicted, LastEventId, Replay, RetentionPolicy, assign_id,
    resolve_cursor, scan_replay,
};
use crate::broker::message::{BacklogEntry, Update};
use crate::client::SubscriptionFilter;
use crate::utils::error::HubError;

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<BacklogEntry>,
    ids: HashMap<String, u64>,
    head: u64,
    evicted: Option<Evicted>,
}

impl State {
    fn evict(&mut self, policy: &RetentionPolicy, now_ms: i64) {
        if let Some(max) = policy.max_entries {
            while self.entries.len() > max {
                self.pop_oldest();
            }
        }
        if let Some(cutoff) = policy.expiry_cutoff(now_ms) {
            while self
                .entries
                .front()
                .is_some_and(|entry| entry.published_at < cutoff)
            {
                self.pop_oldest();
            }
        }
    }

    fn pop_oldest(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            if self.ids.get(&entry.update.id) == Some(&entry.sequence) {
                self.ids.remove(&entry.update.id);
            }
            self.evicted = Some(Evicted {
                sequence: entry.sequence,
                id: entry.update.id.clone(),
            });
        }
    }

    fn last_event_id(&self) -> String {
        self.entries
            .back()
            .map(|entry| entry.update.id.clone())
            .unwrap_or_else(|| EARLIEST.to_string())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBacklog {
    policy: RetentionPolicy,
    state: RwLock<State>,
}

impl MemoryBacklog {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            state: RwLock::new(State::default()),
        }
    }
}

impl BacklogStore for MemoryBacklog {
    fn append(&self, mut update: Update) -> Result<BacklogEntry, HubError> {
        let mut state = self.state.write();
        // stamped under the lock so timestamps follow sequence order
        let now_ms = Utc::now().timestamp_millis();

        let sequence = state.head + 1;
        if update.id.is_empty() {
            update.id = assign_id(sequence, |id| state.ids.contains_key(id));
        }

        let entry = BacklogEntry {
            sequence,
            published_at: now_ms,
            update: Arc::new(update),
        };
        state.head = sequence;
        state.ids.insert(entry.update.id.clone(), sequence);
        state.entries.push_back(entry.clone());
        state.evict(&self.policy, now_ms);

        Ok(entry)
    }

    fn replay(&self, since: &LastEventId, filter: &SubscriptionFilter) -> Result<Replay, HubError> {
        let (cursor, head, last_event_id, candidates) = {
            let state = self.state.read();
            let cursor = resolve_cursor(
                since,
                |id| state.ids.get(id).copied(),
                state.evicted.as_ref(),
            );
            let candidates: Vec<BacklogEntry> = match cursor.after() {
                Some(after) => {
                    let start = state.entries.partition_point(|entry| entry.sequence <= after);
                    state.entries.range(start..).cloned().collect()
                }
                None => Vec::new(),
            };
            (cursor, state.head, state.last_event_id(), candidates)
        };

        let cutoff = self.policy.expiry_cutoff(Utc::now().timestamp_millis());
        let (entries, gap) = scan_replay(
            cursor,
            head,
            cutoff,
            filter,
            candidates.into_iter().map(Ok),
        )?;

        Ok(Replay {
            entries,
            head,
            last_event_id,
            gap,
        })
    }

    fn head(&self) -> u64 {
        self.state.read().head
    }

    fn last_event_id(&self) -> String {
        self.state.read().last_event_id()
    }

    fn contains_id(&self, id: &str) -> Result<bool, HubError> {
        Ok(self.state.read().ids.contains_key(id))
    }

    fn len(&self) -> usize {
        self.state.read().entries.len()
    }
}
