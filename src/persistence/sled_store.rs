//! Backlog backed by `sled`
//!
//! Updates are stored in an `updates` tree keyed by the big-endian sequence,
//! so iteration yields them in publish order, and an `ids` tree maps each
//! update id back to its sequence for `Last-Event-ID` lookups.
//!
//! Retention policy:
//! - `max_entries`: when exceeded the oldest entries are removed on append
//! - `max_age_ms`: entries older than this are removed on append and skipped
//!   by replays
//!
//! The sequence counter resumes from the last stored key on open, so ids
//! handed to subscribers stay valid across restarts. The last evicted entry
//! is kept in a `meta` tree for the same reason.
//!
//! Replays read the range without the writer lock. An append evicting
//! concurrently leaves a hole in what the scan sees, which is reported as a
//! gap.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use super::{
    BacklogStore, EARLIEST, Evicted, LastEventId, Replay, RetentionPolicy, assign_id,
    resolve_cursor, scan_replay,
};
use crate::broker::message::{BacklogEntry, Update};
use crate::client::SubscriptionFilter;
use crate::utils::error::HubError;

const EVICTED_KEY: &[u8] = b"evicted";

#[derive(Serialize, Deserialize, Debug, Clone)]
struct StoredEntry {
    published_at: i64,
    update: Update,
}

#[derive(Debug)]
struct Writer {
    head: u64,
    count: usize,
    evicted: Option<Evicted>,
}

pub struct SledBacklog {
    db: Db,
    updates: Tree,
    ids: Tree,
    meta: Tree,
    policy: RetentionPolicy,
    writer: Mutex<Writer>,
}

impl SledBacklog {
    /// Open or create a sled database at `path` with the given policy.
    pub fn open(path: &str, policy: RetentionPolicy) -> Result<Self, HubError> {
        let db = sled::open(path)?;
        Self::with_db(db, policy)
    }

    pub fn with_db(db: Db, policy: RetentionPolicy) -> Result<Self, HubError> {
        let updates = db.open_tree("updates")?;
        let ids = db.open_tree("ids")?;
        let meta = db.open_tree("meta")?;

        let head = match updates.last()? {
            Some((key, _)) => decode_key(&key)?,
            None => 0,
        };
        let count = updates.len();
        let evicted = match meta.get(EVICTED_KEY)? {
            Some(raw) => Some(serde_json::from_slice::<Evicted>(&raw)?),
            None => None,
        };
        tracing::info!(head, retained = count, "opened sled backlog");

        Ok(Self {
            db,
            updates,
            ids,
            meta,
            policy,
            writer: Mutex::new(Writer {
                head,
                count,
                evicted,
            }),
        })
    }

    pub fn flush(&self) -> Result<(), HubError> {
        self.db.flush()?;
        Ok(())
    }

    fn load(&self, key: &[u8], value: &[u8]) -> Result<BacklogEntry, HubError> {
        let stored: StoredEntry = serde_json::from_slice(value)?;
        Ok(BacklogEntry {
            sequence: decode_key(key)?,
            published_at: stored.published_at,
            update: Arc::new(stored.update),
        })
    }

    fn lookup(&self, id: &str) -> Option<u64> {
        match self.ids.get(id.as_bytes()) {
            Ok(Some(key)) => decode_key(&key).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(id, error = %e, "failed to look up backlog id");
                None
            }
        }
    }

    fn newest_id(&self) -> String {
        let newest = self.updates.last().ok().flatten();
        newest
            .and_then(|(key, value)| self.load(&key, &value).ok())
            .map(|entry| entry.update.id.clone())
            .unwrap_or_else(|| EARLIEST.to_string())
    }

    /// Drop the oldest entry. Must be called with the writer lock held.
    fn pop_oldest(&self, writer: &mut Writer) -> Result<Option<i64>, HubError> {
        let Some((key, value)) = self.updates.pop_min()? else {
            writer.count = 0;
            return Ok(None);
        };
        writer.count = writer.count.saturating_sub(1);
        let stored: StoredEntry = serde_json::from_slice(&value)?;
        // only drop the index entry while it still points at this sequence
        if self.ids.get(stored.update.id.as_bytes())?.as_deref() == Some(&key[..]) {
            self.ids.remove(stored.update.id.as_bytes())?;
        }
        let evicted = Evicted {
            sequence: decode_key(&key)?,
            id: stored.update.id,
        };
        self.meta.insert(EVICTED_KEY, serde_json::to_vec(&evicted)?)?;
        writer.evicted = Some(evicted);
        Ok(Some(stored.published_at))
    }

    fn evict(&self, writer: &mut Writer, now_ms: i64) -> Result<(), HubError> {
        if let Some(max) = self.policy.max_entries {
            while writer.count > max {
                if self.pop_oldest(writer)?.is_none() {
                    break;
                }
            }
        }
        if let Some(cutoff) = self.policy.expiry_cutoff(now_ms) {
            while let Some((key, value)) = self.updates.first()? {
                let entry = self.load(&key, &value)?;
                if entry.published_at >= cutoff {
                    break;
                }
                self.pop_oldest(writer)?;
            }
        }
        Ok(())
    }
}

impl BacklogStore for SledBacklog {
    fn append(&self, mut update: Update) -> Result<BacklogEntry, HubError> {
        let mut writer = self.writer.lock();
        // stamped under the lock so timestamps follow sequence order
        let now_ms = Utc::now().timestamp_millis();

        let sequence = writer.head + 1;
        if update.id.is_empty() {
            update.id = assign_id(sequence, |id| self.lookup(id).is_some());
        }

        let stored = StoredEntry {
            published_at: now_ms,
            update,
        };
        let key = sequence.to_be_bytes();
        self.updates.insert(key, serde_json::to_vec(&stored)?)?;
        self.ids.insert(stored.update.id.as_bytes(), &key[..])?;
        writer.head = sequence;
        writer.count += 1;

        self.evict(&mut writer, now_ms)?;

        Ok(BacklogEntry {
            sequence,
            published_at: now_ms,
            update: Arc::new(stored.update),
        })
    }

    fn replay(&self, since: &LastEventId, filter: &SubscriptionFilter) -> Result<Replay, HubError> {
        // snapshot bound: entries appended after this point arrive live
        let (head, last_event_id, evicted) = {
            let writer = self.writer.lock();
            (writer.head, self.newest_id(), writer.evicted.clone())
        };
        let cursor = resolve_cursor(since, |id| self.lookup(id), evicted.as_ref());
        let after = cursor.after().unwrap_or(head);
        let cutoff = self.policy.expiry_cutoff(Utc::now().timestamp_millis());

        let candidates = (after < head)
            .then(|| self.updates.range((after + 1).to_be_bytes()..=head.to_be_bytes()))
            .into_iter()
            .flatten()
            .map(|item| -> Result<BacklogEntry, HubError> {
                let (key, value) = item?;
                self.load(&key, &value)
            });
        let (entries, gap) = scan_replay(cursor, head, cutoff, filter, candidates)?;

        Ok(Replay {
            entries,
            head,
            last_event_id,
            gap,
        })
    }

    fn head(&self) -> u64 {
        self.writer.lock().head
    }

    fn last_event_id(&self) -> String {
        self.newest_id()
    }

    fn contains_id(&self, id: &str) -> Result<bool, HubError> {
        Ok(self.ids.contains_key(id.as_bytes())?)
    }

    fn len(&self) -> usize {
        self.writer.lock().count
    }
}

impl std::fmt::Debug for SledBacklog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBacklog")
            .field("db", &"sled::Db")
            .field("policy", &self.policy)
            .finish()
    }
}

fn decode_key(key: &[u8]) -> Result<u64, HubError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| HubError::Storage(format!("corrupt backlog key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}
