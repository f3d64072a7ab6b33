//! The `persistence` module holds the hub's backlog: the short-term history
//! of updates that lets a reconnecting subscriber replay what it missed.
//!
//! `BacklogStore` is the interface the dispatcher and connection handler use.
//! Two stores implement it:
//! - `MemoryBacklog`: a bounded in-process ring, lost on restart
//! - `SledBacklog`: the same contract on an embedded `sled` database, so
//!   sequence ids and retained updates survive restarts
//!
//! Both assign sequence ids under a single writer lock and evict lazily on
//! append. Replays never hold that lock while filtering: they take the
//! range they need and check it afterwards, reporting any hole as a gap.

pub mod memory_store;
pub mod sled_store;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broker::message::{BacklogEntry, Update};
use crate::client::SubscriptionFilter;
use crate::config::BacklogSettings;
use crate::utils::error::{GapError, HubError};

pub use memory_store::MemoryBacklog;
pub use sled_store::SledBacklog;

/// `Last-Event-ID` value meaning "everything still retained".
pub const EARLIEST: &str = "earliest";

/// Where a subscriber wants replay to start.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LastEventId {
    /// No replay, live updates only.
    #[default]
    None,
    Earliest,
    Id(String),
}

impl LastEventId {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => LastEventId::None,
            Some(EARLIEST) => LastEventId::Earliest,
            Some(id) => LastEventId::Id(id.to_string()),
        }
    }

    pub fn as_option(&self) -> Option<&str> {
        match self {
            LastEventId::None => None,
            LastEventId::Earliest => Some(EARLIEST),
            LastEventId::Id(id) => Some(id),
        }
    }
}

/// A snapshot of the backlog taken for one subscriber.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Matching entries after the cursor, in sequence order.
    pub entries: Vec<BacklogEntry>,
    /// Newest sequence at snapshot time; later entries arrive live.
    pub head: u64,
    /// Id of the newest retained update at snapshot time, or `earliest`.
    pub last_event_id: String,
    pub gap: Option<GapError>,
}

/// Retention limits; eviction drops the oldest entries first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_entries: Option<usize>,
    pub max_age_ms: Option<i64>,
}

impl RetentionPolicy {
    pub fn from_settings(settings: &BacklogSettings) -> Self {
        Self {
            max_entries: settings.max_entries.filter(|n| *n > 0),
            max_age_ms: settings
                .max_age_secs
                .filter(|s| *s > 0)
                .map(|s| i64::try_from(s.saturating_mul(1000)).unwrap_or(i64::MAX)),
        }
    }

    /// Entries published before this instant are expired.
    pub fn expiry_cutoff(&self, now_ms: i64) -> Option<i64> {
        self.max_age_ms.map(|age| now_ms.saturating_sub(age))
    }
}

pub trait BacklogStore: Send + Sync + fmt::Debug {
    /// Store `update` under the next sequence id, assigning its id when empty.
    fn append(&self, update: Update) -> Result<BacklogEntry, HubError>;

    /// Entries after `since` accepted by `filter`, as of call time.
    fn replay(&self, since: &LastEventId, filter: &SubscriptionFilter) -> Result<Replay, HubError>;

    /// Newest assigned sequence, `0` before the first append.
    fn head(&self) -> u64;

    /// Id of the newest retained update, or `earliest` when empty.
    fn last_event_id(&self) -> String;

    fn contains_id(&self, id: &str) -> Result<bool, HubError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Open the store selected by `settings.driver`.
pub fn open(settings: &BacklogSettings) -> Result<Arc<dyn BacklogStore>, HubError> {
    let policy = RetentionPolicy::from_settings(settings);
    match settings.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryBacklog::new(policy))),
        "sled" => Ok(Arc::new(SledBacklog::open(&settings.path, policy)?)),
        other => Err(HubError::config(format!("unknown backlog driver `{other}`"))),
    }
}

/// The most recently evicted entry. A subscriber whose `Last-Event-ID`
/// names it is still caught up as long as nothing after it is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Evicted {
    pub sequence: u64,
    pub id: String,
}

/// How a `LastEventId` resolves against the retained range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cursor {
    /// Nothing to replay.
    Skip,
    /// Everything still retained.
    Earliest,
    /// Entries after `sequence`, which must follow it without a hole.
    After { sequence: u64, id: String },
    /// The id is unknown or evicted; replay from the start and report it.
    Gap(String),
}

impl Cursor {
    /// Sequence the replay range starts after, `None` when skipping.
    pub(crate) fn after(&self) -> Option<u64> {
        match self {
            Cursor::Skip => None,
            Cursor::Earliest | Cursor::Gap(_) => Some(0),
            Cursor::After { sequence, .. } => Some(*sequence),
        }
    }
}

/// Resolve `since` given an id lookup over retained entries and the last
/// evicted entry. Only exact id matches resolve; anything else is a gap.
pub(crate) fn resolve_cursor(
    since: &LastEventId,
    lookup: impl FnOnce(&str) -> Option<u64>,
    evicted: Option<&Evicted>,
) -> Cursor {
    match since {
        LastEventId::None => Cursor::Skip,
        LastEventId::Earliest => Cursor::Earliest,
        LastEventId::Id(id) => {
            let sequence = lookup(id).or_else(|| {
                evicted
                    .filter(|evicted| evicted.id == *id)
                    .map(|evicted| evicted.sequence)
            });
            match sequence {
                Some(sequence) => Cursor::After {
                    sequence,
                    id: id.clone(),
                },
                None => Cursor::Gap(id.clone()),
            }
        }
    }
}

/// Walk the candidates after a resolved cursor, oldest first, up to `head`.
///
/// Expired entries are dropped. For a `Cursor::After`, every sequence up to
/// `head` must be present and unexpired; the first hole becomes a `GapError`
/// so lost events are never hidden from the subscriber.
pub(crate) fn scan_replay<I>(
    cursor: Cursor,
    head: u64,
    cutoff: Option<i64>,
    filter: &SubscriptionFilter,
    candidates: I,
) -> Result<(Vec<BacklogEntry>, Option<GapError>), HubError>
where
    I: IntoIterator<Item = Result<BacklogEntry, HubError>>,
{
    let (mut expected, mut gap) = match cursor {
        Cursor::Skip => return Ok((Vec::new(), None)),
        Cursor::Earliest => (None, None),
        Cursor::After { sequence, id } => (Some((sequence + 1, id)), None),
        Cursor::Gap(id) => (
            None,
            Some(GapError {
                last_event_id: id,
                resumed_from: None,
            }),
        ),
    };

    let mut entries = Vec::new();
    for candidate in candidates {
        let entry = candidate?;
        if cutoff.is_some_and(|c| entry.published_at < c) {
            continue;
        }
        if let Some(gap) = gap.as_mut().filter(|gap| gap.resumed_from.is_none()) {
            gap.resumed_from = Some(entry.sequence);
        }
        if let Some((next, id)) = expected.take() {
            if entry.sequence == next {
                expected = Some((next + 1, id));
            } else {
                gap = Some(GapError {
                    last_event_id: id,
                    resumed_from: Some(entry.sequence),
                });
            }
        }
        if filter.can_receive(&entry.update) {
            entries.push(entry);
        }
    }

    // everything after the cursor is gone
    if let Some((_, id)) = expected.filter(|(next, _)| *next <= head) {
        gap = Some(GapError {
            last_event_id: id,
            resumed_from: None,
        });
    }

    Ok((entries, gap))
}

/// Pick the id a freshly appended update gets when the publisher gave none.
pub(crate) fn assign_id(sequence: u64, taken: impl FnOnce(&str) -> bool) -> String {
    let id = sequence.to_string();
    if taken(&id) {
        format!("{sequence}:{}", uuid::Uuid::new_v4())
    } else {
        id
    }
}

#[cfg(test)]
mod tests;
