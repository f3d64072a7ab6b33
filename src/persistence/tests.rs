use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::Duration;

use tempfile::{TempDir, tempdir};

use super::*;
use crate::auth::Scope;
use crate::broker::topic::TopicSelector;

fn filter(selectors: &[&str]) -> SubscriptionFilter {
    SubscriptionFilter::new(
        selectors.iter().map(|s| TopicSelector::compile(s)).collect(),
        Scope::default(),
    )
}

fn update(topic: &str, data: &str) -> Update {
    Update::new(vec![topic.to_string()], data)
}

fn ids(replay: &Replay) -> Vec<String> {
    replay.entries.iter().map(|e| e.update.id.clone()).collect()
}

fn memory(max_entries: Option<usize>) -> MemoryBacklog {
    MemoryBacklog::new(RetentionPolicy {
        max_entries,
        max_age_ms: None,
    })
}

fn sled_store(max_entries: Option<usize>) -> (TempDir, SledBacklog) {
    sled_with(RetentionPolicy {
        max_entries,
        max_age_ms: None,
    })
}

fn sled_with(policy: RetentionPolicy) -> (TempDir, SledBacklog) {
    let dir = tempdir().unwrap();
    let store = SledBacklog::open(dir.path().to_str().unwrap(), policy).unwrap();
    (dir, store)
}

fn expiring(max_age_ms: i64) -> RetentionPolicy {
    RetentionPolicy {
        max_entries: None,
        max_age_ms: Some(max_age_ms),
    }
}

fn sequences(replay: &Replay) -> Vec<u64> {
    replay.entries.iter().map(|e| e.sequence).collect()
}

/// Shared contract checks, run against both stores.
fn assigns_increasing_sequences(store: &dyn BacklogStore) {
    assert_eq!(store.head(), 0);
    assert_eq!(store.last_event_id(), EARLIEST);

    let first = store.append(update("/a", "1")).unwrap();
    let second = store.append(update("/a", "2")).unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(second.sequence, 2);
    assert_eq!(first.update.id, "1");
    assert_eq!(second.update.id, "2");
    assert_eq!(store.head(), 2);
    assert_eq!(store.last_event_id(), "2");
    assert_eq!(store.len(), 2);
}

fn replays_after_last_event_id(store: &dyn BacklogStore) {
    for i in 1..=9 {
        store.append(update("/books/1", &format!("v{i}"))).unwrap();
    }

    let replay = store
        .replay(&LastEventId::parse(Some("5")), &filter(&["/books/1"]))
        .unwrap();
    assert_eq!(ids(&replay), ["6", "7", "8", "9"]);
    assert_eq!(replay.head, 9);
    assert_eq!(replay.last_event_id, "9");
    assert!(replay.gap.is_none());

    let none = store.replay(&LastEventId::None, &filter(&["/books/1"])).unwrap();
    assert!(none.entries.is_empty());
    assert_eq!(none.head, 9);

    let all = store
        .replay(&LastEventId::Earliest, &filter(&["/books/1"]))
        .unwrap();
    assert_eq!(all.entries.len(), 9);

    let caught_up = store
        .replay(&LastEventId::parse(Some("9")), &filter(&["/books/1"]))
        .unwrap();
    assert!(caught_up.entries.is_empty());
    assert!(caught_up.gap.is_none());
}

fn replay_applies_filter(store: &dyn BacklogStore) {
    store.append(update("/books/1", "a")).unwrap();
    store.append(update("/books/2", "b")).unwrap();
    let mut secret = update("/books/1", "c");
    secret.private = true;
    store.append(secret).unwrap();

    let replay = store
        .replay(&LastEventId::Earliest, &filter(&["/books/1"]))
        .unwrap();
    let data: Vec<_> = replay.entries.iter().map(|e| e.update.data.as_str()).collect();
    assert_eq!(data, ["a"]);

    let authorized = SubscriptionFilter::new(
        vec![TopicSelector::compile("/books/{id}")],
        Scope::new(["/books/1"]),
    );
    let replay = store.replay(&LastEventId::Earliest, &authorized).unwrap();
    let data: Vec<_> = replay.entries.iter().map(|e| e.update.data.as_str()).collect();
    assert_eq!(data, ["a", "b", "c"]);
}

fn evicts_oldest_and_reports_gap(store: &dyn BacklogStore) {
    for i in 1..=5 {
        store.append(update("/a", &format!("v{i}"))).unwrap();
    }
    assert_eq!(store.len(), 3);
    assert!(!store.contains_id("1").unwrap());
    assert!(store.contains_id("5").unwrap());

    // 1 was evicted: replay everything retained and say so
    let replay = store
        .replay(&LastEventId::parse(Some("1")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(ids(&replay), ["3", "4", "5"]);
    let gap = replay.gap.expect("gap reported");
    assert_eq!(gap.last_event_id, "1");
    assert_eq!(gap.resumed_from, Some(3));

    // 2 was evicted but nothing after it was: no gap
    let replay = store
        .replay(&LastEventId::parse(Some("2")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(ids(&replay), ["3", "4", "5"]);
    assert!(replay.gap.is_none());

    let unknown = store
        .replay(&LastEventId::parse(Some("no-such-id")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(unknown.entries.len(), 3);
    assert!(unknown.gap.is_some());
}

fn keeps_publisher_ids(store: &dyn BacklogStore) {
    let mut custom = update("/a", "x");
    custom.id = "urn:uuid:custom".into();
    store.append(custom).unwrap();
    assert!(store.contains_id("urn:uuid:custom").unwrap());

    // a publisher already took "2", so the hub picks a distinct id
    let mut taken = update("/a", "y");
    taken.id = "2".into();
    store.append(taken).unwrap();
    let third = store.append(update("/a", "z")).unwrap();
    assert_eq!(third.update.id, "3");

    let mut clash = update("/a", "w");
    clash.id = "5".into();
    store.append(clash).unwrap();
    let fifth = store.append(update("/a", "v")).unwrap();
    assert_eq!(fifth.sequence, 5);
    assert!(fifth.update.id.starts_with("5:"));

    let replay = store
        .replay(&LastEventId::parse(Some("urn:uuid:custom")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(replay.entries.len(), 4);
}

fn reports_expired_entries_after_cursor(store: &dyn BacklogStore) {
    for i in 1..=3 {
        store.append(update("/a", &format!("v{i}"))).unwrap();
    }
    sleep(Duration::from_millis(300)); // all three expire, none evicted yet

    // 2 and 3 are lost to the subscriber that saw 1
    let replay = store
        .replay(&LastEventId::parse(Some("1")), &filter(&["/a"]))
        .unwrap();
    assert!(replay.entries.is_empty());
    let gap = replay.gap.expect("expired entries reported as a gap");
    assert_eq!(gap.last_event_id, "1");
    assert_eq!(gap.resumed_from, None);

    // the newest id is still a valid position
    let caught_up = store
        .replay(&LastEventId::parse(Some("3")), &filter(&["/a"]))
        .unwrap();
    assert!(caught_up.gap.is_none());

    // the next append evicts 1..=3; the last of them still resolves
    store.append(update("/a", "v4")).unwrap();
    let replay = store
        .replay(&LastEventId::parse(Some("3")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(ids(&replay), ["4"]);
    assert!(replay.gap.is_none());

    let replay = store
        .replay(&LastEventId::parse(Some("1")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(ids(&replay), ["4"]);
    assert_eq!(replay.gap.map(|g| g.resumed_from), Some(Some(4)));
}

fn numeric_publisher_ids_are_not_sequences(store: &dyn BacklogStore) {
    let mut custom = update("/a", "custom");
    custom.id = "4".into();
    store.append(custom).unwrap();
    for i in 2..=6 {
        store.append(update("/a", &format!("v{i}"))).unwrap();
    }
    // sequence 1 (id "4") is the only one evicted
    assert!(!store.contains_id("4").unwrap());

    let replay = store
        .replay(&LastEventId::parse(Some("4")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(sequences(&replay), [2, 3, 4, 5, 6]);
    assert!(replay.gap.is_none());

    // once sequence 2 goes too, id "4" no longer names a retained position
    store.append(update("/a", "v7")).unwrap();
    let replay = store
        .replay(&LastEventId::parse(Some("4")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(sequences(&replay), [3, 4, 5, 6, 7]);
    let gap = replay.gap.expect("gap reported");
    assert_eq!(gap.last_event_id, "4");
    assert_eq!(gap.resumed_from, Some(3));
}

/// Replays racing evicting appends either continue exactly after the
/// requested id or report a gap.
fn replay_is_gapless_or_reported(store: Arc<dyn BacklogStore>) {
    store.append(update("/a", "v1")).unwrap();
    thread::scope(|scope| {
        let writer = Arc::clone(&store);
        scope.spawn(move || {
            for i in 2..=400 {
                writer.append(update("/a", &format!("v{i}"))).unwrap();
            }
        });

        for _ in 0..200 {
            let since = store.last_event_id();
            let after: u64 = since.parse().unwrap();
            thread::yield_now();
            let replay = store
                .replay(&LastEventId::Id(since), &filter(&["/a"]))
                .unwrap();
            if replay.gap.is_none() {
                let expected: Vec<u64> = (after + 1..=replay.head).collect();
                assert_eq!(sequences(&replay), expected);
            }
        }
    });
}

#[test]
fn memory_assigns_increasing_sequences() {
    assigns_increasing_sequences(&memory(None));
}

#[test]
fn sled_assigns_increasing_sequences() {
    let (_dir, store) = sled_store(None);
    assigns_increasing_sequences(&store);
}

#[test]
fn memory_replays_after_last_event_id() {
    replays_after_last_event_id(&memory(None));
}

#[test]
fn sled_replays_after_last_event_id() {
    let (_dir, store) = sled_store(None);
    replays_after_last_event_id(&store);
}

#[test]
fn memory_replay_applies_filter() {
    replay_applies_filter(&memory(None));
}

#[test]
fn sled_replay_applies_filter() {
    let (_dir, store) = sled_store(None);
    replay_applies_filter(&store);
}

#[test]
fn memory_evicts_oldest_and_reports_gap() {
    evicts_oldest_and_reports_gap(&memory(Some(3)));
}

#[test]
fn sled_evicts_oldest_and_reports_gap() {
    let (_dir, store) = sled_store(Some(3));
    evicts_oldest_and_reports_gap(&store);
}

#[test]
fn memory_keeps_publisher_ids() {
    keeps_publisher_ids(&memory(None));
}

#[test]
fn sled_keeps_publisher_ids() {
    let (_dir, store) = sled_store(None);
    keeps_publisher_ids(&store);
}

#[test]
fn memory_reports_expired_entries_after_cursor() {
    reports_expired_entries_after_cursor(&MemoryBacklog::new(expiring(200)));
}

#[test]
fn sled_reports_expired_entries_after_cursor() {
    let (_dir, store) = sled_with(expiring(200));
    reports_expired_entries_after_cursor(&store);
}

#[test]
fn memory_numeric_publisher_ids_are_not_sequences() {
    numeric_publisher_ids_are_not_sequences(&memory(Some(5)));
}

#[test]
fn sled_numeric_publisher_ids_are_not_sequences() {
    let (_dir, store) = sled_store(Some(5));
    numeric_publisher_ids_are_not_sequences(&store);
}

#[test]
fn memory_replay_is_gapless_or_reported() {
    replay_is_gapless_or_reported(Arc::new(memory(Some(3))));
}

#[test]
fn sled_replay_is_gapless_or_reported() {
    let (_dir, store) = sled_store(Some(3));
    replay_is_gapless_or_reported(Arc::new(store));
}

#[test]
fn sled_remembers_last_eviction_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    let policy = RetentionPolicy {
        max_entries: Some(2),
        max_age_ms: None,
    };

    {
        let store = SledBacklog::open(&path, policy).unwrap();
        for i in 1..=3 {
            store.append(update("/a", &format!("v{i}"))).unwrap();
        }
        store.flush().unwrap();
    }

    let store = SledBacklog::open(&path, policy).unwrap();
    let replay = store
        .replay(&LastEventId::parse(Some("1")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(ids(&replay), ["2", "3"]);
    assert!(replay.gap.is_none());
}

#[test]
fn memory_expires_by_age() {
    let store = MemoryBacklog::new(RetentionPolicy {
        max_entries: None,
        max_age_ms: Some(50),
    });
    store.append(update("/a", "old")).unwrap();
    sleep(Duration::from_millis(120)); // let the first entry expire

    let replay = store.replay(&LastEventId::Earliest, &filter(&["/a"])).unwrap();
    assert!(replay.entries.is_empty(), "expired entries are not replayed");

    store.append(update("/a", "new")).unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn sled_resumes_sequence_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    {
        let store = SledBacklog::open(&path, RetentionPolicy::default()).unwrap();
        store.append(update("/a", "1")).unwrap();
        store.append(update("/a", "2")).unwrap();
        store.flush().unwrap();
    }

    let store = SledBacklog::open(&path, RetentionPolicy::default()).unwrap();
    assert_eq!(store.head(), 2);
    assert_eq!(store.len(), 2);
    let next = store.append(update("/a", "3")).unwrap();
    assert_eq!(next.sequence, 3);

    let replay = store
        .replay(&LastEventId::parse(Some("1")), &filter(&["/a"]))
        .unwrap();
    assert_eq!(ids(&replay), ["2", "3"]);
}

#[test]
fn open_selects_driver() {
    let dir = tempdir().unwrap();
    let mut settings = crate::config::Settings::default().backlog;
    assert!(open(&settings).unwrap().is_empty());

    settings.driver = "sled".into();
    settings.path = dir.path().join("db").to_str().unwrap().to_string();
    let store = open(&settings).unwrap();
    store.append(update("/a", "x")).unwrap();
    assert_eq!(store.len(), 1);

    settings.driver = "postgres".into();
    assert!(matches!(open(&settings), Err(HubError::Config(_))));
}

#[test]
fn last_event_id_parsing() {
    assert_eq!(LastEventId::parse(None), LastEventId::None);
    assert_eq!(LastEventId::parse(Some("  ")), LastEventId::None);
    assert_eq!(LastEventId::parse(Some("earliest")), LastEventId::Earliest);
    assert_eq!(LastEventId::parse(Some("42")), LastEventId::Id("42".into()));
    assert_eq!(LastEventId::Earliest.as_option(), Some("earliest"));
}

#[test]
fn cursor_resolution() {
    let none = |_: &str| None;
    assert_eq!(resolve_cursor(&LastEventId::None, none, None), Cursor::Skip);
    assert_eq!(resolve_cursor(&LastEventId::Earliest, none, None), Cursor::Earliest);
    assert_eq!(
        resolve_cursor(&LastEventId::Id("x".into()), |_| Some(3), None),
        Cursor::After {
            sequence: 3,
            id: "x".into()
        }
    );
    // decimal ids are never taken for sequence numbers
    assert_eq!(
        resolve_cursor(&LastEventId::Id("2".into()), none, None),
        Cursor::Gap("2".into())
    );
    let evicted = Evicted {
        sequence: 5,
        id: "urn:uuid:5".into(),
    };
    assert_eq!(
        resolve_cursor(&LastEventId::Id("urn:uuid:5".into()), none, Some(&evicted)),
        Cursor::After {
            sequence: 5,
            id: "urn:uuid:5".into()
        }
    );
    assert_eq!(
        resolve_cursor(&LastEventId::Id("4".into()), none, Some(&evicted)),
        Cursor::Gap("4".into())
    );
}

fn entry(sequence: u64, published_at: i64) -> BacklogEntry {
    let mut update = update("/a", "x");
    update.id = sequence.to_string();
    BacklogEntry {
        sequence,
        published_at,
        update: Arc::new(update),
    }
}

#[test]
fn scan_reports_holes_after_cursor() {
    let cursor = Cursor::After {
        sequence: 2,
        id: "2".into(),
    };
    // 3 was evicted while the range was being read
    let candidates = [entry(4, 0), entry(5, 0)].into_iter().map(Ok);
    let (entries, gap) = scan_replay(cursor, 5, None, &filter(&["/a"]), candidates).unwrap();
    assert_eq!(entries.len(), 2);
    let gap = gap.expect("hole reported");
    assert_eq!(gap.last_event_id, "2");
    assert_eq!(gap.resumed_from, Some(4));
}

#[test]
fn scan_skips_expired_and_reports_them() {
    let cursor = Cursor::After {
        sequence: 1,
        id: "1".into(),
    };
    let candidates = [entry(2, 10), entry(3, 100)].into_iter().map(Ok);
    let (entries, gap) = scan_replay(cursor, 3, Some(50), &filter(&["/a"]), candidates).unwrap();
    assert_eq!(entries.iter().map(|e| e.sequence).collect::<Vec<_>>(), [3]);
    assert_eq!(gap.map(|g| g.resumed_from), Some(Some(3)));

    // earliest never reports expiry as a gap
    let candidates = [entry(2, 10), entry(3, 100)].into_iter().map(Ok);
    let (entries, gap) =
        scan_replay(Cursor::Earliest, 3, Some(50), &filter(&["/a"]), candidates).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(gap.is_none());
}

#[test]
fn scan_with_contiguous_range_has_no_gap() {
    let cursor = Cursor::After {
        sequence: 1,
        id: "1".into(),
    };
    let candidates = [entry(2, 0), entry(3, 0)].into_iter().map(Ok);
    let (entries, gap) = scan_replay(cursor, 3, None, &filter(&["/a"]), candidates).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(gap.is_none());
}

#[test]
fn retention_from_settings() {
    let mut settings = crate::config::Settings::default().backlog;
    settings.max_entries = Some(0);
    settings.max_age_secs = Some(2);
    let policy = RetentionPolicy::from_settings(&settings);
    assert_eq!(policy.max_entries, None);
    assert_eq!(policy.max_age_ms, Some(2000));
    assert_eq!(policy.expiry_cutoff(10_000), Some(8_000));
}
