use clipsync_storage::{Database, ItemFilter, ItemUpdate, SortOrder, StorageError};
use clipsync_types::{ClipboardItem, DeviceId, HybridClock, ItemId, ItemVersion, TEXT_PLAIN};

const USER: &str = "user-1";

fn store(cap: usize) -> clipsync_storage::ItemStore {
    Database::open_in_memory()
        .unwrap()
        .items(DeviceId::from("device-a"), cap)
}

fn create(store: &clipsync_storage::ItemStore, title: &str) -> ClipboardItem {
    store
        .create(USER, title.as_bytes().to_vec(), title, TEXT_PLAIN, false)
        .unwrap()
}

// ── Happy Path ──────────────────────────────────────────────────

#[test]
fn create_assigns_id_and_pending_sync_status() {
    let store = store(100);
    let item = create(&store, "hello");
    assert_eq!(item.created_at, item.updated_at);

    let status = store.sync_status(item.id).unwrap().unwrap();
    assert!(!status.is_synced);
    assert!(status.last_sync_attempt.is_none());
}

#[test]
fn updated_at_is_monotonic_across_rapid_edits() {
    let store = store(100);
    let mut item = create(&store, "v0");
    for i in 1..=5 {
        let prev = item.updated_at;
        item = store
            .update(
                item.id,
                ItemUpdate {
                    title: Some(format!("v{i}")),
                    ..Default::default()
                },
                prev,
            )
            .unwrap();
        assert!(item.updated_at > prev);
    }
}

#[test]
fn delete_tombstones_and_hides_from_listing() {
    let store = store(100);
    let item = create(&store, "doomed");
    let clock = store.delete(item.id).unwrap();
    assert!(clock.ts > item.updated_at);

    let listed = store
        .list(USER, &ItemFilter::default(), SortOrder::DateDesc)
        .unwrap();
    assert!(listed.is_empty());

    let version = store.current_version(item.id).unwrap().unwrap();
    assert!(version.is_tombstone());
    assert_eq!(version.clock, clock);
}

#[test]
fn list_puts_pinned_first_and_respects_sort() {
    let store = store(100);
    let a = create(&store, "alpha");
    let _b = create(&store, "bravo");
    let c = create(&store, "charlie");
    store
        .update(
            c.id,
            ItemUpdate {
                is_pinned: Some(true),
                ..Default::default()
            },
            c.updated_at,
        )
        .unwrap();

    let by_title = store
        .list(USER, &ItemFilter::default(), SortOrder::TitleAsc)
        .unwrap();
    assert_eq!(by_title[0].id, c.id); // pinned leads even under title sort
    assert_eq!(by_title[1].title, "alpha");
    assert_eq!(by_title[2].title, "bravo");

    let by_date_asc = store
        .list(USER, &ItemFilter::default(), SortOrder::DateAsc)
        .unwrap();
    assert_eq!(by_date_asc[0].id, c.id);
    assert_eq!(by_date_asc[1].id, a.id);
}

#[test]
fn text_filter_matches_title_and_plain_content() {
    let store = store(100);
    create(&store, "meeting notes");
    create(&store, "shopping");

    let filter = ItemFilter {
        text: Some("notes".to_string()),
        ..Default::default()
    };
    let found = store.list(USER, &filter, SortOrder::DateDesc).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "meeting notes");
}

#[test]
fn clear_unpinned_keeps_pinned_items() {
    let store = store(100);
    let keep = create(&store, "keep");
    create(&store, "toss-1");
    create(&store, "toss-2");
    store
        .update(
            keep.id,
            ItemUpdate {
                is_pinned: Some(true),
                ..Default::default()
            },
            keep.updated_at,
        )
        .unwrap();

    assert_eq!(store.clear_unpinned(USER).unwrap(), 2);
    let left = store
        .list(USER, &ItemFilter::default(), SortOrder::DateDesc)
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, keep.id);
}

// ── Optimistic Versioning ───────────────────────────────────────

#[test]
fn stale_version_fails_with_conflict() {
    let store = store(100);
    let item = create(&store, "original");
    let updated = store
        .update(
            item.id,
            ItemUpdate {
                title: Some("edited".to_string()),
                ..Default::default()
            },
            item.updated_at,
        )
        .unwrap();

    // Second writer still holds the original version token.
    let err = store
        .update(
            item.id,
            ItemUpdate {
                title: Some("lost edit".to_string()),
                ..Default::default()
            },
            item.updated_at,
        )
        .unwrap_err();
    match err {
        StorageError::Conflict {
            item_id,
            expected,
            stored,
        } => {
            assert_eq!(item_id, item.id);
            assert_eq!(expected, item.updated_at);
            assert_eq!(stored, updated.updated_at);
        }
        other => panic!("expected Conflict, got {other}"),
    }
}

#[test]
fn update_of_missing_item_is_not_found() {
    let store = store(100);
    let err = store
        .update(ItemId::new(), ItemUpdate::default(), 0)
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

// ── Eviction ────────────────────────────────────────────────────

#[test]
fn eviction_removes_least_recently_updated_unpinned() {
    let store = store(3);
    let oldest = create(&store, "first");
    create(&store, "second");
    create(&store, "third");
    create(&store, "fourth"); // pushes past the cap

    assert_eq!(store.active_count(USER).unwrap(), 3);
    assert!(store.get_opt(oldest.id).unwrap().is_none());
}

#[test]
fn pinned_items_are_never_evicted() {
    let store = store(3);
    let pinned = create(&store, "pinned");
    store
        .update(
            pinned.id,
            ItemUpdate {
                is_pinned: Some(true),
                ..Default::default()
            },
            pinned.updated_at,
        )
        .unwrap();
    let unpinned = create(&store, "unpinned");
    create(&store, "third");
    create(&store, "fourth");

    assert!(store.get_opt(pinned.id).unwrap().is_some());
    assert!(store.get_opt(unpinned.id).unwrap().is_none());
}

#[test]
fn storage_full_when_cap_reached_with_only_pinned() {
    let store = store(2);
    for title in ["one", "two"] {
        let item = create(&store, title);
        store
            .update(
                item.id,
                ItemUpdate {
                    is_pinned: Some(true),
                    ..Default::default()
                },
                item.updated_at,
            )
            .unwrap();
    }
    let err = store
        .create(USER, b"x".to_vec(), "three", TEXT_PLAIN, false)
        .unwrap_err();
    assert!(matches!(err, StorageError::StorageFull(_)));
}

// ── Remote Apply & Tombstones ───────────────────────────────────

#[test]
fn apply_remote_is_idempotent() {
    let store = store(100);
    let mut remote = ClipboardItem::new(
        USER,
        b"remote content".to_vec(),
        "remote",
        TEXT_PLAIN,
        false,
        DeviceId::from("device-b"),
    );
    remote.updated_at += 10;
    let version = ItemVersion::from_item(remote.clone());

    store.apply_remote(USER, &version, None).unwrap();
    let first = store
        .list(USER, &ItemFilter::default(), SortOrder::DateDesc)
        .unwrap();

    store
        .apply_remote(USER, &version, Some(&version.clock))
        .unwrap();
    let second = store
        .list(USER, &ItemFilter::default(), SortOrder::DateDesc)
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert!(store.sync_status(remote.id).unwrap().unwrap().is_synced);
}

#[test]
fn remote_tombstone_overrides_live_item() {
    let store = store(100);
    let item = create(&store, "to delete remotely");
    let clock = HybridClock::new(item.updated_at + 100, DeviceId::from("device-b"));
    store
        .apply_remote(USER, &ItemVersion::tombstone(item.id, clock), Some(&item.clock()))
        .unwrap();

    assert!(store.get_opt(item.id).unwrap().is_none());
    assert!(store.current_version(item.id).unwrap().unwrap().is_tombstone());
}

#[test]
fn apply_remote_rejects_a_stale_basis() {
    let store = store(100);
    let item = create(&store, "local");
    let basis = item.clock();

    // A local edit commits after the resolver read its basis; the edit
    // carries the later clock.
    let edited = store
        .update(
            item.id,
            ItemUpdate {
                title: Some("edited locally".to_string()),
                ..Default::default()
            },
            item.updated_at,
        )
        .unwrap();

    // Newer than the basis (device tie-break) but older than the edit.
    let mut remote = item.clone();
    remote.title = "remote".to_string();
    remote.clock_device = DeviceId::from("device-b");
    assert!(basis < remote.clock());
    assert!(remote.clock() < edited.clock());

    let err = store
        .apply_remote(USER, &ItemVersion::from_item(remote), Some(&basis))
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));

    // The newer local edit survives untouched.
    let kept = store.get(item.id).unwrap();
    assert_eq!(kept.title, "edited locally");
    assert_eq!(kept.clock(), edited.clock());
}

#[test]
fn apply_remote_rejects_a_basis_for_an_absent_item() {
    let store = store(100);
    let item = create(&store, "appeared meanwhile");
    let version = ItemVersion::from_item(item);
    // Caller saw nothing, but the item exists now.
    let err = store.apply_remote(USER, &version, None).unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));
}

#[test]
fn tombstones_reap_only_after_all_devices_ack() {
    let store = store(100);
    let devices = [DeviceId::from("device-a"), DeviceId::from("device-b")];
    let item = create(&store, "shared");
    store.delete(item.id).unwrap();

    store.ack_tombstone(item.id, &devices[0]).unwrap();
    assert_eq!(store.reap_tombstones(&devices).unwrap(), 0);
    assert!(store.current_version(item.id).unwrap().is_some());

    store.ack_tombstone(item.id, &devices[1]).unwrap();
    assert_eq!(store.reap_tombstones(&devices).unwrap(), 1);
    assert!(store.current_version(item.id).unwrap().is_none());
}
