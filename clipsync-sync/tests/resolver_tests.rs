use clipsync_sync::{resolve, resolve_all};
use clipsync_types::{ClipboardItem, DeviceId, HybridClock, ItemId, ItemVersion};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn version(item_id: ItemId, ts: i64, device: &str, title: &str) -> ItemVersion {
    let device = DeviceId::from(device);
    let mut item = ClipboardItem::new(
        "user-1",
        title.as_bytes().to_vec(),
        title,
        "text/plain",
        false,
        device.clone(),
    );
    item.id = item_id;
    item.updated_at = ts;
    item.clock_device = device;
    ItemVersion::from_item(item)
}

fn tombstone(item_id: ItemId, ts: i64, device: &str) -> ItemVersion {
    ItemVersion::tombstone(item_id, HybridClock::new(ts, DeviceId::from(device)))
}

// ── Pairwise ordering ─────────────────────────────────────────────────

#[test]
fn later_timestamp_wins() {
    let id = ItemId::new();
    let a = version(id, 50, "X", "older");
    let b = version(id, 80, "Y", "newer");
    assert_eq!(resolve(&a, &b), &b);
    assert_eq!(resolve(&b, &a), &b);
}

#[test]
fn timestamp_tie_breaks_on_device_id() {
    let id = ItemId::new();
    let a = version(id, 100, "A", "from a");
    let b = version(id, 100, "B", "from b");
    assert_eq!(resolve(&a, &b), &b);
    assert_eq!(resolve(&b, &a), &b);
}

#[test]
fn equal_clocks_return_the_first_argument() {
    let id = ItemId::new();
    let a = version(id, 100, "A", "same write");
    let dup = a.clone();
    assert!(std::ptr::eq(resolve(&a, &dup), &a));
}

#[test]
fn delete_beats_older_update() {
    let id = ItemId::new();
    let edit = version(id, 100, "A", "edited");
    let del = tombstone(id, 200, "B");
    assert_eq!(resolve(&edit, &del), &del);
    assert!(resolve(&edit, &del).is_tombstone());
}

#[test]
fn update_beats_older_delete() {
    let id = ItemId::new();
    let del = tombstone(id, 100, "B");
    let edit = version(id, 200, "A", "resurrected");
    assert_eq!(resolve(&del, &edit), &edit);
    assert!(!resolve(&del, &edit).is_tombstone());
}

// ── Convergence over many versions ────────────────────────────────────

#[test]
fn resolve_all_of_nothing_is_none() {
    assert_eq!(resolve_all(std::iter::empty()), None);
}

#[test]
fn resolve_all_picks_the_global_maximum() {
    let id = ItemId::new();
    let versions = vec![
        version(id, 10, "C", "v1"),
        version(id, 30, "A", "v3"),
        tombstone(id, 20, "B"),
        version(id, 30, "B", "v3b"),
    ];
    let winner = resolve_all(&versions).unwrap();
    assert_eq!(winner.clock, HybridClock::new(30, DeviceId::from("B")));
}

proptest! {
    /// Folding any delivery order of the same concurrent version set,
    /// duplicates included, converges on the clock-maximal version.
    #[test]
    fn arbitrary_delivery_order_converges(
        clocks in prop::collection::vec((0i64..1000, "[a-z]{1,8}"), 1..8).prop_shuffle(),
    ) {
        let id = ItemId::new();
        let versions: Vec<ItemVersion> = clocks
            .iter()
            .map(|(ts, device)| version(id, *ts, device, "payload"))
            .collect();

        let maximal = versions
            .iter()
            .map(|v| v.clock.clone())
            .max()
            .unwrap();

        // Every version delivered twice, in the shuffled order.
        let doubled: Vec<&ItemVersion> = versions.iter().chain(versions.iter()).collect();
        let winner = resolve_all(doubled).unwrap();
        prop_assert_eq!(&winner.clock, &maximal);
    }
}
