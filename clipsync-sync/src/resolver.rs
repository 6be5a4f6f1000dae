//! Last-writer-wins conflict resolution over hybrid clocks.
//!
//! `resolve` is a pure function with no I/O. Ordering comes entirely from
//! [`HybridClock`]: greater physical timestamp wins, ties broken by
//! lexicographically greater device id. The loser is discarded wholesale;
//! there is no field-level merge. Tombstones carry clocks like any other
//! version, so delete-beats-update and update-beats-delete need no
//! special casing.

use clipsync_types::ItemVersion;

/// Picks the winner of two concurrent versions of the same item.
///
/// Commutative up to clock equality: when both versions carry the same
/// clock they are the same write, and the first argument is returned.
pub fn resolve<'a>(a: &'a ItemVersion, b: &'a ItemVersion) -> &'a ItemVersion {
    if b.clock > a.clock {
        b
    } else {
        a
    }
}

/// Folds `resolve` over any number of versions.
///
/// Because the underlying order is total, any permutation or repetition
/// of the same version set yields the same winner.
pub fn resolve_all<'a, I>(versions: I) -> Option<&'a ItemVersion>
where
    I: IntoIterator<Item = &'a ItemVersion>,
{
    versions.into_iter().reduce(resolve)
}
