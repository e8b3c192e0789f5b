//! Decision cache kept on the autoscaler status.
//!
//! The cache is an ordered list of [`CacheEntry`] values persisted with the
//! status, so it survives controller restarts. Entries are pruned when a new
//! one is appended, never on read.

use std::time::Duration;

use runnerscale_state::{AutoscalerStatus, CacheEntry, CacheEntryKey, Timestamp};

/// Return the cached value for `key` if an unexpired entry exists.
pub fn lookup(status: &AutoscalerStatus, key: CacheEntryKey, now: Timestamp) -> Option<u32> {
    status
        .cache_entries
        .iter()
        .find(|entry| entry.key == key && entry.expiration_time > now)
        .map(|entry| entry.value)
}

/// Build the next entry list: drop expired entries and any older entry for
/// `key`, then append `{key, value, now + ttl}`.
pub fn prepare_append(
    entries: &[CacheEntry],
    key: CacheEntryKey,
    value: u32,
    now: Timestamp,
    ttl: Duration,
) -> Vec<CacheEntry> {
    let mut next: Vec<CacheEntry> = entries
        .iter()
        .filter(|entry| entry.expiration_time > now && entry.key != key)
        .cloned()
        .collect();
    next.push(CacheEntry {
        key,
        value,
        expiration_time: now.saturating_add(ttl.as_secs()),
    });
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: CacheEntryKey = CacheEntryKey::DesiredReplicas;

    fn entry(value: u32, expiration_time: Timestamp) -> CacheEntry {
        CacheEntry {
            key: KEY,
            value,
            expiration_time,
        }
    }

    fn status_with(entries: Vec<CacheEntry>) -> AutoscalerStatus {
        AutoscalerStatus {
            cache_entries: entries,
            ..Default::default()
        }
    }

    #[test]
    fn lookup_empty_is_miss() {
        assert_eq!(lookup(&AutoscalerStatus::default(), KEY, 100), None);
    }

    #[test]
    fn lookup_returns_live_entry() {
        let status = status_with(vec![entry(4, 200)]);
        assert_eq!(lookup(&status, KEY, 100), Some(4));
    }

    #[test]
    fn lookup_treats_expiration_instant_as_expired() {
        let status = status_with(vec![entry(4, 100)]);
        assert_eq!(lookup(&status, KEY, 100), None);
        assert_eq!(lookup(&status, KEY, 99), Some(4));
    }

    #[test]
    fn lookup_skips_expired_and_finds_later_live_entry() {
        let status = status_with(vec![entry(1, 50), entry(6, 500)]);
        assert_eq!(lookup(&status, KEY, 100), Some(6));
    }

    #[test]
    fn prepare_append_prunes_expired_entries() {
        let entries = vec![entry(1, 50), entry(2, 100)];
        let next = prepare_append(&entries, KEY, 3, 100, Duration::from_secs(600));
        assert_eq!(next, vec![entry(3, 700)]);
    }

    #[test]
    fn prepare_append_leaves_single_live_entry_per_key() {
        let entries = vec![entry(2, 150)];
        let next = prepare_append(&entries, KEY, 5, 100, Duration::from_secs(60));
        assert_eq!(next, vec![entry(5, 160)]);
        assert_eq!(lookup(&status_with(next), KEY, 100), Some(5));
    }

    #[test]
    fn prepare_append_does_not_mutate_input() {
        let entries = vec![entry(1, 50)];
        let _ = prepare_append(&entries, KEY, 3, 100, Duration::from_secs(600));
        assert_eq!(entries, vec![entry(1, 50)]);
    }
}
