//! First-seen tracking for matched identities.
//!
//! A tracker lives for one live-loop run. Entries never expire while it
//! lives; a new run starts from an empty tracker.

use crate::types::TrackingEntry;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Per-label first-seen timestamps, safe to share between threads.
#[derive(Debug, Default)]
pub struct SessionTracker {
    entries: Mutex<HashMap<String, DateTime<Local>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Local>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `now` as the first sighting of `label` unless one is already
    /// stored, and return the stored first-seen time.
    ///
    /// Check-and-insert happens under one lock, so concurrent callers for the
    /// same label all observe a single timestamp.
    pub fn record_if_first_seen(&self, label: &str, now: DateTime<Local>) -> DateTime<Local> {
        let mut entries = self.lock();
        if let Some(first_seen) = entries.get(label) {
            return *first_seen;
        }
        entries.insert(label.to_string(), now);
        tracing::info!(label, first_seen = %now, "first sighting");
        now
    }

    pub fn first_seen(&self, label: &str) -> Option<DateTime<Local>> {
        self.lock().get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Attendance so far, earliest arrival first (ties by label).
    pub fn snapshot(&self) -> Vec<TrackingEntry> {
        let mut entries: Vec<TrackingEntry> = self
            .lock()
            .iter()
            .map(|(label, first_seen)| TrackingEntry {
                label: label.clone(),
                first_seen: *first_seen,
            })
            .collect();
        entries.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.label.cmp(&b.label)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_first_seen_is_idempotent() {
        let tracker = SessionTracker::new();
        let t0 = Local::now();
        let t1 = t0 + Duration::seconds(30);

        assert_eq!(tracker.record_if_first_seen("Alice", t0), t0);
        assert_eq!(tracker.record_if_first_seen("Alice", t1), t0);
        assert_eq!(tracker.first_seen("Alice"), Some(t0));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_labels_tracked_independently() {
        let tracker = SessionTracker::new();
        let t0 = Local::now();
        let t1 = t0 + Duration::seconds(5);

        tracker.record_if_first_seen("Bob", t1);
        tracker.record_if_first_seen("Alice", t0);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0], TrackingEntry { label: "Alice".into(), first_seen: t0 });
        assert_eq!(snapshot[1], TrackingEntry { label: "Bob".into(), first_seen: t1 });
    }

    #[test]
    fn test_unseen_label() {
        let tracker = SessionTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.first_seen("Nobody"), None);
    }

    #[test]
    fn test_concurrent_first_sighting_stores_one_timestamp() {
        let tracker = Arc::new(SessionTracker::new());
        let base = Local::now();
        let call_times: Vec<DateTime<Local>> =
            (0..16).map(|i| base + Duration::milliseconds(i)).collect();

        let returned: Vec<DateTime<Local>> = std::thread::scope(|s| {
            let handles: Vec<_> = call_times
                .iter()
                .map(|&t| {
                    let tracker = Arc::clone(&tracker);
                    s.spawn(move || tracker.record_if_first_seen("Alice", t))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let stored = tracker.first_seen("Alice").unwrap();
        assert_eq!(tracker.len(), 1);
        assert!(call_times.contains(&stored));
        assert!(returned.iter().all(|&t| t == stored));
    }
}
