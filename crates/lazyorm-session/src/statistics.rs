//! Session-factory wide counters.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters shared by every session opened from one factory.
///
/// Recording is a no-op unless statistics are enabled.
#[derive(Debug, Default)]
pub struct Statistics {
    enabled: AtomicBool,
    entity_loads: AtomicU64,
    entity_inserts: AtomicU64,
    entity_updates: AtomicU64,
    entity_deletes: AtomicU64,
    flushes: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub entity_loads: u64,
    pub entity_inserts: u64,
    pub entity_updates: u64,
    pub entity_deletes: u64,
    pub flushes: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
}

impl Statistics {
    /// Create counters, enabled or not.
    pub fn new(enabled: bool) -> Self {
        let stats = Self::default();
        stats.enabled.store(enabled, Ordering::Relaxed);
        stats
    }

    /// Whether counters are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn recording on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.is_enabled() {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_load(&self) {
        self.bump(&self.entity_loads, 1);
    }

    pub(crate) fn record_flush(&self, inserts: u64, updates: u64, deletes: u64) {
        self.bump(&self.entity_inserts, inserts);
        self.bump(&self.entity_updates, updates);
        self.bump(&self.entity_deletes, deletes);
        self.bump(&self.flushes, 1);
    }

    pub(crate) fn record_session_opened(&self) {
        self.bump(&self.sessions_opened, 1);
    }

    pub(crate) fn record_session_closed(&self) {
        self.bump(&self.sessions_closed, 1);
    }

    /// Number of rows read to build entity instances.
    pub fn entity_load_count(&self) -> u64 {
        self.entity_loads.load(Ordering::Relaxed)
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            entity_loads: self.entity_loads.load(Ordering::Relaxed),
            entity_inserts: self.entity_inserts.load(Ordering::Relaxed),
            entity_updates: self.entity_updates.load(Ordering::Relaxed),
            entity_deletes: self.entity_deletes.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter to zero.
    pub fn clear(&self) {
        for counter in [
            &self.entity_loads,
            &self.entity_inserts,
            &self.entity_updates,
            &self.entity_deletes,
            &self.flushes,
            &self.sessions_opened,
            &self.sessions_closed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_statistics_record_nothing() {
        let stats = Statistics::new(false);
        stats.record_load();
        stats.record_flush(1, 2, 3);
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn enabled_statistics_accumulate_and_clear() {
        let stats = Statistics::new(true);
        stats.record_load();
        stats.record_load();
        stats.record_flush(1, 0, 2);
        let snap = stats.snapshot();
        assert_eq!(snap.entity_loads, 2);
        assert_eq!(snap.entity_inserts, 1);
        assert_eq!(snap.entity_deletes, 2);
        assert_eq!(snap.flushes, 1);

        stats.clear();
        assert_eq!(stats.entity_load_count(), 0);
    }
}
