//! Talk-group tracking.
//!
//! Each system keeps a table of talk-group bindings indexed three ways:
//! by talk-group id, by voice frequency, and by source id. The three maps
//! are kept consistent under one lock; lookups copy the record out so no
//! reference escapes the critical section. Staleness is checked on read
//! against a purge interval, so no background reaper is needed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use skywave_common::types::TalkGroup;

/// Default freshness window for a talk-group binding.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Default)]
struct Indexes {
    by_tgid: HashMap<u16, TalkGroup>,
    by_freq: HashMap<u64, TalkGroup>,
    by_source: HashMap<u16, TalkGroup>,
}

/// Per-system talk-group table.
pub struct TalkGroupTable {
    system_id: u32,
    purge_interval: Duration,
    indexes: Mutex<Indexes>,
}

impl TalkGroupTable {
    pub fn new(system_id: u32, purge_interval: Duration) -> Self {
        Self {
            system_id,
            purge_interval,
            indexes: Mutex::new(Indexes::default()),
        }
    }

    /// Bind `tgid` to a source and frequency. Stale index entries for the
    /// previous frequency or source are removed in the same critical section
    /// as the re-insertion, so the three maps never disagree outside it.
    pub fn update(&self, tgid: u16, source_id: u16, frequency: u64) {
        let mut guard = self.indexes.lock().expect("talk-group lock poisoned");
        let idx = &mut *guard;

        let previous = idx
            .by_tgid
            .get(&tgid)
            .map(|r| (r.frequency, r.source_id));
        if let Some((old_freq, old_source)) = previous {
            if frequency != old_freq {
                idx.by_freq.remove(&old_freq);
            }
            if source_id != old_source {
                idx.by_source.remove(&old_source);
            }
        }

        let record = TalkGroup {
            id: tgid,
            system_id: self.system_id,
            source_id,
            frequency,
            last_update: Instant::now(),
        };
        idx.by_tgid.insert(tgid, record.clone());
        idx.by_freq.insert(frequency, record.clone());
        idx.by_source.insert(source_id, record);
    }

    fn validate(&self, record: Option<&TalkGroup>) -> Option<TalkGroup> {
        let record = record?;
        if record.frequency == 0 || record.last_update.elapsed() > self.purge_interval {
            return None;
        }
        Some(record.clone())
    }

    pub fn lookup_by_tgid(&self, tgid: u16) -> Option<TalkGroup> {
        let idx = self.indexes.lock().expect("talk-group lock poisoned");
        self.validate(idx.by_tgid.get(&tgid))
    }

    pub fn lookup_by_frequency(&self, frequency: u64) -> Option<TalkGroup> {
        let idx = self.indexes.lock().expect("talk-group lock poisoned");
        self.validate(idx.by_freq.get(&frequency))
    }

    pub fn lookup_by_source(&self, source_id: u16) -> Option<TalkGroup> {
        let idx = self.indexes.lock().expect("talk-group lock poisoned");
        self.validate(idx.by_source.get(&source_id))
    }
}

/// All systems' tables, created on first use.
pub struct SystemDirectory {
    purge_interval: Duration,
    tables: Mutex<HashMap<u32, std::sync::Arc<TalkGroupTable>>>,
}

impl SystemDirectory {
    pub fn new(purge_interval: Duration) -> Self {
        Self {
            purge_interval,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn table(&self, system_id: u32) -> std::sync::Arc<TalkGroupTable> {
        let mut tables = self.tables.lock().expect("directory lock poisoned");
        tables
            .entry(system_id)
            .or_insert_with(|| {
                std::sync::Arc::new(TalkGroupTable::new(system_id, self.purge_interval))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TalkGroupTable {
        TalkGroupTable::new(1400, DEFAULT_PURGE_INTERVAL)
    }

    #[test]
    fn test_update_then_lookup_all_views() {
        let t = table();
        t.update(100, 1, 851_100_000);

        for record in [
            t.lookup_by_tgid(100),
            t.lookup_by_frequency(851_100_000),
            t.lookup_by_source(1),
        ] {
            let record = record.expect("fresh record");
            assert_eq!(record.id, 100);
            assert_eq!(record.source_id, 1);
            assert_eq!(record.frequency, 851_100_000);
            assert_eq!(record.system_id, 1400);
            assert!(record.last_update.elapsed() < Duration::from_secs(1));
        }
    }

    #[test]
    fn test_reassignment_clears_stale_index_entries() {
        let t = table();
        t.update(100, 1, 851_100_000);
        t.update(100, 2, 852_200_000);

        // New bindings resolve
        assert_eq!(t.lookup_by_frequency(852_200_000).unwrap().id, 100);
        assert_eq!(t.lookup_by_source(2).unwrap().id, 100);
        // Old ones are gone
        assert!(t.lookup_by_frequency(851_100_000).is_none());
        assert!(t.lookup_by_source(1).is_none());
    }

    #[test]
    fn test_expiry_on_read() {
        let t = TalkGroupTable::new(1400, Duration::from_millis(40));
        t.update(100, 1, 851_100_000);
        assert!(t.lookup_by_frequency(851_100_000).is_some());

        std::thread::sleep(Duration::from_millis(60));
        assert!(t.lookup_by_frequency(851_100_000).is_none());
        assert!(t.lookup_by_tgid(100).is_none());
        assert!(t.lookup_by_source(1).is_none());
    }

    #[test]
    fn test_zero_frequency_never_returned() {
        let t = table();
        t.update(100, 1, 0);
        assert!(t.lookup_by_tgid(100).is_none());
    }

    #[test]
    fn test_refresh_extends_lifetime() {
        let t = TalkGroupTable::new(1400, Duration::from_millis(50));
        t.update(100, 1, 851_100_000);
        std::thread::sleep(Duration::from_millis(30));
        t.update(100, 1, 851_100_000);
        std::thread::sleep(Duration::from_millis(30));
        // 60 ms after creation but only 30 ms after refresh
        assert!(t.lookup_by_tgid(100).is_some());
    }

    #[test]
    fn test_directory_returns_same_table() {
        let dir = SystemDirectory::new(DEFAULT_PURGE_INTERVAL);
        let a = dir.table(1400);
        let b = dir.table(1400);
        a.update(7, 1, 851_000_000);
        assert!(b.lookup_by_tgid(7).is_some());
    }
}
