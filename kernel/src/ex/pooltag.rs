//! Pool Tag Tracking
//!
//! Every pool allocation carries a 4-character tag naming its owner. The
//! tag table keeps per-tag counters so outstanding allocations can be
//! attributed: object bodies are tagged with their type's key, captured
//! names with `ObNm`, create-information records with `ObCI`.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use crate::mm::pool::{make_tag, PoolTag};

/// Pool tag from the first four UTF-16 units of a name, each truncated to
/// its low byte and space-padded
pub fn str_to_pool_tag(s: &str) -> PoolTag {
    let mut tag = [b' '; 4];
    for (slot, unit) in tag.iter_mut().zip(s.encode_utf16()) {
        *slot = unit as u8;
    }
    make_tag(tag[0], tag[1], tag[2], tag[3])
}

/// The four characters of a tag
pub fn pool_tag_chars(tag: PoolTag) -> [u8; 4] {
    tag.to_le_bytes()
}

/// Counters for one tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolTagSnapshot {
    pub tag: PoolTag,
    pub alloc_count: u64,
    pub free_count: u64,
    /// Outstanding allocations (alloc - free)
    pub current_count: u64,
    pub total_bytes: u64,
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub non_paged_allocs: u64,
    pub paged_allocs: u64,
}

impl PoolTagSnapshot {
    fn new(tag: PoolTag) -> Self {
        Self {
            tag,
            ..Default::default()
        }
    }
}

/// Table totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolTagStats {
    pub tag_count: usize,
    pub total_allocs: u64,
    pub total_frees: u64,
    pub total_bytes: u64,
    pub outstanding_allocs: u64,
}

/// Per-tag allocation accounting
pub struct PoolTagTable {
    entries: Mutex<BTreeMap<PoolTag, PoolTagSnapshot>>,
}

impl PoolTagTable {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record an allocation
    pub fn record_alloc(&self, tag: PoolTag, size: usize, paged: bool) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(tag).or_insert_with(|| PoolTagSnapshot::new(tag));
        entry.alloc_count += 1;
        entry.current_count += 1;
        entry.total_bytes += size as u64;
        entry.current_bytes += size as u64;
        entry.peak_bytes = entry.peak_bytes.max(entry.current_bytes);
        if paged {
            entry.paged_allocs += 1;
        } else {
            entry.non_paged_allocs += 1;
        }
    }

    /// Record a free
    pub fn record_free(&self, tag: PoolTag, size: usize) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&tag) {
            Some(entry) => {
                entry.free_count += 1;
                entry.current_count = entry.current_count.saturating_sub(1);
                entry.current_bytes = entry.current_bytes.saturating_sub(size as u64);
            }
            None => {
                log::error!("[EX] Free recorded for untracked pool tag {:#010x}", tag);
            }
        }
    }

    /// Counters for one tag
    pub fn snapshot(&self, tag: PoolTag) -> Option<PoolTagSnapshot> {
        self.entries.lock().get(&tag).copied()
    }

    /// Outstanding allocations for a tag (0 if never seen)
    pub fn outstanding(&self, tag: PoolTag) -> u64 {
        self.snapshot(tag).map_or(0, |s| s.current_count)
    }

    /// Tags with outstanding allocations
    pub fn find_leaking_tags(&self) -> Vec<PoolTagSnapshot> {
        self.entries
            .lock()
            .values()
            .filter(|s| s.current_count > 0)
            .copied()
            .collect()
    }

    /// Totals across all tags
    pub fn stats(&self) -> PoolTagStats {
        let entries = self.entries.lock();
        let mut stats = PoolTagStats {
            tag_count: entries.len(),
            ..Default::default()
        };
        for entry in entries.values() {
            stats.total_allocs += entry.alloc_count;
            stats.total_frees += entry.free_count;
            stats.total_bytes += entry.total_bytes;
            stats.outstanding_allocs += entry.current_count;
        }
        stats
    }
}

impl Default for PoolTagTable {
    fn default() -> Self {
        Self::new()
    }
}
