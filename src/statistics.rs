use std::time::Duration;

use crate::globals::GENERATION_COUNT;
use crate::page::Generation;

/// Objects and bytes moved by one collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyCounters {
    pub pairs: usize,
    pub weak_pairs: usize,
    pub symbols: usize,
    pub closures: usize,
    pub vectors: usize,
    pub records: usize,
    pub continuations: usize,
    pub strings: usize,
    pub buckets: usize,
    pub ports: usize,
    pub bignums: usize,
    pub code_objects: usize,
    /// Large code objects retagged instead of copied.
    pub code_promoted_in_place: usize,
    pub bytes_promoted: usize,
    pub pages_freed: usize,
}

impl CopyCounters {
    pub fn objects(&self) -> usize {
        self.pairs
            + self.weak_pairs
            + self.symbols
            + self.closures
            + self.vectors
            + self.records
            + self.continuations
            + self.strings
            + self.buckets
            + self.ports
            + self.bignums
            + self.code_objects
            + self.code_promoted_in_place
    }

    fn accumulate(&mut self, other: &CopyCounters) {
        self.pairs += other.pairs;
        self.weak_pairs += other.weak_pairs;
        self.symbols += other.symbols;
        self.closures += other.closures;
        self.vectors += other.vectors;
        self.records += other.records;
        self.continuations += other.continuations;
        self.strings += other.strings;
        self.buckets += other.buckets;
        self.ports += other.ports;
        self.bignums += other.bignums;
        self.code_objects += other.code_objects;
        self.code_promoted_in_place += other.code_promoted_in_place;
        self.bytes_promoted += other.bytes_promoted;
        self.pages_freed += other.pages_freed;
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeapStatistics {
    pub collections: [usize; GENERATION_COUNT],
    pub totals: CopyCounters,
    pub last: CopyCounters,
    pub mapped_pages: usize,
    pub nursery_size: usize,
    pub user_time: Duration,
    pub system_time: Duration,
}

impl HeapStatistics {
    pub fn record(&mut self, target: Generation, counters: CopyCounters) {
        self.collections[target.index()] += 1;
        self.totals.accumulate(&counters);
        self.last = counters;
    }

    pub fn total_collections(&self) -> usize {
        self.collections.iter().sum()
    }
}

pub struct FormattedSize {
    pub size: usize,
}

impl std::fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ksize = (self.size as f64) / 1024f64;

        if ksize < 1f64 {
            return write!(f, "{}B", self.size);
        }

        let msize = ksize / 1024f64;

        if msize < 1f64 {
            return write!(f, "{:.1}K", ksize);
        }

        let gsize = msize / 1024f64;

        if gsize < 1f64 {
            write!(f, "{:.1}M", msize)
        } else {
            write!(f, "{:.1}G", gsize)
        }
    }
}

pub fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size }
}

impl std::fmt::Display for HeapStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Heap statistics:")?;
        writeln!(
            f,
            "  Collections: {} (per generation {:?})",
            self.total_collections(),
            self.collections
        )?;
        writeln!(
            f,
            "  Nursery size: {}",
            formatted_size(self.nursery_size)
        )?;
        writeln!(
            f,
            "  Mapped pages: {} ({})",
            self.mapped_pages,
            formatted_size(self.mapped_pages * crate::globals::PAGE_SIZE)
        )?;
        let t = &self.totals;
        writeln!(f, "  Objects promoted: {}", t.objects())?;
        writeln!(
            f,
            "    pairs {} weak pairs {} symbols {} closures {} vectors {} records {}",
            t.pairs, t.weak_pairs, t.symbols, t.closures, t.vectors, t.records
        )?;
        writeln!(
            f,
            "    continuations {} strings {} buckets {} ports {} bignums {} code {} (in place {})",
            t.continuations,
            t.strings,
            t.buckets,
            t.ports,
            t.bignums,
            t.code_objects,
            t.code_promoted_in_place
        )?;
        writeln!(
            f,
            "  Memory promoted: {}",
            formatted_size(t.bytes_promoted)
        )?;
        writeln!(f, "  Pages freed: {}", t.pages_freed)?;
        writeln!(
            f,
            "  Collector time: user {:.3}s system {:.3}s",
            self.user_time.as_secs_f64(),
            self.system_time.as_secs_f64()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_format_with_units() {
        assert_eq!(formatted_size(512).to_string(), "512B");
        assert_eq!(formatted_size(2048).to_string(), "2.0K");
        assert_eq!(formatted_size(3 * 1024 * 1024).to_string(), "3.0M");
    }

    #[test]
    fn records_accumulate() {
        let mut stats = HeapStatistics::default();
        let counters = CopyCounters {
            pairs: 2,
            strings: 1,
            bytes_promoted: 48,
            ..Default::default()
        };
        stats.record(Generation::Nursery, counters);
        stats.record(Generation::First, counters);
        assert_eq!(stats.collections[0], 1);
        assert_eq!(stats.collections[1], 1);
        assert_eq!(stats.totals.objects(), 6);
        assert_eq!(stats.totals.bytes_promoted, 96);
        assert!(stats.to_string().contains("Collections: 2"));
    }
}
