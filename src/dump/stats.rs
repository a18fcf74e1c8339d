//! Counts gathered while dumping

use std::fmt::{self, Display};

use indexmap::IndexMap;

/// Records and bytes attributed to one type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTally {
    pub count: u64,
    /// Sum of the recorded object sizes
    pub bytes: u64,
}

/// The statistics of one dump
#[derive(Debug, Clone, Default)]
pub struct DumpStats {
    /// Records written to the sink
    pub records: u64,
    /// Bytes of output written to the sink
    pub bytes_written: u64,
    /// Objects not emitted because they were in the skip set
    pub skipped: u64,
    /// Objects not emitted because they had already been emitted
    pub duplicates: u64,
    /// Size overrides or hooks that produced unusable figures
    pub size_anomalies: u64,
    /// Objects whose referents could not be enumerated
    pub referent_failures: u64,
    by_type: IndexMap<String, TypeTally>,
}

impl DumpStats {
    pub(crate) fn record_emitted(&mut self, type_name: &str, size: usize, encoded: usize) {
        let size = u64::try_from(size).unwrap_or(u64::MAX);
        self.records += 1;
        self.bytes_written = self
            .bytes_written
            .saturating_add(u64::try_from(encoded).unwrap_or(u64::MAX));
        match self.by_type.get_mut(type_name) {
            Some(tally) => {
                tally.count += 1;
                tally.bytes = tally.bytes.saturating_add(size);
            }
            None => {
                self.by_type.insert(
                    type_name.to_string(),
                    TypeTally {
                        count: 1,
                        bytes: size,
                    },
                );
            }
        }
    }

    /// Per-type tallies in order of first appearance
    pub fn by_type(&self) -> &IndexMap<String, TypeTally> {
        &self.by_type
    }

    /// Sum of the sizes of every emitted object
    pub fn total_size(&self) -> u64 {
        self.by_type
            .values()
            .fold(0u64, |acc, t| acc.saturating_add(t.bytes))
    }

    pub fn merge(&mut self, other: DumpStats) {
        self.records += other.records;
        self.bytes_written = self.bytes_written.saturating_add(other.bytes_written);
        self.skipped += other.skipped;
        self.duplicates += other.duplicates;
        self.size_anomalies += other.size_anomalies;
        self.referent_failures += other.referent_failures;
        for (name, tally) in other.by_type {
            let entry = self.by_type.entry(name).or_default();
            entry.count += tally.count;
            entry.bytes = entry.bytes.saturating_add(tally.bytes);
        }
    }
}

impl Display for DumpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Records           : {:10}", self.records)?;
        writeln!(f, "Bytes Written     : {:10}", self.bytes_written)?;
        writeln!(f, "Total Size        : {:10}", self.total_size())?;
        writeln!(f, "Skipped           : {:10}", self.skipped)?;
        writeln!(f, "Duplicates        : {:10}", self.duplicates)?;
        writeln!(f, "Size Anomalies    : {:10}", self.size_anomalies)?;
        writeln!(f, "Referent Failures : {:10}", self.referent_failures)?;

        if self.by_type.is_empty() {
            return Ok(());
        }
        writeln!(f)?;
        let width = self.by_type.keys().map(|k| k.len()).max().unwrap_or(0) + 1;
        let mut rows: Vec<_> = self.by_type.iter().collect();
        rows.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes));
        for (name, tally) in rows {
            writeln!(
                f,
                "{:width$}: {:10} {:14}",
                name,
                tally.count,
                tally.bytes,
                width = width
            )?;
        }
        Ok(())
    }
}
