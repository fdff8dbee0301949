//! In-memory sorted index over a file's Data section, enabling ordered and
//! ranged iteration without redecoding every record up front.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTag {
    Data(u16),
    Log,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: u64,
    pub offset: u64,
    pub tag: IndexTag,
}

#[derive(Debug, Default)]
pub struct TimeIndex {
    entries: Vec<IndexEntry>,
}

impl TimeIndex {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// Sorts by `(timestamp, offset)` ascending; the offset tiebreak
    /// preserves file order across records sharing a timestamp.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.offset.cmp(&b.offset)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn time_range(&self) -> Option<(u64, u64)> {
        let time_bearing: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| matches!(e.tag, IndexTag::Data(_) | IndexTag::Log))
            .map(|e| e.timestamp)
            .collect();
        let first = *time_bearing.first()?;
        let last = *time_bearing.last()?;
        Some((first, last))
    }

    /// Smallest `i` with `ts[i] >= start`, largest `j` with `ts[j] <= end`.
    /// Returns `None` if no index exists in `[start, end]`, or on an empty index.
    pub fn find_range(&self, start: u64, end: u64) -> Option<(usize, usize)> {
        if self.entries.is_empty() || start > end {
            return None;
        }
        let i = self.entries.partition_point(|e| e.timestamp < start);
        if i >= self.entries.len() || self.entries[i].timestamp > end {
            return None;
        }
        let j = self.entries.partition_point(|e| e.timestamp <= end);
        if j == 0 {
            return None;
        }
        let j = j - 1;
        if i > j {
            return None;
        }
        Some((i, j))
    }
}
