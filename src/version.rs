//! Version number allocation for one generation run.
//!
//! A single task owns the allocator. Workers never pick their own numbers:
//! they get one handed over with their job.

use std::ops::Range;

/// Strictly increasing version counter.
#[derive(Debug)]
pub struct VersionAllocator {
    next: u64,
}

impl VersionAllocator {
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Seeded with the current Unix timestamp, like hand-made migrations.
    pub fn from_clock() -> Self {
        Self::starting_at(now_version())
    }

    /// Next free version.
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn next_version(&mut self) -> u64 {
        let version = self.next;
        self.next += 1;
        version
    }

    /// Take a contiguous block of `len` versions.
    pub fn reserve(&mut self, len: u64) -> VersionBlock {
        let start = self.next;
        self.next += len;
        VersionBlock { range: start..self.next }
    }
}

/// A reserved run of versions, handed out `stride` at a time.
#[derive(Debug)]
pub struct VersionBlock {
    range: Range<u64>,
}

impl VersionBlock {
    /// First `stride` versions of what's left, or `None` when exhausted.
    pub fn take(&mut self, stride: u64) -> Option<u64> {
        if self.range.end - self.range.start < stride {
            return None;
        }
        let version = self.range.start;
        self.range.start += stride;
        Some(version)
    }
}

/// Current Unix timestamp as a migration version.
pub fn now_version() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_is_strictly_increasing() {
        let mut alloc = VersionAllocator::starting_at(100);
        assert_eq!(alloc.next_version(), 100);
        assert_eq!(alloc.next_version(), 101);

        let mut block = alloc.reserve(4);
        assert_eq!(alloc.peek(), 106);
        assert_eq!(block.take(2), Some(102));
        assert_eq!(block.take(2), Some(104));
        assert_eq!(block.take(2), None);
        assert_eq!(alloc.next_version(), 106);
    }

    #[test]
    fn test_clock_seed_is_recent() {
        // 2020-01-01
        assert!(now_version() > 1_577_836_800);
    }
}
