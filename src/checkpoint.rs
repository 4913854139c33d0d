//! In-flight shard checkpoint.
//!
//! Part copies complete in any order. `next_part` only moves over parts
//! whose acknowledgment has been observed, so a part that failed (or was
//! never submitted) holds the checkpoint back even when later parts
//! succeeded. Completions above `next_part` are remembered until the gap
//! closes; completions below it change nothing.

use crate::shard::ShardProgress;
use std::collections::BTreeSet;

/// Shard progress plus the out-of-order completions seen so far.
#[derive(Debug, Clone)]
pub struct ShardCheckpoint {
    progress: ShardProgress,
    completed: BTreeSet<u32>,
}

impl ShardCheckpoint {
    /// Start from a persisted checkpoint.
    pub fn new(progress: ShardProgress) -> Self {
        Self {
            progress,
            completed: BTreeSet::new(),
        }
    }

    /// Start from a persisted checkpoint, treating `present` parts (already
    /// held by the upload session) as confirmed.
    pub fn with_present(progress: ShardProgress, present: impl IntoIterator<Item = u32>) -> Self {
        let mut checkpoint = Self::new(progress);
        for part in present {
            checkpoint.record(part);
        }
        checkpoint
    }

    /// Fold one acknowledged part into the checkpoint.
    ///
    /// Returns `true` if `next_part` advanced.
    pub fn record(&mut self, part_number: u32) -> bool {
        if !self.progress.contains(part_number) {
            return false;
        }
        self.completed.insert(part_number);
        let before = self.progress.next_part;
        while self.completed.remove(&self.progress.next_part) {
            self.progress.next_part += 1;
        }
        self.progress.next_part != before
    }

    /// Current persisted form.
    pub fn progress(&self) -> ShardProgress {
        self.progress
    }

    /// Parts acknowledged beyond a gap, not yet reflected in `next_part`.
    pub fn pending_out_of_order(&self) -> usize {
        self.completed.len()
    }
}
