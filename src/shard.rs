//! Shard planning.
//!
//! Splits the part range `[1, part_count]` into `worker_count` contiguous
//! blocks. The first `part_count % worker_count` shards take one extra part,
//! so exactly `min(worker_count, part_count)` shards are non-empty and block
//! sizes differ by at most one.
//!
//! Fixed blocks of `ceil(part_count / worker_count)` parts do not keep that
//! guarantee: 5 parts over 4 shards would split as 2, 2, 1, 0 and leave a
//! shard idle while another holds two parts. Spreading the remainder over
//! the leading shards gives 2, 1, 1, 1.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Checkpoint of one shard: the parts it still has to confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardProgress {
    /// Smallest part of the shard not yet confirmed uploaded
    pub next_part: u32,
    /// Largest part assigned to the shard
    pub last_part: u32,
}

impl ShardProgress {
    /// Whether every part of the shard is confirmed.
    pub fn is_complete(&self) -> bool {
        self.next_part > self.last_part
    }

    /// Number of parts not yet confirmed.
    pub fn remaining(&self) -> u32 {
        if self.is_complete() {
            0
        } else {
            self.last_part - self.next_part + 1
        }
    }

    /// Whether `part_number` lies in the unconfirmed part of the shard.
    pub fn contains(&self, part_number: u32) -> bool {
        (self.next_part..=self.last_part).contains(&part_number)
    }
}

/// Part range of shard `worker_index` out of `worker_count`.
///
/// Deterministic: planning the same shard again after a crash yields the
/// same range. Shards past the last part get an empty range
/// (`next_part > last_part`).
///
/// # Errors
///
/// Returns [`Error::InvalidShard`] if `worker_index >= worker_count`.
///
/// # Example
///
/// ```
/// use partcopy::plan_shard;
///
/// // 10 parts over 4 workers: 3, 3, 2, 2
/// let shards: Vec<_> = (0..4).map(|i| plan_shard(10, i, 4).unwrap()).collect();
/// assert_eq!((shards[0].next_part, shards[0].last_part), (1, 3));
/// assert_eq!((shards[3].next_part, shards[3].last_part), (9, 10));
/// ```
pub fn plan_shard(part_count: u32, worker_index: u32, worker_count: u32) -> Result<ShardProgress> {
    if worker_index >= worker_count {
        return Err(Error::InvalidShard {
            index: worker_index,
            count: worker_count,
        });
    }
    let base = part_count / worker_count;
    let extra = part_count % worker_count;
    let size = base + u32::from(worker_index < extra);
    // Parts taken by the shards before this one.
    let before = worker_index * base + worker_index.min(extra);
    Ok(ShardProgress {
        next_part: before + 1,
        last_part: before + size,
    })
}
