//! Part-size policy.
//!
//! Maps an object size to the part size and part count used for its
//! multipart copy. The defaults follow the S3 multipart limits.
//!
//! # Example
//!
//! ```
//! use partcopy::ChunkingPolicy;
//!
//! let policy = ChunkingPolicy::default();
//! let plan = policy.plan(200 * 1024 * 1024)?;
//! assert_eq!(plan.part_size, 64 * 1024 * 1024);
//! assert_eq!(plan.part_count, 4);
//! # Ok::<(), partcopy::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::store::ByteRange;
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Default smallest part (64 MiB).
pub const DEFAULT_MIN_PART_SIZE: u64 = 64 * MIB;

/// Largest part an S3-compatible service accepts (5 GiB).
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;

/// Most parts a single multipart upload may hold.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Granularity part sizes are rounded up to once they grow past the minimum.
pub const DEFAULT_PART_ALIGNMENT: u64 = MIB;

/// Part-size policy.
///
/// Parts are `min_part_size` bytes as long as the object fits in
/// `max_part_count` of them. Larger objects get `ceil(size / max_part_count)`
/// rounded up to `alignment`, which keeps the count within the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingPolicy {
    /// Smallest part size (default: 64 MiB)
    pub min_part_size: u64,
    /// Largest part size the destination accepts (default: 5 GiB)
    pub max_part_size: u64,
    /// Most parts per upload (default: 10 000)
    pub max_part_count: u64,
    /// Rounding unit for grown part sizes (default: 1 MiB)
    pub alignment: u64,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_part_count: MAX_PART_COUNT,
            alignment: DEFAULT_PART_ALIGNMENT,
        }
    }
}

impl ChunkingPolicy {
    /// Set the smallest part size.
    ///
    /// Value is clamped to at least 1 byte.
    #[must_use]
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes.max(1);
        self
    }

    /// Set the largest accepted part size.
    #[must_use]
    pub fn with_max_part_size(mut self, bytes: u64) -> Self {
        self.max_part_size = bytes.max(1);
        self
    }

    /// Set the part-count limit.
    ///
    /// Value is clamped to at least 1.
    #[must_use]
    pub fn with_max_part_count(mut self, count: u64) -> Self {
        self.max_part_count = count.max(1);
        self
    }

    /// Part size for an object of `total_size` bytes.
    ///
    /// Defined for every size; never returns 0.
    pub fn part_size(&self, total_size: u64) -> u64 {
        let min = self.min_part_size.max(1);
        let max_count = self.max_part_count.max(1);
        if total_size <= min.saturating_mul(max_count) {
            return min;
        }
        let per_part = total_size.div_ceil(max_count);
        let alignment = self.alignment.max(1);
        per_part.div_ceil(alignment).saturating_mul(alignment).max(min)
    }

    /// Part size and count for an object of `total_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectTooLarge`] if the object needs parts larger
    /// than `max_part_size`.
    pub fn plan(&self, total_size: u64) -> Result<PartPlan> {
        let part_size = self.part_size(total_size);
        if part_size > self.max_part_size {
            return Err(Error::ObjectTooLarge {
                size: total_size,
                part_size,
                max_part_size: self.max_part_size,
            });
        }
        let part_count = u32::try_from(part_count(total_size, part_size)).map_err(|_| {
            Error::ObjectTooLarge {
                size: total_size,
                part_size,
                max_part_size: self.max_part_size,
            }
        })?;
        Ok(PartPlan {
            total_size,
            part_size,
            part_count,
        })
    }
}

/// Number of `part_size` parts covering `total_size` bytes.
///
/// An empty object still takes one (empty) part.
pub fn part_count(total_size: u64, part_size: u64) -> u64 {
    total_size.div_ceil(part_size.max(1)).max(1)
}

/// How an object is split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// Object size in bytes
    pub total_size: u64,
    /// Size of every part but possibly the last
    pub part_size: u64,
    /// Number of parts (at least 1)
    pub part_count: u32,
}

impl PartPlan {
    /// Whether the object needs a multipart-upload session.
    pub fn is_multipart(&self) -> bool {
        self.part_count > 1
    }

    /// Byte range of a 1-indexed part.
    ///
    /// Returns `None` for part numbers outside `1..=part_count` and for the
    /// single part of an empty object.
    pub fn byte_range(&self, part_number: u32) -> Option<ByteRange> {
        part_range(self.total_size, self.part_size, part_number)
    }
}

/// Byte range of `part_number` in an object of `total_size` bytes.
pub(crate) fn part_range(total_size: u64, part_size: u64, part_number: u32) -> Option<ByteRange> {
    if part_number == 0 {
        return None;
    }
    let start = u64::from(part_number - 1).checked_mul(part_size)?;
    if start >= total_size {
        return None;
    }
    let end = u64::from(part_number)
        .saturating_mul(part_size)
        .min(total_size);
    Some(ByteRange::new(start, end - 1))
}
