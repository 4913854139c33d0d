//! Job state threaded through every invocation.
//!
//! [`CopyJobState`] is the payload the orchestrator passes into each worker
//! invocation and gets back out. Its JSON form is the only wire format the
//! engine defines.

use crate::chunking::{PartPlan, part_range};
use crate::content_id::ContentId;
use crate::shard::ShardProgress;
use crate::store::{ByteRange, ObjectLocation, UploadId};
use serde::{Deserialize, Serialize};

/// Everything a worker needs to resume its share of a copy.
///
/// Fields other than `finished` and `shard` are fixed at setup and must be
/// echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyJobState {
    /// Object being copied
    pub source: ObjectLocation,
    /// Where the copy lands
    pub destination: ObjectLocation,
    /// Content id of the source at setup time
    pub source_content_id: ContentId,
    /// Multipart session; `None` when a single part suffices
    pub upload_id: Option<UploadId>,
    /// Source size in bytes
    pub total_size: u64,
    /// Size of every part but possibly the last
    pub part_size: u64,
    /// Number of parts
    pub part_count: u32,
    /// Number of shards the parts are split into
    pub worker_count: u32,
    /// Set by a worker once its shard is exhausted
    #[serde(default)]
    pub finished: bool,
    /// The worker's checkpoint; absent before its first invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardProgress>,
}

impl CopyJobState {
    /// Part plan recorded at setup.
    pub fn plan(&self) -> PartPlan {
        PartPlan {
            total_size: self.total_size,
            part_size: self.part_size,
            part_count: self.part_count,
        }
    }

    /// Byte range of a 1-indexed part.
    pub fn byte_range(&self, part_number: u32) -> Option<ByteRange> {
        part_range(self.total_size, self.part_size, part_number)
    }
}

/// Marker a finished non-primary shard returns instead of the full state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedMarker {
    /// Always `true` in practice; kept as a field for the wire shape.
    pub finished: bool,
}

/// What one worker invocation hands back to the orchestrator.
///
/// Serialized untagged: either the full state object or
/// `{"finished": true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerOutput {
    /// Full state (primary shard, or any unfinished shard)
    State(Box<CopyJobState>),
    /// Finished non-primary shard
    Finished(FinishedMarker),
}

impl WorkerOutput {
    /// Whether the shard is done.
    pub fn is_finished(&self) -> bool {
        match self {
            Self::State(state) => state.finished,
            Self::Finished(marker) => marker.finished,
        }
    }

    /// Full state, if this output carries it.
    pub fn state(&self) -> Option<&CopyJobState> {
        match self {
            Self::State(state) => Some(state),
            Self::Finished(_) => None,
        }
    }

    /// Consume into the full state, if carried.
    pub fn into_state(self) -> Option<CopyJobState> {
        match self {
            Self::State(state) => Some(*state),
            Self::Finished(_) => None,
        }
    }
}

impl From<CopyJobState> for WorkerOutput {
    fn from(state: CopyJobState) -> Self {
        Self::State(Box::new(state))
    }
}
