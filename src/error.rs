//! Error types for partcopy.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`] is what an [`ObjectStore`](crate::ObjectStore) backend
//!   reports for a single storage call.
//! - [`Error`] is what the engine (setup, worker, finalizer) reports to the
//!   orchestrator driving the job.
//!
//! # Error Categories
//!
//! | Category | Errors | Retryable |
//! |----------|--------|-----------|
//! | Setup | [`Error::SourceNotFound`], [`Error::UploadSession`], [`Error::ObjectTooLarge`] | no |
//! | Moving source | [`Error::SourceChanged`] | no |
//! | Integrity | [`Error::IncompleteUpload`], [`Error::IntegrityMismatch`] | no |
//! | Orchestration | [`Error::ShardsUnfinished`], [`Error::MissingPrimaryState`], [`Error::InvalidShard`], [`Error::InvalidState`] | no |
//! | Storage | [`Error::Store`] | depends on the [`StoreError`] |

use crate::content_id::ContentId;
use crate::store::{ObjectLocation, UploadId};
use std::io;
use thiserror::Error;

/// Result type for partcopy operations.
///
/// This is a type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for a single storage call.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by an object-store backend.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The object does not exist
    #[error("Object not found: {0}")]
    NotFound(ObjectLocation),

    /// The source no longer carries the expected content identifier
    #[error("Precondition failed for {location}: expected content id {expected}, found {actual}")]
    PreconditionFailed {
        /// Object whose content changed
        location: ObjectLocation,
        /// Content id the caller conditioned on
        expected: ContentId,
        /// Content id the object carries now
        actual: ContentId,
    },

    /// The multipart-upload session does not exist (committed or aborted)
    #[error("No such upload {upload_id} for {location}")]
    NoSuchUpload {
        /// Destination of the session
        location: ObjectLocation,
        /// Session identifier
        upload_id: UploadId,
    },

    /// A part was rejected (bad number, bad range, missing on commit)
    #[error("Invalid part {part_number}: {reason}")]
    InvalidPart {
        /// Part number as sent by the caller
        part_number: u32,
        /// What was wrong with it
        reason: String,
    },

    /// The location cannot be represented by this backend
    #[error("Invalid location {location}: {reason}")]
    InvalidLocation {
        /// The offending location
        location: ObjectLocation,
        /// What was wrong with it
        reason: String,
    },

    /// IO error inside the backend
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Any other service-side failure (throttling, 5xx, timeouts)
    #[error("Storage service error: {0}")]
    Service(String),
}

impl StoreError {
    /// Whether a repeat of the same call may succeed.
    ///
    /// Missing objects, rejected preconditions and malformed requests do not
    /// heal on their own; IO and service hiccups do.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Service(_))
    }
}

/// Machine-readable error codes, stable across releases.
///
/// The orchestrator-facing CLI prints these next to the human message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// Source object is missing
    SourceNotFound,
    /// Destination refused to open a multipart session
    UploadSession,
    /// Source content changed after setup
    SourceChanged,
    /// Uploaded part set is incomplete
    IncompleteUpload,
    /// Composite content id does not match the source
    IntegrityMismatch,
    /// Object cannot be split within the part limits
    ObjectTooLarge,
    /// Shard outputs are not ready for finalization
    ShardsUnfinished,
    /// Caller passed a malformed state or shard index
    InvalidInput,
    /// Storage backend failure
    Storage,
    /// Bug or unexpected condition
    Internal,
}

impl ErrorCode {
    /// Stable string form of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceNotFound => "source_not_found",
            Self::UploadSession => "upload_session",
            Self::SourceChanged => "source_changed",
            Self::IncompleteUpload => "incomplete_upload",
            Self::IntegrityMismatch => "integrity_mismatch",
            Self::ObjectTooLarge => "object_too_large",
            Self::ShardsUnfinished => "shards_unfinished",
            Self::InvalidInput => "invalid_input",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }
}

/// Errors that can occur while setting up, running or finalizing a copy job.
///
/// Use [`Error::is_retryable`] to decide whether the orchestrator should
/// re-invoke the failed step or abort the whole job.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Source object does not exist
    #[error("Source object does not exist: {0}")]
    SourceNotFound(ObjectLocation),

    /// Destination rejected the multipart-upload session
    #[error("Failed to open upload session for {destination}: {source}")]
    UploadSession {
        /// Destination of the copy
        destination: ObjectLocation,
        /// Underlying storage error
        source: StoreError,
    },

    /// Source content changed between setup and a part copy
    ///
    /// Copying a moving target can never produce a verifiable result, so
    /// this is fatal for the whole job.
    #[error("Source {location} changed during copy of part {part_number} (expected content id {expected})")]
    SourceChanged {
        /// Source object
        location: ObjectLocation,
        /// Part whose copy detected the change
        part_number: u32,
        /// Content id captured at setup
        expected: ContentId,
    },

    /// The session does not hold exactly the planned parts
    #[error("Incomplete upload: expected {expected} parts, found {found}")]
    IncompleteUpload {
        /// Planned part count
        expected: u32,
        /// Parts actually present (distinct, within range)
        found: usize,
    },

    /// Composite content id of the uploaded parts differs from the source
    #[error("Integrity mismatch: source content id {expected}, uploaded parts compose to {actual}")]
    IntegrityMismatch {
        /// Content id captured at setup
        expected: ContentId,
        /// Content id computed from the uploaded parts
        actual: ContentId,
    },

    /// Object would need parts larger than the backend allows
    #[error("Object of {size} bytes needs {part_size}-byte parts, limit is {max_part_size}")]
    ObjectTooLarge {
        /// Object size
        size: u64,
        /// Part size the policy computed
        part_size: u64,
        /// Largest part the backend accepts
        max_part_size: u64,
    },

    /// Finalization was requested before every shard finished
    #[error("{pending} of {total} shards have not finished")]
    ShardsUnfinished {
        /// Shards still working
        pending: usize,
        /// Shards reported
        total: usize,
    },

    /// No shard output carried the full job state
    #[error("No shard output carries the full job state")]
    MissingPrimaryState,

    /// Worker index is outside the configured fan-out
    #[error("Worker index {index} is out of range for {count} workers")]
    InvalidShard {
        /// Requested worker index
        index: u32,
        /// Configured worker count
        count: u32,
    },

    /// Threaded state is inconsistent
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// Content identifier cannot be decoded
    #[error("Invalid content id {content_id}: {reason}")]
    InvalidContentId {
        /// The raw identifier
        content_id: String,
        /// What was wrong with it
        reason: String,
    },

    /// Storage call failed
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SourceNotFound(_) => ErrorCode::SourceNotFound,
            Self::UploadSession { .. } => ErrorCode::UploadSession,
            Self::SourceChanged { .. } => ErrorCode::SourceChanged,
            Self::IncompleteUpload { .. } => ErrorCode::IncompleteUpload,
            Self::IntegrityMismatch { .. } => ErrorCode::IntegrityMismatch,
            Self::ObjectTooLarge { .. } => ErrorCode::ObjectTooLarge,
            Self::ShardsUnfinished { .. } => ErrorCode::ShardsUnfinished,
            Self::MissingPrimaryState | Self::InvalidShard { .. } | Self::InvalidState(_) => {
                ErrorCode::InvalidInput
            }
            Self::InvalidContentId { .. } => ErrorCode::InvalidInput,
            Self::Store(_) => ErrorCode::Storage,
        }
    }

    /// Whether the orchestrator may retry the failed step.
    ///
    /// Only transient storage failures qualify. Everything else is a terminal
    /// failure of the job.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}
