//! Object-store capability interface.
//!
//! The engine never talks to a storage service directly; it goes through the
//! [`ObjectStore`] trait. A backend is chosen when the job is constructed and
//! the core logic never branches on which one it got.
//!
//! Two backends ship with the crate:
//!
//! - [`FsObjectStore`]: buckets are directories under a root path.
//! - [`MemoryObjectStore`]: everything lives in process memory.

mod fs;
mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use crate::content_id::ContentId;
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A bucket/key pair naming one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Bucket (top-level container)
    pub bucket: String,
    /// Key within the bucket
    pub key: String,
}

impl ObjectLocation {
    /// Create a location from its parts.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

impl FromStr for ObjectLocation {
    type Err = String;

    /// Parse `bucket/key`. The key may itself contain slashes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("s3://").unwrap_or(s);
        match s.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(format!("expected BUCKET/KEY, got '{s}'")),
        }
    }
}

/// Identifier of a multipart-upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    /// Wrap a backend-issued session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte
    pub start: u64,
    /// Last byte (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create an inclusive range.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes in the range.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ByteRange {
    /// HTTP `Range` header form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// What the store knows about an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Size in bytes
    pub size: u64,
    /// Content identifier (ETag)
    pub content_id: ContentId,
}

/// One part held by a multipart-upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    /// 1-indexed part number
    pub part_number: u32,
    /// Content identifier of the part's bytes
    pub content_id: ContentId,
}

/// A server-side byte-range copy into an upload session.
#[derive(Debug, Clone, Copy)]
pub struct PartCopyRequest<'a> {
    /// Object to read from
    pub source: &'a ObjectLocation,
    /// Bytes of the source to copy
    pub range: ByteRange,
    /// Content id the source must still carry
    pub expected: &'a ContentId,
    /// Destination of the upload session
    pub destination: &'a ObjectLocation,
    /// Upload session receiving the part
    pub upload_id: &'a UploadId,
    /// Part number to write
    pub part_number: u32,
}

/// Storage capabilities the copy engine needs.
///
/// All calls are synchronous and bounded by the backend's own timeouts.
/// Implementations must be shareable across the worker's thread pool.
pub trait ObjectStore: Send + Sync {
    /// Size and content id of an object.
    ///
    /// Fails with [`StoreError::NotFound`] if the object does not exist.
    fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata>;

    /// Read an inclusive byte range of an object.
    fn read_range(&self, location: &ObjectLocation, range: ByteRange) -> StoreResult<Vec<u8>>;

    /// Store `data` as part `part_number` of an upload session, replacing
    /// any earlier upload of the same part.
    fn upload_part(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        part_number: u32,
        data: &[u8],
    ) -> StoreResult<ContentId>;

    /// Copy a byte range of the source into an upload session, conditioned
    /// on the source still carrying `request.expected`.
    ///
    /// The default implementation reads the range through
    /// [`read_range`](Self::read_range) and re-uploads it, checking the
    /// source's content id before and after the read. Backends with a native
    /// server-side copy should override it.
    ///
    /// Fails with [`StoreError::PreconditionFailed`] if the source changed.
    fn upload_part_copy(&self, request: &PartCopyRequest<'_>) -> StoreResult<ContentId> {
        ensure_content_id(self, request.source, request.expected)?;
        let data = self.read_range(request.source, request.range)?;
        ensure_content_id(self, request.source, request.expected)?;
        self.upload_part(
            request.destination,
            request.upload_id,
            request.part_number,
            &data,
        )
    }

    /// Copy a whole object, conditioned on the source carrying `expected`.
    fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
        expected: &ContentId,
    ) -> StoreResult<ContentId>;

    /// Open a multipart-upload session for `destination`.
    fn create_multipart_upload(&self, destination: &ObjectLocation) -> StoreResult<UploadId>;

    /// Parts currently held by a session, ordered by part number.
    fn list_parts(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<Vec<UploadedPart>>;

    /// Assemble `parts` (in order) into the destination object and close the
    /// session. Returns the content id of the assembled object.
    fn complete_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[UploadedPart],
    ) -> StoreResult<ContentId>;

    /// Discard a session and every part it holds.
    fn abort_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<()>;
}

fn ensure_content_id<S: ObjectStore + ?Sized>(
    store: &S,
    location: &ObjectLocation,
    expected: &ContentId,
) -> StoreResult<()> {
    let current = store.head_object(location)?;
    if current.content_id != *expected {
        return Err(StoreError::PreconditionFailed {
            location: location.clone(),
            expected: expected.clone(),
            actual: current.content_id,
        });
    }
    Ok(())
}
