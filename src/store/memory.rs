//! In-process object store.

use super::{ByteRange, ObjectLocation, ObjectMetadata, ObjectStore, UploadId, UploadedPart};
use crate::chunking::ChunkingPolicy;
use crate::content_id::ContentId;
use crate::error::{StoreError, StoreResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_id: ContentId,
}

#[derive(Debug)]
struct Upload {
    destination: ObjectLocation,
    parts: BTreeMap<u32, StoredObject>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectLocation, StoredObject>,
    uploads: HashMap<UploadId, Upload>,
    committed: HashMap<ObjectLocation, Vec<UploadedPart>>,
}

/// Object store held entirely in memory.
///
/// Objects written with [`put_object`](Self::put_object) are tagged the way a
/// multipart uploader using the store's [`ChunkingPolicy`] would tag them, so
/// a copy planned with the same policy verifies at finalize time.
///
/// # Example
///
/// ```
/// use partcopy::{MemoryObjectStore, ObjectLocation, ObjectStore};
///
/// let store = MemoryObjectStore::new();
/// let loc = ObjectLocation::new("bucket", "key");
/// store.put_object(&loc, b"hello".to_vec());
/// assert_eq!(store.head_object(&loc)?.size, 5);
/// # Ok::<(), partcopy::StoreError>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    chunking: ChunkingPolicy,
    inner: Mutex<Inner>,
    next_upload: AtomicU64,
}

impl MemoryObjectStore {
    /// Empty store tagging objects with the default chunking policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `chunking` to tag objects written with `put_object`.
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingPolicy) -> Self {
        self.chunking = chunking;
        self
    }

    /// Write (or replace) an object.
    pub fn put_object(&self, location: &ObjectLocation, data: Vec<u8>) -> ContentId {
        let part_size = self.chunking.part_size(data.len() as u64);
        let content_id = ContentId::of_object(&data, part_size);
        self.lock().objects.insert(
            location.clone(),
            StoredObject {
                data,
                content_id: content_id.clone(),
            },
        );
        content_id
    }

    /// Bytes of an object, if present.
    pub fn object_data(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        self.lock().objects.get(location).map(|o| o.data.clone())
    }

    /// Part list of the last multipart upload committed to `location`.
    pub fn committed_parts(&self, location: &ObjectLocation) -> Option<Vec<UploadedPart>> {
        self.lock().committed.get(location).cloned()
    }

    /// Number of sessions still open.
    pub fn open_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn slice_range(data: &[u8], range: ByteRange, location: &ObjectLocation) -> StoreResult<Vec<u8>> {
    let start = usize::try_from(range.start).unwrap_or(usize::MAX);
    let end = usize::try_from(range.end).unwrap_or(usize::MAX);
    if range.start > range.end || end >= data.len() {
        return Err(StoreError::InvalidLocation {
            location: location.clone(),
            reason: format!("range {range} outside object of {} bytes", data.len()),
        });
    }
    Ok(data[start..=end].to_vec())
}

impl ObjectStore for MemoryObjectStore {
    fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata> {
        self.lock()
            .objects
            .get(location)
            .map(|o| ObjectMetadata {
                size: o.data.len() as u64,
                content_id: o.content_id.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(location.clone()))
    }

    fn read_range(&self, location: &ObjectLocation, range: ByteRange) -> StoreResult<Vec<u8>> {
        let inner = self.lock();
        let object = inner
            .objects
            .get(location)
            .ok_or_else(|| StoreError::NotFound(location.clone()))?;
        slice_range(&object.data, range, location)
    }

    fn upload_part(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        part_number: u32,
        data: &[u8],
    ) -> StoreResult<ContentId> {
        if part_number == 0 {
            return Err(StoreError::InvalidPart {
                part_number,
                reason: "part numbers start at 1".into(),
            });
        }
        let mut inner = self.lock();
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.destination == *destination)
            .ok_or_else(|| StoreError::NoSuchUpload {
                location: destination.clone(),
                upload_id: upload_id.clone(),
            })?;
        let content_id = ContentId::of_bytes(data);
        upload.parts.insert(
            part_number,
            StoredObject {
                data: data.to_vec(),
                content_id: content_id.clone(),
            },
        );
        Ok(content_id)
    }

    fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
        expected: &ContentId,
    ) -> StoreResult<ContentId> {
        let mut inner = self.lock();
        let object = inner
            .objects
            .get(source)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(source.clone()))?;
        if object.content_id != *expected {
            return Err(StoreError::PreconditionFailed {
                location: source.clone(),
                expected: expected.clone(),
                actual: object.content_id,
            });
        }
        let content_id = object.content_id.clone();
        inner.objects.insert(destination.clone(), object);
        Ok(content_id)
    }

    fn create_multipart_upload(&self, destination: &ObjectLocation) -> StoreResult<UploadId> {
        let id = UploadId::new(format!(
            "mem-{}",
            self.next_upload.fetch_add(1, Ordering::Relaxed) + 1
        ));
        self.lock().uploads.insert(
            id.clone(),
            Upload {
                destination: destination.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn list_parts(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<Vec<UploadedPart>> {
        let inner = self.lock();
        let upload = inner
            .uploads
            .get(upload_id)
            .filter(|u| u.destination == *destination)
            .ok_or_else(|| StoreError::NoSuchUpload {
                location: destination.clone(),
                upload_id: upload_id.clone(),
            })?;
        Ok(upload
            .parts
            .iter()
            .map(|(&part_number, part)| UploadedPart {
                part_number,
                content_id: part.content_id.clone(),
            })
            .collect())
    }

    fn complete_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[UploadedPart],
    ) -> StoreResult<ContentId> {
        let mut inner = self.lock();
        let upload = inner
            .uploads
            .get(upload_id)
            .filter(|u| u.destination == *destination)
            .ok_or_else(|| StoreError::NoSuchUpload {
                location: destination.clone(),
                upload_id: upload_id.clone(),
            })?;

        let mut data = Vec::new();
        for part in parts {
            let stored = upload
                .parts
                .get(&part.part_number)
                .filter(|p| p.content_id == part.content_id)
                .ok_or_else(|| StoreError::InvalidPart {
                    part_number: part.part_number,
                    reason: format!("no uploaded part with content id {}", part.content_id),
                })?;
            data.extend_from_slice(&stored.data);
        }
        let content_id = ContentId::composite(parts.iter().map(|p| &p.content_id))
            .map_err(|e| StoreError::Service(e.to_string()))?;

        inner.uploads.remove(upload_id);
        inner.objects.insert(
            destination.clone(),
            StoredObject {
                data,
                content_id: content_id.clone(),
            },
        );
        inner.committed.insert(destination.clone(), parts.to_vec());
        Ok(content_id)
    }

    fn abort_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        match inner.uploads.get(upload_id) {
            Some(upload) if upload.destination == *destination => {
                inner.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StoreError::NoSuchUpload {
                location: destination.clone(),
                upload_id: upload_id.clone(),
            }),
        }
    }
}
