//! Fault-injecting store wrapper for unit tests.

use super::{
    ByteRange, MemoryObjectStore, ObjectLocation, ObjectMetadata, ObjectStore, PartCopyRequest,
    UploadId, UploadedPart,
};
use crate::content_id::ContentId;
use crate::error::{StoreError, StoreResult};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

type PartFault = Box<dyn Fn(u32, u32) -> Option<StoreError> + Send + Sync>;

/// Wraps a [`MemoryObjectStore`] and fails selected calls.
pub(crate) struct FaultyStore {
    pub(crate) inner: MemoryObjectStore,
    reject_sessions: bool,
    /// Called with (call index, part number) before every part copy.
    part_fault: Option<PartFault>,
    part_calls: AtomicU32,
    /// Part numbers in the order their copies were attempted.
    pub(crate) attempts: Mutex<Vec<u32>>,
}

impl FaultyStore {
    pub(crate) fn new(inner: MemoryObjectStore) -> Self {
        Self {
            inner,
            reject_sessions: false,
            part_fault: None,
            part_calls: AtomicU32::new(0),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn rejecting_sessions(mut self) -> Self {
        self.reject_sessions = true;
        self
    }

    pub(crate) fn with_part_fault<F>(mut self, fault: F) -> Self
    where
        F: Fn(u32, u32) -> Option<StoreError> + Send + Sync + 'static,
    {
        self.part_fault = Some(Box::new(fault));
        self
    }

    pub(crate) fn attempted(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }
}

impl ObjectStore for FaultyStore {
    fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata> {
        self.inner.head_object(location)
    }

    fn read_range(&self, location: &ObjectLocation, range: ByteRange) -> StoreResult<Vec<u8>> {
        self.inner.read_range(location, range)
    }

    fn upload_part(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        part_number: u32,
        data: &[u8],
    ) -> StoreResult<ContentId> {
        self.inner
            .upload_part(destination, upload_id, part_number, data)
    }

    fn upload_part_copy(&self, request: &PartCopyRequest<'_>) -> StoreResult<ContentId> {
        let call = self.part_calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(request.part_number);
        if let Some(error) = self
            .part_fault
            .as_ref()
            .and_then(|fault| fault(call, request.part_number))
        {
            return Err(error);
        }
        self.inner.upload_part_copy(request)
    }

    fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
        expected: &ContentId,
    ) -> StoreResult<ContentId> {
        let call = self.part_calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(1);
        if let Some(error) = self.part_fault.as_ref().and_then(|fault| fault(call, 1)) {
            return Err(error);
        }
        self.inner.copy_object(source, destination, expected)
    }

    fn create_multipart_upload(&self, destination: &ObjectLocation) -> StoreResult<UploadId> {
        if self.reject_sessions {
            return Err(StoreError::Service("access denied".into()));
        }
        self.inner.create_multipart_upload(destination)
    }

    fn list_parts(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<Vec<UploadedPart>> {
        self.inner.list_parts(destination, upload_id)
    }

    fn complete_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[UploadedPart],
    ) -> StoreResult<ContentId> {
        self.inner
            .complete_multipart_upload(destination, upload_id, parts)
    }

    fn abort_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<()> {
        self.inner.abort_multipart_upload(destination, upload_id)
    }
}
