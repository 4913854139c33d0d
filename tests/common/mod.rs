//! Shared helpers for the scenario tests: fault-injecting stores and an
//! in-process stand-in for the orchestrator.

#![allow(dead_code)]

use partcopy::{
    ByteRange, ContentId, CopyConfig, CopyJobState, CopyWorker, Error, MemoryObjectStore,
    ObjectLocation, ObjectMetadata, ObjectStore, PartCopyRequest, StoreError, StoreResult,
    UploadId, UploadedPart, WorkerOutput,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Deterministic test bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 131 + i / 7) % 251) as u8).collect()
}

/// Wraps a [`MemoryObjectStore`], failing a share of part copies with a
/// transient error and optionally slowing every part copy down.
pub struct FlakyStore {
    pub inner: MemoryObjectStore,
    /// Fail roughly one in `fail_one_in` part copies (0 disables failures)
    fail_one_in: u64,
    delay: Duration,
    calls: AtomicU64,
    pub failures: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: MemoryObjectStore) -> Self {
        Self {
            inner,
            fail_one_in: 0,
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn failing_one_in(mut self, n: u64) -> Self {
        self.fail_one_in = n;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn should_fail(&self) -> bool {
        if self.fail_one_in == 0 {
            return false;
        }
        // splitmix64 over the call counter
        let mut z = self
            .calls
            .fetch_add(1, Ordering::SeqCst)
            .wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        z % self.fail_one_in == 0
    }
}

impl ObjectStore for FlakyStore {
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
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.should_fail() {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Service(format!(
                "injected failure for part {}",
                request.part_number
            )));
        }
        self.inner.upload_part_copy(request)
    }

    fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
        expected: &ContentId,
    ) -> StoreResult<ContentId> {
        self.inner.copy_object(source, destination, expected)
    }

    fn create_multipart_upload(&self, destination: &ObjectLocation) -> StoreResult<UploadId> {
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

/// Result of driving every shard to completion.
pub struct DriveResult {
    /// Final output of each shard, by index
    pub outputs: Vec<WorkerOutput>,
    /// Invocations per shard, by index
    pub invocations: Vec<u32>,
}

/// Re-invoke every shard with a fresh `budget` until all report finished,
/// feeding each shard its own previous output. Retryable errors are retried
/// with the last good state; anything else is returned.
pub fn drive<S: ObjectStore + ?Sized>(
    store: &S,
    config: &CopyConfig,
    state: &CopyJobState,
    budget: Duration,
    max_rounds: u32,
) -> Result<DriveResult, Error> {
    let count = config.worker_count as usize;
    let mut states: Vec<CopyJobState> = vec![state.clone(); count];
    let mut outputs: Vec<Option<WorkerOutput>> = vec![None; count];
    let mut invocations = vec![0u32; count];

    for _ in 0..max_rounds {
        if outputs.iter().all(|o| o.as_ref().is_some_and(WorkerOutput::is_finished)) {
            break;
        }
        for index in 0..count {
            if outputs[index].as_ref().is_some_and(WorkerOutput::is_finished) {
                continue;
            }
            invocations[index] += 1;
            let worker = CopyWorker::new(store, config, index as u32);
            match worker.run(states[index].clone(), Instant::now() + budget) {
                Ok(report) => {
                    if let Some(next) = report.output.state() {
                        states[index] = next.clone();
                    }
                    outputs[index] = Some(report.output);
                }
                Err(e) if e.is_retryable() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    let outputs = outputs.into_iter().flatten().collect::<Vec<_>>();
    assert_eq!(outputs.len(), count, "some shard never returned");
    Ok(DriveResult {
        outputs,
        invocations,
    })
}
