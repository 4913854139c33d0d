//! Copy worker: one shard, one bounded invocation.
//!
//! A worker is re-entered many times for the same shard. Each invocation:
//!
//! 1. Plans the shard on first entry (no checkpoint yet) and persists it.
//! 2. Returns immediately if the shard is exhausted.
//! 3. Lists the parts the upload session already holds and copies the
//!    missing ones of `[next_part, last_part]` on a bounded thread pool.
//! 4. Folds every acknowledged part into the checkpoint, contiguously.
//! 5. Stops submitting parts once the deadline is within the configured
//!    margin (or the cancel token is set) and returns the checkpoint.
//!
//! Transient part failures leave the part pending for the next invocation.
//! A changed source aborts the invocation with [`Error::SourceChanged`].

use crate::checkpoint::ShardCheckpoint;
use crate::error::{Error, Result, StoreError};
use crate::options::CopyConfig;
use crate::shard::{ShardProgress, plan_shard};
use crate::state::{CopyJobState, FinishedMarker, WorkerOutput};
use crate::store::{ObjectStore, PartCopyRequest, UploadId};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

/// Index of the shard that carries the full state to the finalizer.
pub const PRIMARY_SHARD: u32 = 0;

/// Receives the job state every time the shard checkpoint advances.
///
/// Use it to persist the checkpoint outside the process, so a worker that is
/// killed mid-invocation resumes from its last acknowledged part.
pub type CheckpointSink<'a> = dyn Fn(&CopyJobState) + Send + Sync + 'a;

/// Called with `(part_number, bytes)` after each part copy is acknowledged.
pub type PartCallback<'a> = dyn Fn(u32, u64) + Send + Sync + 'a;

/// Statistics from one worker invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Parts copied by this invocation
    pub parts_copied: u64,
    /// Parts of the pending range the session already held
    pub parts_present: u64,
    /// Parts whose copy failed transiently
    pub parts_failed: u64,
    /// Parts not attempted because the deadline or cancellation hit
    pub parts_deferred: u64,
    /// Bytes copied by this invocation
    pub bytes_copied: u64,
    /// Wall-clock time of the invocation
    pub duration: Duration,
}

/// Result of one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Payload for the orchestrator
    pub output: WorkerOutput,
    /// Checkpoint after this invocation
    pub progress: ShardProgress,
    /// What this invocation did
    pub stats: ShardStats,
}

/// Outcome of a single part copy (internal use)
#[derive(Debug)]
enum PartOutcome {
    Copied { part_number: u32, bytes: u64 },
    Deferred,
    Failed { part_number: u32, error: String },
    Fatal { part_number: u32, error: StoreError },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker for one shard of a copy job.
///
/// # Example
///
/// ```
/// use partcopy::{
///     ChunkingPolicy, CopyConfig, CopyWorker, MemoryObjectStore, ObjectLocation,
///     setup_copy_job,
/// };
/// use std::time::{Duration, Instant};
///
/// let chunking = ChunkingPolicy::default().with_min_part_size(4);
/// let store = MemoryObjectStore::new().with_chunking(chunking);
/// let src = ObjectLocation::new("src", "obj");
/// let dst = ObjectLocation::new("dst", "obj");
/// store.put_object(&src, b"0123456789".to_vec());
///
/// let config = CopyConfig::default()
///     .with_worker_count(1)
///     .with_chunking(chunking)
///     .with_deadline_margin(Duration::ZERO);
/// let state = setup_copy_job(&store, &src, &dst, &config)?;
///
/// let report = CopyWorker::new(&store, &config, 0)
///     .run(state, Instant::now() + Duration::from_secs(60))?;
/// assert!(report.output.is_finished());
/// assert_eq!(report.stats.parts_copied, 3);
/// # Ok::<(), partcopy::Error>(())
/// ```
pub struct CopyWorker<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    config: &'a CopyConfig,
    index: u32,
    cancel_token: Option<Arc<AtomicBool>>,
    checkpoint_sink: Option<&'a CheckpointSink<'a>>,
    on_part: Option<&'a PartCallback<'a>>,
}

impl<'a, S: ObjectStore + ?Sized> CopyWorker<'a, S> {
    /// Worker for shard `index` of `config.worker_count`.
    pub fn new(store: &'a S, config: &'a CopyConfig, index: u32) -> Self {
        Self {
            store,
            config,
            index,
            cancel_token: None,
            checkpoint_sink: None,
            on_part: None,
        }
    }

    /// Stop submitting parts once `token` is set.
    ///
    /// Cancellation is soft: in-flight copies finish and the checkpoint is
    /// returned as if the deadline had been reached.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Persist checkpoints through `sink`.
    #[must_use]
    pub fn with_checkpoint_sink(mut self, sink: &'a CheckpointSink<'a>) -> Self {
        self.checkpoint_sink = Some(sink);
        self
    }

    /// Report each acknowledged part to `callback`.
    #[must_use]
    pub fn with_part_callback(mut self, callback: &'a PartCallback<'a>) -> Self {
        self.on_part = Some(callback);
        self
    }

    /// Shard index this worker owns.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Run one invocation against `state`, returning before `deadline`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidShard`] if the worker index is out of range
    /// - [`Error::InvalidState`] if the state or its checkpoint is inconsistent,
    ///   or the state was set up for a different worker count
    /// - [`Error::SourceChanged`] if the source no longer matches its setup-time content id
    /// - [`Error::SourceNotFound`] if the source disappeared
    /// - [`Error::Store`] if listing the session fails, or a part copy fails
    ///   in a way retrying cannot fix
    pub fn run(&self, mut state: CopyJobState, deadline: Instant) -> Result<WorkerReport> {
        let start_time = Instant::now();

        if self.index >= self.config.worker_count {
            return Err(Error::InvalidShard {
                index: self.index,
                count: self.config.worker_count,
            });
        }
        validate_state(&state, self.config.worker_count)?;

        let progress = match state.shard {
            Some(progress) => progress,
            None => {
                let progress = plan_shard(state.part_count, self.index, self.config.worker_count)?;
                state.shard = Some(progress);
                self.save_checkpoint(&state);
                progress
            }
        };

        let mut stats = ShardStats::default();
        let progress = if progress.is_complete() {
            progress
        } else if self.should_stop(deadline) {
            stats.parts_deferred = u64::from(progress.remaining());
            progress
        } else {
            match state.upload_id.clone() {
                Some(upload_id) => {
                    self.copy_parts(&state, &upload_id, progress, deadline, &mut stats)?
                }
                None => self.copy_whole_object(&state, progress, &mut stats)?,
            }
        };

        state.shard = Some(progress);
        state.finished = progress.is_complete();
        stats.duration = start_time.elapsed();

        #[cfg(feature = "tracing")]
        tracing::info!(
            shard = self.index,
            next_part = progress.next_part,
            last_part = progress.last_part,
            finished = state.finished,
            copied = stats.parts_copied,
            failed = stats.parts_failed,
            deferred = stats.parts_deferred,
            "worker invocation done"
        );

        let output = if state.finished && self.index != PRIMARY_SHARD {
            WorkerOutput::Finished(FinishedMarker { finished: true })
        } else {
            WorkerOutput::from(state)
        };
        Ok(WorkerReport {
            output,
            progress,
            stats,
        })
    }

    /// Copy the missing parts of the shard into the upload session.
    fn copy_parts(
        &self,
        state: &CopyJobState,
        upload_id: &UploadId,
        progress: ShardProgress,
        deadline: Instant,
        stats: &mut ShardStats,
    ) -> Result<ShardProgress> {
        let uploaded = self.store.list_parts(&state.destination, upload_id)?;
        let present: BTreeSet<u32> = uploaded
            .iter()
            .map(|part| part.part_number)
            .filter(|&part_number| progress.contains(part_number))
            .collect();
        let missing: Vec<u32> = (progress.next_part..=progress.last_part)
            .filter(|part_number| !present.contains(part_number))
            .collect();
        stats.parts_present = present.len() as u64;

        let checkpoint = Mutex::new(ShardCheckpoint::with_present(progress, present));
        let last_saved = Mutex::new(progress.next_part);
        self.save_progress(state, &checkpoint, &last_saved);

        let abort = AtomicBool::new(false);

        let do_copy = |parts: &[u32]| -> Vec<PartOutcome> {
            parts
                .par_iter()
                .with_max_len(1)
                .map(|&part_number| {
                    // Soft cancellation: nothing new starts past this point
                    if abort.load(Ordering::Relaxed) || self.should_stop(deadline) {
                        return PartOutcome::Deferred;
                    }

                    let Some(range) = state.byte_range(part_number) else {
                        return PartOutcome::Failed {
                            part_number,
                            error: "part lies outside the object".into(),
                        };
                    };
                    let request = PartCopyRequest {
                        source: &state.source,
                        range,
                        expected: &state.source_content_id,
                        destination: &state.destination,
                        upload_id,
                        part_number,
                    };

                    match self.store.upload_part_copy(&request) {
                        Ok(_) => {
                            let advanced = lock(&checkpoint).record(part_number);
                            if advanced {
                                self.save_progress(state, &checkpoint, &last_saved);
                            }
                            if let Some(callback) = self.on_part {
                                callback(part_number, range.len());
                            }
                            PartOutcome::Copied {
                                part_number,
                                bytes: range.len(),
                            }
                        }
                        Err(error) if error.is_transient() => {
                            self.config.warn(&format!(
                                "Failed to copy part {part_number} of {}: {error}",
                                state.source
                            ));
                            PartOutcome::Failed {
                                part_number,
                                error: error.to_string(),
                            }
                        }
                        Err(error) => {
                            abort.store(true, Ordering::Relaxed);
                            PartOutcome::Fatal { part_number, error }
                        }
                    }
                })
                .collect()
        };

        let outcomes = self.run_in_pool(|| do_copy(&missing));
        // Flush an advance whose save was skipped while another one ran
        self.save_progress(state, &checkpoint, &last_saved);

        let mut fatal: Option<(u32, StoreError)> = None;
        for outcome in outcomes {
            match outcome {
                PartOutcome::Copied { part_number, bytes } => {
                    stats.parts_copied += 1;
                    stats.bytes_copied += bytes;
                    self.config
                        .verbose(&format!("copied part {part_number} ({bytes} bytes)"));
                }
                PartOutcome::Deferred => stats.parts_deferred += 1,
                PartOutcome::Failed { part_number, error } => {
                    stats.parts_failed += 1;
                    self.config
                        .verbose(&format!("failed part {part_number}: {error}"));
                }
                PartOutcome::Fatal { part_number, error } => {
                    if fatal.as_ref().is_none_or(|(first, _)| part_number < *first) {
                        fatal = Some((part_number, error));
                    }
                }
            }
        }

        if let Some((part_number, error)) = fatal {
            return Err(self.fatal_error(state, part_number, error));
        }
        if stats.parts_deferred > 0 {
            let reason = if self.is_cancelled() {
                "cancelled"
            } else {
                "deadline reached"
            };
            self.config.verbose(&format!(
                "{reason}: deferred {} parts to the next invocation",
                stats.parts_deferred
            ));
        }

        let checkpoint = lock(&checkpoint);
        if checkpoint.pending_out_of_order() > 0 {
            self.config.verbose(&format!(
                "{} parts acknowledged beyond part {}",
                checkpoint.pending_out_of_order(),
                checkpoint.progress().next_part
            ));
        }
        Ok(checkpoint.progress())
    }

    /// Single-part jobs have no session: the owner of part 1 copies the
    /// whole object in one conditional call.
    fn copy_whole_object(
        &self,
        state: &CopyJobState,
        progress: ShardProgress,
        stats: &mut ShardStats,
    ) -> Result<ShardProgress> {
        let mut checkpoint = ShardCheckpoint::new(progress);
        match self.store.copy_object(
            &state.source,
            &state.destination,
            &state.source_content_id,
        ) {
            Ok(_) => {
                if checkpoint.record(1) {
                    let mut snapshot = state.clone();
                    snapshot.shard = Some(checkpoint.progress());
                    self.save_checkpoint(&snapshot);
                }
                stats.parts_copied = 1;
                stats.bytes_copied = state.total_size;
                if let Some(callback) = self.on_part {
                    callback(1, state.total_size);
                }
            }
            Err(error) if error.is_transient() => {
                self.config
                    .warn(&format!("Failed to copy {}: {error}", state.source));
                stats.parts_failed = 1;
            }
            Err(error) => return Err(self.fatal_error(state, 1, error)),
        }
        Ok(checkpoint.progress())
    }

    fn fatal_error(&self, state: &CopyJobState, part_number: u32, error: StoreError) -> Error {
        match error {
            StoreError::PreconditionFailed { .. } => Error::SourceChanged {
                location: state.source.clone(),
                part_number,
                expected: state.source_content_id.clone(),
            },
            StoreError::NotFound(location) if location == state.source => {
                Error::SourceNotFound(location)
            }
            other => Error::Store(other),
        }
    }

    /// Hand the latest checkpoint to the sink unless it already went out.
    ///
    /// Only one thread writes at a time. A thread that finds the sink busy
    /// returns at once; the writer re-reads the checkpoint after each save
    /// and picks up any advance made meanwhile.
    fn save_progress(
        &self,
        state: &CopyJobState,
        checkpoint: &Mutex<ShardCheckpoint>,
        last_saved: &Mutex<u32>,
    ) {
        if self.checkpoint_sink.is_none() {
            return;
        }
        let mut saved = match last_saved.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        loop {
            let progress = lock(checkpoint).progress();
            if progress.next_part <= *saved {
                return;
            }
            let mut snapshot = state.clone();
            snapshot.shard = Some(progress);
            self.save_checkpoint(&snapshot);
            *saved = progress.next_part;
        }
    }

    fn save_checkpoint(&self, state: &CopyJobState) {
        if let Some(sink) = self.checkpoint_sink {
            sink(state);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }

    fn should_stop(&self, deadline: Instant) -> bool {
        self.is_cancelled()
            || deadline.saturating_duration_since(Instant::now()) <= self.config.deadline_margin
    }

    fn run_in_pool<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        // Use custom thread pool only if concurrency differs from default
        if self.config.concurrency == rayon::current_num_threads() {
            return op();
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency)
            .build()
        {
            Ok(pool) => pool.install(op),
            Err(e) => {
                self.config.warn(&format!(
                    "Failed to create thread pool ({e}), using global pool"
                ));
                op()
            }
        }
    }
}

fn validate_state(state: &CopyJobState, worker_count: u32) -> Result<()> {
    let plan = state.plan();
    if state.worker_count != worker_count {
        return Err(Error::InvalidState(format!(
            "job was set up for {} workers, not {worker_count}",
            state.worker_count
        )));
    }
    if state.part_size == 0 || state.part_count == 0 {
        return Err(Error::InvalidState("empty part plan".into()));
    }
    if u64::from(plan.part_count) != crate::chunking::part_count(state.total_size, state.part_size)
    {
        return Err(Error::InvalidState(format!(
            "{} parts of {} bytes do not cover {} bytes",
            state.part_count, state.part_size, state.total_size
        )));
    }
    if plan.is_multipart() && state.upload_id.is_none() {
        return Err(Error::InvalidState(
            "multipart job without an upload session".into(),
        ));
    }
    if let Some(shard) = state.shard {
        if shard.next_part == 0 || shard.last_part > state.part_count {
            return Err(Error::InvalidState(format!(
                "shard [{}, {}] outside parts 1..={}",
                shard.next_part, shard.last_part, state.part_count
            )));
        }
    }
    Ok(())
}
