//! Builder API for copy jobs.
//!
//! [`CopyJob`] bundles a store with a [`CopyConfig`] so each step of the
//! job can be invoked without threading both through by hand.
//!
//! # Example
//!
//! ```
//! use partcopy::{CopyJob, MemoryObjectStore, ObjectLocation, ObjectStore};
//! use std::time::{Duration, Instant};
//!
//! let store = MemoryObjectStore::new();
//! let src = ObjectLocation::new("src", "obj");
//! let dst = ObjectLocation::new("dst", "obj");
//! store.put_object(&src, vec![1u8; 1024]);
//!
//! let job = CopyJob::new(&store)
//!     .workers(2)
//!     .deadline_margin(Duration::ZERO);
//!
//! let state = job.setup(&src, &dst)?;
//! let mut outputs = Vec::new();
//! for index in 0..2 {
//!     let deadline = Instant::now() + Duration::from_secs(60);
//!     outputs.push(job.worker(index).run(state.clone(), deadline)?.output);
//! }
//! let report = job.finalize_outputs(outputs)?;
//! assert_eq!(report.content_id, store.head_object(&src)?.content_id);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::chunking::ChunkingPolicy;
use crate::error::Result;
use crate::finalize::{FinalizeReport, abort_copy_job, finalize_copy_job, join_worker_outputs};
use crate::options::CopyConfig;
use crate::setup::setup_copy_job;
use crate::state::{CopyJobState, WorkerOutput};
use crate::store::{ObjectLocation, ObjectStore};
use crate::worker::CopyWorker;
use std::time::Duration;

/// A store plus the configuration shared by every step of a copy job.
#[derive(Debug)]
pub struct CopyJob<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    config: CopyConfig,
}

impl<'a, S: ObjectStore + ?Sized> CopyJob<'a, S> {
    /// Job on `store` with default configuration.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            config: CopyConfig::default(),
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: CopyConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of shards the orchestrator fans out (default 32).
    #[must_use]
    pub fn workers(mut self, n: u32) -> Self {
        self.config = self.config.with_worker_count(n);
        self
    }

    /// Concurrent part copies inside one worker (default 8).
    #[must_use]
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config = self.config.with_concurrency(n);
        self
    }

    /// Smallest part size to plan with.
    ///
    /// Must match the part size the source was uploaded with, otherwise the
    /// composite content ids will not match at finalize time.
    #[must_use]
    pub fn min_part_size(mut self, bytes: u64) -> Self {
        let chunking = self.config.chunking.with_min_part_size(bytes);
        self.config = self.config.with_chunking(chunking);
        self
    }

    /// Replace the part-size policy.
    #[must_use]
    pub fn chunking(mut self, chunking: ChunkingPolicy) -> Self {
        self.config = self.config.with_chunking(chunking);
        self
    }

    /// Stop submitting parts this long before the deadline (default 10 s).
    #[must_use]
    pub fn deadline_margin(mut self, margin: Duration) -> Self {
        self.config = self.config.with_deadline_margin(margin);
        self
    }

    /// Set a handler for failed part copies and other non-fatal issues.
    #[must_use]
    pub fn on_warning(mut self, handler: fn(&str)) -> Self {
        self.config = self.config.with_warn_handler(handler);
        self
    }

    /// Set a handler for per-part messages.
    #[must_use]
    pub fn verbose(mut self, handler: fn(&str)) -> Self {
        self.config = self.config.with_verbose_handler(handler);
        self
    }

    /// Get a reference to the current configuration.
    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Set up the job. See [`setup_copy_job`].
    ///
    /// # Errors
    ///
    /// Same as [`setup_copy_job`].
    pub fn setup(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
    ) -> Result<CopyJobState> {
        setup_copy_job(self.store, source, destination, &self.config)
    }

    /// Worker for shard `index`.
    pub fn worker(&self, index: u32) -> CopyWorker<'_, S> {
        CopyWorker::new(self.store, &self.config, index)
    }

    /// Verify and commit. See [`finalize_copy_job`].
    ///
    /// # Errors
    ///
    /// Same as [`finalize_copy_job`].
    pub fn finalize(&self, state: &CopyJobState) -> Result<FinalizeReport> {
        finalize_copy_job(self.store, state)
    }

    /// Join the outputs of every shard, then finalize.
    ///
    /// # Errors
    ///
    /// Same as [`join_worker_outputs`] and [`finalize_copy_job`].
    pub fn finalize_outputs(&self, outputs: Vec<WorkerOutput>) -> Result<FinalizeReport> {
        let state = join_worker_outputs(outputs)?;
        self.finalize(&state)
    }

    /// Discard the job's upload session. See [`abort_copy_job`].
    ///
    /// # Errors
    ///
    /// Same as [`abort_copy_job`].
    pub fn abort(&self, state: &CopyJobState) -> Result<()> {
        abort_copy_job(self.store, state)
    }
}
