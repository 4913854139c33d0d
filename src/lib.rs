//! # partcopy
//!
//! Resumable, sharded, server-side copy of large objects between buckets of
//! an S3-compatible store, built to run inside short-lived compute
//! invocations.
//!
//! ## Core Features
//!
//! - **Sharded**: the part range is split into `W` contiguous shards, one per
//!   worker index, so an orchestrator can fan the copy out
//! - **Resumable**: every invocation returns a checkpoint and the next one
//!   picks up from it; parts the session already holds are never re-copied
//! - **Deadline aware**: a worker stops submitting parts once its invocation
//!   deadline is within a configurable margin
//! - **Conditional**: each part copy is conditioned on the source's content
//!   id at setup time, so a changing source aborts the job instead of
//!   producing a mixed object
//! - **Verified**: the finalizer recomputes the composite content id from the
//!   uploaded parts and only commits if it matches the source
//! - **Bounded concurrency**: part copies run on a rayon pool of fixed size
//!
//! ## Job Lifecycle
//!
//! ```text
//! setup_copy_job ──► state ──► CopyWorker[0..W] ──► ... ──► finished
//!                                  ▲          │
//!                                  └──────────┘ (re-invoke until finished)
//! join_worker_outputs ──► finalize_copy_job ──► committed object
//! ```
//!
//! The orchestrator (a workflow engine, a queue, a shell loop) is not part
//! of this crate. It owns retries: a failed step is re-invoked when
//! [`Error::is_retryable`] says so and the job is aborted otherwise.
//!
//! ## Quick Start
//!
//! ```
//! use partcopy::{CopyJob, MemoryObjectStore, ObjectLocation};
//! use std::time::{Duration, Instant};
//!
//! let store = MemoryObjectStore::new();
//! let src = ObjectLocation::new("src", "big.bin");
//! let dst = ObjectLocation::new("dst", "big.bin");
//! store.put_object(&src, vec![0u8; 4096]);
//!
//! let job = CopyJob::new(&store).workers(4).deadline_margin(Duration::ZERO);
//! let state = job.setup(&src, &dst)?;
//!
//! let outputs = (0..4)
//!     .map(|index| {
//!         let deadline = Instant::now() + Duration::from_secs(60);
//!         job.worker(index).run(state.clone(), deadline).map(|r| r.output)
//!     })
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! let report = job.finalize_outputs(outputs)?;
//! println!("committed {} ({})", report.destination, report.content_id);
//! # Ok::<(), partcopy::Error>(())
//! ```
//!
//! ## Storage Backends
//!
//! Everything goes through the [`ObjectStore`] trait. The crate ships a
//! directory-backed [`FsObjectStore`] and an in-process
//! [`MemoryObjectStore`].
//!
//! ## Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `progress` | Progress bar support with indicatif |
//! | `tracing` | Structured logging with tracing crate |
//! | `full` | Enable all optional features |

#![cfg_attr(docsrs, feature(doc_cfg))]

mod builder;
mod checkpoint;
mod chunking;
mod content_id;
mod error;
mod finalize;
mod options;
mod setup;
mod shard;
mod state;
mod store;
mod worker;

#[cfg(feature = "progress")]
mod progress;

pub use builder::CopyJob;
pub use checkpoint::ShardCheckpoint;
pub use chunking::{
    ChunkingPolicy, DEFAULT_MIN_PART_SIZE, DEFAULT_PART_ALIGNMENT, MAX_PART_COUNT, MAX_PART_SIZE,
    PartPlan, part_count,
};
pub use content_id::ContentId;
pub use error::{Error, ErrorCode, Result, StoreError, StoreResult};
pub use finalize::{FinalizeReport, abort_copy_job, finalize_copy_job, join_worker_outputs};
pub use options::CopyConfig;
pub use setup::setup_copy_job;
pub use shard::{ShardProgress, plan_shard};
pub use state::{CopyJobState, FinishedMarker, WorkerOutput};
pub use store::{
    ByteRange, FsObjectStore, MemoryObjectStore, ObjectLocation, ObjectMetadata, ObjectStore,
    PartCopyRequest, UploadId, UploadedPart,
};
pub use worker::{
    CheckpointSink, CopyWorker, PRIMARY_SHARD, PartCallback, ShardStats, WorkerReport,
};

#[cfg(feature = "progress")]
#[cfg_attr(docsrs, doc(cfg(feature = "progress")))]
pub use progress::create_progress_bar;
