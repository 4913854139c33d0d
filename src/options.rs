//! Configuration for copy jobs.
//!
//! Every knob the engine uses is carried in an explicit [`CopyConfig`]
//! passed to setup, the workers and the finalizer.
//!
//! # Example
//!
//! ```
//! use partcopy::CopyConfig;
//! use std::time::Duration;
//!
//! let config = CopyConfig::default()
//!     .with_worker_count(4)
//!     .with_concurrency(16)
//!     .with_deadline_margin(Duration::from_secs(30));
//! assert_eq!(config.worker_count, 4);
//! ```

use crate::chunking::ChunkingPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for a copy job.
///
/// # Default Values
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `worker_count` | 32 | Shards fanned out by the orchestrator |
/// | `concurrency` | 8 | Concurrent part copies inside one worker |
/// | `chunking` | 64 MiB parts | Part-size policy |
/// | `deadline_margin` | 10 s | Stop submitting parts this long before the deadline |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Number of shards the part range is split into (default: 32)
    ///
    /// Must match the fan-out degree of the orchestrator: every index in
    /// `0..worker_count` has to be invoked until it reports finished.
    pub worker_count: u32,

    /// Concurrent part copies per worker invocation (default: 8)
    pub concurrency: usize,

    /// Part-size policy
    pub chunking: ChunkingPolicy,

    /// Safety margin before the invocation deadline (default: 10 s)
    ///
    /// No new part copy starts once less than this much time is left.
    /// In-flight copies are allowed to finish, so the margin should cover
    /// one part copy.
    pub deadline_margin: Duration,

    /// Callback for warnings (optional)
    ///
    /// If not set and `tracing` feature is enabled, warnings are logged via tracing.
    /// Otherwise, warnings are silently ignored.
    #[serde(skip)]
    pub warn_handler: Option<fn(&str)>,

    /// Callback for per-part progress messages (optional)
    ///
    /// If not set and `tracing` feature is enabled, messages are logged at
    /// debug level.
    #[serde(skip)]
    pub verbose_handler: Option<fn(&str)>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            worker_count: 32,
            concurrency: 8,
            chunking: ChunkingPolicy::default(),
            deadline_margin: Duration::from_secs(10),
            warn_handler: None,
            verbose_handler: None,
        }
    }
}

impl CopyConfig {
    /// Set the number of shards.
    ///
    /// Value is clamped to at least 1.
    #[must_use]
    pub fn with_worker_count(mut self, n: u32) -> Self {
        self.worker_count = n.max(1);
        self
    }

    /// Set the number of concurrent part copies per worker.
    ///
    /// Value is clamped to at least 1 to prevent panics.
    #[must_use]
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Set the part-size policy.
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingPolicy) -> Self {
        self.chunking = chunking;
        self
    }

    /// Set the deadline safety margin.
    #[must_use]
    pub fn with_deadline_margin(mut self, margin: Duration) -> Self {
        self.deadline_margin = margin;
        self
    }

    /// Create options with a warning handler
    #[must_use]
    pub fn with_warn_handler(mut self, handler: fn(&str)) -> Self {
        self.warn_handler = Some(handler);
        self
    }

    /// Create options with a verbose handler
    #[must_use]
    pub fn with_verbose_handler(mut self, handler: fn(&str)) -> Self {
        self.verbose_handler = Some(handler);
        self
    }

    pub(crate) fn warn(&self, msg: &str) {
        if let Some(handler) = self.warn_handler {
            handler(msg);
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!("{}", msg);
        }
    }

    pub(crate) fn verbose(&self, msg: &str) {
        if let Some(handler) = self.verbose_handler {
            handler(msg);
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!("{}", msg);
        }
    }
}
