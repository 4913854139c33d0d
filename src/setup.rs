//! Job initialization.

use crate::error::{Error, Result, StoreError};
use crate::options::CopyConfig;
use crate::state::CopyJobState;
use crate::store::{ObjectLocation, ObjectStore};

/// Capture the source's identity, plan the parts and open the upload session.
///
/// The returned state has `finished = false` and no shard checkpoint; hand
/// a copy of it to every worker index in `0..config.worker_count`.
///
/// Nothing is retried here. Failures go straight back to the orchestrator.
///
/// # Errors
///
/// - [`Error::SourceNotFound`] if the source does not exist
/// - [`Error::ObjectTooLarge`] if the object cannot be split within the part limits
/// - [`Error::UploadSession`] if the destination rejects the session
/// - [`Error::Store`] for other storage failures while reading the source
pub fn setup_copy_job<S: ObjectStore + ?Sized>(
    store: &S,
    source: &ObjectLocation,
    destination: &ObjectLocation,
    config: &CopyConfig,
) -> Result<CopyJobState> {
    let metadata = store.head_object(source).map_err(|e| match e {
        StoreError::NotFound(location) => Error::SourceNotFound(location),
        other => Error::Store(other),
    })?;

    let plan = config.chunking.plan(metadata.size)?;

    let upload_id = if plan.is_multipart() {
        let id = store
            .create_multipart_upload(destination)
            .map_err(|e| Error::UploadSession {
                destination: destination.clone(),
                source: e,
            })?;
        Some(id)
    } else {
        None
    };

    #[cfg(feature = "tracing")]
    tracing::info!(
        source = %source,
        destination = %destination,
        size = metadata.size,
        part_size = plan.part_size,
        part_count = plan.part_count,
        upload_id = ?upload_id,
        "copy job set up"
    );

    Ok(CopyJobState {
        source: source.clone(),
        destination: destination.clone(),
        source_content_id: metadata.content_id,
        upload_id,
        total_size: plan.total_size,
        part_size: plan.part_size,
        part_count: plan.part_count,
        worker_count: config.worker_count,
        finished: false,
        shard: None,
    })
}
