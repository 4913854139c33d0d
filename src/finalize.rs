//! Job finalization: integrity check and commit.

use crate::content_id::ContentId;
use crate::error::{Error, Result, StoreError};
use crate::state::{CopyJobState, WorkerOutput};
use crate::store::{ObjectLocation, ObjectStore, UploadedPart};
use std::collections::BTreeMap;

/// Outcome of a successful finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Object that was committed
    pub destination: ObjectLocation,
    /// Verified content id of the destination
    pub content_id: ContentId,
    /// Number of parts assembled
    pub part_count: u32,
    /// Parts handed to the commit, in order (empty for single-part jobs)
    pub parts: Vec<UploadedPart>,
}

/// Fold the outputs of every shard into the primary shard's state.
///
/// # Errors
///
/// - [`Error::ShardsUnfinished`] if any output is not finished
/// - [`Error::MissingPrimaryState`] if no output carries the full state
pub fn join_worker_outputs(outputs: Vec<WorkerOutput>) -> Result<CopyJobState> {
    let total = outputs.len();
    let pending = outputs.iter().filter(|o| !o.is_finished()).count();
    if pending > 0 {
        return Err(Error::ShardsUnfinished { pending, total });
    }
    outputs
        .into_iter()
        .find_map(WorkerOutput::into_state)
        .ok_or(Error::MissingPrimaryState)
}

/// Verify the uploaded parts against the source and commit the destination.
///
/// For multipart jobs the session must hold exactly parts `1..=part_count`,
/// and the composite content id of those parts must equal the content id
/// captured at setup. Only then is the upload completed. Single-part jobs
/// were committed by the whole-object copy, so the destination's content id
/// is checked instead.
///
/// # Errors
///
/// - [`Error::InvalidState`] if `state` is not marked finished
/// - [`Error::IncompleteUpload`] if parts are missing or unexpected
/// - [`Error::IntegrityMismatch`] if the parts do not compose to the source's content id
/// - [`Error::Store`] if a storage call fails
pub fn finalize_copy_job<S: ObjectStore + ?Sized>(
    store: &S,
    state: &CopyJobState,
) -> Result<FinalizeReport> {
    if !state.finished {
        return Err(Error::InvalidState(
            "finalization requested for an unfinished job".into(),
        ));
    }

    let Some(upload_id) = &state.upload_id else {
        return verify_single_part(store, state);
    };

    let listed = store.list_parts(&state.destination, upload_id)?;
    let parts = complete_part_list(listed, state.part_count)?;

    let actual = ContentId::composite(parts.iter().map(|p| &p.content_id))?;
    if actual != state.source_content_id {
        return Err(Error::IntegrityMismatch {
            expected: state.source_content_id.clone(),
            actual,
        });
    }

    let committed = store.complete_multipart_upload(&state.destination, upload_id, &parts)?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        destination = %state.destination,
        parts = parts.len(),
        content_id = %committed,
        "copy job committed"
    );

    Ok(FinalizeReport {
        destination: state.destination.clone(),
        content_id: committed,
        part_count: state.part_count,
        parts,
    })
}

/// Discard the upload session of a failed job.
///
/// Single-part jobs have nothing to discard. A session that is already gone
/// counts as aborted.
///
/// # Errors
///
/// Returns [`Error::Store`] if the backend fails to abort the session.
pub fn abort_copy_job<S: ObjectStore + ?Sized>(store: &S, state: &CopyJobState) -> Result<()> {
    let Some(upload_id) = &state.upload_id else {
        return Ok(());
    };
    match store.abort_multipart_upload(&state.destination, upload_id) {
        Ok(()) | Err(StoreError::NoSuchUpload { .. }) => {
            #[cfg(feature = "tracing")]
            tracing::info!(destination = %state.destination, upload_id = %upload_id, "copy job aborted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Exactly parts `1..=part_count`, in order, or [`Error::IncompleteUpload`].
fn complete_part_list(listed: Vec<UploadedPart>, part_count: u32) -> Result<Vec<UploadedPart>> {
    let mut by_number = BTreeMap::new();
    let mut stray = false;
    for part in listed {
        if (1..=part_count).contains(&part.part_number) {
            by_number.insert(part.part_number, part);
        } else {
            stray = true;
        }
    }
    if stray || by_number.len() != part_count as usize {
        return Err(Error::IncompleteUpload {
            expected: part_count,
            found: by_number.len(),
        });
    }
    Ok(by_number.into_values().collect())
}

fn verify_single_part<S: ObjectStore + ?Sized>(
    store: &S,
    state: &CopyJobState,
) -> Result<FinalizeReport> {
    let metadata = match store.head_object(&state.destination) {
        Ok(metadata) => metadata,
        Err(StoreError::NotFound(_)) => {
            return Err(Error::IncompleteUpload {
                expected: 1,
                found: 0,
            });
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.content_id != state.source_content_id {
        return Err(Error::IntegrityMismatch {
            expected: state.source_content_id.clone(),
            actual: metadata.content_id,
        });
    }
    Ok(FinalizeReport {
        destination: state.destination.clone(),
        content_id: metadata.content_id,
        part_count: 1,
        parts: Vec::new(),
    })
}
