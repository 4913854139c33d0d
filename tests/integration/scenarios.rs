//! End-to-end copy scenarios across setup, repeated worker invocations and
//! finalization.

#[path = "../common/mod.rs"]
mod common;

use common::{FlakyStore, drive, pattern};
use partcopy::{
    ChunkingPolicy, CopyConfig, CopyJob, CopyWorker, Error, FinishedMarker, FsObjectStore,
    MemoryObjectStore, ObjectLocation, ObjectStore, WorkerOutput, abort_copy_job,
    finalize_copy_job, join_worker_outputs, setup_copy_job,
};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const PART: u64 = 64;

fn policy() -> ChunkingPolicy {
    ChunkingPolicy::default().with_min_part_size(PART)
}

fn config(workers: u32, concurrency: usize) -> CopyConfig {
    CopyConfig::default()
        .with_worker_count(workers)
        .with_concurrency(concurrency)
        .with_chunking(policy())
        .with_deadline_margin(Duration::ZERO)
}

fn src() -> ObjectLocation {
    ObjectLocation::new("src", "data/big.bin")
}

fn dst() -> ObjectLocation {
    ObjectLocation::new("dst", "copy/big.bin")
}

#[test]
fn test_copy_with_transient_failures() {
    let size = 10 * PART as usize + 1;
    let store =
        FlakyStore::new(MemoryObjectStore::new().with_chunking(policy())).failing_one_in(10);
    let source_id = store.inner.put_object(&src(), pattern(size));
    let config = config(4, 3);

    let state = setup_copy_job(&store, &src(), &dst(), &config).unwrap();
    assert_eq!(state.part_count, 11);
    assert_eq!(state.source_content_id, source_id);

    let result = drive(&store, &config, &state, Duration::from_secs(30), 100).unwrap();
    let joined = join_worker_outputs(result.outputs).unwrap();
    let report = finalize_copy_job(&store, &joined).unwrap();

    assert_eq!(report.part_count, 11);
    assert_eq!(report.content_id, source_id);
    assert_eq!(store.inner.committed_parts(&dst()).unwrap().len(), 11);
    assert_eq!(store.inner.object_data(&dst()).unwrap(), pattern(size));
    assert_eq!(store.inner.open_uploads(), 0);
}

#[test]
fn test_source_changed_after_setup() {
    let store = MemoryObjectStore::new().with_chunking(policy());
    store.put_object(&src(), pattern(5 * PART as usize));
    let config = config(2, 2);
    let state = setup_copy_job(&store, &src(), &dst(), &config).unwrap();

    store.put_object(&src(), pattern(5 * PART as usize + 3));

    let err = drive(&store, &config, &state, Duration::from_secs(30), 10)
        .err()
        .unwrap();
    assert!(matches!(err, Error::SourceChanged { .. }));
    assert!(!err.is_retryable());

    abort_copy_job(&store, &state).unwrap();
    assert_eq!(store.open_uploads(), 0);
    assert!(store.object_data(&dst()).is_none());
}

#[test]
fn test_deadline_splits_work_across_invocations() {
    let store = FlakyStore::new(MemoryObjectStore::new().with_chunking(policy()))
        .with_delay(Duration::from_millis(20));
    store.inner.put_object(&src(), pattern(24 * PART as usize));
    let config = config(2, 2);
    let state = setup_copy_job(&store, &src(), &dst(), &config).unwrap();

    let result = drive(&store, &config, &state, Duration::from_millis(60), 200).unwrap();
    assert!(result.invocations.iter().all(|&n| n > 1));

    let joined = join_worker_outputs(result.outputs).unwrap();
    finalize_copy_job(&store, &joined).unwrap();
    assert_eq!(
        store.inner.object_data(&dst()).unwrap(),
        pattern(24 * PART as usize)
    );
}

#[test]
fn test_resume_from_stale_checkpoint_skips_uploaded_parts() {
    let store = MemoryObjectStore::new().with_chunking(policy());
    store.put_object(&src(), pattern(6 * PART as usize));
    let config = config(1, 2);
    let state = setup_copy_job(&store, &src(), &dst(), &config).unwrap();

    // Keep only the first checkpoint, as if the process died right after it.
    let first = Mutex::new(None);
    let sink = |s: &partcopy::CopyJobState| {
        first.lock().unwrap().get_or_insert_with(|| s.clone());
    };
    let deadline = Instant::now() + Duration::from_secs(30);
    CopyWorker::new(&store, &config, 0)
        .with_checkpoint_sink(&sink)
        .run(state, deadline)
        .unwrap();

    let stale = first.into_inner().unwrap().unwrap();
    assert_eq!(stale.shard.unwrap().next_part, 1);

    let report = CopyWorker::new(&store, &config, 0)
        .run(stale, deadline)
        .unwrap();
    assert!(report.output.is_finished());
    assert_eq!(report.stats.parts_copied, 0);
    assert_eq!(report.stats.parts_present, 6);

    let report = finalize_copy_job(&store, &report.output.into_state().unwrap()).unwrap();
    assert_eq!(report.part_count, 6);
}

#[test]
fn test_non_primary_shards_return_marker_only() {
    let store = MemoryObjectStore::new().with_chunking(policy());
    store.put_object(&src(), pattern(8 * PART as usize));
    let config = config(4, 1);
    let state = setup_copy_job(&store, &src(), &dst(), &config).unwrap();

    let result = drive(&store, &config, &state, Duration::from_secs(30), 5).unwrap();
    assert!(result.outputs[0].state().is_some());
    for output in &result.outputs[1..] {
        assert_eq!(
            *output,
            WorkerOutput::Finished(FinishedMarker { finished: true })
        );
        assert_eq!(
            serde_json::to_string(output).unwrap(),
            r#"{"finished":true}"#
        );
    }
}

#[test]
fn test_more_workers_than_parts() {
    let store = MemoryObjectStore::new().with_chunking(policy());
    store.put_object(&src(), pattern(3 * PART as usize));
    let config = config(8, 2);
    let state = setup_copy_job(&store, &src(), &dst(), &config).unwrap();

    let result = drive(&store, &config, &state, Duration::from_secs(30), 3).unwrap();
    assert!(result.invocations.iter().all(|&n| n == 1));
    let joined = join_worker_outputs(result.outputs).unwrap();
    assert_eq!(finalize_copy_job(&store, &joined).unwrap().part_count, 3);
}

#[test]
fn test_corrupted_part_is_never_committed() {
    let store = MemoryObjectStore::new().with_chunking(policy());
    store.put_object(&src(), pattern(4 * PART as usize));
    let config = config(2, 2);
    let state = setup_copy_job(&store, &src(), &dst(), &config).unwrap();
    let result = drive(&store, &config, &state, Duration::from_secs(30), 3).unwrap();
    let joined = join_worker_outputs(result.outputs).unwrap();

    let upload_id = joined.upload_id.clone().unwrap();
    store
        .upload_part(&dst(), &upload_id, 3, &[0u8; PART as usize])
        .unwrap();

    let err = finalize_copy_job(&store, &joined).unwrap_err();
    assert!(matches!(err, Error::IntegrityMismatch { .. }));
    assert!(!err.is_retryable());
    assert!(store.object_data(&dst()).is_none());
}

#[test]
fn test_filesystem_backend_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let size = 7 * PART as usize + 3;
    std::fs::create_dir_all(root.path().join("src/data")).unwrap();
    std::fs::write(root.path().join("src/data/big.bin"), pattern(size)).unwrap();

    let store = FsObjectStore::new(root.path())
        .with_chunking(policy())
        .without_fsync();
    let job = CopyJob::new(&store)
        .workers(3)
        .concurrency(2)
        .chunking(policy())
        .deadline_margin(Duration::ZERO);

    let state = job.setup(&src(), &dst()).unwrap();
    assert_eq!(state.part_count, 8);

    let result = drive(&store, job.config(), &state, Duration::from_secs(30), 3).unwrap();
    let report = job.finalize_outputs(result.outputs).unwrap();
    assert_eq!(report.content_id, state.source_content_id);
    assert_eq!(
        std::fs::read(root.path().join("dst/copy/big.bin")).unwrap(),
        pattern(size)
    );
    assert_eq!(store.head_object(&dst()).unwrap().content_id, report.content_id);
}
