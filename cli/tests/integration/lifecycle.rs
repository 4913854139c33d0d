//! End-to-end job lifecycle tests for partcp CLI.

#[path = "../common/mod.rs"]
mod common;

use common::{PART, TestStore, pattern, read_json};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

const WORKERS: u32 = 4;

fn setup(store: &TestStore, size: usize) -> std::path::PathBuf {
    setup_with_workers(store, size, WORKERS)
}

fn setup_with_workers(store: &TestStore, size: usize, workers: u32) -> std::path::PathBuf {
    store.put("src/big.bin", &pattern(size));
    let job = store.file("job.json");
    store
        .cmd()
        .args(["-w", &workers.to_string()])
        .arg("setup")
        .arg("src/big.bin")
        .arg("dst/big.bin")
        .arg("--out")
        .arg(&job)
        .assert()
        .success();
    job
}

fn work(store: &TestStore, index: u32, state: &std::path::Path) -> std::path::PathBuf {
    let out = store.file(&format!("out-{index}.json"));
    store
        .cmd()
        .arg("work")
        .args(["--index", &index.to_string(), "--margin", "0"])
        .arg("--state")
        .arg(state)
        .arg("--checkpoint")
        .arg(store.file(&format!("shard-{index}.json")))
        .arg("--out")
        .arg(&out)
        .assert()
        .success();
    out
}

#[test]
fn test_full_lifecycle() {
    let store = TestStore::new();
    let size = 10 * PART + 1;
    let job = setup(&store, size);

    let state = read_json(&job);
    assert_eq!(state["part_count"], 11);
    assert_eq!(state["part_size"], PART as u64);
    assert_eq!(state["finished"], false);
    assert!(state["upload_id"].is_string());

    let outputs: Vec<_> = (0..WORKERS).map(|index| work(&store, index, &job)).collect();

    // Shard 0 carries the full state, the others only report completion.
    let primary = read_json(&outputs[0]);
    assert_eq!(primary["finished"], true);
    assert_eq!(primary["shard"]["next_part"], 4);
    for out in &outputs[1..] {
        assert_eq!(read_json(out), serde_json::json!({ "finished": true }));
    }

    store
        .cmd()
        .arg("finalize")
        .args(&outputs)
        .assert()
        .success()
        .stdout(predicate::str::contains("Committed dst/big.bin (11 parts"));

    assert_eq!(store.get("dst/big.bin"), Some(pattern(size)));
}

#[test]
fn test_resume_from_checkpoint() {
    let store = TestStore::new();
    let job = setup_with_workers(&store, 5 * PART, 1);

    // A zero time budget plans the shard and returns without copying.
    let first = store.file("first.json");
    store
        .cmd()
        .args(["work", "--index", "0", "--margin", "0"])
        .args(["--time-budget", "0"])
        .arg("--state")
        .arg(&job)
        .arg("--checkpoint")
        .arg(store.file("shard-0.json"))
        .arg("--out")
        .arg(&first)
        .assert()
        .success();
    let paused = read_json(&first);
    assert_eq!(paused["finished"], false);
    assert_eq!(paused["shard"]["next_part"], 1);
    assert_eq!(paused["shard"]["last_part"], 5);

    // The checkpoint file is picked up even though the original state is passed again.
    let second = store.file("second.json");
    store
        .cmd()
        .args(["work", "--index", "0", "--margin", "0"])
        .arg("--state")
        .arg(&job)
        .arg("--checkpoint")
        .arg(store.file("shard-0.json"))
        .arg("--out")
        .arg(&second)
        .assert()
        .success();
    assert_eq!(read_json(&second)["finished"], true);
    assert_eq!(read_json(&store.file("shard-0.json"))["shard"]["next_part"], 6);

    store
        .cmd()
        .arg("finalize")
        .arg(&second)
        .assert()
        .success();
    assert_eq!(store.get("dst/big.bin"), Some(pattern(5 * PART)));
}

#[test]
fn test_state_from_stdin_and_json_envelope() {
    let store = TestStore::new();
    let job = setup(&store, 3 * PART);
    let state = fs::read_to_string(&job).unwrap();

    let output = store
        .cmd()
        .args(["--output", "json", "work", "--index", "1", "--state", "-"])
        .args(["--margin", "0"])
        .write_stdin(state)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let payload: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(payload["schema_version"], "1.0");
    assert_eq!(payload["mode"], "work");
    assert_eq!(payload["index"], 1);
    assert_eq!(payload["finished"], true);
    assert_eq!(payload["output"], serde_json::json!({ "finished": true }));
    assert_eq!(payload["stats"]["parts_copied"], 1);
}

#[test]
fn test_single_part_object() {
    let store = TestStore::new();
    let job = setup(&store, 100);
    let state = read_json(&job);
    assert_eq!(state["part_count"], 1);
    assert!(state["upload_id"].is_null());

    let outputs: Vec<_> = (0..WORKERS).map(|index| work(&store, index, &job)).collect();
    store
        .cmd()
        .arg("finalize")
        .args(&outputs)
        .assert()
        .success();
    assert_eq!(store.get("dst/big.bin"), Some(pattern(100)));
}

#[test]
fn test_abort_discards_upload() {
    let store = TestStore::new();
    let job = setup(&store, 4 * PART);
    let outputs: Vec<_> = (0..WORKERS).map(|index| work(&store, index, &job)).collect();

    store
        .cmd()
        .arg("abort")
        .arg("--state")
        .arg(&job)
        .assert()
        .success();

    // The session is gone, so the parts can no longer be committed.
    store
        .cmd()
        .arg("finalize")
        .args(&outputs)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[storage]"));
    assert!(store.get("dst/big.bin").is_none());

    // Aborting again is harmless.
    store
        .cmd()
        .arg("abort")
        .arg("--state")
        .arg(&job)
        .assert()
        .success();
}
