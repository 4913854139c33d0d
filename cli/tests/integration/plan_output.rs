//! Plan output contract tests for partcp CLI.

#[path = "../common/mod.rs"]
mod common;

use common::{PART, TestStore, pattern};
use predicates::prelude::*;
use rstest::rstest;
use serde_json::Value;

fn plan_json(store: &TestStore, args: &[&str]) -> Value {
    let output = store
        .cmd()
        .args(["--output", "json", "plan"])
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

#[rstest]
#[case::empty(0, 1)]
#[case::exactly_one_part(PART as u64, 1)]
#[case::one_byte_over(PART as u64 + 1, 2)]
#[case::ten_parts_and_a_byte(10 * PART as u64 + 1, 11)]
fn test_plan_part_counts(#[case] size: u64, #[case] parts: u64) {
    let store = TestStore::new();
    let payload = plan_json(&store, &["-w", "4", "--size", &size.to_string()]);

    assert_eq!(payload["schema_version"], "1.0");
    assert_eq!(payload["mode"], "plan");
    assert_eq!(payload["total_size"], size);
    assert_eq!(payload["part_count"], parts);
    assert_eq!(payload["multipart"], parts > 1);

    // Shards tile 1..=part_count contiguously.
    let shards = payload["shards"].as_array().unwrap();
    assert_eq!(shards.len(), 4);
    let mut next = 1;
    let mut covered = 0;
    for shard in shards {
        assert_eq!(shard["first_part"], next);
        let count = shard["parts"].as_u64().unwrap();
        next += count;
        covered += count;
    }
    assert_eq!(covered, parts);
}

#[test]
fn test_plan_from_source_object() {
    let store = TestStore::new();
    store.put("src/obj.bin", &pattern(3 * PART + 5));

    let payload = plan_json(&store, &["-w", "2", "src/obj.bin"]);
    assert_eq!(payload["total_size"], 3 * PART as u64 + 5);
    assert_eq!(payload["part_count"], 4);
    assert_eq!(payload["shards"][0]["last_part"], 2);
    assert_eq!(payload["shards"][1]["first_part"], 3);
}

#[test]
fn test_plan_human_output() {
    let store = TestStore::new();
    store
        .cmd()
        .args(["-w", "3", "plan", "--size", "2048"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2.00 KB in 2 parts of 1.00 KB"))
        .stdout(predicate::str::contains("shard 2: (empty)"));
}

#[test]
fn test_plan_does_not_touch_store() {
    let store = TestStore::new();
    store.put("src/obj.bin", &pattern(PART));
    plan_json(&store, &["src/obj.bin", "-w", "1"]);
    assert!(store.get("dst/obj.bin").is_none());
    assert!(!store.root.path().join("dst/.partcopy").exists());
}

#[test]
fn test_plan_requires_size_or_source() {
    let store = TestStore::new();
    store.cmd().arg("plan").assert().failure();
}
