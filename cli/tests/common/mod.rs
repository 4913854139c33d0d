//! Common test utilities for integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Part size used by the fixtures, small enough to make many parts cheap.
pub const PART: usize = 1024;

/// A directory-backed store plus a scratch directory for job files.
pub struct TestStore {
    pub root: TempDir,
    pub work: TempDir,
}

impl TestStore {
    /// Create a store with empty `src` and `dst` buckets.
    pub fn new() -> Self {
        let store = Self {
            root: TempDir::new().expect("Failed to create temp store root"),
            work: TempDir::new().expect("Failed to create temp work dir"),
        };
        fs::create_dir_all(store.root.path().join("src")).expect("Failed to create bucket");
        fs::create_dir_all(store.root.path().join("dst")).expect("Failed to create bucket");
        store
    }

    /// Write an object as raw bytes.
    pub fn put(&self, location: &str, data: &[u8]) {
        let path = self.root.path().join(location);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create key directory");
        }
        fs::write(path, data).expect("Failed to write object");
    }

    /// Read an object, if it exists.
    pub fn get(&self, location: &str) -> Option<Vec<u8>> {
        fs::read(self.root.path().join(location)).ok()
    }

    /// Path of a scratch file.
    pub fn file(&self, name: &str) -> PathBuf {
        self.work.path().join(name)
    }

    /// `partcp` preconfigured with the store root and the fixture part size.
    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("partcp");
        cmd.arg("--root")
            .arg(self.root.path())
            .arg("--min-part-size")
            .arg(PART.to_string())
            .arg("--no-sync")
            .arg("--quiet");
        cmd
    }
}

/// Deterministic, non-repeating-per-part test bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / PART) % 256) as u8).collect()
}

/// Parse a JSON file written by the CLI.
pub fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).expect("Failed to read JSON file");
    serde_json::from_str(&text).expect("Invalid JSON")
}
