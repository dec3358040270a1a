#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashfeed::{
    FetchError, FetchResult, Record, SourceDescriptor, SourceKind,
    adapters::SourceAdapter,
    data::{RawRecord, normalize_record},
};
use serde_json::Value as JsonValue;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Normalizes a JSON array of objects into records.
pub fn records(rows: JsonValue) -> Vec<Record> {
    rows.as_array()
        .expect("array of rows")
        .iter()
        .map(|row| normalize_record(row.as_object().expect("object row")))
        .collect()
}

pub fn json_source(id: &str, url: &str) -> SourceDescriptor {
    SourceDescriptor::new(id, SourceKind::JsonApi).with_config("url", url)
}

/// Scripted adapter that counts invocations and answers after `delay`.
pub struct ScriptedAdapter {
    kind: SourceKind,
    calls: AtomicUsize,
    delay: Duration,
    failures_left: AtomicUsize,
    rows: Vec<RawRecord>,
}

impl ScriptedAdapter {
    pub fn new(kind: SourceKind, delay: Duration, rows: JsonValue) -> Arc<Self> {
        let rows = rows
            .as_array()
            .expect("array of rows")
            .iter()
            .map(|row| row.as_object().expect("object row").clone())
            .collect();
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
            delay,
            failures_left: AtomicUsize::new(0),
            rows,
        })
    }

    /// Makes the next `count` invocations fail with a network error.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, _descriptor: &SourceDescriptor) -> FetchResult<Vec<RawRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::network("scripted failure"));
        }
        Ok(self.rows.clone())
    }
}
