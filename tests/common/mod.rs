//! Common test utilities for bridge integration tests.

use std::path::PathBuf;

use serde_json::{json, Value as Json};
use sqlbridge_lib::{Bridge, BridgeConfig, Request, Response};
use tempfile::TempDir;
use uuid::Uuid;

/// A bridge plus a scratch directory for file databases.
pub struct TestBridge {
    pub bridge: Bridge,
    pub dir: TempDir,
}

impl TestBridge {
    pub fn new(worker_count: usize) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let bridge = Bridge::new(BridgeConfig {
            worker_count,
            databases_path: Some(dir.path().to_path_buf()),
            pool_name: "it".to_string(),
            ..BridgeConfig::default()
        });
        Self { bridge, dir }
    }

    /// A fresh database file path inside the scratch directory.
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join(format!("{}.db", Uuid::new_v4()))
    }

    pub async fn call(&self, method: &str, arguments: Json) -> Response {
        self.bridge.invoke(Request::new(method, arguments)).await
    }

    pub async fn ok(&self, method: &str, arguments: Json) -> Json {
        match self.call(method, arguments.clone()).await {
            Ok(value) => value,
            Err(e) => panic!("{method} {arguments} failed: {e}"),
        }
    }

    pub async fn open(&self, arguments: Json) -> i64 {
        let opened = self.ok("openDatabase", arguments).await;
        opened["id"].as_i64().expect("open result carries an id")
    }

    pub async fn open_memory(&self) -> i64 {
        self.open(json!({"path": ":memory:"})).await
    }

    /// Create `numbers(n)` holding `1..=count`.
    pub async fn seed_numbers(&self, id: i64, count: i64) {
        self.ok("execute", json!({"id": id, "sql": "CREATE TABLE numbers (n INTEGER)"}))
            .await;
        let operations: Vec<Json> = (1..=count)
            .map(|n| json!({"method": "insert", "sql": "INSERT INTO numbers VALUES (?)", "arguments": [n]}))
            .collect();
        self.ok("batch", json!({"id": id, "operations": operations, "noResult": true}))
            .await;
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.bridge.shutdown();
    }
}
