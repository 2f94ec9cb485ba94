//! Request-level tests for the bridge.
//!
//! These drive `Bridge` with in-memory databases. File-backed scenarios live in
//! `tests/bridge_integration_test.rs`.

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::config::{BridgeConfig, LogLevel};
    use crate::error::ErrorKind;
    use crate::{Bridge, Reply, Request, Response};

    fn bridge() -> Bridge {
        Bridge::new(BridgeConfig {
            worker_count: 2,
            pool_name: "unit".to_string(),
            ..BridgeConfig::default()
        })
    }

    async fn call(bridge: &Bridge, method: &str, arguments: serde_json::Value) -> Response {
        bridge.invoke(Request::new(method, arguments)).await
    }

    async fn open_memory(bridge: &Bridge) -> i64 {
        let opened = call(bridge, "openDatabase", json!({"path": ":memory:"})).await.unwrap();
        opened["id"].as_i64().unwrap()
    }

    // =======================================================================
    // Reply
    // =======================================================================

    #[test]
    fn test_dropped_reply_answers_with_error() {
        let (tx, rx) = mpsc::channel();
        drop(Reply::new(move |response| tx.send(response).unwrap()));
        let response = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(response.unwrap_err().kind, ErrorKind::DatabaseNotFound);
    }

    #[test]
    fn test_reply_completes_once() {
        let (tx, rx) = mpsc::channel();
        let reply = Reply::new(move |response| tx.send(response).unwrap());
        reply.success(json!(7));
        assert_eq!(rx.recv().unwrap().unwrap(), json!(7));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reply_channel_delivers_response() {
        let (reply, rx) = Reply::channel();
        reply.error(crate::ErrorPayload::bad_param("nope"));
        let response = tokio_test::block_on(rx).unwrap();
        assert_eq!(response.unwrap_err().kind, ErrorKind::BadParam);
    }

    // =======================================================================
    // Dispatch
    // =======================================================================

    #[tokio::test]
    async fn test_unknown_method_is_bad_param() {
        let bridge = bridge();
        let error = call(&bridge, "vacuumEverything", json!({})).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::BadParam);
        assert!(!bridge.is_pool_running());
    }

    #[tokio::test]
    async fn test_missing_argument_is_bad_param() {
        let bridge = bridge();
        let error = call(&bridge, "execute", json!({"id": 1})).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::BadParam);
        assert!(error.context.is_none());
    }

    #[tokio::test]
    async fn test_unknown_database_is_reported_without_scheduling() {
        let bridge = bridge();
        let error = call(&bridge, "query", json!({"id": 42, "sql": "SELECT 1"})).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::DatabaseNotFound);
        assert!(!bridge.is_pool_running());
    }

    #[tokio::test]
    async fn test_pool_starts_lazily_and_stops_after_last_close() {
        let bridge = bridge();
        assert!(!bridge.is_pool_running());

        let id = open_memory(&bridge).await;
        assert!(bridge.is_pool_running());
        assert_eq!(bridge.open_databases(), 1);

        call(&bridge, "closeDatabase", json!({"id": id})).await.unwrap();
        assert_eq!(bridge.open_databases(), 0);
        for _ in 0..200 {
            if !bridge.is_pool_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!bridge.is_pool_running());

        // A later open starts a fresh pool.
        let again = open_memory(&bridge).await;
        assert!(again > id);
        assert!(bridge.is_pool_running());
        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_sql_error_carries_statement_context() {
        let bridge = bridge();
        let id = open_memory(&bridge).await;
        let error = call(
            &bridge,
            "query",
            json!({"id": id, "sql": "SELECT * FROM nowhere WHERE a = ?", "arguments": [1]}),
        )
        .await
        .unwrap_err();
        assert_eq!(error.kind, ErrorKind::SqliteError);
        let context = error.context.unwrap();
        assert_eq!(context.sql, "SELECT * FROM nowhere WHERE a = ?");
        assert_eq!(context.arguments, vec![crate::Value::Integer(1)]);
        bridge.shutdown();
    }

    // =======================================================================
    // Options and diagnostics
    // =======================================================================

    #[tokio::test]
    async fn test_query_as_map_list_option() {
        let bridge = bridge();
        let id = open_memory(&bridge).await;
        call(&bridge, "execute", json!({"id": id, "sql": "CREATE TABLE t (a, b)"})).await.unwrap();
        call(&bridge, "insert", json!({"id": id, "sql": "INSERT INTO t VALUES (1, 'x')"})).await.unwrap();

        call(&bridge, "options", json!({"queryAsMapList": true})).await.unwrap();
        let rows = call(&bridge, "query", json!({"id": id, "sql": "SELECT a, b FROM t"})).await.unwrap();
        assert_eq!(rows, json!([{"a": 1, "b": "x"}]));

        // Paged queries keep the columns/rows shape.
        let page = call(&bridge, "query", json!({"id": id, "sql": "SELECT a FROM t", "cursorPageSize": 5}))
            .await
            .unwrap();
        assert_eq!(page, json!({"columns": ["a"], "rows": [[1]]}));
        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_options_validation() {
        let bridge = bridge();
        let error = call(&bridge, "options", json!({"threadCount": 0})).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::BadParam);
        let error = call(&bridge, "options", json!({"logLevel": 7})).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::BadParam);
        assert_eq!(
            call(&bridge, "options", json!({"logLevel": 2, "threadPriority": 5})).await.unwrap(),
            serde_json::Value::Null
        );
        assert_eq!(bridge.state.options().log_level, LogLevel::Verbose);
        assert_eq!(bridge.state.options().thread_priority, Some(5));
        let snapshot = call(&bridge, "debug", json!({"cmd": "get"})).await.unwrap();
        assert_eq!(snapshot, json!({"logLevel": 2, "threadPriority": 5}));
    }

    #[tokio::test]
    async fn test_thread_count_applies_to_next_pool() {
        let bridge = bridge();
        call(&bridge, "options", json!({"threadCount": 3})).await.unwrap();
        open_memory(&bridge).await;
        let snapshot = call(&bridge, "debug", json!({"cmd": "get"})).await.unwrap();
        assert_eq!(snapshot["pool"]["workers"], json!(3));
        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_debug_snapshot_lists_open_databases() {
        let bridge = bridge();
        assert_eq!(call(&bridge, "debug", json!({"cmd": "get"})).await.unwrap(), json!({}));

        call(&bridge, "options", json!({"logLevel": 1})).await.unwrap();
        let id = open_memory(&bridge).await;
        let snapshot = call(&bridge, "debug", json!({"cmd": "get"})).await.unwrap();
        assert_eq!(snapshot["logLevel"], json!(1));
        let entry = &snapshot["databases"][id.to_string()];
        assert_eq!(entry["path"], json!(":memory:"));
        assert_eq!(entry["singleInstance"], json!(false));
        assert_eq!(entry["inTransaction"], json!(false));
        assert_eq!(entry["cursors"], json!(0));
        assert_eq!(entry["logLevel"], json!(1));
        assert_eq!(snapshot["pool"]["workers"], json!(2));

        assert_eq!(call(&bridge, "debug", json!({"cmd": "reset"})).await.unwrap(), json!({}));
        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_databases_path_uses_config() {
        let bridge = Bridge::new(BridgeConfig {
            databases_path: Some("/data/app/databases".into()),
            ..BridgeConfig::default()
        });
        let path = call(&bridge, "getDatabasesPath", serde_json::Value::Null).await.unwrap();
        assert_eq!(path, json!("/data/app/databases"));
    }

    #[tokio::test]
    async fn test_transaction_survives_pool_restart() {
        let bridge = bridge();
        let id = open_memory(&bridge).await;
        call(&bridge, "execute", json!({"id": id, "sql": "BEGIN", "inTransaction": true})).await.unwrap();
        bridge.shutdown();

        let commit = call(&bridge, "execute", json!({"id": id, "sql": "COMMIT", "inTransaction": false}));
        let response = tokio::time::timeout(Duration::from_secs(5), commit)
            .await
            .expect("commit was never answered");
        assert_eq!(response.unwrap(), serde_json::Value::Null);
        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_pool_restarts_after_shutdown() {
        let bridge = Bridge::new(BridgeConfig {
            worker_count: 1,
            ..BridgeConfig::default()
        });
        let id = open_memory(&bridge).await;
        bridge.shutdown();
        assert!(!bridge.is_pool_running());

        // The database is still registered; a new pool serves it.
        let value = call(&bridge, "query", json!({"id": id, "sql": "SELECT 1 AS one"})).await.unwrap();
        assert_eq!(value, json!({"columns": ["one"], "rows": [[1]]}));
        bridge.shutdown();
    }
}
