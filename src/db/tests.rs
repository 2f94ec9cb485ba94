//! Database engine unit tests

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::command::SqlCommand;
    use crate::config::LogLevel;
    use crate::db::{Database, DbError, OpenConfig, TransactionChange};
    use crate::value::Value;

    fn open_memory() -> Database {
        let db = Database::new(1, &OpenConfig::new(None, false, None, LogLevel::Verbose));
        db.open(false).expect("in-memory DB");
        db
    }

    fn sql(text: &str) -> SqlCommand {
        SqlCommand::new(text, None)
    }

    fn sql_args(text: &str, args: Vec<Value>) -> SqlCommand {
        SqlCommand::new(text, Some(args))
    }

    fn seed_numbers(db: &Database, count: i64) {
        db.execute(&sql("CREATE TABLE numbers (n INTEGER, label TEXT)"), TransactionChange::Unchanged)
            .unwrap();
        for n in 1..=count {
            db.insert(
                &sql_args(
                    "INSERT INTO numbers (n, label) VALUES (?, ?)",
                    vec![Value::Integer(n), Value::from(format!("#{n}"))],
                ),
                false,
            )
            .unwrap();
        }
    }

    #[test]
    fn test_insert_reports_row_id() {
        let db = open_memory();
        db.execute(&sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)"), TransactionChange::Unchanged)
            .unwrap();
        let id = db
            .insert(&sql_args("INSERT INTO t (name) VALUES (?)", vec![Value::from("a")]), false)
            .unwrap();
        assert_eq!(id, Some(1));
        let id = db
            .insert(&sql_args("INSERT INTO t (name) VALUES (?)", vec![Value::from("b")]), false)
            .unwrap();
        assert_eq!(id, Some(2));
    }

    #[test]
    fn test_insert_ignored_by_conflict_reports_null() {
        let db = open_memory();
        db.execute(
            &sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE ON CONFLICT IGNORE)"),
            TransactionChange::Unchanged,
        )
        .unwrap();
        let insert = sql_args("INSERT INTO t (name) VALUES (?)", vec![Value::from("dup")]);
        assert_eq!(db.insert(&insert, false).unwrap(), Some(1));
        assert_eq!(db.insert(&insert, false).unwrap(), None);
    }

    #[test]
    fn test_insert_no_result_skips_readback() {
        let db = open_memory();
        db.execute(&sql("CREATE TABLE t (v INTEGER)"), TransactionChange::Unchanged)
            .unwrap();
        let id = db
            .insert(&sql_args("INSERT INTO t VALUES (?)", vec![Value::Integer(1)]), true)
            .unwrap();
        assert_eq!(id, None);
    }

    #[test]
    fn test_update_reports_changed_rows() {
        let db = open_memory();
        seed_numbers(&db, 5);
        let changed = db
            .update(
                &sql_args("UPDATE numbers SET label = ? WHERE n > ?", vec![Value::from("big"), Value::Integer(2)]),
                false,
            )
            .unwrap();
        assert_eq!(changed, Some(3));
        let deleted = db.update(&sql("DELETE FROM numbers"), false).unwrap();
        assert_eq!(deleted, Some(5));
    }

    #[test]
    fn test_query_materializes_all_rows() {
        let db = open_memory();
        seed_numbers(&db, 3);
        let result = db
            .query(&sql_args("SELECT n, label FROM numbers WHERE n >= ? ORDER BY n", vec![Value::Integer(2)]), None)
            .unwrap();
        assert_eq!(result.columns, vec!["n".to_string(), "label".to_string()]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Integer(2), Value::from("#2")],
                vec![Value::Integer(3), Value::from("#3")],
            ]
        );
        assert_eq!(result.cursor_id, None);
    }

    #[test]
    fn test_query_inlined_arguments_keep_statement_meaning() {
        let db = open_memory();
        let result = db
            .query(&sql_args("SELECT 10-? AS v", vec![Value::Integer(-5)]), None)
            .unwrap();
        assert_eq!(result.rows, vec![vec![Value::Integer(15)]]);

        let result = db
            .query(&sql_args("SELECT ?1 + 0, ?2 + 0", vec![Value::Integer(5), Value::Integer(6)]), None)
            .unwrap();
        assert_eq!(result.rows, vec![vec![Value::Integer(5), Value::Integer(6)]]);
    }

    #[test]
    fn test_query_empty_result_keeps_columns() {
        let db = open_memory();
        seed_numbers(&db, 1);
        let result = db.query(&sql("SELECT n FROM numbers WHERE n > 100"), None).unwrap();
        assert_eq!(result.columns, vec!["n".to_string()]);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_row_values_cover_every_cell_type() {
        let db = open_memory();
        db.execute(&sql("CREATE TABLE cells (a, b, c, d, e)"), TransactionChange::Unchanged)
            .unwrap();
        db.execute(
            &sql_args(
                "INSERT INTO cells VALUES (?, ?, ?, ?, ?)",
                vec![
                    Value::Null,
                    Value::Integer(i64::MAX),
                    Value::Real(1.25),
                    Value::from("text"),
                    Value::List(vec![Value::Integer(1), Value::Integer(2), Value::Integer(255)]),
                ],
            ),
            TransactionChange::Unchanged,
        )
        .unwrap();
        let result = db.query(&sql("SELECT a, b, c, d, e FROM cells"), None).unwrap();
        assert_eq!(
            result.rows[0],
            vec![
                Value::Null,
                Value::Integer(i64::MAX),
                Value::Real(1.25),
                Value::from("text"),
                Value::Blob(vec![1, 2, 255]),
            ]
        );
    }

    #[test]
    fn test_cursor_pages_until_exhausted() {
        let db = open_memory();
        seed_numbers(&db, 5);
        let query = sql("SELECT n FROM numbers ORDER BY n");

        let first = db.query(&query, Some(2)).unwrap();
        assert_eq!(first.rows.len(), 2);
        let cursor_id = first.cursor_id.expect("more rows remain");
        assert_eq!(db.cursor_count(), 1);

        let second = db.query_cursor_next(cursor_id, false).unwrap().unwrap();
        assert_eq!(second.rows, vec![vec![Value::Integer(3)], vec![Value::Integer(4)]]);
        assert_eq!(second.cursor_id, Some(cursor_id));

        let last = db.query_cursor_next(cursor_id, false).unwrap().unwrap();
        assert_eq!(last.rows, vec![vec![Value::Integer(5)]]);
        assert_eq!(last.cursor_id, None);
        assert_eq!(db.cursor_count(), 0);

        assert!(matches!(
            db.query_cursor_next(cursor_id, false),
            Err(DbError::CursorNotFound(id)) if id == cursor_id
        ));
    }

    #[test]
    fn test_cursor_not_created_when_single_page_suffices() {
        let db = open_memory();
        seed_numbers(&db, 4);
        let result = db.query(&sql("SELECT n FROM numbers"), Some(4)).unwrap();
        assert_eq!(result.rows.len(), 4);
        assert_eq!(result.cursor_id, None);
        assert_eq!(db.cursor_count(), 0);
    }

    #[test]
    fn test_cursor_cancel_releases_it() {
        let db = open_memory();
        seed_numbers(&db, 10);
        let first = db.query(&sql("SELECT n FROM numbers"), Some(3)).unwrap();
        let cursor_id = first.cursor_id.unwrap();
        assert!(db.query_cursor_next(cursor_id, true).unwrap().is_none());
        assert!(matches!(
            db.query_cursor_next(cursor_id, false),
            Err(DbError::CursorNotFound(_))
        ));
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        let db = open_memory();
        seed_numbers(&db, 1);
        assert!(matches!(
            db.query(&sql("SELECT n FROM numbers"), Some(0)),
            Err(DbError::BadParam(_))
        ));
    }

    #[test]
    fn test_close_invalidates_cursors_and_handle() {
        let db = open_memory();
        seed_numbers(&db, 3);
        let first = db.query(&sql("SELECT n FROM numbers"), Some(1)).unwrap();
        assert!(first.cursor_id.is_some());
        db.close().unwrap();
        assert!(!db.is_open());
        assert_eq!(db.cursor_count(), 0);
        assert!(matches!(
            db.execute(&sql("SELECT 1"), TransactionChange::Unchanged),
            Err(DbError::Closed(1))
        ));
    }

    #[test]
    fn test_transaction_marker_updates_flag() {
        let db = open_memory();
        db.execute(&sql("BEGIN IMMEDIATE"), TransactionChange::Enter).unwrap();
        assert!(db.in_transaction());
        db.execute(&sql("COMMIT"), TransactionChange::Leave).unwrap();
        assert!(!db.in_transaction());

        // Entering only sticks on success.
        assert!(db.execute(&sql("THIS IS NOT SQL"), TransactionChange::Enter).is_err());
        assert!(!db.in_transaction());

        // Leaving clears even when the statement fails.
        db.execute(&sql("BEGIN"), TransactionChange::Enter).unwrap();
        db.execute(&sql("COMMIT"), TransactionChange::Unchanged).unwrap();
        assert!(db.in_transaction());
        assert!(db.execute(&sql("COMMIT"), TransactionChange::Leave).is_err());
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("app.db");
        let open_config = OpenConfig::new(Some(path.display().to_string()), false, None, LogLevel::None);
        let db = Database::new(1, &open_config);
        db.open(true).unwrap();
        db.execute(&sql("CREATE TABLE t (v)"), TransactionChange::Unchanged).unwrap();
        db.close().unwrap();
        assert!(path.exists());

        crate::db::delete_database_files(&path.display().to_string()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let open_config = OpenConfig::new(Some(path.display().to_string()), true, None, LogLevel::None);
        let db = Database::new(1, &open_config);
        let error = db.open(false).unwrap_err();
        let payload = crate::error::classify(&error, None);
        assert_eq!(payload.kind, crate::error::ErrorKind::OpenFailed);
    }
}
