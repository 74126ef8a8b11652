//! Integration tests for the store lifecycle, row access and primary keys

use tempfile::TempDir;
use velocity::{
    row, BatchChunks, Column, DataType, Error, RowBatch, Schema, Value, VelocityBlock, VelocityOptions,
};

fn employee_schema() -> Schema {
    Schema::new()
        .with_column("Id", DataType::Integer)
        .with_column("Name", DataType::String)
        .with_column("Dept", DataType::String)
        .with_column("Salary", DataType::Float)
}

fn employees(dir: &TempDir) -> VelocityBlock {
    let options = VelocityOptions::default().primary_key("Id").auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path().join("staff"), employee_schema(), options).unwrap();
    store
        .append_rows(vec![
            row![1, "Ann", "Eng", 120.0],
            row![2, "Bob", "Eng", 100.0],
            row![3, "Cid", "Sales", 50.0],
            row![4, "Dee", "Eng", 80.0],
        ])
        .unwrap();
    store
}

/// Test that flushed rows survive a reopen, in order
#[test]
fn test_create_flush_reopen() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let store = employees(&dir);
    store.flush().unwrap();
    let path = store.path().to_path_buf();
    store.close().unwrap();

    let store = VelocityBlock::open(&path).unwrap();
    assert_eq!(store.row_count(), 4);
    assert_eq!(store.schema(), employee_schema());
    assert_eq!(store.options().primary_key_column.as_deref(), Some("Id"));
    assert_eq!(store.get_value(0, "Name").unwrap(), Value::from("Ann"));
    assert_eq!(store.get_value(3, "Salary").unwrap(), Value::Float(80.0));
}

/// Test that appended rows are readable before any flush
#[test]
fn test_unflushed_rows_are_visible() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let store = employees(&dir);
    assert_eq!(store.row_count(), 4);

    let id = store.add_row(row![5, "Eve", "Ops", 70.0]).unwrap();
    assert_eq!(store.read_row(id).unwrap(), row![5, "Eve", "Ops", 70.0]);
    assert_eq!(store.get_value_by_id(id, "Dept").unwrap(), Value::from("Ops"));
    assert_eq!(store.row_id_at(4).unwrap(), id);
}

#[test]
fn test_create_twice_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("twice");
    VelocityBlock::create(&path, VelocityOptions::default()).unwrap();
    assert!(matches!(
        VelocityBlock::create(&path, VelocityOptions::default()),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_open_missing_store() {
    let dir = TempDir::new().unwrap();
    match VelocityBlock::open(dir.path().join("nothing")) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected NotFound, got {:?}", other.map(|s| s.row_count())),
    }
}

/// Test that a rejected row leaves the store untouched
#[test]
fn test_append_is_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);

    let result = store.append_rows(vec![row![10, "Ok", "Eng", 1.0], row![11, "Bad", "Eng", "not a number"]]);
    assert!(matches!(result, Err(Error::SchemaMismatch(_))));
    assert_eq!(store.row_count(), 4);
    assert_eq!(store.find_row_id(10).unwrap(), None);

    // Wrong arity.
    assert!(store.add_row(row![12, "Short"]).is_err());
    assert_eq!(store.row_count(), 4);
}

#[test]
fn test_primary_key_uniqueness() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);

    assert!(matches!(store.add_row(row![1, "Dup", "Eng", 1.0]), Err(Error::DuplicateKey(_))));
    assert!(matches!(
        store.add_row(row![Value::Null, "NoKey", "Eng", 1.0]),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.append_rows(vec![row![7, "A", "Eng", 1.0], row![7, "B", "Eng", 2.0]]),
        Err(Error::DuplicateKey(_))
    ));
    assert_eq!(store.row_count(), 4);
}

#[test]
fn test_update_and_delete_by_key() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let store = employees(&dir);
    store.flush().unwrap();

    let old = store.find_row_id(2).unwrap().unwrap();
    let new = store.update_row_by_key(2, row![2, "Bob", "Ops", 110.0]).unwrap();
    assert_ne!(old, new);
    assert_eq!(store.find_row_id(2).unwrap(), Some(new));
    assert_eq!(store.get_value_by_id(new, "Dept").unwrap(), Value::from("Ops"));

    // The row keeps its logical position.
    assert_eq!(store.get_value(1, "Name").unwrap(), Value::from("Bob"));
    assert_eq!(store.get_value(1, "Salary").unwrap(), Value::Float(110.0));
    assert!(store.is_row_deleted(old).unwrap());

    store.delete_row_by_key(3).unwrap();
    assert_eq!(store.row_count(), 3);
    assert_eq!(store.find_row_id(3).unwrap(), None);
    assert!(matches!(store.delete_row_by_key(3), Err(Error::KeyNotFound(_))));
    assert!(matches!(store.update_row_by_key(99, row![99, "X", "Eng", 1.0]), Err(Error::KeyNotFound(_))));

    let names: Vec<Value> = store.to_batch().unwrap().column("Name").unwrap().to_vec();
    assert_eq!(names, row!["Ann", "Bob", "Dee"]);
}

/// Test that an update may move a row to a free key but not onto a taken one
#[test]
fn test_update_changes_key() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);

    store.update_row_by_key(4, row![40, "Dee", "Eng", 80.0]).unwrap();
    assert_eq!(store.find_row_id(4).unwrap(), None);
    assert!(store.find_row_id(40).unwrap().is_some());

    assert!(matches!(
        store.update_row_by_key(40, row![1, "Dee", "Eng", 80.0]),
        Err(Error::DuplicateKey(_))
    ));
}

#[test]
fn test_batch_key_operations() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);

    let ids = store
        .update_rows(vec![
            (Value::from(1), row![1, "Ann", "Eng", 130.0]),
            (Value::from(4), row![4, "Dee", "Ops", 85.0]),
        ])
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(store.get_value(0, "Salary").unwrap(), Value::Float(130.0));

    // A missing key fails the whole batch.
    assert!(store.delete_rows(&[Value::from(2), Value::from(42)]).is_err());
    assert_eq!(store.row_count(), 4);

    assert_eq!(store.delete_rows(&[Value::from(2), Value::from(3)]).unwrap(), 2);
    assert_eq!(store.row_count(), 2);
}

#[test]
fn test_stale_handle_after_update() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);

    let old = store.find_row_id(1).unwrap().unwrap();
    store.update_row_by_id(old, row![1, "Ann", "Eng", 125.0]).unwrap();
    assert!(matches!(store.read_row(old), Err(Error::RowNotFound(_))));
    assert!(store.delete_row_by_id(old).is_err());
}

#[test]
fn test_positional_access() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);

    store.remove_row(0).unwrap();
    assert_eq!(store.get_value(0, "Name").unwrap(), Value::from("Bob"));
    store.update_row(0, row![2, "Bobby", "Eng", 100.0]).unwrap();
    assert_eq!(store.get_value(0, "Name").unwrap(), Value::from("Bobby"));

    assert!(matches!(store.get_value(3, "Name"), Err(Error::RowNotFound(_))));
    assert!(matches!(store.get_value(0, "Missing"), Err(Error::ColumnNotFound(_))));
}

#[test]
fn test_key_operations_need_primary_key() {
    let dir = TempDir::new().unwrap();
    let store = VelocityBlock::create_with_schema(dir.path(), employee_schema(), VelocityOptions::default()).unwrap();
    store.add_row(row![1, "Ann", "Eng", 1.0]).unwrap();

    assert!(matches!(store.find_row_id(1), Err(Error::Configuration(_))));
    assert!(matches!(store.delete_row_by_key(1), Err(Error::Configuration(_))));

    // Row handles still work without a key.
    let id = store.row_id_at(0).unwrap();
    store.delete_row_by_id(id).unwrap();
    assert_eq!(store.row_count(), 0);
}

/// Test schema adoption from the first batch and shape checks afterwards
#[test]
fn test_append_batch_schema() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let store = VelocityBlock::create(dir.path(), VelocityOptions::default()).unwrap();
    let batch = RowBatch::from_rows(employee_schema(), vec![row![1, "Ann", "Eng", 1.0]]).unwrap();
    store.append_batch(&batch).unwrap();
    assert_eq!(store.schema(), employee_schema());

    let other = Schema::new().with_column("Id", DataType::String);
    let wrong = RowBatch::from_rows(other, vec![row!["x"]]).unwrap();
    assert!(matches!(store.append_batch(&wrong), Err(Error::SchemaMismatch(_))));
    assert!(matches!(store.add_column(Column::new("Late", DataType::Boolean)), Err(Error::SchemaMismatch(_))));
}

/// Test that a rejected first batch leaves the store without columns
#[test]
fn test_rejected_batch_does_not_adopt_schema() {
    let dir = TempDir::new().unwrap();
    let store = VelocityBlock::create(dir.path(), VelocityOptions::default().primary_key("Id")).unwrap();

    let duplicated = RowBatch::from_rows(employee_schema(), vec![row![1, "Ann", "Eng", 1.0], row![1, "Bob", "Eng", 2.0]])
        .unwrap();
    assert!(matches!(store.append_batch(&duplicated), Err(Error::DuplicateKey(_))));
    assert!(store.schema().is_empty());
    assert_eq!(store.row_count(), 0);

    let keyless = RowBatch::from_rows(Schema::new().with_column("Name", DataType::String), vec![row!["Ann"]]).unwrap();
    assert!(store.append_batch(&keyless).is_err());
    assert!(store.schema().is_empty());

    let other = Schema::new().with_column("Id", DataType::Long).with_column("Tag", DataType::String);
    store.append_batch(&RowBatch::from_rows(other.clone(), vec![row![7i64, "x"]]).unwrap()).unwrap();
    assert_eq!(store.schema(), other);
    assert!(store.find_row_id(7i64).unwrap().is_some());
}

#[test]
fn test_ingest_in_chunks() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<Vec<Value>> = (0..250).map(|i| row![i, format!("n{}", i), "Eng", i as f64]).collect();
    let batch = RowBatch::from_rows(employee_schema(), rows).unwrap();

    let store = VelocityBlock::create(dir.path(), VelocityOptions::default()).unwrap();
    let mut source = BatchChunks::new(batch);
    assert_eq!(store.ingest(&mut source, 100).unwrap(), 250);
    assert_eq!(store.row_count(), 250);
    assert!(store.ingest(&mut BatchChunks::new(RowBatch::new(employee_schema())), 0).is_err());
}

#[test]
fn test_save_writes_a_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("saved");
    let batch = RowBatch::from_rows(employee_schema(), vec![row![1, "Ann", "Eng", 1.0], row![2, "Bob", "Ops", 2.0]])
        .unwrap();
    VelocityBlock::save(&path, &batch, VelocityOptions::default().primary_key("Id"))
        .unwrap()
        .close()
        .unwrap();

    let store = VelocityBlock::open(&path).unwrap();
    let back = store.to_batch().unwrap();
    assert_eq!(back.rows().collect::<Vec<_>>(), batch.rows().collect::<Vec<_>>());
    assert!(store.find_row_id(2).unwrap().is_some());
}

#[test]
fn test_row_cursor() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);
    let mut cursor = store.row_cursor(&["Name", "Salary"]).unwrap();
    let mut names = Vec::new();
    while cursor.move_next() {
        names.push(cursor.get_value("Name").cloned().unwrap());
        assert!(cursor.get_value("Dept").is_none());
    }
    assert_eq!(names, row!["Ann", "Bob", "Cid", "Dee"]);
    assert!(store.row_cursor(&["Nope"]).is_err());
}

#[test]
fn test_segments_rotate_at_target_size() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = VelocityOptions::default().target_segment_size(2048).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), employee_schema(), options).unwrap();
    for i in 0..500 {
        store.add_row(row![i, format!("name-{:04}", i), "Eng", i as f64]).unwrap();
    }
    store.flush().unwrap();

    let stats = store.storage_stats();
    assert!(stats.storage_files > 1, "expected several segments, got {}", stats);
    assert_eq!(stats.total_rows, 500);
    assert_eq!(store.get_value(499, "Id").unwrap(), Value::Integer(499));
}

#[test]
fn test_info_reports_columns() {
    let dir = TempDir::new().unwrap();
    let store = employees(&dir);
    store.add_row(row![5, Value::Null, "Eng", 1.0]).unwrap();

    let info = store.info().unwrap();
    assert_eq!(info.row_count, 5);
    assert_eq!(info.primary_key.as_deref(), Some("Id"));
    assert_eq!(info.columns.len(), 4);
    assert_eq!(info.columns[1].null_count, 1);
    assert!(info.to_string().contains("Salary"));
}
