//! Integration tests for compaction functionality

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use velocity::{
    row, CancellationToken, CompactionStrategy, CompactionTrigger, DataType, Error, Schema, Value, VelocityBlock,
    VelocityOptions,
};

fn schema() -> Schema {
    Schema::new()
        .with_column("Id", DataType::Integer)
        .with_column("Label", DataType::String)
        .with_column("Score", DataType::Float)
}

fn keyed(options: VelocityOptions) -> VelocityOptions {
    options.primary_key("Id")
}

/// Appends rows `from..to` and flushes them into one segment.
fn write_segment(store: &VelocityBlock, from: i32, to: i32) {
    let rows = (from..to).map(|i| row![i, format!("row-{}", i), i as f64 * 1.5]).collect();
    store.append_rows(rows).unwrap();
    store.flush().unwrap();
}

fn segment_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "seg"))
        .count()
}

/// Test that compaction drops deleted rows and keeps the live ones in order
#[test]
fn test_compaction_reclaims_deleted_rows() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 100);

    let doomed: Vec<Value> = (0..100).filter(|i| i % 10 < 3).map(Value::from).collect();
    assert_eq!(store.delete_rows(&doomed).unwrap(), 30);
    store.flush().unwrap();

    let stats = store.storage_stats();
    assert_eq!(stats.deleted_rows, 30);
    assert!((stats.deleted_percentage - 30.0).abs() < 1e-9);
    assert!(stats.can_compact);
    let before = store.to_batch().unwrap();

    let report = store.compact(CompactionStrategy::Standard).unwrap();
    assert_eq!(report.segments_in, 1);
    assert_eq!(report.rows_dropped, 30);
    assert_eq!(report.rows_written, 70);

    let stats = store.storage_stats();
    assert_eq!(stats.deleted_rows, 0);
    assert_eq!(stats.deleted_percentage, 0.0);
    assert_eq!(stats.total_rows, 70);
    assert!(!stats.can_compact);

    let after = store.to_batch().unwrap();
    assert_eq!(after.rows().collect::<Vec<_>>(), before.rows().collect::<Vec<_>>());
    assert_eq!(segment_files(dir.path()), stats.storage_files);
}

/// Test that handles from before a compaction are rejected as stale
#[test]
fn test_row_ids_go_stale() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 20);
    store.delete_row_by_key(5).unwrap();

    let old = store.find_row_id(7).unwrap().unwrap();
    store.compact(CompactionStrategy::Aggressive).unwrap();

    assert!(matches!(store.read_row(old), Err(Error::StaleRowId(_))));
    assert!(matches!(store.delete_row_by_id(old), Err(Error::StaleRowId(_))));

    let new = store.find_row_id(7).unwrap().unwrap();
    assert_ne!(old, new);
    assert_eq!(store.get_value_by_id(new, "Label").unwrap(), Value::from("row-7"));
}

#[test]
fn test_compaction_persists_across_reopen() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 50);
    write_segment(&store, 50, 100);
    store.delete_rows(&(0..100).step_by(2).map(Value::from).collect::<Vec<_>>()).unwrap();
    store.compact(CompactionStrategy::Aggressive).unwrap();
    let expected = store.to_batch().unwrap();
    store.close().unwrap();

    let store = VelocityBlock::open(dir.path()).unwrap();
    let stats = store.storage_stats();
    assert_eq!(stats.storage_files, 1);
    assert_eq!(stats.deleted_rows, 0);
    assert_eq!(store.row_count(), 50);
    assert_eq!(store.to_batch().unwrap().rows().collect::<Vec<_>>(), expected.rows().collect::<Vec<_>>());
    assert_eq!(segment_files(dir.path()), 1);
}

#[test]
fn test_aggressive_merges_all_segments() {
    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    for n in 0..4 {
        write_segment(&store, n * 10, n * 10 + 10);
    }
    assert_eq!(store.storage_stats().storage_files, 4);

    let report = store.compact(CompactionStrategy::Aggressive).unwrap();
    assert_eq!(report.segments_in, 4);
    assert_eq!(report.segments_out, 1);
    assert_eq!(report.rows_dropped, 0);
    assert_eq!(store.storage_stats().storage_files, 1);

    // One clean segment leaves nothing to do.
    let report = store.compact(CompactionStrategy::Aggressive).unwrap();
    assert_eq!(report.segments_in, 0);

    let ids: Vec<Value> = store.to_batch().unwrap().column("Id").unwrap().to_vec();
    assert_eq!(ids, (0..40).map(Value::from).collect::<Vec<_>>());
}

#[test]
fn test_quick_compaction_targets_fragmented_segments() {
    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 10);
    write_segment(&store, 10, 20);
    write_segment(&store, 20, 30);
    store.delete_row_by_key(15).unwrap();
    store.flush().unwrap();

    let report = store.compact(CompactionStrategy::Quick).unwrap();
    assert_eq!(report.segments_in, 1);
    assert_eq!(report.rows_dropped, 1);
    assert_eq!(store.storage_stats().storage_files, 3);
    assert_eq!(store.row_count(), 29);
}

/// Test that a cancelled compaction leaves the store exactly as it was
#[test]
fn test_cancelled_compaction_changes_nothing() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 40);
    write_segment(&store, 40, 80);
    store.delete_rows(&[Value::from(1), Value::from(41)]).unwrap();
    store.flush().unwrap();
    let before = store.storage_stats();

    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        store.compact_with_cancel(CompactionStrategy::Aggressive, &token),
        Err(Error::Cancelled)
    ));

    assert_eq!(store.storage_stats(), before);
    assert_eq!(segment_files(dir.path()), 2);
    assert!(store.find_row_id(1).unwrap().is_none());
    assert_eq!(store.row_count(), 78);

    // The store still compacts normally afterwards.
    store.compact(CompactionStrategy::Aggressive).unwrap();
    assert_eq!(store.storage_stats().deleted_rows, 0);
}

/// Test that flush compacts on its own once the deleted percentage crosses the threshold
#[test]
fn test_auto_compaction_after_flush() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).compaction_trigger(CompactionTrigger::DeletedRowPercentage, 25.0);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 40);

    // 10% deleted: below the threshold.
    store.delete_rows(&(0..4).map(Value::from).collect::<Vec<_>>()).unwrap();
    store.flush().unwrap();
    assert_eq!(store.storage_stats().deleted_rows, 4);

    // 30% deleted: the flush compacts.
    store.delete_rows(&(4..12).map(Value::from).collect::<Vec<_>>()).unwrap();
    store.flush().unwrap();
    let stats = store.storage_stats();
    assert_eq!(stats.deleted_rows, 0);
    assert_eq!(stats.total_rows, 28);
    assert_eq!(store.get_value(0, "Id").unwrap(), Value::Integer(12));
}

#[test]
fn test_segment_count_trigger() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).compaction_trigger(CompactionTrigger::SegmentCount, 3.0);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();

    write_segment(&store, 0, 10);
    write_segment(&store, 10, 20);
    assert_eq!(store.storage_stats().storage_files, 2);
    assert!(!store.can_compact());

    write_segment(&store, 20, 30);
    let stats = store.storage_stats();
    assert!(stats.storage_files < 3, "expected a merge, got {}", stats);
    assert_eq!(store.row_count(), 30);
    assert_eq!(store.get_value(29, "Label").unwrap(), Value::from("row-29"));
}

#[test]
fn test_configure_auto_compaction() {
    let dir = TempDir::new().unwrap();
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), VelocityOptions::default()).unwrap();

    store.configure_auto_compaction(false, CompactionTrigger::SegmentCount, 4.0).unwrap();
    let options = store.options();
    assert!(!options.auto_compaction_enabled);
    assert_eq!(options.auto_compaction_trigger, CompactionTrigger::SegmentCount);
    assert_eq!(options.max_segments_before_compaction, 4);

    assert!(store.configure_auto_compaction(true, CompactionTrigger::DeletedRowPercentage, 150.0).is_err());
    assert_eq!(store.options(), options);

    // The policy is persisted by the next flush.
    store.flush().unwrap();
    store.close().unwrap();
    assert_eq!(VelocityBlock::open(dir.path()).unwrap().options(), options);
}

/// Test that the background thread compacts without being asked
#[test]
fn test_background_compaction() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default())
        .auto_compaction(false)
        .background_interval(Duration::from_millis(20));
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 100);
    store.delete_rows(&(0..50).map(Value::from).collect::<Vec<_>>()).unwrap();
    store.flush().unwrap();
    assert_eq!(store.storage_stats().deleted_rows, 50);

    store.enable_background_compaction(true).unwrap();
    assert!(store.is_background_compaction_running());

    let deadline = Instant::now() + Duration::from_secs(10);
    while store.storage_stats().deleted_rows > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(store.storage_stats().deleted_rows, 0);
    assert_eq!(store.row_count(), 50);

    store.enable_background_compaction(false).unwrap();
    assert!(!store.is_background_compaction_running());
}

/// Test that writes after a compaction keep their logical order
#[test]
fn test_writes_after_compaction() {
    let dir = TempDir::new().unwrap();
    let options = keyed(VelocityOptions::default()).auto_compaction(false);
    let store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();
    write_segment(&store, 0, 10);
    write_segment(&store, 10, 20);
    store.delete_row_by_key(0).unwrap();
    store.compact(CompactionStrategy::Aggressive).unwrap();

    store.add_row(row![100, "late", 1.0]).unwrap();
    store.update_row_by_key(5, row![5, "updated", 0.0]).unwrap();

    let batch = store.to_batch().unwrap();
    assert_eq!(batch.row_count(), 20);
    assert_eq!(batch.value(4, "Label"), Some(&Value::from("updated")));
    assert_eq!(batch.value(19, "Id"), Some(&Value::Integer(100)));
}
