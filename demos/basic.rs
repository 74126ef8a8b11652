//! Basic usage example for Velocity
//!
//! This example demonstrates the fundamental operations:
//! - Creating a store with a primary key
//! - Appending, updating and deleting rows
//! - Flushing, compacting and reopening

use anyhow::Context;
use velocity::{row, CompactionStrategy, DataType, Schema, VelocityBlock, VelocityOptions};

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let path = std::env::temp_dir().join("velocity_basic_example");
    if path.exists() {
        std::fs::remove_dir_all(&path).context("removing the previous example store")?;
    }

    let schema = Schema::new()
        .with_column("Id", DataType::Integer)
        .with_column("Name", DataType::String)
        .with_column("Email", DataType::String)
        .with_column("Score", DataType::Float);
    let options = VelocityOptions::default().primary_key("Id");
    let store = VelocityBlock::create_with_schema(&path, schema, options)?;
    println!("Store created at {}", path.display());

    // Append a few rows
    store.append_rows(vec![
        row![1, "Alice", "alice@example.com", 91.5],
        row![2, "Bob", "bob@example.com", 78.0],
        row![3, "Carol", "carol@example.com", 85.25],
    ])?;
    println!("Appended {} rows", store.row_count());

    // Read by key
    if let Some(id) = store.find_row_id(2)? {
        println!("Row 2 => {:?}", store.read_row(id)?);
    }

    // Update and delete by key
    store.update_row_by_key(2, row![2, "Bob", "robert@example.com", 80.0])?;
    store.delete_row_by_key(3)?;
    println!("After update and delete: {} rows", store.row_count());

    // Make it durable and reclaim the deleted row
    store.flush()?;
    println!("{}", store.storage_stats());
    let report = store.compact(CompactionStrategy::Standard)?;
    println!("Compaction dropped {} rows", report.rows_dropped);

    store.close()?;

    // Everything flushed is there after reopening
    let store = VelocityBlock::open(&path)?;
    println!("Reopened with {} rows", store.row_count());
    print!("{}", store.info()?);
    for row in store.to_batch()?.rows() {
        println!("  {:?}", row);
    }
    store.close()?;

    Ok(())
}
