//! Analytics example for Velocity
//!
//! Loads a small sales table and runs deferred query plans over it:
//! filters, grouping, pivots, window functions and joins.

use velocity::{
    row, Aggregation, ComparisonOperator, DataType, MergeMode, RowBatch, Schema, SortDirection, VelocityBlock,
    VelocityOptions, WindowFunction, WindowSpec,
};

fn print_batch(title: &str, batch: &RowBatch) {
    println!("\n== {} ==", title);
    println!("{}", batch.schema().column_names().join(" | "));
    for row in batch.rows() {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        println!("{}", cells.join(" | "));
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let dir = std::env::temp_dir().join("velocity_analytics_example");
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }

    let schema = Schema::new()
        .with_column("OrderId", DataType::Integer)
        .with_column("Region", DataType::String)
        .with_column("Quarter", DataType::String)
        .with_column("UnitPrice", DataType::Float)
        .with_column("Quantity", DataType::Integer);
    let sales = RowBatch::from_rows(
        schema,
        vec![
            row![1, "North", "Q1", 12.5, 10],
            row![2, "South", "Q1", 8.0, 25],
            row![3, "North", "Q2", 12.5, 4],
            row![4, "East", "Q1", 30.0, 2],
            row![5, "South", "Q2", 9.5, 40],
            row![6, "North", "Q2", 11.0, 15],
            row![7, "East", "Q2", 28.0, 6],
        ],
    )?;
    let store = VelocityBlock::save(&dir, &sales, VelocityOptions::default().primary_key("OrderId"))?;

    // Plans are built without touching the data; execute() runs them.
    let revenue = store.compute("Revenue", "UnitPrice * Quantity");

    print_batch(
        "Revenue by region",
        &revenue
            .group_by_aggregate(&["Region"], "Revenue", Aggregation::Sum, "Total")
            .sort(SortDirection::Descending, &["Total"])
            .execute()?,
    );

    print_batch(
        "Quarterly revenue",
        &revenue.pivot(&["Region"], "Quarter", "Revenue", Aggregation::Sum).execute()?,
    );

    print_batch(
        "Large orders",
        &revenue
            .where_cmp("Revenue", 150.0, ComparisonOperator::GreaterThan)
            .select(&["OrderId", "Region", "Revenue"])
            .execute()?,
    );

    print_batch(
        "Running revenue per region",
        &revenue
            .window_spec(WindowSpec::new("Revenue", WindowFunction::CumulativeSum, "Running").partition_by(&["Region"]))
            .select(&["OrderId", "Region", "Revenue", "Running"])
            .execute()?,
    );

    let managers = RowBatch::from_rows(
        Schema::new()
            .with_column("Region", DataType::String)
            .with_column("Manager", DataType::String),
        vec![row!["North", "Nadia"], row!["South", "Sam"]],
    )?;
    print_batch(
        "Orders with managers",
        &store
            .merge(&managers, "Region", "Region", MergeMode::Left)
            .select(&["OrderId", "Region", "Manager"])
            .execute()?,
    );

    let check = store.validate_expression("UnitPrice * Discount");
    println!("\nExpression check: {:?}", check);

    store.close()?;
    Ok(())
}
