use crate::types::column_keys;
use polars::prelude::*;

const COUNT: &str = "__option_count";

/// Distinct values of `column`, ranked by how many non-null `count_column`
/// cells each carries; ties keep first-seen order.
///
/// Missing values are not offered as options. An unknown `column` yields no
/// options, and an unknown `count_column` falls back to plain row counts.
pub fn derive_options(table: &DataFrame, column: &str, count_column: &str) -> PolarsResult<Vec<String>> {
    if table.get_column_index(column).is_none() {
        return Ok(Vec::new());
    }
    let count = if table.get_column_index(count_column).is_some() {
        col(count_column).count()
    } else {
        len()
    };

    let ranked = table
        .clone()
        .lazy()
        .filter(col(column).is_not_null())
        .group_by_stable([col(column)])
        .agg([count.alias(COUNT)])
        .sort(
            [COUNT],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_maintain_order(true),
        )
        .collect()?;

    Ok(column_keys(&ranked, column)?.into_iter().flatten().collect())
}
