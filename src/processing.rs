use crate::config::{BrandHealthConfig, CompetitiveIntelConfig};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

/// Canonical coordinate column names expected by the point map.
pub const LAT_COLUMN: &str = "lat";
pub const LON_COLUMN: &str = "lon";

const TOTAL_CUSTOMERS: &str = "__total_customers";

/// Rows for `brand` whose year-over-year change is within the outlier bound.
///
/// Rows with a missing change fail the bound and are dropped with the outliers.
pub fn filter_brand_markets(table: &DataFrame, config: &BrandHealthConfig, brand: &str) -> PolarsResult<DataFrame> {
    let rows = table
        .clone()
        .lazy()
        .filter(col(config.brand_column.as_str()).eq(lit(brand)))
        .filter(
            col(config.yoy_change_column.as_str())
                .cast(DataType::Float64)
                .lt_eq(lit(config.outlier_max_yoy_pct)),
        )
        .collect()?;
    debug!(brand, kept = rows.height(), "filtered brand markets");
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitorShare {
    pub competitor: String,
    pub cross_shopping_pct: f64,
}

/// Everything derived from one market selection. All parts come from the same
/// filtered row set.
#[derive(Debug, Clone)]
pub struct MarketBreakdown {
    /// Filtered rows with coordinates renamed, missing values left as-is.
    pub located: DataFrame,
    /// Identity, address and selected competitor columns, missing values zeroed.
    pub projected: DataFrame,
    /// Customer-weighted share per competitor, ascending.
    pub shares: Vec<CompetitorShare>,
}

impl MarketBreakdown {
    pub fn location_count(&self) -> usize {
        self.projected.height()
    }
}

pub fn analyze_market(
    table: &DataFrame,
    config: &CompetitiveIntelConfig,
    market: &str,
    competitors: &[String],
) -> PolarsResult<MarketBreakdown> {
    // 1. Narrow to the market
    let mut located = table
        .clone()
        .lazy()
        .filter(col(config.market_column.as_str()).eq(lit(market)))
        .collect()?;

    // 2. Canonical coordinates for the point map
    located.rename(&config.latitude_column, LAT_COLUMN.into())?;
    located.rename(&config.longitude_column, LON_COLUMN.into())?;

    // 3. Project and zero-fill
    let mut columns = vec![
        config.location_id_column.clone(),
        config.market_column.clone(),
        LAT_COLUMN.to_string(),
        LON_COLUMN.to_string(),
    ];
    columns.extend(config.address_columns.iter().cloned());
    columns.push(config.customers_column.clone());
    columns.extend(competitors.iter().cloned());
    let projected = project_zero_filled(&located, &columns)?;

    // 4. Weighted shares
    let mut shares = weighted_shares(&projected, &config.customers_column, competitors)?;

    // 5. Ascending for the bar chart
    shares.sort_by(|a, b| a.cross_shopping_pct.total_cmp(&b.cross_shopping_pct));

    debug!(market, locations = projected.height(), competitors = competitors.len(), "analyzed market");
    Ok(MarketBreakdown {
        located,
        projected,
        shares,
    })
}

/// Selects `columns` in order with missing values replaced by zero. Columns the
/// frame lacks come back all zero.
fn project_zero_filled(frame: &DataFrame, columns: &[String]) -> PolarsResult<DataFrame> {
    let mut widened = frame.clone();
    for name in columns {
        if widened.get_column_index(name).is_none() {
            let nulls = Series::full_null(name.as_str().into(), widened.height(), &DataType::Int64);
            widened.with_column(nulls)?;
        }
    }

    let mut projection = Vec::with_capacity(columns.len());
    for name in columns {
        let zero = match widened.column(name)?.dtype() {
            DataType::String => lit("0"),
            _ => lit(0),
        };
        projection.push(col(name.as_str()).fill_null(zero));
    }
    widened.lazy().select(projection).collect()
}

/// `sum(customers_i * pct_i) / sum(customers_i)` per competitor, in input order.
///
/// A zero denominator (no rows, or no customers) gives a share of zero.
pub fn weighted_shares(
    table: &DataFrame,
    customers_column: &str,
    competitors: &[String],
) -> PolarsResult<Vec<CompetitorShare>> {
    let numeric = |name: &str| col(name).cast(DataType::Float64).fill_null(lit(0.0));

    let mut sums = vec![numeric(customers_column).sum().alias(TOTAL_CUSTOMERS)];
    sums.extend(
        competitors
            .iter()
            .map(|c| (numeric(customers_column) * numeric(c.as_str())).sum().alias(c.as_str())),
    );
    let totals = table.clone().lazy().select(sums).collect()?;

    let total = first_value(&totals, TOTAL_CUSTOMERS)?;
    competitors
        .iter()
        .map(|competitor| {
            let weighted = first_value(&totals, competitor)?;
            let cross_shopping_pct = if total > 0.0 { weighted / total } else { 0.0 };
            Ok(CompetitorShare {
                competitor: competitor.clone(),
                cross_shopping_pct,
            })
        })
        .collect()
}

fn first_value(frame: &DataFrame, name: &str) -> PolarsResult<f64> {
    Ok(frame.column(name)?.f64()?.get(0).unwrap_or(0.0))
}

/// Effective competitor selection: the defaults when nothing was requested,
/// restricted to columns that are both declared and present in the table.
pub fn resolve_competitors(
    config: &CompetitiveIntelConfig,
    table: &DataFrame,
    requested: Option<&[String]>,
) -> Vec<String> {
    let requested = requested.unwrap_or(config.default_competitors.as_slice());
    let available = competitor_options(config, table);

    let mut resolved: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
        if resolved.contains(name) {
            continue;
        }
        if available.contains(name) {
            resolved.push(name.clone());
        } else {
            warn!(competitor = %name, "ignoring unknown competitor column");
        }
    }
    resolved
}

/// Declared competitor columns the table actually carries, in declared order.
pub fn competitor_options(config: &CompetitiveIntelConfig, table: &DataFrame) -> Vec<String> {
    config
        .competitor_columns
        .iter()
        .filter(|name| table.get_column_index(name).is_some())
        .cloned()
        .collect()
}

/// Sidebar sentence describing the current market selection.
pub fn location_caption(target_brand: &str, count: usize, market: &str) -> String {
    let (verb, plural) = if count > 1 { ("are", "s") } else { ("is", "") };
    format!(
        "There {} **{}** {} location{} with Spend data in **{}**.",
        verb, count, target_brand, plural, market
    )
}
