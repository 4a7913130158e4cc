use crate::boundaries::{load_boundaries, BoundaryCollection};
use crate::cache::DatasetCache;
use crate::config::{AppConfig, BrandHealthConfig, CompetitiveIntelConfig};
use crate::error::PipelineError;
use crate::fetch::ObjectStoreSource;
use crate::options::derive_options;
use crate::processing::{
    analyze_market, competitor_options, filter_brand_markets, location_caption,
    resolve_competitors, CompetitorShare,
};
use crate::render::{assemble_bar_chart, assemble_choropleth, assemble_point_map, DroppedRow, Figure};
use crate::types::Records;
use anyhow::Result;
use polars::prelude::{DataFrame, PolarsResult, SortMultipleOptions};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const BRAND_HEALTH_HEADING: &str = "**Median Store YoY Spend Growth in Apr 2022 by MSA** (%)";

#[derive(Debug, Clone, Serialize)]
pub struct BrandHealthView {
    pub brand: String,
    pub brands: Vec<String>,
    pub heading: String,
    pub choropleth: Figure,
    pub plotted_markets: usize,
    pub dropped: Vec<DroppedRow>,
    pub rows: Records,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompetitiveIntelOptions {
    pub markets: Vec<String>,
    pub competitors: Vec<String>,
    pub default_competitors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompetitiveIntelView {
    pub market: String,
    pub markets: Vec<String>,
    pub competitor_options: Vec<String>,
    pub competitors: Vec<String>,
    pub caption: String,
    pub location_count: usize,
    pub shares: Vec<CompetitorShare>,
    pub bar_chart: Figure,
    pub point_map: Figure,
    pub points_omitted: usize,
    pub rows: Records,
}

/// Year-over-year brand spend growth per market.
pub struct BrandHealthDashboard {
    cache: Arc<DatasetCache>,
    config: BrandHealthConfig,
    ttl: Duration,
    boundaries: Arc<BoundaryCollection>,
}

impl BrandHealthDashboard {
    pub fn new(
        cache: Arc<DatasetCache>,
        config: BrandHealthConfig,
        ttl: Duration,
        boundaries: Arc<BoundaryCollection>,
    ) -> Self {
        Self {
            cache,
            config,
            ttl,
            boundaries,
        }
    }

    async fn load(&self) -> Result<Arc<DataFrame>, PipelineError> {
        let table = self.cache.get_or_fetch(&self.config.dataset, self.ttl).await?;
        ensure_columns(&self.config.dataset, &table, self.config.required_columns())?;
        Ok(table)
    }

    fn brands(&self, table: &DataFrame) -> PolarsResult<Vec<String>> {
        derive_options(table, &self.config.brand_column, &self.config.market_name_column)
    }

    pub async fn options(&self) -> Result<Vec<String>, PipelineError> {
        let table = self.load().await?;
        self.brands(&table)
            .map_err(|e| PipelineError::parse(&self.config.dataset, e))
    }

    /// One interaction. Without a brand the most frequent one is selected.
    pub async fn render(&self, brand: Option<&str>) -> Result<BrandHealthView, PipelineError> {
        let table = self.load().await?;
        self.view(&table, brand)
            .map_err(|e| PipelineError::parse(&self.config.dataset, e))
    }

    fn view(&self, table: &DataFrame, brand: Option<&str>) -> PolarsResult<BrandHealthView> {
        let brands = self.brands(table)?;
        let brand = select_or_first(brand, &brands);

        let rows = filter_brand_markets(table, &self.config, &brand)?;

        let started = Instant::now();
        let assembly = assemble_choropleth(&rows, &self.config, &self.boundaries)?;
        info!(
            brand = %brand,
            plotted = assembly.plotted.len(),
            dropped = assembly.dropped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "plotted brand health map"
        );

        Ok(BrandHealthView {
            brand,
            brands,
            heading: BRAND_HEALTH_HEADING.to_string(),
            plotted_markets: assembly.plotted.len(),
            choropleth: assembly.figure,
            dropped: assembly.dropped,
            rows: Records::from_frame(&rows)?,
        })
    }
}

/// The customer-ordered copy of one fetched table.
struct SortedTable {
    fetched: Arc<DataFrame>,
    sorted: Arc<DataFrame>,
}

/// Cross-shopping overlap between the target brand and its competitors per market.
pub struct CompetitiveIntelDashboard {
    cache: Arc<DatasetCache>,
    config: CompetitiveIntelConfig,
    ttl: Duration,
    sorted: Mutex<Option<SortedTable>>,
}

impl CompetitiveIntelDashboard {
    pub fn new(cache: Arc<DatasetCache>, config: CompetitiveIntelConfig, ttl: Duration) -> Self {
        Self {
            cache,
            config,
            ttl,
            sorted: Mutex::new(None),
        }
    }

    /// Fetched table ordered by customer count, largest first. Sorted once per
    /// fetch; later calls reuse it until the cache hands out a new table.
    async fn load(&self) -> Result<Arc<DataFrame>, PipelineError> {
        let fetched = self.cache.get_or_fetch(&self.config.dataset, self.ttl).await?;
        ensure_columns(&self.config.dataset, &fetched, self.config.required_columns())?;

        let mut memo = self.sorted.lock().await;
        if let Some(current) = memo.as_ref().filter(|m| Arc::ptr_eq(&m.fetched, &fetched)) {
            return Ok(current.sorted.clone());
        }

        let sorted = fetched
            .sort(
                [self.config.customers_column.as_str()],
                SortMultipleOptions::default()
                    .with_order_descending(true)
                    .with_nulls_last(true)
                    .with_maintain_order(true),
            )
            .map_err(|e| PipelineError::parse(&self.config.dataset, e))?;
        debug!(rows = sorted.height(), "sorted locations by customer count");

        let sorted = Arc::new(sorted);
        *memo = Some(SortedTable {
            fetched,
            sorted: sorted.clone(),
        });
        Ok(sorted)
    }

    fn markets(&self, table: &DataFrame) -> PolarsResult<Vec<String>> {
        derive_options(table, &self.config.market_column, &self.config.location_name_column)
    }

    pub async fn options(&self) -> Result<CompetitiveIntelOptions, PipelineError> {
        let table = self.load().await?;
        Ok(CompetitiveIntelOptions {
            markets: self
                .markets(&table)
                .map_err(|e| PipelineError::parse(&self.config.dataset, e))?,
            competitors: competitor_options(&self.config, &table),
            default_competitors: resolve_competitors(&self.config, &table, None),
        })
    }

    /// One interaction. `competitors: None` selects the configured defaults.
    pub async fn render(
        &self,
        market: Option<&str>,
        competitors: Option<&[String]>,
    ) -> Result<CompetitiveIntelView, PipelineError> {
        let table = self.load().await?;
        self.view(&table, market, competitors)
            .map_err(|e| PipelineError::parse(&self.config.dataset, e))
    }

    fn view(
        &self,
        table: &DataFrame,
        market: Option<&str>,
        competitors: Option<&[String]>,
    ) -> PolarsResult<CompetitiveIntelView> {
        let markets = self.markets(table)?;
        let market = select_or_first(market, &markets);
        let competitors = resolve_competitors(&self.config, table, competitors);

        let breakdown = analyze_market(table, &self.config, &market, &competitors)?;
        let bar_chart = assemble_bar_chart(&breakdown.shares);
        let point_map = assemble_point_map(&breakdown.located, &self.config.hover_columns)?;

        info!(
            market = %market,
            locations = breakdown.location_count(),
            competitors = competitors.len(),
            "rendered competitive intel"
        );

        Ok(CompetitiveIntelView {
            caption: location_caption(&self.config.target_brand, breakdown.location_count(), &market),
            location_count: breakdown.location_count(),
            competitor_options: competitor_options(&self.config, table),
            market,
            markets,
            competitors,
            shares: breakdown.shares,
            bar_chart,
            point_map: point_map.figure,
            points_omitted: point_map.omitted,
            rows: Records::from_frame(&breakdown.projected)?,
        })
    }
}

/// Both dashboards over one shared dataset cache.
pub struct Dashboards {
    pub brand_health: BrandHealthDashboard,
    pub competitive_intel: CompetitiveIntelDashboard,
}

impl Dashboards {
    /// Loads the boundary file and wires an environment-credentialed fetcher.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let boundaries = load_boundaries(
            &config.brand_health.boundaries,
            &config.brand_health.join_property,
        )?;
        let cache = Arc::new(DatasetCache::new(Arc::new(ObjectStoreSource::from_env())));
        Ok(Self::with_parts(config, cache, Arc::new(boundaries)))
    }

    pub fn with_parts(config: &AppConfig, cache: Arc<DatasetCache>, boundaries: Arc<BoundaryCollection>) -> Self {
        let ttl = config.cache.ttl();
        Self {
            brand_health: BrandHealthDashboard::new(
                cache.clone(),
                config.brand_health.clone(),
                ttl,
                boundaries,
            ),
            competitive_intel: CompetitiveIntelDashboard::new(cache, config.competitive_intel.clone(), ttl),
        }
    }
}

fn ensure_columns<const N: usize>(path: &str, table: &DataFrame, required: [&str; N]) -> Result<(), PipelineError> {
    let missing: Vec<&str> = required
        .into_iter()
        .filter(|name| table.get_column_index(name).is_none())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::parse(path, format!("missing columns: {}", missing.join(", "))))
    }
}

/// The requested value, or the first option when nothing was requested.
fn select_or_first(requested: Option<&str>, options: &[String]) -> String {
    match requested {
        Some(value) => value.to_string(),
        None => options.first().cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::boundaries::tests::collection;
    use crate::cache::tests::CountingSource;
    use crate::processing::tests::{brand_table, config, location_table};
    use polars::df;
    use serde_json::Value;

    pub(crate) fn dashboards_over(brands: DataFrame, locations: DataFrame) -> (Dashboards, Arc<CountingSource>) {
        let config = config();
        let source = Arc::new(CountingSource::new(vec![
            (config.brand_health.dataset.as_str(), brands),
            (config.competitive_intel.dataset.as_str(), locations),
        ]));
        let cache = Arc::new(DatasetCache::new(source.clone()));
        (Dashboards::with_parts(&config, cache, Arc::new(collection())), source)
    }

    fn text_column<'a>(rows: &'a Records, column: &str) -> Vec<&'a str> {
        rows.column(column).filter_map(Value::as_str).collect()
    }

    #[tokio::test]
    async fn selecting_a_brand_returns_only_its_rows() {
        let (dashboards, _) = dashboards_over(brand_table(), location_table());
        let view = dashboards.brand_health.render(Some("X")).await.unwrap();

        assert_eq!(view.brand, "X");
        assert_eq!(view.brands, vec!["X", "Y"]);
        assert_eq!(view.rows.len(), 3);
        assert!(text_column(&view.rows, "brands").iter().all(|b| *b == "X"));
        assert_eq!(view.plotted_markets, 2);
        assert_eq!(view.dropped.len(), 1);
    }

    #[tokio::test]
    async fn default_brand_is_the_most_frequent() {
        let (dashboards, _) = dashboards_over(brand_table(), location_table());
        let view = dashboards.brand_health.render(None).await.unwrap();
        assert_eq!(view.brand, "X");
    }

    #[tokio::test]
    async fn brand_options_count_rows_with_a_market_name() {
        // Z has the most rows, but only one names its market.
        let brands = df!(
            "brands" => &["Z", "Z", "Z", "W", "W"],
            "msa_number" => &[1i64, 2, 3, 1, 2],
            "msa_name" => &[Some("A"), None, None, Some("A"), Some("B")],
            "median_yoy_change" => &[1.0, 2.0, 3.0, 4.0, 5.0]
        )
        .unwrap();
        let (dashboards, _) = dashboards_over(brands, location_table());

        assert_eq!(dashboards.brand_health.options().await.unwrap(), vec!["W", "Z"]);
    }

    #[tokio::test]
    async fn unknown_brand_renders_empty() {
        let (dashboards, _) = dashboards_over(brand_table(), location_table());
        let view = dashboards.brand_health.render(Some("Nobody")).await.unwrap();
        assert!(view.rows.is_empty());
        assert_eq!(view.plotted_markets, 0);
    }

    #[tokio::test]
    async fn market_sidebar_counts_locations() {
        let (dashboards, _) = dashboards_over(brand_table(), location_table());
        let view = dashboards
            .competitive_intel
            .render(Some("Springfield"), None)
            .await
            .unwrap();

        assert_eq!(view.location_count, 3);
        assert_eq!(
            view.caption,
            "There are **3** IKEA locations with Spend data in **Springfield**."
        );
        assert_eq!(view.competitors, vec!["Amazon", "Target"]);
        assert_eq!(view.points_omitted, 1);
        // Raw rows follow customer count, largest first; missing counts last.
        assert_eq!(text_column(&view.rows, "placekey"), vec!["p2", "p1", "p4"]);
    }

    #[tokio::test]
    async fn empty_market_yields_zero_shares() {
        let (dashboards, _) = dashboards_over(brand_table(), location_table());
        let view = dashboards
            .competitive_intel
            .render(Some("Ogdenville"), None)
            .await
            .unwrap();

        assert_eq!(view.location_count, 0);
        assert!(view.shares.iter().all(|s| s.cross_shopping_pct == 0.0));
        assert_eq!(view.shares.len(), 2);
    }

    #[tokio::test]
    async fn market_options_rank_by_location_count() {
        let (dashboards, _) = dashboards_over(brand_table(), location_table());
        let options = dashboards.competitive_intel.options().await.unwrap();

        assert_eq!(options.markets, vec!["Springfield", "Shelbyville"]);
        assert_eq!(options.competitors, vec!["Amazon", "Target"]);
        assert_eq!(options.default_competitors, vec!["Amazon", "Target"]);
    }

    #[tokio::test]
    async fn repeated_interactions_fetch_once() {
        let (dashboards, source) = dashboards_over(brand_table(), location_table());
        dashboards.brand_health.render(Some("X")).await.unwrap();
        dashboards.brand_health.render(Some("Y")).await.unwrap();
        dashboards.brand_health.options().await.unwrap();
        dashboards.competitive_intel.render(None, None).await.unwrap();
        dashboards.competitive_intel.options().await.unwrap();

        assert_eq!(source.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn locations_are_sorted_once_per_fetch() {
        let (dashboards, source) = dashboards_over(brand_table(), location_table());
        let intel = &dashboards.competitive_intel;

        let first = intel.load().await.unwrap();
        let second = intel.load().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        tokio::time::advance(config().cache.ttl()).await;
        let refreshed = intel.load().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(source.count(), 2);
    }

    #[tokio::test]
    async fn schema_mismatch_is_a_parse_error() {
        let broken = df!("brands" => &["X"]).unwrap();
        let (dashboards, _) = dashboards_over(broken, location_table());

        let err = dashboards.brand_health.render(Some("X")).await.unwrap_err();
        assert_eq!(err.kind(), "ParseError");
        assert!(err.to_string().contains("msa_number"));
    }
}
