use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub brand_health: BrandHealthConfig,
    pub competitive_intel: CompetitiveIntelConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrandHealthConfig {
    pub dataset: String,
    pub boundaries: PathBuf,
    #[serde(default = "default_join_property")]
    pub join_property: String, // Feature property matched against market_id_column
    pub brand_column: String,
    pub market_id_column: String,
    pub market_name_column: String,
    pub yoy_change_column: String,
    #[serde(default = "default_outlier_max")]
    pub outlier_max_yoy_pct: f64,
    #[serde(default = "default_color_domain")]
    pub color_domain: [f64; 2],
}

impl BrandHealthConfig {
    pub fn required_columns(&self) -> [&str; 4] {
        [
            self.brand_column.as_str(),
            self.market_id_column.as_str(),
            self.market_name_column.as_str(),
            self.yoy_change_column.as_str(),
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompetitiveIntelConfig {
    pub dataset: String,
    pub target_brand: String, // Used in captions only
    pub location_id_column: String,
    /// Non-null names per market rank the market options.
    #[serde(default = "default_location_name_column")]
    pub location_name_column: String,
    pub market_column: String,
    pub customers_column: String,
    pub latitude_column: String,
    pub longitude_column: String,
    pub address_columns: Vec<String>,
    /// Joined with ", " into the point map hover text.
    #[serde(default = "default_hover_columns")]
    pub hover_columns: Vec<String>,
    /// Columns holding a cross-shopping percentage, one per competitor brand.
    pub competitor_columns: Vec<String>,
    pub default_competitors: Vec<String>,
}

impl CompetitiveIntelConfig {
    pub fn required_columns(&self) -> [&str; 4] {
        [
            self.market_column.as_str(),
            self.customers_column.as_str(),
            self.latitude_column.as_str(),
            self.longitude_column.as_str(),
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

fn default_join_property() -> String {
    "GEOID".to_string()
}

fn default_location_name_column() -> String {
    "location_name".to_string()
}

fn default_hover_columns() -> Vec<String> {
    vec!["street_address".to_string(), "city".to_string()]
}

fn default_outlier_max() -> f64 {
    300.0
}

fn default_color_domain() -> [f64; 2] {
    [-100.0, 100.0]
}

/// Configuration used when no config file is present.
pub const DEFAULT_CONFIG: &str = r#"
[cache]
ttl_secs = 600

[brand_health]
dataset = "s3://safegraph-places-outgoing/streamlit-demos/spend_brand_msa_mom_yoy_apr2022.csv.gz"
boundaries = "data/MSA_boundaries_v2_fixed_wkt.geojson"
join_property = "GEOID"
brand_column = "brands"
market_id_column = "msa_number"
market_name_column = "msa_name"
yoy_change_column = "median_yoy_change"
outlier_max_yoy_pct = 300.0
color_domain = [-100.0, 100.0]

[competitive_intel]
dataset = "s3://safegraph-places-outgoing/demos/spend_cross_shopping_w_online.csv.gz"
target_brand = "IKEA"
location_id_column = "placekey"
location_name_column = "location_name"
market_column = "msa_name"
customers_column = "raw_num_customers"
latitude_column = "latitude"
longitude_column = "longitude"
address_columns = ["street_address", "city", "state", "zip_code"]
hover_columns = ["street_address", "city"]
competitor_columns = [
    "Amazon",
    "Target",
    "The Home Depot",
    "Lowe's",
    "Crate and Barrel",
    "Ashley Furniture HomeStore",
    "Walmart",
    "Wayfair",
    "Costco",
    "Pottery Barn",
    "West Elm",
    "HomeGoods",
]
default_competitors = [
    "Amazon",
    "Target",
    "The Home Depot",
    "Lowe's",
    "Crate and Barrel",
    "Ashley Furniture HomeStore",
]

[server]
port = 8501
"#;

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to [`DEFAULT_CONFIG`].
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            info!(path = %path.display(), "loading config");
            Self::load_from_file(path)
        } else {
            warn!(path = %path.display(), "config file not found, using embedded default");
            Self::from_toml(DEFAULT_CONFIG)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_loads() {
        let config = AppConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.cache.ttl(), Duration::from_secs(600));
        assert_eq!(config.brand_health.outlier_max_yoy_pct, 300.0);
        assert_eq!(config.brand_health.color_domain, [-100.0, 100.0]);
        assert_eq!(config.competitive_intel.default_competitors.len(), 6);
        assert!(config
            .competitive_intel
            .default_competitors
            .iter()
            .all(|c| config.competitive_intel.competitor_columns.contains(c)));
    }

    #[test]
    fn omitted_brand_health_settings_take_defaults() {
        let trimmed = DEFAULT_CONFIG
            .replace("join_property = \"GEOID\"\n", "")
            .replace("outlier_max_yoy_pct = 300.0\n", "")
            .replace("color_domain = [-100.0, 100.0]\n", "");
        let config = AppConfig::from_toml(&trimmed).unwrap();
        assert_eq!(config.brand_health.join_property, "GEOID");
        assert_eq!(config.brand_health.outlier_max_yoy_pct, 300.0);
        assert_eq!(config.brand_health.color_domain, [-100.0, 100.0]);
    }

    #[test]
    fn omitted_competitive_intel_settings_take_defaults() {
        let trimmed = DEFAULT_CONFIG
            .replace("location_name_column = \"location_name\"\n", "")
            .replace("hover_columns = [\"street_address\", \"city\"]\n", "");
        let config = AppConfig::from_toml(&trimmed).unwrap();
        assert_eq!(config.competitive_intel.location_name_column, "location_name");
        assert_eq!(config.competitive_intel.hover_columns, vec!["street_address", "city"]);
        assert_eq!(config.competitive_intel.address_columns.len(), 4);
    }

    #[test]
    fn load_or_default_prefers_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = DEFAULT_CONFIG.replace("ttl_secs = 600", "ttl_secs = 5");
        file.write_all(content.as_bytes()).unwrap();

        let config = AppConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.cache.ttl_secs, 5);

        let fallback = AppConfig::load_or_default(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(fallback.cache.ttl_secs, 600);
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(AppConfig::from_toml("[cache]\nttl_secs = \"soon\"").is_err());
    }
}
