pub mod types;
pub mod error;
pub mod config;
pub mod fetch;
pub mod cache;
pub mod options;
pub mod processing;
pub mod boundaries;
pub mod render;
pub mod dashboard;
pub mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config; the embedded default is used when the file is absent
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve both dashboards over HTTP
    Serve,
    /// Run a single interaction and print the view as JSON
    Render {
        #[command(subcommand)]
        dashboard: RenderTarget,
    },
}

#[derive(Subcommand)]
enum RenderTarget {
    /// Year-over-year spend growth by market for one brand
    BrandHealth {
        #[arg(long)]
        brand: Option<String>,
    },
    /// Cross-shopping overlap with competitors in one market
    CompetitiveIntel {
        #[arg(long)]
        market: Option<String>,
        /// Repeatable; the configured defaults apply when omitted
        #[arg(long = "competitor", value_name = "NAME")]
        competitors: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let app_config = config::AppConfig::load_or_default(&cli.config)?;
    let dashboards = dashboard::Dashboards::from_config(&app_config)?;

    match cli.command {
        Commands::Serve => {
            server::start_server(app_config, dashboards).await?;
        }
        Commands::Render { dashboard } => {
            let json = match dashboard {
                RenderTarget::BrandHealth { brand } => {
                    let view = dashboards.brand_health.render(brand.as_deref()).await?;
                    serde_json::to_string_pretty(&view)?
                }
                RenderTarget::CompetitiveIntel { market, competitors } => {
                    let selection = (!competitors.is_empty()).then_some(competitors);
                    let view = dashboards
                        .competitive_intel
                        .render(market.as_deref(), selection.as_deref())
                        .await?;
                    serde_json::to_string_pretty(&view)?
                }
            };
            println!("{}", json);
        }
    }

    Ok(())
}
