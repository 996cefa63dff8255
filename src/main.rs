use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod backend;
mod cache;
mod config;
mod engagement;
mod error;
mod metrics;
mod models;
mod normalize;
mod readers;
mod reconcile;
mod selector;
mod skills;

use config::{Config, FileConfig, Overrides};
use models::{
    CopilotInsightsReport, EventsReport, GithubActivityReport, ImpactReport, JourneyReport,
    MetricsReport, SkillsReport, TopLearnersReport,
};
use selector::{AnalyticsService, Family, MetricFamily};

#[derive(Parser)]
#[command(name = "learner-insights")]
#[command(about = "Learner certification and product-usage analytics", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, env = "LEARNER_INSIGHTS_CONFIG", default_value = "learner-insights.toml")]
    config: PathBuf,

    /// Directory holding the flat learner exports
    #[arg(long, env = "LEARNER_INSIGHTS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory holding pre-aggregated snapshot files
    #[arg(long, env = "LEARNER_INSIGHTS_AGGREGATED_DIR")]
    aggregated_dir: Option<PathBuf>,

    /// Base URL of the live analytics backend
    #[arg(long, env = "ANALYTICS_BACKEND_URL")]
    backend_url: Option<String>,

    /// Backend request timeout in milliseconds
    #[arg(long)]
    backend_timeout_ms: Option<u64>,

    /// Never contact the live backend
    #[arg(long)]
    no_backend: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one metric family from the best available source
    Fetch {
        #[arg(value_enum)]
        family: MetricFamily,
    },
    /// Fetch every metric family
    All,
    /// Show which sources are currently usable
    Status,
    /// Run a custom query against the live backend
    Query {
        /// JSON request body
        #[arg(long)]
        body: String,
    },
    /// Map raw activity counts to an engagement level (0-5)
    EngagementLevel {
        #[arg(long)]
        executions: u64,
        #[arg(long)]
        days: u64,
    },
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}

/// Fetches one family, returning its JSON and whether any tier served it.
async fn fetch_as<T: Family>(service: &AnalyticsService) -> anyhow::Result<(Value, bool)> {
    let served = service.fetch::<T>().await;
    let available = served.data().is_some();
    let value = serde_json::to_value(&served)
        .with_context(|| format!("failed to encode {}", T::FAMILY.slug()))?;
    Ok((value, available))
}

async fn fetch_family(
    service: &AnalyticsService,
    family: MetricFamily,
) -> anyhow::Result<(Value, bool)> {
    match family {
        MetricFamily::Metrics => fetch_as::<MetricsReport>(service).await,
        MetricFamily::Impact => fetch_as::<ImpactReport>(service).await,
        MetricFamily::Journey => fetch_as::<JourneyReport>(service).await,
        MetricFamily::TopLearners => fetch_as::<TopLearnersReport>(service).await,
        MetricFamily::Skills => fetch_as::<SkillsReport>(service).await,
        MetricFamily::CopilotInsights => fetch_as::<CopilotInsightsReport>(service).await,
        MetricFamily::GithubActivity => fetch_as::<GithubActivityReport>(service).await,
        MetricFamily::Events => fetch_as::<EventsReport>(service).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = FileConfig::load(&cli.config)
        .with_context(|| format!("failed to read config {}", cli.config.display()))?;
    let config_found = file.is_some();
    let overrides = Overrides {
        data_dir: cli.data_dir,
        aggregated_dir: cli.aggregated_dir,
        backend_url: cli.backend_url,
        backend_timeout_ms: cli.backend_timeout_ms,
        no_backend: cli.no_backend,
    };
    let config = Config::resolve(overrides, file.unwrap_or_default())
        .context("invalid configuration")?;
    init_tracing(&config.log_filter);

    if !config_found {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
    }
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        aggregated_dir = %config.aggregated_dir.display(),
        backend = config.backend_url.as_deref().unwrap_or("none"),
        "configuration resolved"
    );

    let service =
        AnalyticsService::from_config(config).context("failed to build backend client")?;

    match cli.command {
        Commands::Fetch { family } => {
            let (value, available) = fetch_family(&service, family).await?;
            print_json(&value)?;
            if !available {
                anyhow::bail!("{} is unavailable from every source", family.slug());
            }
        }
        Commands::All => {
            let mut all = serde_json::Map::new();
            let mut served = 0;
            for family in MetricFamily::ALL {
                let (value, available) = fetch_family(&service, family).await?;
                served += usize::from(available);
                all.insert(family.slug().to_string(), value);
            }
            print_json(&all)?;
            tracing::info!(served, total = MetricFamily::ALL.len(), "fetched all families");
        }
        Commands::Status => {
            print_json(&service.status().await)?;
        }
        Commands::Query { body } => {
            let body: Value =
                serde_json::from_str(&body).context("query body must be valid JSON")?;
            print_json(&service.custom_query(&body).await)?;
        }
        Commands::EngagementLevel { executions, days } => {
            let level = engagement::engagement_level(executions, days);
            print_json(&serde_json::json!({ "level": level }))?;
        }
    }

    Ok(())
}
