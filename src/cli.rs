use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabwatch::analyser::logic::AnalysisPipeline;
use tabwatch::artifacts::{ArtifactJanitor, ArtifactStore, FsArtifactStore};
use tabwatch::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "tabwatch",
    version,
    about = "Clean tabular data, flag unusual rows and report on the run"
)]
pub struct Cli {
    /// Only log warnings and errors to the console
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a CSV, XLSX or XLS file and print the run response as JSON
    Analyze {
        /// File to analyze; the format is taken from its extension
        file: PathBuf,

        /// Path to a JSON configuration file
        #[arg(long, env = "TABWATCH_CONFIG")]
        config: Option<PathBuf>,

        /// Base directory for insight and chart artifacts
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Expected share of anomalous rows, in (0, 0.5]
        #[arg(long)]
        contamination: Option<f64>,

        /// Seed for the outlier model
        #[arg(long)]
        seed: Option<u64>,

        /// Maximum number of per-feature trend charts
        #[arg(long)]
        max_trend_charts: Option<usize>,
    },
    /// Remove expired artifacts from the insight and chart directories
    Sweep {
        /// Path to a JSON configuration file
        #[arg(long, env = "TABWATCH_CONFIG")]
        config: Option<PathBuf>,

        /// Override the configured retention
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
    /// Print the effective configuration
    Config {
        /// Path to a JSON configuration file
        #[arg(long, env = "TABWATCH_CONFIG")]
        config: Option<PathBuf>,
    },
}

pub fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Analyze {
            file,
            config,
            output_dir,
            contamination,
            seed,
            max_trend_charts,
        } => handle_analyze(
            file,
            config,
            output_dir,
            AnalyzeOverrides {
                contamination,
                seed,
                max_trend_charts,
            },
        ),
        Commands::Sweep {
            config,
            max_age_hours,
        } => handle_sweep(config, max_age_hours),
        Commands::Config { config } => handle_config(config),
    }
}

struct AnalyzeOverrides {
    contamination: Option<f64>,
    seed: Option<u64>,
    max_trend_charts: Option<usize>,
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    AppConfig::load(path.as_deref()).context("Failed to load configuration")
}

fn handle_analyze(
    file: PathBuf,
    config_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    overrides: AnalyzeOverrides,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(dir) = output_dir {
        config.storage.base_dir = dir;
    }
    if let Some(c) = overrides.contamination {
        config.pipeline.contamination = c;
    }
    if let Some(s) = overrides.seed {
        config.pipeline.random_seed = s;
    }
    if let Some(n) = overrides.max_trend_charts {
        config.pipeline.max_trend_charts = n;
    }

    let insights = FsArtifactStore::new(config.storage.insights_path())?;
    let charts = FsArtifactStore::new(config.storage.charts_path())?;
    let pipeline = AnalysisPipeline::new(config.pipeline, Arc::new(insights), Arc::new(charts));

    let response = pipeline
        .run_path(&file)
        .with_context(|| format!("Failed to analyze {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn handle_sweep(config_path: Option<PathBuf>, max_age_hours: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;
    let max_age = max_age_hours
        .map(|h| Duration::from_secs(h.saturating_mul(3600)))
        .unwrap_or_else(|| config.storage.retention());

    let stores: Vec<Arc<dyn ArtifactStore>> = vec![
        Arc::new(FsArtifactStore::new(config.storage.insights_path())?),
        Arc::new(FsArtifactStore::new(config.storage.charts_path())?),
    ];
    let janitor = ArtifactJanitor::new(stores, max_age, max_age);
    let removed = janitor.sweep();

    println!(
        "Removed {removed} artifacts older than {}h",
        max_age.as_secs() / 3600
    );
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
