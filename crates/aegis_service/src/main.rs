mod api;
mod clock;
mod config;
mod detectors;
mod learning;
mod orchestrator;
mod repository;

use clap::{Parser, Subcommand};
use clock::SystemClock;
use config::ServiceConfig;
use detectors::{HttpDetectorClient, MockDetectorClient};
use orchestrator::{AssessmentRequest, Orchestrator};
use repository::{InMemoryRepository, Repository, SqliteRepository};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "aegis")]
#[command(about = "Aegis: a safety-gated, uncertainty-aware automation decision engine")]
struct Cli {
    /// Override the config file path (defaults to ~/.aegis/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST API server.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a single assessment against the configured (or mock) detectors and print the decision.
    Assess {
        #[arg(long)]
        image: Vec<String>,
        #[arg(long, default_value = "residential")]
        property_type: String,
        #[arg(long, default_value = "20-50")]
        age_bin: String,
        #[arg(long, default_value = "us-west-2")]
        region: String,
        #[arg(long, default_value_t = 20.0)]
        property_age_years: f64,
        #[arg(long, default_value_t = 0.8)]
        lighting_quality: f64,
        #[arg(long, default_value_t = 0.8)]
        image_clarity: f64,
        #[arg(long, default_value_t = 1)]
        num_damage_sites: usize,
        #[arg(long)]
        critical_candidate: bool,
        #[arg(long)]
        segmentation_enabled: bool,
        /// Run against MockDetectorClient instead of the configured HTTP endpoints.
        #[arg(long)]
        demo: bool,
    },
    /// Print the resolved configuration and exit.
    PrintConfig,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: ServiceConfig = toml::from_str(&content)?;
            config
                .engine
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid engine config: {e}"))?;
            Ok(config)
        }
        None => ServiceConfig::load(),
    }
}

fn build_repository(config: &ServiceConfig) -> anyhow::Result<Arc<dyn Repository>> {
    match &config.persistence.sqlite_path {
        Some(path) => {
            let repo = SqliteRepository::open(std::path::Path::new(path))?;
            Ok(Arc::new(repo))
        }
        None => Ok(Arc::new(InMemoryRepository::new())),
    }
}

fn build_detectors(config: &ServiceConfig, demo: bool) -> Arc<dyn detectors::DetectorClient> {
    if demo {
        return Arc::new(MockDetectorClient::new(0.85, "water_damage"));
    }
    Arc::new(HttpDetectorClient::new(
        config.endpoints.object_detector_url.clone(),
        config.endpoints.vision_labeler_url.clone(),
        config.endpoints.segmentation_url.clone(),
        config.endpoints.vlm_url.clone(),
    ))
}

async fn run_serve(config: ServiceConfig, port: Option<u16>) -> anyhow::Result<()> {
    let repository = build_repository(&config)?;
    let detectors = build_detectors(&config, config.endpoints.vlm_url.is_none());
    let orchestrator = Arc::new(Orchestrator::new(
        config.engine.clone(),
        detectors,
        repository,
        Arc::new(SystemClock),
        "default",
    ));
    api::run_api_server(port.unwrap_or(config.api.port), orchestrator).await
}

#[allow(clippy::too_many_arguments)]
async fn run_assess(
    config: ServiceConfig,
    image: Vec<String>,
    property_type: String,
    age_bin: String,
    region: String,
    property_age_years: f64,
    lighting_quality: f64,
    image_clarity: f64,
    num_damage_sites: usize,
    critical_candidate: bool,
    segmentation_enabled: bool,
    demo: bool,
) -> anyhow::Result<()> {
    let repository = build_repository(&config)?;
    let detectors = build_detectors(&config, demo);
    let orchestrator = Orchestrator::new(
        config.engine,
        detectors,
        repository,
        Arc::new(SystemClock),
        "cli",
    );
    let request = AssessmentRequest {
        agent: "cli".to_string(),
        image_refs: image,
        property_type,
        age_bin,
        region,
        property_age_years,
        lighting_quality,
        image_clarity,
        num_damage_sites,
        critical_candidate,
        segmentation_enabled,
    };
    let outcome = orchestrator.assess(&request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn main() {
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        match cli.command {
            Commands::Serve { port } => run_serve(config, port).await,
            Commands::Assess {
                image,
                property_type,
                age_bin,
                region,
                property_age_years,
                lighting_quality,
                image_clarity,
                num_damage_sites,
                critical_candidate,
                segmentation_enabled,
                demo,
            } => {
                run_assess(
                    config,
                    image,
                    property_type,
                    age_bin,
                    region,
                    property_age_years,
                    lighting_quality,
                    image_clarity,
                    num_damage_sites,
                    critical_candidate,
                    segmentation_enabled,
                    demo,
                )
                .await
            }
            Commands::PrintConfig => {
                info!(config = ?config.engine, "resolved engine configuration");
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        }
    });

    if let Err(e) = result {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}
