//! Experiment driver for the vaccine-attitude simulation.
//!
//! Wires the input data into the reference collaborators, then sweeps the
//! configured experiment over every seed.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (path from the first argument, else
//!    `vaxsim-config.yaml`; defaults when the file is missing)
//! 2. Initialize structured logging (tracing)
//! 3. Validate configuration for the selected mode
//! 4. Load profiles and the social network
//! 5. Load the disease-risk series, if configured
//! 6. Load prompt templates
//! 7. Create the results directory
//! 8. Run the experiment
//! 9. Log shutdown

mod data;
mod error;
mod experiment;
mod recommend;
mod risk;

use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::EnvFilter;
use vaxsim_core::SimulationConfig;
use vaxsim_runner::PromptEngine;

use crate::error::EngineError;
use crate::experiment::Experiment;
use crate::risk::CsvRiskModel;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "vaxsim-config.yaml";

/// Application entry point for the experiment driver.
///
/// # Errors
///
/// Returns an error if any initialization step or a run fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging is not up yet, so remember whether
    //    defaults were used and report it afterwards.
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_tracing(&config);
    info!("vaxsim-engine starting");
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    // 3. Validate configuration.
    config.validate()?;
    info!(
        mode = %config.experiment.mode,
        backend = ?config.llm.backend,
        model = %config.llm.model,
        strategy = ?config.dispatch.strategy,
        seeds = config.experiment.seeds.len(),
        warmup_days = config.days.warmup_days,
        run_days = config.days.run_days,
        "Configuration validated"
    );

    // 4. Load the population.
    let population = data::load_population(&config.data).map_err(EngineError::from)?;
    info!(
        agents = population.profiles.len(),
        edges = population.graph.edge_count(),
        "Population loaded"
    );

    // 5. Load the risk series.
    let risk = load_risk(&config)?;

    // 6. Load prompt templates.
    let prompts = match &config.data.templates_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Loading prompt templates");
            PromptEngine::from_dir(dir)?
        }
        None => PromptEngine::builtin()?,
    };

    // 7. Create the results directory.
    let started = chrono::Local::now().format("%y-%m-%d_%H:%M:%S").to_string();
    let results_dir = experiment::results_dir(&config, &started);
    std::fs::create_dir_all(&results_dir).map_err(EngineError::from)?;
    info!(path = %results_dir.display(), "Results directory created");

    // 8. Run the experiment.
    let experiment = Experiment::new(&config, population, prompts, risk, results_dir, started);
    experiment.run().await?;

    // 9. Log shutdown.
    info!("vaxsim-engine shutdown complete");
    Ok(())
}

/// Load the configuration, falling back to defaults if the file is absent.
///
/// Returns whether the file was read.
fn load_config(path: &Path) -> Result<(SimulationConfig, bool), EngineError> {
    if path.exists() {
        Ok((SimulationConfig::from_file(path)?, true))
    } else {
        Ok((SimulationConfig::parse("")?, false))
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &SimulationConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the risk CSV named in the config, if any.
fn load_risk(config: &SimulationConfig) -> Result<Option<CsvRiskModel>, EngineError> {
    let Some(path) = &config.data.risk_data_path else {
        info!("No risk data configured, disease broadcasts disabled");
        return Ok(None);
    };
    let model = CsvRiskModel::load(
        path,
        config.data.risk_window.as_ref(),
        config.days.warmup_days,
    )?;
    info!(
        path = %path.display(),
        weeks = model.len(),
        first_week = model.labels().first().map_or("", String::as_str),
        last_week = model.labels().last().map_or("", String::as_str),
        "Risk series loaded"
    );
    Ok(Some(model))
}
