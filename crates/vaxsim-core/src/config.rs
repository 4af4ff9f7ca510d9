//! Configuration loading and typed config structures for the simulation.
//!
//! The canonical configuration lives in `vaxsim-config.yaml`. Every field
//! has a default, so an empty file is a valid (if not very useful)
//! configuration; [`SimulationConfig::validate`] then checks that the
//! chosen experiment mode has what it needs before any generation starts.
//!
//! Backend settings pick up environment overrides after the file is read
//! (see [`LlmBackendConfig::apply_env_overrides`]).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use vaxsim_types::{DEFAULT_DECAY_RATE, Policy};

pub use vaxsim_runner::{DispatchConfig, LlmBackendConfig};

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A parameter the selected experiment needs is absent.
    #[error("missing required parameter: {parameter}")]
    Missing {
        /// Dotted path of the parameter.
        parameter: String,
    },

    /// A parameter is present but unusable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration, mirroring `vaxsim-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Experiment mode and its variables.
    #[serde(default)]
    pub experiment: ExperimentConfig,

    /// Warmup and active day counts.
    #[serde(default)]
    pub days: DaysConfig,

    /// Input and output paths.
    #[serde(default)]
    pub data: DataConfig,

    /// Generation backend.
    #[serde(default)]
    pub llm: LlmBackendConfig,

    /// Batching and retry behavior.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if an environment override is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if an environment override is malformed.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config
            .llm
            .apply_env_overrides()
            .map_err(|e| ConfigError::Invalid {
                reason: e.to_string(),
            })?;
        Ok(config)
    }

    /// Check that the selected experiment can run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when a parameter the mode needs is
    /// absent, and [`ConfigError::Invalid`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let experiment = &self.experiment;
        if experiment.seeds.is_empty() {
            return Err(missing("experiment.seeds"));
        }
        if self.days.run_days == 0 {
            return Err(invalid("days.run_days must be at least 1"));
        }
        if self.dispatch.batch_size == 0 {
            return Err(invalid("dispatch.batch_size must be at least 1"));
        }
        if !(experiment.decay_rate > 0.0 && experiment.decay_rate < 1.0) {
            return Err(invalid(&format!(
                "experiment.decay_rate must lie in (0, 1), got {}",
                experiment.decay_rate
            )));
        }
        if experiment.num_news == 0 {
            return Err(invalid("experiment.num_news must be at least 1"));
        }
        if self.llm.requires_api_key() && self.llm.api_key.is_empty() {
            return Err(missing(&format!("${}", self.llm.api_key_env)));
        }

        match experiment.mode {
            ExperimentMode::AttitudeTuning => {
                if experiment.temperatures.is_empty() {
                    return Err(missing("experiment.temperatures"));
                }
            }
            ExperimentMode::PolicyCategory => {
                require_temperature(experiment)?;
                let category = experiment
                    .policy_category
                    .as_deref()
                    .ok_or_else(|| missing("experiment.policy_category"))?;
                if experiment.policies_in(category).is_empty() {
                    return Err(invalid(&format!("no policies in category {category:?}")));
                }
            }
            ExperimentMode::PolicyCompare => {
                require_temperature(experiment)?;
                if experiment.strong_policies().is_empty() {
                    return Err(invalid("no policies with strength \"strong\""));
                }
            }
            ExperimentMode::NewsSanity => {
                require_temperature(experiment)?;
                if experiment.news_paths.is_empty() {
                    return Err(missing("experiment.news_paths"));
                }
            }
        }
        Ok(())
    }
}

fn require_temperature(experiment: &ExperimentConfig) -> Result<(), ConfigError> {
    match experiment.temperature {
        Some(t) if t.is_finite() && t >= 0.0 => Ok(()),
        Some(t) => Err(invalid(&format!("experiment.temperature must be non-negative, got {t}"))),
        None => Err(missing("experiment.temperature")),
    }
}

fn missing(parameter: &str) -> ConfigError {
    ConfigError::Missing {
        parameter: parameter.to_owned(),
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Experiment
// ---------------------------------------------------------------------------

/// Which variable an experiment sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentMode {
    /// Sweep sampling temperatures with no policy.
    #[default]
    AttitudeTuning,
    /// Sweep every policy of one category.
    PolicyCategory,
    /// Sweep every `strong` policy.
    PolicyCompare,
    /// Sweep news corpora with no policy.
    NewsSanity,
}

impl core::fmt::Display for ExperimentMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::AttitudeTuning => "attitude_tuning",
            Self::PolicyCategory => "policy_category",
            Self::PolicyCompare => "policy_compare",
            Self::NewsSanity => "news_sanity",
        };
        f.write_str(label)
    }
}

/// The simulated disease.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiseaseConfig {
    /// Name used in every prompt.
    pub name: String,
    /// Description placed in the system prompt.
    pub description: String,
}

impl Default for DiseaseConfig {
    fn default() -> Self {
        Self {
            name: "FD-24".to_owned(),
            description: "FD-24 is a new, highly contagious disease caused by the FD virus, \
                a pathogen still under investigation. It mainly affects the respiratory system \
                and can have neurological effects. Transmission: respiratory droplets released \
                when an infected person breathes, coughs or sneezes, and contaminated surfaces; \
                spread is most efficient in crowded, poorly ventilated indoor spaces. Symptoms \
                vary but often include persistent high fever, severe long-lasting fatigue, dry \
                cough, and loss of taste that can last for weeks. Severe cases may bring \
                confusion, short-term memory loss, or respiratory distress requiring \
                hospitalization."
                .to_owned(),
        }
    }
}

/// Experiment mode, variables, and per-stage knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// What the experiment sweeps.
    pub mode: ExperimentMode,
    /// The simulated disease.
    pub disease: DiseaseConfig,
    /// One run per seed for every experiment variable.
    pub seeds: Vec<u64>,
    /// Sampling temperature for policy and news experiments.
    pub temperature: Option<f64>,
    /// Temperatures swept by attitude tuning.
    pub temperatures: Vec<f64>,
    /// Follow-bias coefficient of the tweet recommender.
    pub alpha: f64,
    /// When set, the whole experiment repeats once per value.
    pub alphas: Option<Vec<f64>>,
    /// Policy family for [`ExperimentMode::PolicyCategory`].
    pub policy_category: Option<String>,
    /// Available interventions.
    pub policies: Vec<Policy>,
    /// News corpora swept by [`ExperimentMode::NewsSanity`].
    pub news_paths: Vec<PathBuf>,
    /// News items recommended to each agent per day.
    pub num_news: usize,
    /// Takeaways requested from news and policy prompts.
    pub news_takeaways: usize,
    /// Posts recommended to each agent per day.
    pub tweet_recommendations: usize,
    /// Takeaways requested from post prompts.
    pub tweet_takeaways: usize,
    /// Lessons surfaced into each system prompt.
    pub max_reflections: usize,
    /// Probability cutoff applied before drawing a rating.
    pub min_p: f64,
    /// Per-day decay applied to new lessons.
    pub decay_rate: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            mode: ExperimentMode::AttitudeTuning,
            disease: DiseaseConfig::default(),
            seeds: vec![2621, 2749, 2909, 3083, 3259],
            temperature: None,
            temperatures: vec![1.0, 0.1, 0.5, 0.7, 1.5, 2.0],
            alpha: 0.3,
            alphas: None,
            policy_category: None,
            policies: default_policies(),
            news_paths: Vec::new(),
            num_news: 3,
            news_takeaways: 5,
            tweet_recommendations: 5,
            tweet_takeaways: 3,
            max_reflections: 5,
            min_p: 0.0,
            decay_rate: DEFAULT_DECAY_RATE,
        }
    }
}

impl ExperimentConfig {
    /// Policies in `category`, in configured order.
    pub fn policies_in(&self, category: &str) -> Vec<Policy> {
        self.policies
            .iter()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect()
    }

    /// Policies whose strength is `strong`, in configured order.
    pub fn strong_policies(&self) -> Vec<Policy> {
        self.policies
            .iter()
            .filter(|p| p.strength.eq_ignore_ascii_case("strong"))
            .cloned()
            .collect()
    }
}

fn policy(category: &str, strength: &str, content: &str) -> Policy {
    Policy {
        category: category.to_owned(),
        strength: strength.to_owned(),
        content: content.to_owned(),
    }
}

/// Built-in interventions: incentive, community and mandate, weak and strong.
fn default_policies() -> Vec<Policy> {
    vec![
        policy(
            "incentive",
            "weak",
            "The government offers a $20 gift card to every resident who gets vaccinated.",
        ),
        policy(
            "incentive",
            "strong",
            "The government pays $200 in cash to every resident who gets vaccinated, and \
             vaccination is free at all pharmacies with paid time off for the appointment.",
        ),
        policy(
            "community",
            "weak",
            "Local health departments share vaccination information through community newsletters.",
        ),
        policy(
            "community",
            "strong",
            "Trusted community leaders, faith leaders and family doctors act as vaccine \
             ambassadors, holding open question sessions and walk-in clinics in every neighborhood.",
        ),
        policy(
            "mandate",
            "weak",
            "Public employers recommend that staff get vaccinated or submit to weekly testing.",
        ),
        policy(
            "mandate",
            "strong",
            "Proof of vaccination is required for employment, schools, restaurants, gyms and \
             public transport.",
        ),
    ]
}

// ---------------------------------------------------------------------------
// Days, data, logging
// ---------------------------------------------------------------------------

/// Warmup and active day counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DaysConfig {
    /// Days before the policy takes effect.
    pub warmup_days: u32,
    /// Days with the policy in effect.
    pub run_days: u32,
}

impl Default for DaysConfig {
    fn default() -> Self {
        Self {
            warmup_days: 5,
            run_days: 10,
        }
    }
}

/// Labels bounding the slice of the risk series used for a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RiskWindow {
    /// Time label of the first warmup week.
    pub start: String,
    /// Time label where the series begins in file order.
    pub end: String,
}

/// Input and output locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Persona profiles (JSON array).
    pub profiles_path: PathBuf,
    /// Social network (JSON `{num_nodes, edges}`).
    pub network_path: PathBuf,
    /// Default news corpus (JSON array of `{text, stance}`).
    pub news_path: PathBuf,
    /// Weekly risk CSV; no broadcasts when absent.
    pub risk_data_path: Option<PathBuf>,
    /// Optional slice of the risk series.
    pub risk_window: Option<RiskWindow>,
    /// Root directory for run and result output.
    pub save_dir: PathBuf,
    /// Directory of prompt template overrides.
    pub templates_dir: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            profiles_path: PathBuf::from("data/profiles.json"),
            network_path: PathBuf::from("data/network.json"),
            news_path: PathBuf::from("data/news.json"),
            risk_data_path: None,
            risk_window: None,
            save_dir: PathBuf::from("save_dir"),
            templates_dir: None,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}
