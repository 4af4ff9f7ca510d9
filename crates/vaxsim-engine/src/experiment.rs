//! Experiment sweeps and cross-seed summaries.
//!
//! An experiment picks one variable to sweep (temperature, policy, or news
//! corpus), runs every seed for each value, and appends one block of
//! per-seed statistics plus an average row to the results directory's
//! summary file. Setting `alphas` repeats the whole sweep per alpha, each
//! into its own summary file.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vaxsim_core::config::ExperimentConfig;
use vaxsim_core::{
    Collaborators, DayCallback, DiseaseRiskModel, ExperimentMode, Orchestrator, Phase,
    Population, RunSpec, SimulationConfig,
};
use vaxsim_runner::{Dispatcher, PromptEngine, create_backends};
use vaxsim_types::{Policy, PopulationSplit, round_to};

use crate::data::{load_news, news_handle};
use crate::error::EngineError;
use crate::recommend::{FollowTweetRecommender, NewsRecommender};
use crate::risk::CsvRiskModel;

/// Days after warmup at which hesitancy is sampled for the monthly columns.
pub const MONTHLY_OFFSETS: [u32; 7] = [4, 8, 13, 17, 21, 26, 30];

/// How many final polls the late-decrease column averages.
const LAST_POLLS: usize = 3;

const SUMMARY_HEADER: &str = "var_idx\tseed\tinitial_hesitancy\twarmup_hesitancy\taverage_decrease\taverage_decrease_last_three\tmonthly_data\n";

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// One value of the swept variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentVariable {
    /// Label written above the variable's summary block.
    pub label: String,
    /// Sampling temperature for attitude draws.
    pub temperature: f64,
    /// Policy applied in the active phase.
    pub policy: Option<Policy>,
    /// News corpus fed to agents.
    pub news_path: PathBuf,
}

/// Expand the configured mode into the values to sweep.
///
/// Assumes a validated config: modes other than tuning have a temperature.
pub fn variables(experiment: &ExperimentConfig, news_path: &Path) -> Vec<ExperimentVariable> {
    let temperature = experiment.temperature.unwrap_or(1.0);
    let with_policy = |policy: Policy| ExperimentVariable {
        label: policy.head(),
        temperature,
        policy: Some(policy),
        news_path: news_path.to_path_buf(),
    };
    match experiment.mode {
        ExperimentMode::AttitudeTuning => experiment
            .temperatures
            .iter()
            .map(|&t| ExperimentVariable {
                label: format!("temperature={t}"),
                temperature: t,
                policy: None,
                news_path: news_path.to_path_buf(),
            })
            .collect(),
        ExperimentMode::PolicyCategory => experiment
            .policy_category
            .as_deref()
            .map(|category| experiment.policies_in(category))
            .unwrap_or_default()
            .into_iter()
            .map(with_policy)
            .collect(),
        ExperimentMode::PolicyCompare => experiment
            .strong_policies()
            .into_iter()
            .map(with_policy)
            .collect(),
        ExperimentMode::NewsSanity => experiment
            .news_paths
            .iter()
            .map(|path| ExperimentVariable {
                label: format!("news={}", news_handle(path)),
                temperature,
                policy: None,
                news_path: path.clone(),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Hesitancy statistics for one seed.
///
/// Hesitancy is the against fraction; `series[0]` is the initial poll and
/// `series[W]` the last warmup poll.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedStats {
    /// Seed of the run.
    pub seed: u64,
    /// Hesitancy at the initial poll.
    pub initial: f64,
    /// Hesitancy at the end of warmup.
    pub warmup: f64,
    /// Warmup hesitancy minus the mean from warmup on.
    pub average_decrease: f64,
    /// Warmup hesitancy minus the mean of the last three polls.
    pub last_three_decrease: f64,
    /// Hesitancy at each monthly offset the run reached.
    pub monthly: Vec<f64>,
}

impl SeedStats {
    /// Summarize one run's hesitancy series.
    pub fn from_hesitancy(seed: u64, series: &[f64], warmup_days: u32) -> Self {
        let warmup_index = usize::try_from(warmup_days)
            .unwrap_or(usize::MAX)
            .min(series.len().saturating_sub(1));
        let initial = series.first().copied().unwrap_or(0.0);
        let warmup = series.get(warmup_index).copied().unwrap_or(initial);
        let after_warmup = series.get(warmup_index..).unwrap_or_default();
        let last = series
            .get(series.len().saturating_sub(LAST_POLLS)..)
            .unwrap_or_default();
        let monthly = MONTHLY_OFFSETS
            .iter()
            .filter_map(|&offset| {
                let index = warmup_index.checked_add(usize::try_from(offset).ok()?)?;
                series.get(index).copied()
            })
            .collect();
        Self {
            seed,
            initial,
            warmup,
            average_decrease: warmup - mean(after_warmup).unwrap_or(warmup),
            last_three_decrease: warmup - mean(last).unwrap_or(warmup),
            monthly,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = values.len() as f64;
    Some(values.iter().sum::<f64>() / count)
}

fn format_monthly(values: &[f64]) -> String {
    let joined: Vec<String> = values.iter().map(|v| format!("{v:.2}")).collect();
    format!("[{}]", joined.join(", "))
}

/// Render one variable's block: label line, one row per seed, average row.
pub fn render_block(var_idx: usize, label: &str, stats: &[SeedStats]) -> String {
    let mut block = format!("{label}\n");
    for s in stats {
        block.push_str(&format!(
            "{var_idx}\t{}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{}\n",
            s.seed,
            s.initial,
            s.warmup,
            s.average_decrease,
            s.last_three_decrease,
            format_monthly(&s.monthly)
        ));
    }

    let column = |field: fn(&SeedStats) -> f64| {
        let values: Vec<f64> = stats.iter().map(field).collect();
        mean(&values).unwrap_or(0.0)
    };
    let months = stats.iter().map(|s| s.monthly.len()).max().unwrap_or(0);
    let monthly: Vec<f64> = (0..months)
        .filter_map(|i| {
            let values: Vec<f64> = stats.iter().filter_map(|s| s.monthly.get(i).copied()).collect();
            mean(&values).map(|m| round_to(m, 2))
        })
        .collect();
    block.push_str(&format!(
        "Average\tN/A\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{}\n",
        column(|s| s.initial),
        column(|s| s.warmup),
        column(|s| s.average_decrease),
        column(|s| s.last_three_decrease),
        format_monthly(&monthly)
    ));
    block
}

/// Append-only summary file.
#[derive(Debug, Clone)]
pub struct SummaryWriter {
    path: PathBuf,
}

impl SummaryWriter {
    /// Create the file and write the header.
    pub fn create(path: &Path) -> Result<Self, EngineError> {
        std::fs::write(path, SUMMARY_HEADER)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Append one variable's block.
    pub fn append(&self, var_idx: usize, label: &str, stats: &[SeedStats]) -> Result<(), EngineError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(render_block(var_idx, label, stats).as_bytes())?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Logs each simulated day's population split.
#[derive(Debug, Default)]
pub struct ProgressCallback {
    seed: u64,
}

impl DayCallback for ProgressCallback {
    fn on_day_complete(&mut self, day: u32, phase: Phase, split: Option<&PopulationSplit>) {
        let Some(split) = split else {
            return;
        };
        info!(
            seed = self.seed,
            day,
            %phase,
            against = round_to(split.against, 2),
            swing = round_to(split.swing, 2),
            support = round_to(split.support, 2),
            "Day complete"
        );
    }
}

/// Everything an experiment needs besides the config.
#[derive(Clone)]
pub struct Experiment<'a> {
    config: &'a SimulationConfig,
    population: Population,
    prompts: PromptEngine,
    risk: Option<CsvRiskModel>,
    results_dir: PathBuf,
    started: String,
}

impl core::fmt::Debug for Experiment<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Experiment")
            .field("mode", &self.config.experiment.mode)
            .field("agents", &self.population.profiles.len())
            .field("risk_weeks", &self.risk.as_ref().map(CsvRiskModel::len))
            .field("results_dir", &self.results_dir)
            .finish_non_exhaustive()
    }
}

impl<'a> Experiment<'a> {
    /// Assemble an experiment; `started` stamps run directory names.
    pub const fn new(
        config: &'a SimulationConfig,
        population: Population,
        prompts: PromptEngine,
        risk: Option<CsvRiskModel>,
        results_dir: PathBuf,
        started: String,
    ) -> Self {
        Self {
            config,
            population,
            prompts,
            risk,
            results_dir,
            started,
        }
    }

    /// Run every alpha, variable and seed.
    pub async fn run(&self) -> Result<(), EngineError> {
        let experiment = &self.config.experiment;
        let sweeping_alpha = experiment.alphas.is_some();
        let alphas = experiment
            .alphas
            .clone()
            .unwrap_or_else(|| vec![experiment.alpha]);
        let variables = variables(experiment, &self.config.data.news_path);
        info!(
            mode = %experiment.mode,
            variables = variables.len(),
            seeds = experiment.seeds.len(),
            alphas = alphas.len(),
            "Experiment starting"
        );

        for alpha in alphas {
            let summary_path = if sweeping_alpha {
                self.results_dir.join(format!("summary-alpha={alpha}.tsv"))
            } else {
                self.results_dir.join("summary.tsv")
            };
            let writer = SummaryWriter::create(&summary_path)?;
            for (var_idx, variable) in variables.iter().enumerate() {
                info!(alpha, var_idx, variable = %variable.label, "Sweeping variable");
                let stats = self.run_variable(variable, alpha).await?;
                writer.append(var_idx, &variable.label, &stats)?;
            }
            info!(path = %summary_path.display(), "Summary written");
        }
        Ok(())
    }

    async fn run_variable(
        &self,
        variable: &ExperimentVariable,
        alpha: f64,
    ) -> Result<Vec<SeedStats>, EngineError> {
        let Some((&first, rest)) = self.config.experiment.seeds.split_first() else {
            return Ok(Vec::new());
        };
        let news = load_news(&variable.news_path, &self.config.experiment.disease.name)?;
        debug!(articles = news.len(), path = %variable.news_path.display(), "News loaded");
        let collaborators = Collaborators {
            news: Box::new(NewsRecommender::new(news)),
            tweets: Box::new(FollowTweetRecommender::new(alpha)),
            risk: self
                .risk
                .clone()
                .map(|model| Box::new(model) as Box<dyn DiseaseRiskModel>),
        };
        let dispatcher = Dispatcher::from_config(&self.config.dispatch, create_backends(&self.config.llm)?)?;
        let mut orchestrator = Orchestrator::new(
            self.config,
            dispatcher,
            self.prompts.clone(),
            collaborators,
            self.population.clone(),
            self.run_spec(variable, first, 0),
        )?;

        let warmup_days = self.config.days.warmup_days;
        let mut stats = Vec::with_capacity(rest.len().saturating_add(1));
        for (num, &seed) in core::iter::once(&first).chain(rest).enumerate() {
            if num > 0 {
                orchestrator.reset(self.run_spec(variable, seed, num))?;
            }
            let summary = orchestrator.run(&mut ProgressCallback { seed }).await?;
            stats.push(SeedStats::from_hesitancy(seed, &summary.hesitancy(), warmup_days));
        }
        Ok(stats)
    }

    fn run_spec(&self, variable: &ExperimentVariable, seed: u64, num: usize) -> RunSpec {
        let policy = variable
            .policy
            .as_ref()
            .map_or_else(|| "None".to_owned(), Policy::head);
        let dir_name = format!(
            "{}-news={}-policy={policy}_num={num}-temp={}",
            self.started,
            news_handle(&variable.news_path),
            variable.temperature
        );
        RunSpec {
            seed,
            temperature: variable.temperature,
            policy: variable.policy.clone(),
            run_dir: self.config.data.save_dir.join("sim").join(dir_name),
        }
    }
}

/// Results directory for an experiment started at `started`.
///
/// Named after the last path segment of the model, the start time and the
/// mode, under `save_dir/results`.
pub fn results_dir(config: &SimulationConfig, started: &str) -> PathBuf {
    let model = config.llm.model.rsplit('/').next().unwrap_or_default();
    config.data.save_dir.join("results").join(format!(
        "{model}-time={started}-exp={}",
        config.experiment.mode
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn config(mode: ExperimentMode) -> ExperimentConfig {
        ExperimentConfig {
            mode,
            temperature: Some(0.7),
            policy_category: Some("mandate".to_owned()),
            news_paths: vec![PathBuf::from("data/a.json"), PathBuf::from("data/b.json")],
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn modes_expand_to_variables() {
        let news = Path::new("data/news.json");
        let tuning = variables(&config(ExperimentMode::AttitudeTuning), news);
        assert_eq!(tuning.len(), 6);
        assert!(tuning.iter().all(|v| v.policy.is_none()));
        assert!((tuning[1].temperature - 0.1).abs() < 1e-12);

        let category = variables(&config(ExperimentMode::PolicyCategory), news);
        let labels: Vec<&str> = category.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, ["mandate-weak", "mandate-strong"]);

        let compare = variables(&config(ExperimentMode::PolicyCompare), news);
        assert_eq!(compare.len(), 3);
        assert!(compare.iter().all(|v| v.policy.as_ref().unwrap().strength == "strong"));

        let sanity = variables(&config(ExperimentMode::NewsSanity), news);
        assert_eq!(sanity[1].label, "news=b");
        assert_eq!(sanity[1].news_path, PathBuf::from("data/b.json"));
        assert!((sanity[0].temperature - 0.7).abs() < 1e-12);
    }

    #[test]
    fn seed_stats_follow_the_series() {
        // initial, two warmup days, then five active days
        let series = [0.6, 0.5, 0.4, 0.4, 0.3, 0.2, 0.2, 0.1];
        let stats = SeedStats::from_hesitancy(7, &series, 2);
        assert!((stats.initial - 0.6).abs() < 1e-12);
        assert!((stats.warmup - 0.4).abs() < 1e-12);
        // mean of [0.4, 0.4, 0.3, 0.2, 0.2, 0.1] = 0.2667
        assert!((stats.average_decrease - (0.4 - 1.6 / 6.0)).abs() < 1e-9);
        // mean of the last three = 0.1667
        assert!((stats.last_three_decrease - (0.4 - 0.5 / 3.0)).abs() < 1e-9);
        // only the offset-4 sample exists
        assert_eq!(stats.monthly.len(), 1);
        assert!((stats.monthly[0] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn short_series_does_not_panic() {
        let stats = SeedStats::from_hesitancy(1, &[0.5], 5);
        assert!((stats.warmup - 0.5).abs() < 1e-12);
        assert!(stats.average_decrease.abs() < 1e-12);
        assert!(stats.monthly.is_empty());
        let empty = SeedStats::from_hesitancy(1, &[], 5);
        assert!(empty.initial.abs() < 1e-12);
    }

    #[test]
    fn block_has_seed_rows_and_average() {
        let stats = vec![
            SeedStats {
                seed: 1,
                initial: 0.5,
                warmup: 0.4,
                average_decrease: 0.1,
                last_three_decrease: 0.2,
                monthly: vec![0.3, 0.2],
            },
            SeedStats {
                seed: 2,
                initial: 0.7,
                warmup: 0.6,
                average_decrease: 0.3,
                last_three_decrease: 0.4,
                monthly: vec![0.5],
            },
        ];
        let block = render_block(0, "temperature=1", &stats);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "temperature=1");
        assert_eq!(lines[1], "0\t1\t0.50\t0.40\t0.10\t0.20\t[0.30, 0.20]");
        assert_eq!(lines[3], "Average\tN/A\t0.60\t0.50\t0.20\t0.30\t[0.40, 0.20]");
    }

    #[test]
    fn summary_file_accumulates_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.tsv");
        let writer = SummaryWriter::create(&path).unwrap();
        writer.append(0, "a", &[]).unwrap();
        writer.append(1, "b", &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("var_idx\tseed\t"));
        assert_eq!(contents.matches("Average\tN/A").count(), 2);
    }

    #[test]
    fn results_dir_uses_model_tail_and_mode() {
        let mut config = SimulationConfig::default();
        config.llm.model = "org/some-model".to_owned();
        config.experiment.mode = ExperimentMode::PolicyCompare;
        let dir = results_dir(&config, "26-10-17_09:00:00");
        assert!(dir.ends_with("results/some-model-time=26-10-17_09:00:00-exp=policy_compare"));
    }
}
