//! Per-run output directory.
//!
//! ```text
//! <run_dir>/
//!   run_config.txt            resolved configuration dump
//!   attitude_dist.tsv         one row per poll: split and homophily
//!   full_output.tsv           one row per stage: every request and output
//!   agents/agent_id={id}.tsv  one row per stage per agent
//!   simulation_summary.json   written when the run is finalized
//! ```
//!
//! Every agent gets a row for every stage, degraded or not, so transcripts
//! always line up across agents. Tabs and line breaks inside fields are
//! replaced by spaces.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use vaxsim_agents::Agent;
use vaxsim_runner::GenerationRequest;
use vaxsim_types::{Homophily, Policy, PopulationSplit, RunId};

/// Aggregate series file.
pub const AGGREGATE_FILE: &str = "attitude_dist.tsv";
/// Per-stage transcript file.
pub const TRANSCRIPT_FILE: &str = "full_output.tsv";
/// Run summary document.
pub const SUMMARY_FILE: &str = "simulation_summary.json";
/// Configuration dump.
pub const RUN_CONFIG_FILE: &str = "run_config.txt";
/// Directory of per-agent transcripts.
pub const AGENTS_DIR: &str = "agents";

const AGGREGATE_HEADER: &str = "day\tagainst\tswing\tsupport\thomophily\thp1\thp2\thp3\thp4";
const TRANSCRIPT_HEADER: &str = "Stage\tDay\tAttitude_Dist\tInput\tOutput";
const AGENT_HEADER: &str =
    "Day\tStage\tResponse\tSys_Prompt\tUser_Prompt\tAll_Attitudes\tLessons\tReflections\tTweets";

/// Errors writing run output.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A file or directory could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A JSON column or the summary could not be serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Risk series carried into the summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InfectionInfo {
    /// Risk values for the run window.
    pub risks_history: Vec<f64>,
    /// Day-over-day change rates.
    pub risks_rate: Vec<f64>,
}

/// The document written when a run is finalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: RunId,
    /// Top-level seed.
    pub seed: u64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Policy injected in the active phase.
    pub policy: Option<Policy>,
    /// `[against, swing, support]` after every poll.
    pub vaccine_hesitancy_ratio: Vec<[f64; 3]>,
    /// Risk series of the run.
    pub infection_info: InfectionInfo,
}

impl RunSummary {
    /// Against fraction after every poll (the hesitancy series).
    pub fn hesitancy(&self) -> Vec<f64> {
        self.vaccine_hesitancy_ratio.iter().map(|[against, _, _]| *against).collect()
    }
}

/// One transcript row for one agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentRow<'a> {
    /// Agent after the stage's writes.
    pub agent: &'a Agent,
    /// Day of the stage.
    pub day: u32,
    /// Stage label.
    pub stage: &'a str,
    /// What the agent produced (raw or parsed).
    pub response: &'a str,
    /// System turn sent.
    pub system_prompt: &'a str,
    /// User turn sent.
    pub user_prompt: &'a str,
}

/// Writer for one run directory.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    run_dir: PathBuf,
}

impl RunRecorder {
    /// Create the run directory with fresh headers for every file.
    ///
    /// Existing files from an earlier run in the same directory are
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Io`] if a directory or file cannot be created.
    pub fn create(run_dir: &Path, agent_count: usize) -> Result<Self, RecordError> {
        let agents_dir = run_dir.join(AGENTS_DIR);
        fs::create_dir_all(&agents_dir).map_err(|source| RecordError::Io {
            path: agents_dir.clone(),
            source,
        })?;
        let recorder = Self {
            run_dir: run_dir.to_path_buf(),
        };
        recorder.write_header(&run_dir.join(AGGREGATE_FILE), AGGREGATE_HEADER)?;
        recorder.write_header(&run_dir.join(TRANSCRIPT_FILE), TRANSCRIPT_HEADER)?;
        for id in 0..agent_count {
            recorder.write_header(&recorder.agent_path(id), AGENT_HEADER)?;
        }
        Ok(recorder)
    }

    /// Root of this run's output.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn agent_path(&self, id: usize) -> PathBuf {
        self.run_dir
            .join(AGENTS_DIR)
            .join(format!("agent_id={id}.tsv"))
    }

    fn write_header(&self, path: &Path, header: &str) -> Result<(), RecordError> {
        let mut file = File::create(path).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        writeln!(file, "{header}").map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<(), RecordError> {
        let io_error = |source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_error)?;
        writeln!(file, "{line}").map_err(io_error)
    }

    /// Write the configuration dump.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Io`] if the file cannot be written.
    pub fn write_run_config(&self, dump: &str) -> Result<(), RecordError> {
        let path = self.run_dir.join(RUN_CONFIG_FILE);
        fs::write(&path, dump).map_err(|source| RecordError::Io { path, source })
    }

    /// Append one aggregate row.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Io`] if the file cannot be written.
    pub fn append_aggregate(
        &self,
        day: u32,
        split: &PopulationSplit,
        homophily: &Homophily,
    ) -> Result<(), RecordError> {
        let [hp1, hp2, hp3, hp4] = homophily.per_rating;
        let line = format!(
            "{day}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{hp1:.2}\t{hp2:.2}\t{hp3:.2}\t{hp4:.2}",
            split.against, split.swing, split.support, homophily.overall
        );
        self.append_line(&self.run_dir.join(AGGREGATE_FILE), &line)
    }

    /// Append one stage row covering the whole wave.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Serde`] if a column cannot be serialized, or
    /// [`RecordError::Io`] if the file cannot be written.
    pub fn append_stage<T: Serialize>(
        &self,
        stage: &str,
        day: u32,
        series: &[PopulationSplit],
        requests: &[GenerationRequest],
        outputs: &[T],
    ) -> Result<(), RecordError> {
        let series: Vec<[f64; 3]> = series.iter().map(split_triple).collect();
        let inputs: Vec<_> = requests.iter().map(|r| &r.messages).collect();
        let line = format!(
            "{}\t{day}\t{}\t{}\t{}",
            sanitize(stage),
            serde_json::to_string(&series)?,
            sanitize(&serde_json::to_string(&inputs)?),
            sanitize(&serde_json::to_string(outputs)?),
        );
        self.append_line(&self.run_dir.join(TRANSCRIPT_FILE), &line)
    }

    /// Append one row to an agent's transcript.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Serde`] if a column cannot be serialized, or
    /// [`RecordError::Io`] if the file cannot be written.
    pub fn append_agent_row(&self, row: &AgentRow<'_>) -> Result<(), RecordError> {
        let agent = row.agent;
        let attitudes: Vec<u8> = agent.attitudes.iter().map(|r| r.value()).collect();
        let lessons: Vec<&str> = agent
            .lessons
            .lessons()
            .iter()
            .map(|l| l.text.as_str())
            .collect();
        let tweets: Vec<&str> = agent.tweets.iter().map(|t| t.text.as_str()).collect();
        let line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.day,
            sanitize(row.stage),
            sanitize(row.response.trim()),
            sanitize(row.system_prompt.trim()),
            sanitize(row.user_prompt.trim()),
            serde_json::to_string(&attitudes)?,
            sanitize(&serde_json::to_string(&lessons)?),
            sanitize(&serde_json::to_string(&agent.reflections)?),
            sanitize(&serde_json::to_string(&tweets)?),
        );
        self.append_line(&self.agent_path(agent.id.index()), &line)
    }

    /// Write the run summary document.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Serde`] or [`RecordError::Io`] on failure.
    pub fn write_summary(&self, summary: &RunSummary) -> Result<(), RecordError> {
        let path = self.run_dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(&path, json).map_err(|source| RecordError::Io { path, source })
    }
}

/// `[against, swing, support]` of a split.
pub const fn split_triple(split: &PopulationSplit) -> [f64; 3] {
    [split.against, split.swing, split.support]
}

/// Replace characters that would break a TSV row.
fn sanitize(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;

    use vaxsim_types::{AgentId, AttitudeDistribution, AttitudeRating, Profile};

    use super::*;

    fn agent() -> Agent {
        let profile = Profile {
            gender: "Male".to_owned(),
            age: "55".to_owned(),
            education: "College".to_owned(),
            occupation: "Farmer".to_owned(),
            political_belief: "Conservative".to_owned(),
            religion: "Protestant".to_owned(),
        };
        let mut agent = Agent::new(AgentId(1), profile, BTreeMap::new(), 5);
        agent.record_attitude(
            AttitudeRating::ProbablyNot,
            "unsure".to_owned(),
            AttitudeDistribution::uniform(),
        );
        agent.post("line one\nline\ttwo".to_owned(), 1);
        agent
    }

    #[test]
    fn create_writes_headers() {
        let dir = tempfile::tempdir().unwrap();
        RunRecorder::create(dir.path(), 2).unwrap();
        let aggregate = fs::read_to_string(dir.path().join(AGGREGATE_FILE)).unwrap();
        assert_eq!(aggregate, format!("{AGGREGATE_HEADER}\n"));
        assert!(dir.path().join("agents/agent_id=0.tsv").exists());
        assert!(dir.path().join("agents/agent_id=1.tsv").exists());
    }

    #[test]
    fn aggregate_rows_use_two_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = RunRecorder::create(dir.path(), 0).unwrap();
        let split = PopulationSplit {
            against: 0.4,
            swing: 0.2,
            support: 0.4,
        };
        let homophily = Homophily {
            overall: 0.5,
            per_rating: [0.25, 0.0, 0.0, 0.25],
        };
        recorder.append_aggregate(3, &split, &homophily).unwrap();
        let contents = fs::read_to_string(dir.path().join(AGGREGATE_FILE)).unwrap();
        let row = contents.lines().nth(1).unwrap();
        assert_eq!(row, "3\t0.40\t0.20\t0.40\t0.50\t0.25\t0.00\t0.00\t0.25");
    }

    #[test]
    fn agent_rows_stay_on_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = RunRecorder::create(dir.path(), 2).unwrap();
        let agent = agent();
        recorder
            .append_agent_row(&AgentRow {
                agent: &agent,
                day: 1,
                stage: "prompt_actions_day=1",
                response: "a\nb",
                system_prompt: "sys\tprompt",
                user_prompt: "user",
            })
            .unwrap();
        let contents = fs::read_to_string(dir.path().join("agents/agent_id=1.tsv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let columns: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(columns.len(), 9);
        assert_eq!(columns[2], "a b");
        assert_eq!(columns[5], "[2]");
    }

    #[test]
    fn summary_round_trips_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = RunRecorder::create(dir.path(), 0).unwrap();
        let summary = RunSummary {
            run_id: RunId::new(),
            seed: 7,
            temperature: 1.0,
            policy: None,
            vaccine_hesitancy_ratio: vec![[0.6, 0.2, 0.2], [0.4, 0.4, 0.2]],
            infection_info: InfectionInfo::default(),
        };
        recorder.write_summary(&summary).unwrap();
        let text = fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["seed"], 7);
        assert_eq!(summary.hesitancy(), vec![0.6, 0.4]);
    }
}
