//! Disease-risk series read from a weekly surveillance CSV.
//!
//! The file has three header rows followed by one row per week:
//! `_, week label, _, risk, ...`. Risk is the weekly percentage of
//! emergency visits; rows are kept in file order and simulation day `d`
//! reads row `d` of the selected window.

use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use vaxsim_core::DiseaseRiskModel;
use vaxsim_core::config::RiskWindow;
use vaxsim_types::{RiskLevel, RiskReport, round_to};

/// Header rows before the first data row.
const HEADER_ROWS: usize = 3;

/// Column holding the week label.
const LABEL_COLUMN: usize = 1;

/// Column holding the risk value.
const RISK_COLUMN: usize = 3;

/// Risk series with precomputed week-over-week change rates.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRiskModel {
    labels: Vec<String>,
    values: Vec<f64>,
    change_rates: Vec<f64>,
}

impl CsvRiskModel {
    /// Read and window a risk CSV.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or a window label is
    /// not found in it.
    pub fn load(path: &Path, window: Option<&RiskWindow>, warmup_days: u32) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read risk file {}", path.display()))?;
        Self::parse(&contents, window, warmup_days)
            .with_context(|| format!("invalid risk file {}", path.display()))
    }

    /// Parse CSV text; see [`CsvRiskModel::load`].
    ///
    /// With a window, rows run from the `end` label up to `warmup_days`
    /// rows past the `start` label (capped at the last row), exclusive.
    pub fn parse(contents: &str, window: Option<&RiskWindow>, warmup_days: u32) -> Result<Self> {
        let mut labels = Vec::new();
        let mut values = Vec::new();
        for (line_no, line) in contents.lines().enumerate().skip(HEADER_ROWS) {
            if line.trim().is_empty() {
                continue;
            }
            let columns: Vec<&str> = line.trim().split(',').collect();
            let (Some(label), Some(risk)) = (columns.get(LABEL_COLUMN), columns.get(RISK_COLUMN))
            else {
                bail!("line {} has {} columns", line_no.saturating_add(1), columns.len());
            };
            let value: f64 = risk.trim().parse().with_context(|| {
                format!("line {}: bad risk value {risk:?}", line_no.saturating_add(1))
            })?;
            labels.push(squash(label));
            values.push(value);
        }
        ensure!(!values.is_empty(), "no data rows");

        let Some(window) = window else {
            return Ok(Self::from_series(labels, values));
        };
        let find = |label: &str| {
            let wanted = squash(label);
            labels
                .iter()
                .position(|l| *l == wanted)
                .with_context(|| format!("week {label:?} not found"))
        };
        let start = find(&window.start)?;
        let end = find(&window.end)?;
        let warmup = usize::try_from(warmup_days).unwrap_or(usize::MAX);
        let stop = start.saturating_add(warmup).min(values.len().saturating_sub(1));
        ensure!(end <= stop, "window end {:?} comes after its start", window.end);

        let labels = labels.get(end..stop).map(<[String]>::to_vec).unwrap_or_default();
        let values = values.get(end..stop).map(<[f64]>::to_vec).unwrap_or_default();
        Ok(Self::from_series(labels, values))
    }

    /// Build from an already-selected series.
    pub fn from_series(labels: Vec<String>, values: Vec<f64>) -> Self {
        let change_rates = values
            .windows(2)
            .map(|pair| match *pair {
                [previous, current] if current.abs() > f64::EPSILON => {
                    round_to(100.0 * (previous - current) / current, 2)
                }
                _ => 0.0,
            })
            .collect();
        Self {
            labels,
            values,
            change_rates,
        }
    }

    /// Week labels in series order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of weeks in the series.
    pub fn len(&self) -> usize {
        self.values.len()
    }
}

fn squash(label: &str) -> String {
    label.chars().filter(|c| !c.is_whitespace()).collect()
}

impl DiseaseRiskModel for CsvRiskModel {
    fn report(&self, day: u32) -> Option<RiskReport> {
        let index = usize::try_from(day).ok()?;
        let value = *self.values.get(index)?;
        let change_rate = index
            .checked_sub(1)
            .and_then(|i| self.change_rates.get(i))
            .copied()
            .unwrap_or(0.0);
        Some(RiskReport {
            level: RiskLevel::from_value(value),
            value,
            change_rate,
        })
    }

    fn history(&self) -> Vec<f64> {
        self.values.clone()
    }

    fn change_rates(&self) -> Vec<f64> {
        self.change_rates.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const CSV: &str = "\
Weekly ED visits
Source: surveillance
Geography,Week,Deaths,Percent ED,Note
US,Feb 5 2022,10,8.0,
US,Jan 29 2022,10,4.0,
US,Jan 22 2022,10,2.0,
US,Jan 15 2022,10,1.0,
US,Jan 8 2022,10,0.5,
";

    fn window(start: &str, end: &str) -> RiskWindow {
        RiskWindow {
            start: start.to_owned(),
            end: end.to_owned(),
        }
    }

    #[test]
    fn parses_whole_series() {
        let model = CsvRiskModel::parse(CSV, None, 1).unwrap();
        assert_eq!(model.len(), 5);
        assert_eq!(model.labels()[0], "Feb52022");
        assert_eq!(model.history(), vec![8.0, 4.0, 2.0, 1.0, 0.5]);
        assert_eq!(model.change_rates(), vec![100.0, 100.0, 100.0, 100.0]);
    }

    #[test]
    fn reports_levels_and_rates() {
        let model = CsvRiskModel::parse(CSV, None, 1).unwrap();
        let first = model.report(0).unwrap();
        assert_eq!(first.level, RiskLevel::High);
        assert!(first.change_rate.abs() < 1e-12);
        let third = model.report(2).unwrap();
        assert_eq!(third.level, RiskLevel::Low);
        assert!((third.change_rate - 100.0).abs() < 1e-12);
        assert!(model.report(5).is_none());
    }

    #[test]
    fn window_extends_past_start_by_warmup() {
        let model = CsvRiskModel::parse(CSV, Some(&window("Jan 22 2022", "Jan 29 2022")), 1).unwrap();
        assert_eq!(model.labels(), ["Jan292022", "Jan222022"]);
        assert_eq!(model.history(), vec![4.0, 2.0]);

        // Warmup past the end of the file is capped at the last row.
        let capped = CsvRiskModel::parse(CSV, Some(&window("Jan 15 2022", "Feb 5 2022")), 9).unwrap();
        assert_eq!(capped.len(), 4);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(CsvRiskModel::parse("a\nb\nc\n", None, 1).is_err());
        assert!(CsvRiskModel::parse("a\nb\nc\nUS,Jan 1,3,high\n", None, 1).is_err());
        assert!(CsvRiskModel::parse(CSV, Some(&window("Mar 1 2022", "Feb 5 2022")), 1).is_err());
    }

    #[test]
    fn zero_risk_has_zero_rate() {
        let model = CsvRiskModel::from_series(vec!["a".into(), "b".into()], vec![1.0, 0.0]);
        assert_eq!(model.change_rates(), vec![0.0]);
        assert_eq!(model.report(1).unwrap().level, RiskLevel::Minimal);
    }
}
