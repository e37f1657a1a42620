//! Plain-text summaries of search diagnostics and predictions

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use polars::prelude::*;
use serde::Serialize;

use crate::data::{check_columns, Response, RESPONSE_COLUMN};
use crate::error::{ForgeError, Result};
use crate::selection::{GridScoreRecord, SearchOutcome, TrialRecord};

/// Run a writer against a fresh buffer; formatting into a `String` only fails
/// if a `Display` impl does
fn render(write: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut out = String::new();
    write(&mut out).ok();
    out
}

fn write_trials(out: &mut String, trials: &[TrialRecord]) -> fmt::Result {
    writeln!(
        out,
        "{:>5} {:>6} {:>9} {:>10} {:>11}",
        "folds", "best k", "cv score", "valid acc", "valid prec"
    )?;
    for trial in trials {
        writeln!(
            out,
            "{:>5} {:>6} {:>9.4} {:>10.4} {:>11.4}",
            trial.folds, trial.best_k, trial.cv_score, trial.valid_accuracy, trial.valid_precision
        )?;
    }
    Ok(())
}

/// Render the per-fold-count winners
pub fn trial_table(trials: &[TrialRecord]) -> String {
    render(|out| write_trials(out, trials))
}

/// Render the full (fold-count, k) score grid
pub fn grid_score_table(grid: &[GridScoreRecord]) -> String {
    render(|out| {
        writeln!(out, "{:>5} {:>4} {:>12} {:>11}", "folds", "k", "cv precision", "cv accuracy")?;
        for cell in grid {
            writeln!(
                out,
                "{:>5} {:>4} {:>12.4} {:>11.4}",
                cell.folds, cell.k, cell.cv_precision, cell.cv_accuracy
            )?;
        }
        Ok(())
    })
}

/// Search summary: winners, mean score per fold-count and skipped fold-counts
pub fn search_summary(outcome: &SearchOutcome) -> String {
    render(|out| {
        write_trials(out, &outcome.trials)?;
        writeln!(out, "\nMean cv {} per fold-count:", outcome.metric)?;
        for (folds, score) in outcome.mean_score_per_fold_count(outcome.metric) {
            writeln!(out, "  {:>2} folds: {:.4}", folds, score)?;
        }
        if !outcome.skipped_folds.is_empty() {
            writeln!(out, "Skipped fold-counts: {:?}", outcome.skipped_folds)?;
        }
        writeln!(out, "Selected k = {} (most common best k)", outcome.best_k)
    })
}

/// Predicted yes/no counts for one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseCounts {
    pub yes: usize,
    pub no: usize,
}

impl ResponseCounts {
    pub fn total(&self) -> usize {
        self.yes + self.no
    }

    /// Share of "yes" responses, 0 for an empty group
    pub fn yes_share(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.yes as f64 / self.total() as f64
        }
    }
}

/// Count responses per value of `column` in a table carrying a `Response` column.
///
/// Missing group values are counted under `"<missing>"`.
pub fn response_breakdown(table: &DataFrame, column: &str) -> Result<BTreeMap<String, ResponseCounts>> {
    check_columns(table, &[column, RESPONSE_COLUMN])?;

    let groups = table.column(column)?.cast(&DataType::String)?;
    let responses = table.column(RESPONSE_COLUMN)?.cast(&DataType::String)?;

    let mut counts: BTreeMap<String, ResponseCounts> = BTreeMap::new();
    for (group, response) in groups.str()?.into_iter().zip(responses.str()?.into_iter()) {
        let response = response.and_then(Response::parse).ok_or_else(|| {
            ForgeError::schema(format!("column '{}' holds a value other than yes/no", RESPONSE_COLUMN))
        })?;
        let entry = counts
            .entry(group.unwrap_or("<missing>").to_string())
            .or_default();
        match response {
            Response::Yes => entry.yes += 1,
            Response::No => entry.no += 1,
        }
    }

    Ok(counts)
}

/// Render a breakdown as one line per group
pub fn breakdown_table(column: &str, counts: &BTreeMap<String, ResponseCounts>) -> String {
    render(|out| {
        writeln!(out, "Responses by {}:", column)?;
        for (group, c) in counts {
            writeln!(
                out,
                "  {:<12} yes {:>5}  no {:>5}  ({:.1}% yes)",
                group,
                c.yes,
                c.no,
                c.yes_share() * 100.0
            )?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::OptimizeMetric;

    fn predictions() -> DataFrame {
        DataFrame::new(vec![
            Series::new("Gender".into(), &["Male", "Female", "Male", "Female", "Male"]).into(),
            Series::new(RESPONSE_COLUMN.into(), &["yes", "no", "no", "no", "yes"]).into(),
        ])
        .unwrap()
    }

    #[test]
    fn test_response_breakdown() {
        let counts = response_breakdown(&predictions(), "Gender").unwrap();
        assert_eq!(counts["Male"], ResponseCounts { yes: 2, no: 1 });
        assert_eq!(counts["Female"], ResponseCounts { yes: 0, no: 2 });
        assert!((counts["Male"].yes_share() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_breakdown_requires_columns() {
        let err = response_breakdown(&predictions(), "Region").unwrap_err();
        assert!(matches!(err, ForgeError::Schema(_)));
    }

    #[test]
    fn test_tables_render_rows() {
        let trials = vec![TrialRecord {
            folds: 3,
            best_k: 5,
            cv_score: 0.81,
            valid_accuracy: 0.8,
            valid_precision: 0.79,
        }];
        let grid = vec![GridScoreRecord {
            folds: 3,
            k: 5,
            cv_precision: 0.81,
            cv_accuracy: 0.82,
        }];

        let table = trial_table(&trials);
        assert_eq!(table.lines().count(), 2);
        assert!(table.contains("0.8100"));

        let table = grid_score_table(&grid);
        assert!(table.contains("0.8200"));

        let outcome = SearchOutcome {
            best_k: 5,
            metric: OptimizeMetric::Precision,
            trials,
            grid,
            skipped_folds: vec![7],
        };
        let summary = search_summary(&outcome);
        assert!(summary.contains("Mean cv precision per fold-count"));
        assert!(summary.contains("Selected k = 5"));
        assert!(summary.contains("Skipped fold-counts: [7]"));
    }
}
