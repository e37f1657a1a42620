//! Neighbor-count selection by stratified cross-validated grid search
//!
//! For every fold-count the training split is cut into stratified folds and
//! every candidate k is scored on each held-out fold. The k with the best mean
//! score wins that fold-count, is refit on the whole training split and
//! evaluated once on the validation split. The final k is the mode of the
//! per-fold-count winners.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_SEED, DEFAULT_TEST_SIZE};
use crate::data::{HoldoutSplit, LabeledTable, Response};
use crate::error::{ForgeError, Result};
use crate::metrics::{evaluate, ConfusionMatrix};
use crate::model::{KnnClassifier, ResponseModel};
use crate::preprocess::FeatureSchema;

/// Cross-validated score the search maximizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeMetric {
    /// Macro-averaged precision
    #[default]
    Precision,
    Accuracy,
}

impl FromStr for OptimizeMetric {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "precision" | "precision_macro" => Ok(OptimizeMetric::Precision),
            "accuracy" => Ok(OptimizeMetric::Accuracy),
            _ => Err(ForgeError::invalid(
                "metric",
                format!("unknown metric '{}', expected precision or accuracy", s),
            )),
        }
    }
}

impl fmt::Display for OptimizeMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizeMetric::Precision => f.write_str("precision"),
            OptimizeMetric::Accuracy => f.write_str("accuracy"),
        }
    }
}

/// Which train/validation split each fold-count trial uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Reuse the split computed when the data was fed
    #[default]
    FixedHoldout,
    /// Re-split the fed table for every fold-count with seed `seed + fold_count`
    FreshSplitPerTrial,
}

impl FromStr for SplitPolicy {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fixed" | "fixed_holdout" => Ok(SplitPolicy::FixedHoldout),
            "fresh" | "fresh_split_per_trial" => Ok(SplitPolicy::FreshSplitPerTrial),
            _ => Err(ForgeError::invalid(
                "split_policy",
                format!("unknown split policy '{}', expected fixed or fresh", s),
            )),
        }
    }
}

/// Grid of candidates for the search. Ranges are half-open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub k_range: Range<usize>,
    pub fold_range: Range<usize>,
    pub metric: OptimizeMetric,
    pub split_policy: SplitPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k_range: 2..16,
            fold_range: 2..8,
            metric: OptimizeMetric::Precision,
            split_policy: SplitPolicy::FixedHoldout,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k_range.is_empty() || self.k_range.start == 0 {
            return Err(ForgeError::invalid(
                "k_range",
                format!("must be non-empty and start at 1 or more, got {:?}", self.k_range),
            ));
        }
        if self.fold_range.is_empty() || self.fold_range.start < 2 {
            return Err(ForgeError::invalid(
                "fold_range",
                format!("must be non-empty and start at 2 or more, got {:?}", self.fold_range),
            ));
        }
        Ok(())
    }
}

/// Stratified K-fold splitter with a seeded per-class shuffle
#[derive(Debug, Clone)]
pub struct StratifiedKFold {
    n_splits: usize,
    seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self { n_splits, seed }
    }

    /// Generate (train, test) row positions for each fold.
    ///
    /// Every class is shuffled and dealt into the folds in contiguous blocks,
    /// so each fold holds `n_class / n_splits` rows of the class, plus one for
    /// the first `n_class % n_splits` folds.
    ///
    /// # Errors
    /// * `InsufficientData` if any class has fewer rows than `n_splits`
    pub fn split(&self, labels: &[Response]) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if self.n_splits < 2 {
            return Err(ForgeError::invalid("n_splits", "at least 2 folds are required"));
        }

        let mut class_rows: BTreeMap<Response, Vec<usize>> = BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            class_rows.entry(label).or_default().push(i);
        }

        if let Some((label, rows)) = class_rows.iter().find(|(_, rows)| rows.len() < self.n_splits) {
            return Err(ForgeError::InsufficientData {
                class: label.to_string(),
                count: rows.len(),
                folds: self.n_splits,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut fold_rows: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];

        for rows in class_rows.values_mut() {
            rows.shuffle(&mut rng);

            let fold_size = rows.len() / self.n_splits;
            let remainder = rows.len() % self.n_splits;
            let mut start = 0;
            for (i, fold) in fold_rows.iter_mut().enumerate() {
                let end = start + fold_size + usize::from(i < remainder);
                fold.extend_from_slice(&rows[start..end]);
                start = end;
            }
        }

        let splits = (0..self.n_splits)
            .map(|i| {
                let mut test = fold_rows[i].clone();
                test.sort_unstable();
                let mut train: Vec<usize> = fold_rows
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .flat_map(|(_, rows)| rows.iter().copied())
                    .collect();
                train.sort_unstable();
                (train, test)
            })
            .collect();

        Ok(splits)
    }
}

/// Winner of one fold-count trial and its score on the validation split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub folds: usize,
    pub best_k: usize,
    /// Mean cross-validated score of `best_k` under the optimized metric
    pub cv_score: f64,
    pub valid_accuracy: f64,
    pub valid_precision: f64,
}

/// Mean cross-validated scores of one (fold-count, k) cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridScoreRecord {
    pub folds: usize,
    pub k: usize,
    pub cv_precision: f64,
    pub cv_accuracy: f64,
}

impl GridScoreRecord {
    pub fn score(&self, metric: OptimizeMetric) -> f64 {
        match metric {
            OptimizeMetric::Precision => self.cv_precision,
            OptimizeMetric::Accuracy => self.cv_accuracy,
        }
    }
}

/// Everything a search produced, in sweep order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Mode of the per-fold-count winners
    pub best_k: usize,
    pub metric: OptimizeMetric,
    pub trials: Vec<TrialRecord>,
    pub grid: Vec<GridScoreRecord>,
    /// Fold-counts skipped because a class was too small
    pub skipped_folds: Vec<usize>,
}

impl SearchOutcome {
    /// Mean grid score for each fold-count, ascending by fold-count
    pub fn mean_score_per_fold_count(&self, metric: OptimizeMetric) -> Vec<(usize, f64)> {
        let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
        for record in &self.grid {
            let entry = sums.entry(record.folds).or_insert((0.0, 0));
            entry.0 += record.score(metric);
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(folds, (sum, n))| (folds, sum / n as f64))
            .collect()
    }
}

/// First entry with the highest score; `grid` is in ascending k order so ties
/// go to the smaller k
pub fn best_grid_entry(grid: &[GridScoreRecord], metric: OptimizeMetric) -> Option<&GridScoreRecord> {
    let mut best: Option<&GridScoreRecord> = None;
    for entry in grid {
        match best {
            Some(current) if entry.score(metric) <= current.score(metric) => {}
            _ => best = Some(entry),
        }
    }
    best
}

/// Most frequent value, ties broken toward the smallest value
pub fn mode_smallest(values: &[usize]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &value in values {
        *counts.entry(value).or_insert(0) += 1;
    }

    let mut best: Option<(usize, usize)> = None;
    for (value, count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((value, count)),
        }
    }
    best.map(|(value, _)| value)
}

/// Grid search over (fold-count, k) for one fed dataset.
///
/// Never mutates its inputs; results depend only on the inputs and the seed.
#[derive(Debug, Clone)]
pub struct NeighborSelector<'a> {
    schema: &'a FeatureSchema,
    config: SearchConfig,
    seed: u64,
    test_size: f64,
}

impl<'a> NeighborSelector<'a> {
    pub fn new(schema: &'a FeatureSchema, config: SearchConfig) -> Self {
        Self {
            schema,
            config,
            seed: DEFAULT_SEED,
            test_size: DEFAULT_TEST_SIZE,
        }
    }

    /// Seed for fold assignment and fresh splits
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validation fraction used by [`SplitPolicy::FreshSplitPerTrial`]
    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    /// Run the sweep.
    ///
    /// # Arguments
    /// * `holdout` - Train/validation split computed when the data was fed
    /// * `fed` - Full fed table, re-split only under `FreshSplitPerTrial`
    ///
    /// # Errors
    /// * `InsufficientData` if no fold-count was feasible
    pub fn select(&self, holdout: &HoldoutSplit, fed: &LabeledTable) -> Result<SearchOutcome> {
        self.config.validate()?;

        let mut trials = Vec::new();
        let mut grid = Vec::new();
        let mut skipped_folds = Vec::new();
        let mut first_skip: Option<ForgeError> = None;

        for folds in self.config.fold_range.clone() {
            let split = match self.config.split_policy {
                SplitPolicy::FixedHoldout => Cow::Borrowed(holdout),
                SplitPolicy::FreshSplitPerTrial => Cow::Owned(
                    fed.stratified_split(self.test_size, self.seed.wrapping_add(folds as u64))?,
                ),
            };

            match self.run_trial(folds, &split) {
                Ok((trial, cells)) => {
                    trials.push(trial);
                    grid.extend(cells);
                }
                Err(err @ ForgeError::InsufficientData { .. }) => {
                    warn!("Skipping {} folds: {}", folds, err);
                    skipped_folds.push(folds);
                    first_skip.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        let winners: Vec<usize> = trials.iter().map(|t| t.best_k).collect();
        let best_k = match mode_smallest(&winners) {
            Some(k) => k,
            None => {
                return Err(first_skip.unwrap_or_else(|| {
                    ForgeError::invalid("fold_range", "no fold-count produced a trial")
                }))
            }
        };

        info!(
            "Selected k = {} as the most common winner across {} fold-counts",
            best_k,
            trials.len()
        );

        Ok(SearchOutcome {
            best_k,
            metric: self.config.metric,
            trials,
            grid,
            skipped_folds,
        })
    }

    fn run_trial(&self, folds: usize, split: &HoldoutSplit) -> Result<(TrialRecord, Vec<GridScoreRecord>)> {
        let splits = StratifiedKFold::new(folds, self.seed).split(&split.train.labels)?;
        let k_values: Vec<usize> = self.config.k_range.clone().collect();
        let k_max = self.config.k_range.end - 1;

        let mut precision_sums = vec![0.0; k_values.len()];
        let mut accuracy_sums = vec![0.0; k_values.len()];

        for (train_rows, test_rows) in &splits {
            let train = split.train.take(train_rows)?;
            let test = split.train.take(test_rows)?;

            // Transform statistics come from the fold complement only
            let transform = self.schema.fit(&train.features)?;
            let x_train = transform.transform(&train.features)?;
            let x_test = transform.transform(&test.features)?;

            let mut knn = KnnClassifier::new(k_max)?;
            knn.fit(x_train, &train.labels)?;

            let scores = k_values
                .par_iter()
                .map(|&k| -> Result<(f64, f64)> {
                    let predicted = knn.predict_with_k(x_test.view(), k)?;
                    let cm = ConfusionMatrix::from_labels(&test.labels, &predicted)?;
                    Ok((cm.macro_precision(), cm.accuracy()))
                })
                .collect::<Result<Vec<_>>>()?;

            for (i, (precision, accuracy)) in scores.into_iter().enumerate() {
                precision_sums[i] += precision;
                accuracy_sums[i] += accuracy;
            }
        }

        let n = splits.len() as f64;
        let cells: Vec<GridScoreRecord> = k_values
            .iter()
            .enumerate()
            .map(|(i, &k)| GridScoreRecord {
                folds,
                k,
                cv_precision: precision_sums[i] / n,
                cv_accuracy: accuracy_sums[i] / n,
            })
            .collect();

        for cell in &cells {
            debug!(
                "folds={} k={} cv_precision={:.4} cv_accuracy={:.4}",
                cell.folds, cell.k, cell.cv_precision, cell.cv_accuracy
            );
        }

        let best = best_grid_entry(&cells, self.config.metric)
            .ok_or_else(|| ForgeError::invalid("k_range", "no candidate k was scored"))?;

        // Winner is refit on the whole training split, then scored once on validation
        let model = ResponseModel::fit(self.schema, &split.train, best.k)?;
        let metrics = evaluate(&model, &split.valid.features, &split.valid.labels)?;

        info!(
            "Currently on {} folds, with best k = {} (cv {} {:.4})",
            folds,
            best.k,
            self.config.metric,
            best.score(self.config.metric)
        );

        let trial = TrialRecord {
            folds,
            best_k: best.k,
            cv_score: best.score(self.config.metric),
            valid_accuracy: metrics.accuracy,
            valid_precision: metrics.macro_precision,
        };

        Ok((trial, cells))
    }
}
