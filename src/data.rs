//! Campaign table schema, response labels and the stratified holdout split

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

use log::debug;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// Name of the binary label column
pub const RESPONSE_COLUMN: &str = "Response";

/// Feature columns every campaign table must carry
pub const FEATURE_COLUMNS: [&str; 10] = [
    "Age",
    "Gender",
    "Region",
    "Email",
    "Mobile-Usage",
    "Logins-4wk",
    "Logins-6mo",
    "Purchases-4wk",
    "Purchases-6mo",
    "Total-Purchases",
];

/// Campaign response label. Declaration order is the ordered label set `{yes, no}`
/// used for the confusion matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Yes,
    No,
}

impl Response {
    pub const ALL: [Response; 2] = [Response::Yes, Response::No];

    /// Row/column position in the confusion matrix
    pub fn index(self) -> usize {
        match self {
            Response::Yes => 0,
            Response::No => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Response::Yes => "yes",
            Response::No => "no",
        }
    }

    /// Parse a raw cell value, case-insensitive
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Some(Response::Yes),
            "no" | "n" | "false" | "0" => Some(Response::No),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Fail with a schema error naming every column of `required` absent from `df`
pub fn check_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| df.column(name).is_err())
        .collect();

    if !missing.is_empty() {
        return Err(ForgeError::schema(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

/// Select rows of `df` by position
pub(crate) fn take_rows(df: &DataFrame, indices: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec(
        "idx".into(),
        indices.iter().map(|&i| i as IdxSize).collect(),
    );
    Ok(df.take(&idx)?)
}

/// Feature columns of a campaign table paired with the parsed response labels
#[derive(Debug, Clone)]
pub struct LabeledTable {
    /// The ten feature columns, in [`FEATURE_COLUMNS`] order
    pub features: DataFrame,
    /// One label per row of `features`
    pub labels: Vec<Response>,
}

impl LabeledTable {
    /// Validate a raw training table and split off its label column.
    ///
    /// # Errors
    /// * `Schema` when the response column or any feature column is absent,
    ///   when the table is empty, or when a label is null or unrecognised
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let response = df.column(RESPONSE_COLUMN).map_err(|_| {
            ForgeError::schema(format!("response column '{}' is absent", RESPONSE_COLUMN))
        })?;
        check_columns(df, &FEATURE_COLUMNS)?;

        if df.height() == 0 {
            return Err(ForgeError::schema("training table has no rows"));
        }

        let labels = parse_labels(response)?;
        let features = df.select(FEATURE_COLUMNS)?;

        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Row positions grouped by label, each group in ascending row order
    pub fn class_indices(&self) -> BTreeMap<Response, Vec<usize>> {
        let mut groups: BTreeMap<Response, Vec<usize>> = BTreeMap::new();
        for (i, &label) in self.labels.iter().enumerate() {
            groups.entry(label).or_default().push(i);
        }
        groups
    }

    /// Number of rows per label
    pub fn class_counts(&self) -> BTreeMap<Response, usize> {
        self.class_indices()
            .into_iter()
            .map(|(label, rows)| (label, rows.len()))
            .collect()
    }

    /// Subset of rows by position; the table itself is left untouched
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        Ok(Self {
            features: take_rows(&self.features, indices)?,
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        })
    }

    /// Stratified train/validation split.
    ///
    /// # Arguments
    /// * `test_size` - Fraction of each class moved to validation, in (0, 1)
    /// * `seed` - Seed for the per-class shuffle
    ///
    /// # Returns
    /// * `HoldoutSplit` whose partitions keep the original row order
    pub fn stratified_split(&self, test_size: f64, seed: u64) -> Result<HoldoutSplit> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(ForgeError::invalid(
                "test_size",
                format!("must be in (0, 1), got {}", test_size),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train_idx = Vec::with_capacity(self.len());
        let mut valid_idx = Vec::new();

        for (label, mut rows) in self.class_indices() {
            rows.shuffle(&mut rng);

            // Keep at least one row of every class in training
            let n_valid = ((rows.len() as f64) * test_size).round() as usize;
            let n_valid = n_valid.min(rows.len().saturating_sub(1));

            debug!(
                "holdout split: class {} -> {} train / {} validation",
                label,
                rows.len() - n_valid,
                n_valid
            );

            valid_idx.extend_from_slice(&rows[..n_valid]);
            train_idx.extend_from_slice(&rows[n_valid..]);
        }

        if valid_idx.is_empty() {
            return Err(ForgeError::invalid(
                "test_size",
                format!(
                    "{} leaves no validation rows for {} rows; raise test_size or feed more data",
                    test_size,
                    self.len()
                ),
            ));
        }

        train_idx.sort_unstable();
        valid_idx.sort_unstable();

        Ok(HoldoutSplit {
            train: self.take(&train_idx)?,
            valid: self.take(&valid_idx)?,
        })
    }
}

/// Fixed train/validation partition of the fed data
#[derive(Debug, Clone)]
pub struct HoldoutSplit {
    pub train: LabeledTable,
    pub valid: LabeledTable,
}

fn parse_labels(column: &Column) -> Result<Vec<Response>> {
    let as_text = column
        .cast(&DataType::String)
        .map_err(|e| ForgeError::schema(format!("response column is not text-like: {}", e)))?;

    as_text
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(raw) => Response::parse(raw).ok_or_else(|| {
                ForgeError::schema(format!("row {}: unrecognised response value '{}'", row, raw))
            }),
            None => Err(ForgeError::schema(format!("row {}: response is missing", row))),
        })
        .collect()
}

/// Load a CSV table with a header row
pub fn read_csv(path: impl AsRef<Path>) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Write a table as CSV with a header row
pub fn write_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// In-memory campaign tables shared by the unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Balanced table of `n` rows where responders buy and log in more often.
    /// Even rows answer "yes", odd rows "no".
    pub fn campaign_frame(n: usize) -> DataFrame {
        let genders = ["Male", "Female"];
        let regions = ["North", "South", "East", "West"];
        let usage = ["Low", "Medium", "High"];

        let mut age = Vec::with_capacity(n);
        let mut gender = Vec::with_capacity(n);
        let mut region = Vec::with_capacity(n);
        let mut email = Vec::with_capacity(n);
        let mut mobile = Vec::with_capacity(n);
        let mut logins_4wk = Vec::with_capacity(n);
        let mut logins_6mo = Vec::with_capacity(n);
        let mut purchases_4wk = Vec::with_capacity(n);
        let mut purchases_6mo = Vec::with_capacity(n);
        let mut total = Vec::with_capacity(n);
        let mut response = Vec::with_capacity(n);

        for i in 0..n {
            let yes = i % 2 == 0;
            let jitter = (i % 5) as i64;
            age.push(22 + ((i * 7) % 45) as i64);
            gender.push(genders[(i / 2) % 2]);
            region.push(regions[(i / 3) % 4]);
            email.push(if yes || i % 7 == 0 { "Yes" } else { "No" });
            mobile.push(usage[(i + usize::from(yes)) % 3]);
            logins_4wk.push(if yes { 8 + jitter } else { 1 + jitter % 3 });
            logins_6mo.push(if yes { 40 + 2 * jitter } else { 6 + jitter });
            purchases_4wk.push(if yes { 4 + jitter % 3 } else { jitter % 2 });
            purchases_6mo.push(if yes { 15 + jitter } else { 2 + jitter % 3 });
            total.push(if yes { 120.0 + 10.0 * jitter as f64 } else { 20.0 + 3.0 * jitter as f64 });
            response.push(if yes { "yes" } else { "no" });
        }

        DataFrame::new(vec![
            Series::new("Age".into(), age).into(),
            Series::new("Gender".into(), gender).into(),
            Series::new("Region".into(), region).into(),
            Series::new("Email".into(), email).into(),
            Series::new("Mobile-Usage".into(), mobile).into(),
            Series::new("Logins-4wk".into(), logins_4wk).into(),
            Series::new("Logins-6mo".into(), logins_6mo).into(),
            Series::new("Purchases-4wk".into(), purchases_4wk).into(),
            Series::new("Purchases-6mo".into(), purchases_6mo).into(),
            Series::new("Total-Purchases".into(), total).into(),
            Series::new(RESPONSE_COLUMN.into(), response).into(),
        ])
        .unwrap()
    }
}
