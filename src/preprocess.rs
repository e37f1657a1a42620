//! Feature preprocessing: standardized numeric columns and one-hot categorical columns
//!
//! A [`FeatureSchema`] is inferred once from the declared dtypes of the training
//! table. Fitting the schema on a table learns the column statistics and yields a
//! [`FeatureTransform`], which is immutable and maps any table with the same
//! columns onto a dense `Array2<f64>`.

use std::collections::BTreeSet;

use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::check_columns;
use crate::error::{ForgeError, Result};

/// How a feature column is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Integer or floating point dtype, standardized
    Numeric,
    /// Anything else, one-hot encoded
    Categorical,
}

impl ColumnKind {
    /// Classify a column by its declared dtype only
    pub fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64 => ColumnKind::Numeric,
            _ => ColumnKind::Categorical,
        }
    }
}

/// Column partition inferred from a training table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<(String, ColumnKind)>,
}

impl FeatureSchema {
    /// Partition the columns of `features` (label already removed) by dtype
    pub fn infer(features: &DataFrame) -> Self {
        let columns = features
            .get_columns()
            .iter()
            .map(|column| (column.name().to_string(), ColumnKind::of(column.dtype())))
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[(String, ColumnKind)] {
        &self.columns
    }

    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Numeric)
    }

    pub fn categorical_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Categorical)
    }

    fn columns_of(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Learn column statistics from `table`.
    ///
    /// Numeric columns come first in the output layout, followed by one
    /// indicator block per categorical column.
    ///
    /// # Errors
    /// * `Schema` if a schema column is absent, a numeric column holds nulls
    ///   or cannot be read as numbers, or the table is empty
    pub fn fit(&self, table: &DataFrame) -> Result<FeatureTransform> {
        let names: Vec<&str> = self.columns.iter().map(|(name, _)| name.as_str()).collect();
        check_columns(table, &names)?;

        if table.height() == 0 {
            return Err(ForgeError::schema("cannot fit feature transform on an empty table"));
        }

        let mut encoders = Vec::with_capacity(self.columns.len());

        for name in self.numeric_columns() {
            let values = numeric_values(table, name)?;
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            encoders.push(ColumnEncoder::Standardize {
                name: name.to_string(),
                mean,
                std,
            });
        }

        for name in self.categorical_columns() {
            let categories: BTreeSet<String> =
                text_values(table, name)?.into_iter().flatten().collect();
            encoders.push(ColumnEncoder::OneHot {
                name: name.to_string(),
                categories: categories.into_iter().collect(),
            });
        }

        Ok(FeatureTransform::new(encoders))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ColumnEncoder {
    Standardize { name: String, mean: f64, std: f64 },
    OneHot { name: String, categories: Vec<String> },
}

impl ColumnEncoder {
    fn name(&self) -> &str {
        match self {
            ColumnEncoder::Standardize { name, .. } | ColumnEncoder::OneHot { name, .. } => name,
        }
    }

    fn width(&self) -> usize {
        match self {
            ColumnEncoder::Standardize { .. } => 1,
            ColumnEncoder::OneHot { categories, .. } => categories.len(),
        }
    }
}

/// Fitted column transform. Never refit by `transform`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransform {
    encoders: Vec<ColumnEncoder>,
    n_outputs: usize,
}

impl FeatureTransform {
    fn new(encoders: Vec<ColumnEncoder>) -> Self {
        let n_outputs = encoders.iter().map(ColumnEncoder::width).sum();
        Self { encoders, n_outputs }
    }

    /// Width of the encoded feature space
    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    /// Names of the encoded columns, `column=category` for indicators
    pub fn output_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_outputs);
        for encoder in &self.encoders {
            match encoder {
                ColumnEncoder::Standardize { name, .. } => names.push(name.clone()),
                ColumnEncoder::OneHot { name, categories } => {
                    names.extend(categories.iter().map(|c| format!("{}={}", name, c)))
                }
            }
        }
        names
    }

    /// Encode `table` with the fitted statistics.
    ///
    /// Constant numeric columns map to 0. Categories not seen at fit time, and
    /// missing categorical values, map to an all-zero indicator block.
    ///
    /// # Errors
    /// * `Schema` if a fitted column is absent or malformed
    pub fn transform(&self, table: &DataFrame) -> Result<Array2<f64>> {
        let names: Vec<&str> = self.encoders.iter().map(ColumnEncoder::name).collect();
        check_columns(table, &names)?;

        let mut out = Array2::<f64>::zeros((table.height(), self.n_outputs));
        let mut offset = 0;

        for encoder in &self.encoders {
            match encoder {
                ColumnEncoder::Standardize { name, mean, std } => {
                    let values = numeric_values(table, name)?;
                    for (row, value) in values.into_iter().enumerate() {
                        out[[row, offset]] = if *std > 0.0 { (value - mean) / std } else { 0.0 };
                    }
                }
                ColumnEncoder::OneHot { name, categories } => {
                    let values = text_values(table, name)?;
                    for (row, value) in values.iter().enumerate() {
                        let hit = value
                            .as_ref()
                            .and_then(|v| categories.binary_search(v).ok());
                        if let Some(pos) = hit {
                            out[[row, offset + pos]] = 1.0;
                        }
                    }
                }
            }
            offset += encoder.width();
        }

        Ok(out)
    }
}

fn numeric_values(table: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = table
        .column(name)
        .map_err(|_| ForgeError::schema(format!("missing required columns: {}", name)))?;
    let as_float = column.cast(&DataType::Float64).map_err(|e| {
        ForgeError::schema(format!("column '{}' is not numeric: {}", name, e))
    })?;

    as_float
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.ok_or_else(|| {
                ForgeError::schema(format!("column '{}' row {}: missing or non-numeric value", name, row))
            })
        })
        .collect()
}

fn text_values(table: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = table
        .column(name)
        .map_err(|_| ForgeError::schema(format!("missing required columns: {}", name)))?;
    let as_text = column.cast(&DataType::String).map_err(|e| {
        ForgeError::schema(format!("column '{}' cannot be read as text: {}", name, e))
    })?;

    Ok(as_text
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}
