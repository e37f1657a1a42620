//! K-Nearest-Neighbors classifier and the fitted response model

use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour};
use log::info;
use ndarray::{Array2, ArrayView2};
use polars::prelude::*;

use crate::data::{LabeledTable, Response, RESPONSE_COLUMN};
use crate::error::{ForgeError, Result};
use crate::preprocess::{FeatureSchema, FeatureTransform};

#[derive(Debug, Clone)]
struct TrainedPoints {
    points: Array2<f64>,
    labels: Vec<Response>,
}

/// Distance-based majority-vote classifier over the encoded feature space
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    k: usize,
    trained: Option<TrainedPoints>,
}

impl KnnClassifier {
    /// Create an unfitted classifier consulting `k` neighbors
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(ForgeError::invalid("k", "number of neighbors must be at least 1"));
        }
        Ok(Self { k, trained: None })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn is_fitted(&self) -> bool {
        self.trained.is_some()
    }

    /// Store the training vectors. Replaces any previous training state.
    pub fn fit(&mut self, x: Array2<f64>, y: &[Response]) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(ForgeError::invalid(
                "y",
                format!("{} labels for {} training rows", y.len(), x.nrows()),
            ));
        }
        if x.nrows() == 0 {
            return Err(ForgeError::invalid("x", "cannot fit on an empty matrix"));
        }

        self.trained = Some(TrainedPoints {
            points: x,
            labels: y.to_vec(),
        });
        Ok(())
    }

    /// Predict one label per row of `x` using the configured `k`
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Vec<Response>> {
        self.predict_with_k(x, self.k)
    }

    /// Predict with an explicit neighbor count against the same training state.
    ///
    /// Majority vote among the `k` nearest training vectors under Euclidean
    /// distance; a tied vote takes the label of the single nearest neighbor.
    pub(crate) fn predict_with_k(&self, x: ArrayView2<'_, f64>, k: usize) -> Result<Vec<Response>> {
        let trained = self.trained.as_ref().ok_or(ForgeError::NotFitted)?;

        if x.ncols() != trained.points.ncols() {
            return Err(ForgeError::schema(format!(
                "feature dimension mismatch: expected {}, got {}",
                trained.points.ncols(),
                x.ncols()
            )));
        }

        let index = CommonNearestNeighbour::LinearSearch.from_batch(&trained.points, L2Dist)?;
        let k = k.min(trained.points.nrows());

        x.outer_iter()
            .map(|row| -> Result<Response> {
                // Neighbours come back ordered by ascending distance
                let neighbours = index.k_nearest(row, k)?;
                let nearest = neighbours
                    .first()
                    .map(|(_, idx)| trained.labels[*idx])
                    .ok_or_else(|| ForgeError::NearestNeighbour("query returned no neighbours".to_string()))?;

                let mut votes = [0usize; 2];
                for (_, idx) in &neighbours {
                    votes[trained.labels[*idx].index()] += 1;
                }

                let label = match votes[0].cmp(&votes[1]) {
                    std::cmp::Ordering::Greater => Response::Yes,
                    std::cmp::Ordering::Less => Response::No,
                    std::cmp::Ordering::Equal => nearest,
                };
                Ok(label)
            })
            .collect()
    }
}

/// Feature transform and classifier fitted together on the same rows.
///
/// `predict` always applies the transform learned at fit time.
#[derive(Debug, Clone)]
pub struct ResponseModel {
    transform: FeatureTransform,
    classifier: KnnClassifier,
}

impl ResponseModel {
    /// Fit the transform and the classifier on `table`.
    ///
    /// # Arguments
    /// * `schema` - Column partition inferred when the data was fed
    /// * `table` - Training rows and labels
    /// * `k` - Number of neighbors
    pub fn fit(schema: &FeatureSchema, table: &LabeledTable, k: usize) -> Result<Self> {
        let mut classifier = KnnClassifier::new(k)?;
        let transform = schema.fit(&table.features)?;
        let x = transform.transform(&table.features)?;
        classifier.fit(x, &table.labels)?;

        info!("Fitted {}-NN model on {} rows", k, table.len());

        Ok(Self {
            transform,
            classifier,
        })
    }

    pub fn k(&self) -> usize {
        self.classifier.k()
    }

    pub fn transform(&self) -> &FeatureTransform {
        &self.transform
    }

    /// Predict one label per row of `features`
    pub fn predict_labels(&self, features: &DataFrame) -> Result<Vec<Response>> {
        let x = self.transform.transform(features)?;
        self.classifier.predict(x.view())
    }

    /// Copy of `table` with a `Response` column of predictions appended
    /// (replacing any existing one).
    pub fn predict_frame(&self, table: &DataFrame) -> Result<DataFrame> {
        let labels = self.predict_labels(table)?;
        let values: Vec<&str> = labels.iter().map(|l| l.as_str()).collect();

        let mut out = table.clone();
        out.with_column(Series::new(RESPONSE_COLUMN.into(), values))?;
        Ok(out)
    }
}
