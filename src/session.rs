//! Campaign session: feed, search, fit, predict and metrics in one owned object
//!
//! The session is the only holder of state between calls. Feeding new data
//! discards any search outcome and fitted model; a failed step leaves the
//! previous state as it was.

use std::ops::Range;

use log::info;
use polars::prelude::DataFrame;

use crate::config::SessionConfig;
use crate::data::{check_columns, HoldoutSplit, LabeledTable, FEATURE_COLUMNS};
use crate::error::{ForgeError, Result};
use crate::metrics::{evaluate, ValidationMetrics};
use crate::model::ResponseModel;
use crate::preprocess::FeatureSchema;
use crate::selection::{NeighborSelector, OptimizeMetric, SearchConfig, SearchOutcome};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// No training data yet
    Empty,
    /// Data fed, no model fitted
    Fed,
    /// Final model fitted on the full fed data
    Fitted,
}

#[derive(Debug, Clone)]
struct FedData {
    table: LabeledTable,
    schema: FeatureSchema,
    holdout: HoldoutSplit,
}

#[derive(Debug, Clone)]
pub struct CampaignSession {
    config: SessionConfig,
    fed: Option<FedData>,
    search: Option<SearchOutcome>,
    model: Option<ResponseModel>,
}

impl CampaignSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fed: None,
            search: None,
            model: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stage(&self) -> Stage {
        match (&self.fed, &self.model) {
            (None, _) => Stage::Empty,
            (Some(_), None) => Stage::Fed,
            (Some(_), Some(_)) => Stage::Fitted,
        }
    }

    /// Validate the training table, infer the feature schema and compute the
    /// stratified holdout split.
    ///
    /// # Errors
    /// * `Schema` if the response column or a feature column is absent
    pub fn feed_data(&mut self, table: &DataFrame) -> Result<()> {
        let labeled = LabeledTable::from_frame(table)?;
        let schema = FeatureSchema::infer(&labeled.features);
        let holdout = labeled.stratified_split(self.config.test_size, self.config.seed)?;

        info!(
            "Fed {} rows ({} numeric / {} categorical features): {} train, {} validation",
            labeled.len(),
            schema.numeric_columns().len(),
            schema.categorical_columns().len(),
            holdout.train.len(),
            holdout.valid.len()
        );

        self.fed = Some(FedData {
            table: labeled,
            schema,
            holdout,
        });
        self.search = None;
        self.model = None;
        Ok(())
    }

    /// Search over the given grid, keeping the configured split policy
    pub fn search_best_k(
        &mut self,
        k_range: Range<usize>,
        fold_range: Range<usize>,
        metric: OptimizeMetric,
    ) -> Result<usize> {
        let config = SearchConfig {
            k_range,
            fold_range,
            metric,
            split_policy: self.config.search.split_policy,
        };
        self.search_with(config)
    }

    /// Search over the grid from the session config
    pub fn search_configured(&mut self) -> Result<usize> {
        self.search_with(self.config.search.clone())
    }

    /// Run the neighbor-count search. A fitted model trained with another k is
    /// discarded on success.
    pub fn search_with(&mut self, config: SearchConfig) -> Result<usize> {
        let fed = self
            .fed
            .as_ref()
            .ok_or_else(|| ForgeError::NotReady("feed training data before searching".to_string()))?;

        let outcome = NeighborSelector::new(&fed.schema, config)
            .with_seed(self.config.seed)
            .with_test_size(self.config.test_size)
            .select(&fed.holdout, &fed.table)?;

        let best_k = outcome.best_k;
        if self.model.as_ref().map(ResponseModel::k) != Some(best_k) {
            self.model = None;
        }
        self.search = Some(outcome);
        Ok(best_k)
    }

    /// Neighbor count `fit` would use without an explicit k
    pub fn resolved_k(&self) -> Option<usize> {
        self.search
            .as_ref()
            .map(|outcome| outcome.best_k)
            .or(self.config.neighbors)
    }

    /// Train the final model on the full fed data.
    ///
    /// # Arguments
    /// * `k` - Explicit neighbor count; falls back to the searched k, then the
    ///   configured manual k
    ///
    /// # Returns
    /// * The neighbor count the model was trained with
    pub fn fit(&mut self, k: Option<usize>) -> Result<usize> {
        let fed = self
            .fed
            .as_ref()
            .ok_or_else(|| ForgeError::NotReady("feed training data before fitting".to_string()))?;
        let k = k.or_else(|| self.resolved_k()).ok_or(ForgeError::NotConfigured)?;

        let model = ResponseModel::fit(&fed.schema, &fed.table, k)?;
        self.model = Some(model);

        info!("Final model trained on all {} fed rows with k = {}", fed.table.len(), k);
        Ok(k)
    }

    /// Copy of `new_table` with a `Response` column of predictions.
    ///
    /// # Errors
    /// * `NotFitted` if `fit` has not succeeded since the last feed
    /// * `Schema` if a feature column is absent
    pub fn predict(&self, new_table: &DataFrame) -> Result<DataFrame> {
        let model = self.model.as_ref().ok_or(ForgeError::NotFitted)?;
        check_columns(new_table, &FEATURE_COLUMNS)?;

        let out = model.predict_frame(new_table)?;
        info!("Predicted responses for {} rows", out.height());
        Ok(out)
    }

    /// Validation metrics for the fitted k.
    ///
    /// A separate model with the same k is fit on the training split only and
    /// scored on the validation split. The final model stays trained on the
    /// full data.
    pub fn generate_metrics(&self) -> Result<ValidationMetrics> {
        let model = self.model.as_ref().ok_or(ForgeError::NotFitted)?;
        let fed = self.fed.as_ref().ok_or(ForgeError::NotFitted)?;

        let holdout_model = ResponseModel::fit(&fed.schema, &fed.holdout.train, model.k())?;
        let metrics = evaluate(&holdout_model, &fed.holdout.valid.features, &fed.holdout.valid.labels)?;

        info!(
            "Validation accuracy {:.4}, macro precision {:.4}",
            metrics.accuracy, metrics.macro_precision
        );
        Ok(metrics)
    }

    pub fn search_outcome(&self) -> Option<&SearchOutcome> {
        self.search.as_ref()
    }

    pub fn model(&self) -> Option<&ResponseModel> {
        self.model.as_ref()
    }

    pub fn holdout(&self) -> Option<&HoldoutSplit> {
        self.fed.as_ref().map(|fed| &fed.holdout)
    }
}
