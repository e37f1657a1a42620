//! ResponseForge: campaign response prediction with a K-Nearest-Neighbors classifier
//!
//! The neighbor count is chosen by a stratified cross-validated grid search over
//! (fold-count, k) pairs; the most common per-fold-count winner is used to train
//! the final model. A [`CampaignSession`] drives the feed, search, fit, predict
//! and metrics steps.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod report;
pub mod selection;
pub mod session;

// Re-export public items for easier access
pub use cli::Args;
pub use config::SessionConfig;
pub use data::{read_csv, write_csv, HoldoutSplit, LabeledTable, Response, FEATURE_COLUMNS, RESPONSE_COLUMN};
pub use error::{ForgeError, Result};
pub use metrics::{evaluate, ConfusionMatrix, ValidationMetrics};
pub use model::{KnnClassifier, ResponseModel};
pub use preprocess::{FeatureSchema, FeatureTransform};
pub use selection::{NeighborSelector, OptimizeMetric, SearchConfig, SearchOutcome, SplitPolicy};
pub use session::{CampaignSession, Stage};
