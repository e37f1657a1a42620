//! Command-line interface definitions and argument parsing

use std::ops::Range;

use anyhow::Context;
use clap::Parser;

use crate::config::SessionConfig;
use crate::selection::{OptimizeMetric, SplitPolicy};

/// Campaign response prediction with a cross-validated K-Nearest-Neighbors model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the past-campaign CSV file (must include a Response column)
    #[arg(short, long, default_value = "past_campaign.csv")]
    pub train: String,

    /// Path to a new-campaign CSV file to predict
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Output path for the predictions CSV
    #[arg(short, long, default_value = "predictions.csv")]
    pub output: String,

    /// Train with this number of neighbors instead of searching
    #[arg(short = 'k', long)]
    pub neighbors: Option<usize>,

    /// Inclusive range of neighbor counts to search, e.g. "2-15"
    #[arg(long)]
    pub k_range: Option<String>,

    /// Inclusive range of fold-counts to search, e.g. "2-7"
    #[arg(long)]
    pub folds: Option<String>,

    /// Metric to optimize: precision (macro) or accuracy
    #[arg(long)]
    pub metric: Option<String>,

    /// Split policy for the search: fixed or fresh
    #[arg(long)]
    pub split_policy: Option<String>,

    /// Fraction of the training data held out for validation
    #[arg(long)]
    pub test_size: Option<f64>,

    /// Seed for the holdout split and fold assignment
    #[arg(long)]
    pub seed: Option<u64>,

    /// JSON session config; flags override its fields
    #[arg(long)]
    pub config: Option<String>,

    /// Write validation metrics as JSON to this path
    #[arg(long)]
    pub metrics_json: Option<String>,

    /// Column used for the prediction breakdown
    #[arg(long, default_value = "Gender")]
    pub breakdown: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse an inclusive "min-max" range into a half-open `Range`
    pub fn parse_inclusive_range(raw: &str) -> anyhow::Result<Range<usize>> {
        let parts: Vec<&str> = raw.split('-').collect();
        if parts.len() != 2 {
            anyhow::bail!("Range must be in format 'min-max', got '{}'", raw);
        }

        let min: usize = parts[0]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid range start: {}", parts[0]))?;
        let max: usize = parts[1]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid range end: {}", parts[1]))?;

        if min > max {
            anyhow::bail!("Range start {} is greater than end {}", min, max);
        }

        Ok(min..max + 1)
    }

    /// Build the session config: defaults, then the config file, then flags
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from {}", path))?,
            None => SessionConfig::default(),
        };

        if let Some(k) = self.neighbors {
            config.neighbors = Some(k);
        }
        if let Some(raw) = &self.k_range {
            config.search.k_range = Self::parse_inclusive_range(raw)?;
        }
        if let Some(raw) = &self.folds {
            config.search.fold_range = Self::parse_inclusive_range(raw)?;
        }
        if let Some(raw) = &self.metric {
            config.search.metric = raw.parse::<OptimizeMetric>()?;
        }
        if let Some(raw) = &self.split_policy {
            config.search.split_policy = raw.parse::<SplitPolicy>()?;
        }
        if let Some(test_size) = self.test_size {
            config.test_size = test_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["responseforge", "--train", "past.csv"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_parse_inclusive_range() {
        assert_eq!(Args::parse_inclusive_range("2-15").unwrap(), 2..16);
        assert_eq!(Args::parse_inclusive_range(" 3 - 3 ").unwrap(), 3..4);
        assert!(Args::parse_inclusive_range("5-2").is_err());
        assert!(Args::parse_inclusive_range("invalid").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = args(&["--k-range", "1-20", "--folds", "2-5", "--metric", "accuracy", "--seed", "9"])
            .session_config()
            .unwrap();

        assert_eq!(config.search.k_range, 1..21);
        assert_eq!(config.search.fold_range, 2..6);
        assert_eq!(config.search.metric, OptimizeMetric::Accuracy);
        assert_eq!(config.seed, 9);
        assert_eq!(config.neighbors, None);
    }

    #[test]
    fn test_manual_neighbors() {
        let config = args(&["-k", "7"]).session_config().unwrap();
        assert_eq!(config.neighbors, Some(7));
    }

    #[test]
    fn test_invalid_flags() {
        assert!(args(&["--metric", "recall"]).session_config().is_err());
        assert!(args(&["--test-size", "1.5"]).session_config().is_err());
        assert!(args(&["--folds", "1-3"]).session_config().is_err());
    }
}
