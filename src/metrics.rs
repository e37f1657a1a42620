//! Validation metrics: confusion matrix, accuracy and per-class precision/accuracy
//!
//! Per-class "accuracy" is the true positive rate of that class
//! (true positives / actual instances), i.e. recall under an accuracy label.

use std::collections::BTreeMap;
use std::fmt;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::data::Response;
use crate::error::{ForgeError, Result};
use crate::model::ResponseModel;

/// 2x2 count matrix over the ordered label set {yes, no}.
/// Rows are actual labels, columns are predicted labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    /// Count (actual, predicted) pairs
    pub fn from_labels(actual: &[Response], predicted: &[Response]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(ForgeError::invalid(
                "predicted",
                format!("{} predictions for {} labels", predicted.len(), actual.len()),
            ));
        }

        let mut counts = [[0usize; 2]; 2];
        for (a, p) in actual.iter().zip(predicted) {
            counts[a.index()][p.index()] += 1;
        }
        Ok(Self { counts })
    }

    pub fn get(&self, actual: Response, predicted: Response) -> usize {
        self.counts[actual.index()][predicted.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Instances whose actual label is `class`
    pub fn support(&self, class: Response) -> usize {
        self.counts[class.index()].iter().sum()
    }

    /// Instances predicted as `class`
    pub fn predicted(&self, class: Response) -> usize {
        self.counts.iter().map(|row| row[class.index()]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let correct: usize = Response::ALL.iter().map(|&c| self.get(c, c)).sum();
        ratio(correct, self.total())
    }

    /// Precision of `class`, 0 when nothing was predicted as `class`
    pub fn precision(&self, class: Response) -> f64 {
        ratio(self.get(class, class), self.predicted(class))
    }

    /// True positive rate of `class`, 0 when `class` has no instances
    pub fn recall(&self, class: Response) -> f64 {
        ratio(self.get(class, class), self.support(class))
    }

    /// Complement of `recall` for classes with instances
    pub fn false_negative_rate(&self, class: Response) -> f64 {
        let support = self.support(class);
        ratio(support - self.get(class, class), support)
    }

    /// Unweighted mean of the per-class precisions over the labels that occur
    /// as actual or predicted values; 0 for an empty matrix
    pub fn macro_precision(&self) -> f64 {
        let present: Vec<Response> = Response::ALL
            .into_iter()
            .filter(|&c| self.support(c) > 0 || self.predicted(c) > 0)
            .collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().map(|&c| self.precision(c)).sum::<f64>() / present.len() as f64
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Precision and (recall-style) accuracy for one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub accuracy: f64,
}

/// Snapshot of the model's performance on the validation split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub accuracy: f64,
    pub macro_precision: f64,
    pub yes: ClassMetrics,
    pub no: ClassMetrics,
    pub confusion_matrix: ConfusionMatrix,
}

impl ValidationMetrics {
    pub fn from_confusion(confusion_matrix: ConfusionMatrix) -> Self {
        let class = |c: Response| ClassMetrics {
            precision: confusion_matrix.precision(c),
            accuracy: confusion_matrix.recall(c),
        };

        Self {
            accuracy: confusion_matrix.accuracy(),
            macro_precision: confusion_matrix.macro_precision(),
            yes: class(Response::Yes),
            no: class(Response::No),
            confusion_matrix,
        }
    }

    pub fn class(&self, class: Response) -> &ClassMetrics {
        match class {
            Response::Yes => &self.yes,
            Response::No => &self.no,
        }
    }

    /// The six scalar metrics keyed by stable names
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("accuracy", self.accuracy),
            ("macro_precision", self.macro_precision),
            ("yes_precision", self.yes.precision),
            ("yes_accuracy", self.yes.accuracy),
            ("no_precision", self.no.precision),
            ("no_accuracy", self.no.accuracy),
        ])
    }
}

impl fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Validation Metrics ({} rows)", self.confusion_matrix.total())?;
        writeln!(f, "  Accuracy:          {:.4}", self.accuracy)?;
        writeln!(f, "  Precision (macro): {:.4}", self.macro_precision)?;
        for class in Response::ALL {
            let m = self.class(class);
            writeln!(
                f,
                "  {:<3} precision: {:.4}  accuracy: {:.4}",
                class, m.precision, m.accuracy
            )?;
        }
        writeln!(f, "  Confusion matrix (rows actual, columns predicted):")?;
        writeln!(f, "           yes    no")?;
        for actual in Response::ALL {
            writeln!(
                f,
                "    {:<4} {:>5} {:>5}",
                actual,
                self.confusion_matrix.get(actual, Response::Yes),
                self.confusion_matrix.get(actual, Response::No)
            )?;
        }
        Ok(())
    }
}

/// Evaluate a fitted model on held-out rows.
///
/// # Arguments
/// * `model` - Model fitted on the training split only
/// * `x_valid` - Validation feature table
/// * `y_valid` - Validation labels
pub fn evaluate(model: &ResponseModel, x_valid: &DataFrame, y_valid: &[Response]) -> Result<ValidationMetrics> {
    let predicted = model.predict_labels(x_valid)?;
    let confusion = ConfusionMatrix::from_labels(y_valid, &predicted)?;
    Ok(ValidationMetrics::from_confusion(confusion))
}

#[cfg(test)]
mod tests {
    use super::*;
    use Response::{No, Yes};

    fn sample_matrix() -> ConfusionMatrix {
        // actual:    yes yes yes yes no no no no no no
        // predicted: yes yes yes no  no no no no yes yes
        let actual = [Yes, Yes, Yes, Yes, No, No, No, No, No, No];
        let predicted = [Yes, Yes, Yes, No, No, No, No, No, Yes, Yes];
        ConfusionMatrix::from_labels(&actual, &predicted).unwrap()
    }

    #[test]
    fn test_confusion_counts() {
        let cm = sample_matrix();
        assert_eq!(cm.counts, [[3, 1], [2, 4]]);
        assert_eq!(cm.total(), 10);
    }

    #[test]
    fn test_accuracy_and_precision() {
        let cm = sample_matrix();
        assert!((cm.accuracy() - 0.7).abs() < 1e-12);
        assert!((cm.precision(Yes) - 0.6).abs() < 1e-12);
        assert!((cm.precision(No) - 0.8).abs() < 1e-12);
        assert!((cm.macro_precision() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_class_accuracy_is_recall() {
        let metrics = ValidationMetrics::from_confusion(sample_matrix());
        assert!((metrics.yes.accuracy - 0.75).abs() < 1e-12);
        assert!((metrics.no.accuracy - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_recall_and_false_negative_rate_sum_to_one() {
        let cm = sample_matrix();
        for class in Response::ALL {
            assert!((cm.recall(class) + cm.false_negative_rate(class) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_division_is_zero() {
        let cm = ConfusionMatrix::from_labels(&[Yes, Yes], &[Yes, Yes]).unwrap();
        assert_eq!(cm.precision(No), 0.0);
        assert_eq!(cm.recall(No), 0.0);
        // Only "yes" occurs, so the macro average covers it alone
        assert!((cm.macro_precision() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_macro_precision_counts_predicted_only_labels() {
        // "no" never occurs as actual but is predicted once: precision 0
        let cm = ConfusionMatrix::from_labels(&[Yes, Yes], &[Yes, No]).unwrap();
        assert!((cm.macro_precision() - 0.5).abs() < 1e-12);
        assert_eq!(ConfusionMatrix::default().macro_precision(), 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(ConfusionMatrix::from_labels(&[Yes], &[Yes, No]).is_err());
    }

    #[test]
    fn test_metric_map_and_json() {
        let metrics = ValidationMetrics::from_confusion(sample_matrix());
        let map = metrics.to_map();
        assert_eq!(map.len(), 6);
        assert!((map["yes_precision"] - 0.6).abs() < 1e-12);

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["confusion_matrix"]["counts"][1][0], 2);
    }

    #[test]
    fn test_report_text() {
        let report = ValidationMetrics::from_confusion(sample_matrix()).to_string();
        assert!(report.contains("Accuracy:          0.7000"));
        assert!(report.contains("yes precision: 0.6000"));
    }
}
