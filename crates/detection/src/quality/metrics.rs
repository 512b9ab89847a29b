//! Precision/recall computation for the detection quality loop.

use crate::pipeline::{DetectionResult, Predicted};
use serde::{Deserialize, Serialize};
use singura_core::Uuid;
use std::collections::HashMap;

/// Ground-truth label for one automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthLabel {
    pub automation_id: Uuid,
    pub malicious: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: u32,
    pub false_positives: u32,
    pub true_negatives: u32,
    pub false_negatives: u32,
}

/// Quality report over one labeled evaluation set. The false positive and
/// false negative lists carry the original records for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub false_positives: Vec<DetectionResult>,
    pub false_negatives: Vec<GroundTruthLabel>,
    pub sample_size: i32,
}

/// Evaluate a prediction set against ground truth.
///
/// Labeled-malicious automations with no prediction at all count as false
/// negatives. Predictions for unlabeled automations carry no ground truth
/// and are ignored. Zero-denominator cases yield 0, not NaN.
pub fn evaluate(predictions: &[DetectionResult], labels: &[GroundTruthLabel]) -> QualityReport {
    // Strongest prediction per automation.
    let mut predicted: HashMap<Uuid, &DetectionResult> = HashMap::new();
    for prediction in predictions {
        predicted
            .entry(prediction.automation_id)
            .and_modify(|existing| {
                if prediction.confidence > existing.confidence {
                    *existing = prediction;
                }
            })
            .or_insert(prediction);
    }

    let mut confusion = ConfusionMatrix::default();
    let mut false_positives = Vec::new();
    let mut false_negatives = Vec::new();

    for label in labels {
        let says_malicious = predicted
            .get(&label.automation_id)
            .map(|p| p.predicted == Predicted::Malicious)
            .unwrap_or(false);

        match (says_malicious, label.malicious) {
            (true, true) => confusion.true_positives += 1,
            (true, false) => {
                confusion.false_positives += 1;
                false_positives.push((*predicted.get(&label.automation_id).unwrap()).clone());
            }
            (false, true) => {
                confusion.false_negatives += 1;
                false_negatives.push(label.clone());
            }
            (false, false) => confusion.true_negatives += 1,
        }
    }

    let tp = confusion.true_positives as f64;
    let fp = confusion.false_positives as f64;
    let tn = confusion.true_negatives as f64;
    let fn_ = confusion.false_negatives as f64;
    let total = tp + fp + tn + fn_;

    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1 = if precision > 0.0 && recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let accuracy = if total > 0.0 { (tp + tn) / total } else { 0.0 };

    QualityReport {
        precision,
        recall,
        f1,
        accuracy,
        confusion_matrix: confusion,
        false_positives,
        false_negatives,
        sample_size: labels.len() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn prediction(automation_id: Uuid, malicious: bool, confidence: f64) -> DetectionResult {
        DetectionResult {
            automation_id,
            predicted: if malicious {
                Predicted::Malicious
            } else {
                Predicted::Legitimate
            },
            confidence,
            detector_name: "velocity".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_synthetic_hundred_sample_f1() {
        // 50 malicious, 50 benign. Detector predicts 46 of the malicious
        // plus 4 benign: precision 0.92, recall 0.92 -> f1 well over 0.9.
        let mut labels = Vec::new();
        let mut predictions = Vec::new();

        for i in 0..100 {
            let id = Uuid::new_v4();
            let malicious = i < 50;
            labels.push(GroundTruthLabel {
                automation_id: id,
                malicious,
            });

            if malicious && i < 46 {
                predictions.push(prediction(id, true, 0.9));
            }
            if !malicious && i >= 96 {
                predictions.push(prediction(id, true, 0.7));
            }
        }

        let report = evaluate(&predictions, &labels);
        assert_eq!(report.confusion_matrix.true_positives, 46);
        assert_eq!(report.confusion_matrix.false_positives, 4);
        assert_eq!(report.confusion_matrix.false_negatives, 4);
        assert_eq!(report.confusion_matrix.true_negatives, 46);
        assert!((report.precision - 0.92).abs() < 1e-9);
        assert!((report.recall - 0.92).abs() < 1e-9);
        assert!(report.f1 >= 0.9);
        assert_eq!(report.sample_size, 100);
    }

    #[test]
    fn test_high_precision_recall_yields_high_f1() {
        // precision 0.92, recall 0.95 must give f1 >= 0.93.
        let precision: f64 = 0.92;
        let recall: f64 = 0.95;
        let f1 = 2.0 * precision * recall / (precision + recall);
        assert!(f1 >= 0.93);
    }

    #[test]
    fn test_unpredicted_malicious_counts_as_false_negative() {
        let labeled = Uuid::new_v4();
        let labels = vec![GroundTruthLabel {
            automation_id: labeled,
            malicious: true,
        }];

        let report = evaluate(&[], &labels);
        assert_eq!(report.confusion_matrix.false_negatives, 1);
        assert_eq!(report.false_negatives.len(), 1);
        assert_eq!(report.recall, 0.0);
        assert_eq!(report.f1, 0.0);
    }

    #[test]
    fn test_no_positive_predictions_zero_precision() {
        let id = Uuid::new_v4();
        let labels = vec![GroundTruthLabel {
            automation_id: id,
            malicious: false,
        }];
        let predictions = vec![prediction(id, false, 0.4)];

        let report = evaluate(&predictions, &labels);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.confusion_matrix.true_negatives, 1);
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn test_false_positive_records_preserved() {
        let benign = Uuid::new_v4();
        let labels = vec![GroundTruthLabel {
            automation_id: benign,
            malicious: false,
        }];
        let predictions = vec![prediction(benign, true, 0.8)];

        let report = evaluate(&predictions, &labels);
        assert_eq!(report.false_positives.len(), 1);
        assert_eq!(report.false_positives[0].automation_id, benign);
    }

    #[test]
    fn test_strongest_prediction_wins() {
        let id = Uuid::new_v4();
        let labels = vec![GroundTruthLabel {
            automation_id: id,
            malicious: true,
        }];
        // A weak legitimate call and a strong malicious call for the same
        // automation: the stronger one decides.
        let predictions = vec![prediction(id, false, 0.3), prediction(id, true, 0.9)];

        let report = evaluate(&predictions, &labels);
        assert_eq!(report.confusion_matrix.true_positives, 1);
    }
}
