//! Binary classification metrics over a finished batch.

use std::fmt;

use crate::error::{Error, Result};
use crate::label::Label;

/// Counts indexed by `[true label][predicted label]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn new(truth: &[Label], predicted: &[Label]) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(Error::Metrics(format!(
                "{} true labels but {} predictions",
                truth.len(),
                predicted.len()
            )));
        }

        let mut counts = [[0; 2]; 2];
        for (t, p) in truth.iter().zip(predicted) {
            counts[t.index()][p.index()] += 1;
        }
        Ok(ConfusionMatrix { counts })
    }

    pub fn count(&self, truth: Label, predicted: Label) -> usize {
        self.counts[truth.index()][predicted.index()]
    }

    /// Number of samples whose true label is `label`.
    pub fn support(&self, label: Label) -> usize {
        self.counts[label.index()].iter().sum()
    }

    /// Number of samples predicted as `label`.
    pub fn predicted(&self, label: Label) -> usize {
        self.counts.iter().map(|row| row[label.index()]).sum()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn max(&self) -> usize {
        self.counts.iter().flatten().copied().max().unwrap_or(0)
    }

    pub fn correct(&self) -> usize {
        Label::ALL.iter().map(|&l| self.count(l, l)).sum()
    }

    /// Whether both classes occur among the true labels.
    pub fn has_both_classes(&self) -> bool {
        Label::ALL.iter().all(|&l| self.support(l) > 0)
    }
}

/// Receiver operating characteristic, points ordered by decreasing
/// threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
}

impl RocCurve {
    /// Points where the threshold crosses a distinct score, with collinear
    /// intermediate points dropped.
    ///
    /// Fails unless both classes are present in `truth`.
    pub fn compute(truth: &[Label], scores: &[f32]) -> Result<Self> {
        if truth.len() != scores.len() {
            return Err(Error::Metrics(format!(
                "{} true labels but {} scores",
                truth.len(),
                scores.len()
            )));
        }
        for label in &Label::ALL {
            if !truth.contains(label) {
                return Err(Error::Metrics(format!(
                    "ROC curve is undefined without any '{}' sample",
                    label
                )));
            }
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut tps = Vec::new();
        let mut fps = Vec::new();
        let mut thresholds = Vec::new();
        let (mut tp, mut fp) = (0usize, 0usize);
        for (i, &idx) in order.iter().enumerate() {
            if truth[idx].is_positive() {
                tp += 1;
            } else {
                fp += 1;
            }
            let last_of_score = order
                .get(i + 1)
                .map(|&next| scores[next] != scores[idx])
                .unwrap_or(true);
            if last_of_score {
                tps.push(tp);
                fps.push(fp);
                thresholds.push(scores[idx] as f64);
            }
        }

        if tps.len() > 2 {
            let mut keep = vec![0];
            for i in 1..tps.len() - 1 {
                let bend = |v: &[usize]| v[i - 1] + v[i + 1] != 2 * v[i];
                if bend(&fps) || bend(&tps) {
                    keep.push(i);
                }
            }
            keep.push(tps.len() - 1);
            tps = keep.iter().map(|&i| tps[i]).collect();
            fps = keep.iter().map(|&i| fps[i]).collect();
            thresholds = keep.iter().map(|&i| thresholds[i]).collect();
        }

        let positives = tp as f64;
        let negatives = fp as f64;
        let mut curve = RocCurve {
            fpr: vec![0.0],
            tpr: vec![0.0],
            thresholds: vec![f64::INFINITY],
        };
        for ((t, f), threshold) in tps.into_iter().zip(fps).zip(thresholds) {
            curve.tpr.push(t as f64 / positives);
            curve.fpr.push(f as f64 / negatives);
            curve.thresholds.push(threshold);
        }

        Ok(curve)
    }

    pub fn auc(&self) -> f64 {
        auc(&self.fpr, &self.tpr)
    }
}

/// Area under a curve given by non-decreasing `x`, trapezoidal rule.
pub fn auc(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision/recall/F1 with accuracy and averages.
///
/// Ratios with an empty denominator count as zero.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationReport {
    pub classes: [ClassMetrics; 2],
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ClassificationReport {
    pub fn new(cm: &ConfusionMatrix) -> Self {
        let mut classes = [ClassMetrics::default(); 2];
        for &label in &Label::ALL {
            let hits = cm.count(label, label);
            let precision = ratio(hits, cm.predicted(label));
            let recall = ratio(hits, cm.support(label));
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            classes[label.index()] = ClassMetrics {
                precision,
                recall,
                f1,
                support: cm.support(label),
            };
        }

        let total = cm.total();
        let n = classes.len() as f64;
        let macro_avg = ClassMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };
        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = ClassMetrics {
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
            support: total,
        };

        ClassificationReport {
            classes,
            accuracy: ratio(cm.correct(), total),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const LAST_HEADING: &str = "weighted avg";
        let width = Label::ALL
            .iter()
            .map(|l| l.name().len())
            .chain(std::iter::once(LAST_HEADING.len()))
            .max()
            .unwrap_or(0);

        writeln!(
            f,
            "{:>w$}  {:>9} {:>9} {:>9} {:>9}",
            "",
            "precision",
            "recall",
            "f1-score",
            "support",
            w = width
        )?;
        writeln!(f)?;
        for label in &Label::ALL {
            write_row(f, width, label.name(), &self.classes[label.index()])?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>w$}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.macro_avg.support,
            w = width
        )?;
        write_row(f, width, "macro avg", &self.macro_avg)?;
        write_row(f, width, LAST_HEADING, &self.weighted_avg)
    }
}

fn write_row(
    f: &mut fmt::Formatter<'_>,
    width: usize,
    name: &str,
    m: &ClassMetrics,
) -> fmt::Result {
    writeln!(
        f,
        "{:>w$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
        name,
        m.precision,
        m.recall,
        m.f1,
        m.support,
        w = width
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::{Cardiomegaly as C, NoFinding as N};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn confusion_matrix_counts() {
        let cm = ConfusionMatrix::new(&[N, N, N, C, C, C, C], &[N, N, C, C, C, C, N]).unwrap();
        assert_eq!(cm.count(N, N), 2);
        assert_eq!(cm.count(N, C), 1);
        assert_eq!(cm.count(C, N), 1);
        assert_eq!(cm.count(C, C), 3);
        assert_eq!(cm.support(C), 4);
        assert_eq!(cm.predicted(C), 4);
        assert_eq!(cm.total(), 7);
        assert_eq!(cm.max(), 3);
        assert!(cm.has_both_classes());
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let err = ConfusionMatrix::new(&[N, C], &[N]).unwrap_err();
        assert_eq!(err.kind(), "metric_computation_failure");
    }

    #[test]
    fn roc_matches_reference_values() {
        let roc = RocCurve::compute(&[N, N, C, C], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
        assert_eq!(roc.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
        assert!(roc.thresholds[0].is_infinite());
        assert!(close(roc.thresholds[1], 0.8f32 as f64));
        assert!(close(roc.auc(), 0.75));
    }

    #[test]
    fn perfect_and_inverted_rankings() {
        let truth = [N, N, N, C, C, C];
        let perfect = RocCurve::compute(&truth, &[0.1, 0.2, 0.3, 0.7, 0.8, 0.9]).unwrap();
        assert!(close(perfect.auc(), 1.0));

        let inverted = RocCurve::compute(&truth, &[0.9, 0.8, 0.7, 0.3, 0.2, 0.1]).unwrap();
        assert!(close(inverted.auc(), 0.0));
    }

    #[test]
    fn tied_scores_share_a_threshold() {
        let roc = RocCurve::compute(&[N, C, N, C], &[0.5, 0.5, 0.5, 0.5]).unwrap();
        assert_eq!(roc.fpr, vec![0.0, 1.0]);
        assert_eq!(roc.tpr, vec![0.0, 1.0]);
        assert!(close(roc.auc(), 0.5));
    }

    #[test]
    fn collinear_points_are_dropped() {
        let roc = RocCurve::compute(&[N, N, N, C], &[0.1, 0.2, 0.3, 0.9]).unwrap();
        assert_eq!(roc.fpr, vec![0.0, 0.0, 1.0]);
        assert_eq!(roc.tpr, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn single_class_has_no_roc() {
        let err = RocCurve::compute(&[C, C, C], &[0.2, 0.6, 0.9]).unwrap_err();
        assert!(err.to_string().contains("No Finding"));
    }

    #[test]
    fn report_layout() {
        let cm = ConfusionMatrix::new(&[N, N, N, C, C, C, C], &[N, N, C, C, C, C, N]).unwrap();
        let report = ClassificationReport::new(&cm);
        assert!(close(report.accuracy, 5.0 / 7.0));

        let expected = concat!(
            "              precision    recall  f1-score   support\n",
            "\n",
            "  No Finding       0.67      0.67      0.67         3\n",
            "Cardiomegaly       0.75      0.75      0.75         4\n",
            "\n",
            "    accuracy                           0.71         7\n",
            "   macro avg       0.71      0.71      0.71         7\n",
            "weighted avg       0.71      0.71      0.71         7\n",
        );
        assert_eq!(report.to_string(), expected);
    }

    #[test]
    fn zero_division_counts_as_zero() {
        let cm = ConfusionMatrix::new(&[N, C], &[N, N]).unwrap();
        let report = ClassificationReport::new(&cm);
        let positive = report.classes[C.index()];
        assert_eq!(positive.precision, 0.0);
        assert_eq!(positive.f1, 0.0);
        assert_eq!(report.classes[N.index()].precision, 0.5);
    }
}
