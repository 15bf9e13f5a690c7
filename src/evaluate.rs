//! Binary classifier evaluation: threshold choice, AUC/F1, text report and SVG plots.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const F1_EPSILON: f64 = 1e-10;
const PLOT_SIZE: f64 = 480.0;
const PLOT_MARGIN: f64 = 60.0;

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error("no samples to evaluate")]
    Empty,
    #[error("{what} has {found} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("probability row {row} has {width} columns, expected 1 or 2")]
    ShapeMismatch { row: usize, width: usize },
    #[error("probability rows mix widths {first} and {other}")]
    MixedShape { first: usize, other: usize },
    #[error("{what} contains {value} at {index}; only 0 and 1 are allowed")]
    InvalidLabel {
        what: &'static str,
        index: usize,
        value: i64,
    },
    #[error("{what} contains a non-finite value at {index}")]
    NonFinite { what: &'static str, index: usize },
    #[error("ground truth holds a single class; AUC is undefined")]
    SingleClass,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Class probabilities as produced by a model, either just the positive
/// class or `[negative, positive]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Probabilities {
    Positive(Vec<f64>),
    TwoColumn(Vec<[f64; 2]>),
}

impl Probabilities {
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, EvaluateError> {
        let Some(first) = rows.first() else {
            return Err(EvaluateError::Empty);
        };
        let width = first.len();
        for (row, values) in rows.iter().enumerate() {
            if values.len() != 1 && values.len() != 2 {
                return Err(EvaluateError::ShapeMismatch {
                    row,
                    width: values.len(),
                });
            }
            if values.len() != width {
                return Err(EvaluateError::MixedShape {
                    first: width,
                    other: values.len(),
                });
            }
        }

        Ok(if width == 1 {
            Self::Positive(rows.iter().map(|row| row[0]).collect())
        } else {
            Self::TwoColumn(rows.iter().map(|row| [row[0], row[1]]).collect())
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Positive(values) => values.len(),
            Self::TwoColumn(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `[negative, positive]` per sample.
    pub fn into_two_column(self) -> Vec<[f64; 2]> {
        match self {
            Self::Positive(values) => values.into_iter().map(|p| [1.0 - p, p]).collect(),
            Self::TwoColumn(values) => values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecisionRecallCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    /// Ascending; one shorter than `precision` and `recall`.
    pub thresholds: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Descending; the first entry is `+inf`.
    pub thresholds: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_labels(ground_truth: &[u8], predictions: &[u8]) -> Self {
        let mut cm = Self {
            tn: 0,
            fp: 0,
            fn_: 0,
            tp: 0,
        };
        for (truth, pred) in ground_truth.iter().zip(predictions) {
            match (*truth == 1, *pred == 1) {
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
                (true, true) => cm.tp += 1,
            }
        }
        cm
    }

    /// Rows are true labels, columns predicted labels.
    pub fn cells(&self) -> [[usize; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    ground_truth: Vec<u8>,
    probabilities: Vec<[f64; 2]>,
    predictions: Vec<u8>,
    optimal_threshold: f64,
    auc: f64,
    f1_score: f64,
}

impl Evaluator {
    pub fn new(
        ground_truth: Vec<u8>,
        probabilities: Probabilities,
        predictions: Option<Vec<u8>>,
        threshold: Option<f64>,
    ) -> Result<Self, EvaluateError> {
        if ground_truth.is_empty() {
            return Err(EvaluateError::Empty);
        }
        validate_labels("ground_truth", &ground_truth)?;
        if probabilities.len() != ground_truth.len() {
            return Err(EvaluateError::LengthMismatch {
                what: "probabilities",
                expected: ground_truth.len(),
                found: probabilities.len(),
            });
        }

        let probabilities = probabilities.into_two_column();
        for (index, row) in probabilities.iter().enumerate() {
            if !row[0].is_finite() || !row[1].is_finite() {
                return Err(EvaluateError::NonFinite {
                    what: "probabilities",
                    index,
                });
            }
        }
        if !ground_truth.contains(&0) || !ground_truth.contains(&1) {
            return Err(EvaluateError::SingleClass);
        }

        let positive: Vec<f64> = probabilities.iter().map(|row| row[1]).collect();

        let optimal_threshold = match threshold {
            Some(value) if value.is_finite() => value,
            Some(_) => {
                return Err(EvaluateError::NonFinite {
                    what: "threshold",
                    index: 0,
                })
            }
            None => {
                let computed = optimal_f1_threshold(&ground_truth, &positive);
                info!(
                    component = "evaluate",
                    event = "evaluate.threshold.computed",
                    threshold = computed
                );
                computed
            }
        };

        let predictions = match predictions {
            Some(values) => {
                if values.len() != ground_truth.len() {
                    return Err(EvaluateError::LengthMismatch {
                        what: "predictions",
                        expected: ground_truth.len(),
                        found: values.len(),
                    });
                }
                validate_labels("predictions", &values)?;
                values
            }
            None => {
                info!(
                    component = "evaluate",
                    event = "evaluate.predictions.computed",
                    threshold = optimal_threshold
                );
                positive
                    .iter()
                    .map(|p| u8::from(*p >= optimal_threshold))
                    .collect()
            }
        };

        let auc = roc_auc_score(&ground_truth, &positive);
        let f1 = round_to(f1_score(&ground_truth, &predictions), 2);

        Ok(Self {
            ground_truth,
            probabilities,
            predictions,
            optimal_threshold,
            auc,
            f1_score: f1,
        })
    }

    pub fn ground_truth(&self) -> &[u8] {
        &self.ground_truth
    }

    pub fn probabilities(&self) -> &[[f64; 2]] {
        &self.probabilities
    }

    pub fn positive_class_probabilities(&self) -> Vec<f64> {
        self.probabilities.iter().map(|row| row[1]).collect()
    }

    pub fn negative_class_probabilities(&self) -> Vec<f64> {
        self.probabilities.iter().map(|row| row[0]).collect()
    }

    pub fn predictions(&self) -> &[u8] {
        &self.predictions
    }

    pub fn optimal_threshold(&self) -> f64 {
        self.optimal_threshold
    }

    pub fn auc(&self) -> f64 {
        self.auc
    }

    pub fn f1_score(&self) -> f64 {
        self.f1_score
    }

    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        ConfusionMatrix::from_labels(&self.ground_truth, &self.predictions)
    }

    pub fn classification_report(&self) -> String {
        classification_report(&self.ground_truth, &self.predictions)
    }

    pub fn summary(&self) -> String {
        format!(
            "AUC: {:.3}\nOptimal Threshold: {}\nMaximum F1 Score: {}\n",
            self.auc, self.optimal_threshold, self.f1_score
        )
    }

    pub fn render_confusion_matrix_svg(&self, title: &str) -> String {
        render_confusion_matrix_svg(&self.confusion_matrix(), title)
    }

    /// One curve per class, each scored by that class's own probability column.
    pub fn render_roc_svg(&self, title: &str) -> String {
        let negative_truth: Vec<u8> = self.ground_truth.iter().map(|y| 1 - y).collect();
        let negative_scores = self.negative_class_probabilities();
        let positive_scores = self.positive_class_probabilities();

        let curves = [
            (
                "class 0",
                roc_curve(&negative_truth, &negative_scores),
                roc_auc_score(&negative_truth, &negative_scores),
                "#1f77b4",
            ),
            (
                "class 1",
                roc_curve(&self.ground_truth, &positive_scores),
                self.auc,
                "#d62728",
            ),
        ];
        render_roc_svg(&curves, title)
    }

    pub fn plot_confusion_matrix(&self, plot_dir: &Path, title: &str) -> Result<PathBuf, EvaluateError> {
        let path = plot_dir.join("confusion_matrix.svg");
        fs::create_dir_all(plot_dir)?;
        fs::write(&path, self.render_confusion_matrix_svg(title))?;
        Ok(path)
    }

    pub fn plot_roc(&self, plot_dir: &Path, title: &str) -> Result<PathBuf, EvaluateError> {
        let path = plot_dir.join("roc.svg");
        fs::create_dir_all(plot_dir)?;
        fs::write(&path, self.render_roc_svg(title))?;
        Ok(path)
    }

    pub fn display_results(&self, dataset_title: &str, plot_dir: &Path) -> Result<(), EvaluateError> {
        print!("{}", self.summary());
        println!("{}", self.classification_report());

        let cm_path = self.plot_confusion_matrix(plot_dir, &format!("{dataset_title}: Confusion matrix"))?;
        let roc_path = self.plot_roc(plot_dir, &format!("{dataset_title}: ROC"))?;

        info!(
            component = "evaluate",
            event = "evaluate.plots.written",
            dataset = dataset_title,
            confusion_matrix = %cm_path.display(),
            roc = %roc_path.display()
        );
        Ok(())
    }
}

/// Rounds half to even, so exact binary ties such as `0.125` go down to `0.12`.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}

/// Threshold whose F1 is highest on the precision-recall curve, rounded to
/// two decimals. The lowest threshold wins ties.
pub fn optimal_f1_threshold(ground_truth: &[u8], scores: &[f64]) -> f64 {
    let curve = precision_recall_curve(ground_truth, scores);
    let mut best_idx = 0;
    let mut best_f1 = f64::NEG_INFINITY;
    for (idx, (p, r)) in curve.precision.iter().zip(&curve.recall).enumerate() {
        let f1 = 2.0 * (p * r) / (p + r + F1_EPSILON);
        if f1 > best_f1 {
            best_f1 = f1;
            best_idx = idx;
        }
    }
    let threshold = curve
        .thresholds
        .get(best_idx)
        .or(curve.thresholds.last())
        .copied()
        .unwrap_or(0.5);
    round_to(threshold, 2)
}

pub fn precision_recall_curve(ground_truth: &[u8], scores: &[f64]) -> PrecisionRecallCurve {
    let points = binary_clf_curve(ground_truth, scores);
    let total_positive = points.last().map(|p| p.tps).unwrap_or(0.0);

    let mut precision = Vec::with_capacity(points.len() + 1);
    let mut recall = Vec::with_capacity(points.len() + 1);
    let mut thresholds = Vec::with_capacity(points.len());
    for point in points.iter().rev() {
        let predicted = point.tps + point.fps;
        precision.push(if predicted > 0.0 { point.tps / predicted } else { 0.0 });
        recall.push(if total_positive > 0.0 {
            point.tps / total_positive
        } else {
            1.0
        });
        thresholds.push(point.threshold);
    }
    precision.push(1.0);
    recall.push(0.0);

    PrecisionRecallCurve {
        precision,
        recall,
        thresholds,
    }
}

pub fn roc_curve(ground_truth: &[u8], scores: &[f64]) -> RocCurve {
    let points = binary_clf_curve(ground_truth, scores);
    let (total_positive, total_negative) = points
        .last()
        .map(|p| (p.tps, p.fps))
        .unwrap_or((0.0, 0.0));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];
    for point in &points {
        fpr.push(if total_negative > 0.0 {
            point.fps / total_negative
        } else {
            0.0
        });
        tpr.push(if total_positive > 0.0 {
            point.tps / total_positive
        } else {
            0.0
        });
        thresholds.push(point.threshold);
    }

    RocCurve {
        fpr,
        tpr,
        thresholds,
    }
}

/// Trapezoidal area under the ROC curve; tied scores form a single step.
pub fn roc_auc_score(ground_truth: &[u8], scores: &[f64]) -> f64 {
    let curve = roc_curve(ground_truth, scores);
    curve
        .fpr
        .windows(2)
        .zip(curve.tpr.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
        .sum()
}

/// F1 of the positive class; 0 when there are no true or predicted positives.
pub fn f1_score(ground_truth: &[u8], predictions: &[u8]) -> f64 {
    let stats = class_stats(ground_truth, predictions, 1);
    stats.f1
}

pub fn classification_report(ground_truth: &[u8], predictions: &[u8]) -> String {
    let classes = [class_stats(ground_truth, predictions, 0), class_stats(ground_truth, predictions, 1)];
    let total = ground_truth.len();
    let correct = ground_truth
        .iter()
        .zip(predictions)
        .filter(|(truth, pred)| truth == pred)
        .count();
    let accuracy = if total > 0 {
        correct as f64 / total as f64
    } else {
        0.0
    };

    let mut out = format!(
        "{:>12}  {:>9} {:>9} {:>9} {:>9}\n\n",
        "", "precision", "recall", "f1-score", "support"
    );
    for (label, stats) in ["0", "1"].iter().zip(&classes) {
        out.push_str(&report_row(label, stats.precision, stats.recall, stats.f1, stats.support));
    }
    out.push('\n');
    out.push_str(&format!(
        "{:>12}  {:>9} {:>9} {:>9.2} {:>9}\n",
        "accuracy", "", "", accuracy, total
    ));

    let macro_avg = |f: fn(&ClassStats) -> f64| classes.iter().map(f).sum::<f64>() / 2.0;
    out.push_str(&report_row(
        "macro avg",
        macro_avg(|s| s.precision),
        macro_avg(|s| s.recall),
        macro_avg(|s| s.f1),
        total,
    ));

    let weighted_avg = |f: fn(&ClassStats) -> f64| {
        if total == 0 {
            return 0.0;
        }
        classes
            .iter()
            .map(|s| f(s) * s.support as f64)
            .sum::<f64>()
            / total as f64
    };
    out.push_str(&report_row(
        "weighted avg",
        weighted_avg(|s| s.precision),
        weighted_avg(|s| s.recall),
        weighted_avg(|s| s.f1),
        total,
    ));
    out
}

fn report_row(label: &str, precision: f64, recall: f64, f1: f64, support: usize) -> String {
    format!("{label:>12}  {precision:>9.2} {recall:>9.2} {f1:>9.2} {support:>9}\n")
}

#[derive(Debug, Clone, Copy)]
struct ClassStats {
    precision: f64,
    recall: f64,
    f1: f64,
    support: usize,
}

fn class_stats(ground_truth: &[u8], predictions: &[u8], class: u8) -> ClassStats {
    let mut tp = 0usize;
    let mut predicted = 0usize;
    let mut support = 0usize;
    for (truth, pred) in ground_truth.iter().zip(predictions) {
        if *pred == class {
            predicted += 1;
        }
        if *truth == class {
            support += 1;
            if *pred == class {
                tp += 1;
            }
        }
    }

    let precision = ratio(tp, predicted);
    let recall = ratio(tp, support);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassStats {
        precision,
        recall,
        f1,
        support,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct CurvePoint {
    threshold: f64,
    tps: f64,
    fps: f64,
}

/// Cumulative true/false positives at each distinct score, highest first.
fn binary_clf_curve(ground_truth: &[u8], scores: &[f64]) -> Vec<CurvePoint> {
    let mut order: Vec<usize> = (0..scores.len().min(ground_truth.len())).collect();
    order.sort_by(|a, b| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(Ordering::Equal)
    });

    let mut points = Vec::new();
    let mut tps = 0.0;
    let mut fps = 0.0;
    for (pos, idx) in order.iter().enumerate() {
        if ground_truth[*idx] == 1 {
            tps += 1.0;
        } else {
            fps += 1.0;
        }
        let is_last_of_group = order
            .get(pos + 1)
            .map(|next| scores[*next] != scores[*idx])
            .unwrap_or(true);
        if is_last_of_group {
            points.push(CurvePoint {
                threshold: scores[*idx],
                tps,
                fps,
            });
        }
    }
    points
}

fn validate_labels(what: &'static str, labels: &[u8]) -> Result<(), EvaluateError> {
    if let Some((index, value)) = labels.iter().enumerate().find(|(_, v)| **v > 1) {
        return Err(EvaluateError::InvalidLabel {
            what,
            index,
            value: i64::from(*value),
        });
    }
    Ok(())
}

fn render_confusion_matrix_svg(cm: &ConfusionMatrix, title: &str) -> String {
    let cell = (PLOT_SIZE - 2.0 * PLOT_MARGIN) / 2.0;
    let cells = cm.cells();
    let max = cells.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;

    let mut out = svg_open(title);
    for (row, row_values) in cells.iter().enumerate() {
        for (col, count) in row_values.iter().enumerate() {
            let x = PLOT_MARGIN + col as f64 * cell;
            let y = PLOT_MARGIN + row as f64 * cell;
            let intensity = *count as f64 / max;
            let shade = (247.0 - intensity * 200.0).round() as u8;
            let ink = if intensity > 0.5 { "#ffffff" } else { "#182026" };
            out.push_str(&format!(
                "<rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{cell:.1}\" height=\"{cell:.1}\" fill=\"rgb({shade},{shade},255)\" stroke=\"#14343f\"/>\n"
            ));
            out.push_str(&format!(
                "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"22\" fill=\"{ink}\">{count}</text>\n",
                x + cell / 2.0,
                y + cell / 2.0 + 8.0
            ));
        }
        let label_y = PLOT_MARGIN + row as f64 * cell + cell / 2.0;
        out.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{label_y:.1}\" text-anchor=\"end\" font-size=\"14\">{row}</text>\n",
            PLOT_MARGIN - 8.0
        ));
        out.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"14\">{row}</text>\n",
            PLOT_MARGIN + row as f64 * cell + cell / 2.0,
            PLOT_SIZE - PLOT_MARGIN + 20.0
        ));
    }
    out.push_str(&axis_labels("Predicted label", "True label"));
    out.push_str("</svg>\n");
    out
}

fn render_roc_svg(curves: &[(&str, RocCurve, f64, &str)], title: &str) -> String {
    let span = PLOT_SIZE - 2.0 * PLOT_MARGIN;
    let to_x = |fpr: f64| PLOT_MARGIN + fpr * span;
    let to_y = |tpr: f64| PLOT_SIZE - PLOT_MARGIN - tpr * span;

    let mut out = svg_open(title);
    out.push_str(&format!(
        "<rect x=\"{PLOT_MARGIN:.1}\" y=\"{PLOT_MARGIN:.1}\" width=\"{span:.1}\" height=\"{span:.1}\" fill=\"none\" stroke=\"#14343f\"/>\n"
    ));
    out.push_str(&format!(
        "<line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#5f6a73\" stroke-dasharray=\"6 4\"/>\n",
        to_x(0.0),
        to_y(0.0),
        to_x(1.0),
        to_y(1.0)
    ));

    for (idx, (name, curve, area, color)) in curves.iter().enumerate() {
        let points: Vec<String> = curve
            .fpr
            .iter()
            .zip(&curve.tpr)
            .map(|(fpr, tpr)| format!("{:.2},{:.2}", to_x(*fpr), to_y(*tpr)))
            .collect();
        out.push_str(&format!(
            "<polyline fill=\"none\" stroke=\"{color}\" stroke-width=\"2\" points=\"{}\"/>\n",
            points.join(" ")
        ));
        let legend_y = PLOT_SIZE - PLOT_MARGIN - 14.0 - 18.0 * (curves.len() - 1 - idx) as f64;
        out.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{legend_y:.1}\" text-anchor=\"end\" font-size=\"13\" fill=\"{color}\">ROC curve of {} (area = {area:.2})</text>\n",
            PLOT_SIZE - PLOT_MARGIN - 8.0,
            escape_xml(name)
        ));
    }
    out.push_str(&axis_labels("False Positive Rate", "True Positive Rate"));
    out.push_str("</svg>\n");
    out
}

fn svg_open(title: &str) -> String {
    let mut out = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{PLOT_SIZE}\" height=\"{PLOT_SIZE}\" viewBox=\"0 0 {PLOT_SIZE} {PLOT_SIZE}\" font-family=\"sans-serif\">\n"
    );
    out.push_str("<rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\n");
    out.push_str(&format!(
        "<text x=\"{:.1}\" y=\"32\" text-anchor=\"middle\" font-size=\"18\" font-weight=\"bold\">{}</text>\n",
        PLOT_SIZE / 2.0,
        escape_xml(title)
    ));
    out
}

fn axis_labels(x_label: &str, y_label: &str) -> String {
    format!(
        "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"14\">{}</text>\n<text x=\"18\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"14\" transform=\"rotate(-90 18 {:.1})\">{}</text>\n",
        PLOT_SIZE / 2.0,
        PLOT_SIZE - 14.0,
        escape_xml(x_label),
        PLOT_SIZE / 2.0,
        PLOT_SIZE / 2.0,
        escape_xml(y_label)
    )
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
