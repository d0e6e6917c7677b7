//! # Multi-label Evaluation
//!
//! [`compute_report`] is the pure metrics kernel; [`Evaluator`] feeds it
//! predictions for an explicitly chosen [`EvaluationSource`].
//!
//! A label is predicted positive when its score is strictly above the
//! threshold. Degenerate ratios (zero denominators) are reported as `0`
//! with a warning.

use crate::charts::{bucket_counts, histogram_panels, write_svg};
use crate::config::EyeballerConfig;
use crate::data::labels::{LabelRecord, LabelStore};
use crate::errors::{EyeballError, Result, SkippedImage};
use crate::inference::Predictor;
use crate::rng::SeedStream;
use crate::training::HISTOGRAM_BUCKETS;
use burn::prelude::Backend;
use std::fmt::Write as _;

/// Length of the best / worst lists.
pub const TOP_K: usize = 10;

/// Which images an evaluation scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationSource {
    /// The persistent held-out evaluation partition.
    HeldOut,

    /// The validation subset of the training run with this seed.
    Validation {
        /// The training run seed.
        seed: u64,
    },
}

impl std::fmt::Display for EvaluationSource {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            EvaluationSource::HeldOut => write!(f, "held-out evaluation set"),
            EvaluationSource::Validation { seed } => write!(f, "validation split (seed {seed})"),
        }
    }
}

/// One evaluated image.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredExample {
    /// Image file name.
    pub filename: String,

    /// Ground truth, in label-set order.
    pub truth: Vec<bool>,

    /// Raw scores, in label-set order.
    pub scores: Vec<f32>,
}

impl ScoredExample {
    /// Sum over labels of `|score - truth|`.
    pub fn absolute_error(&self) -> f64 {
        self.truth
            .iter()
            .zip(&self.scores)
            .map(|(&t, &s)| (s as f64 - if t { 1.0 } else { 0.0 }).abs())
            .sum()
    }

    /// Thresholded predictions.
    pub fn predicted(
        &self,
        threshold: f32,
    ) -> Vec<bool> {
        self.scores.iter().map(|&s| s > threshold).collect()
    }
}

/// Per-label metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMetrics {
    /// The label.
    pub label: String,

    /// `TP / (TP + FP)`.
    pub precision: f64,

    /// `TP / (TP + FN)`.
    pub recall: f64,

    /// Harmonic mean of precision and recall.
    pub f1: f64,

    /// Number of positive ground-truth images.
    pub support: usize,
}

/// A ranked image.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedExample {
    /// Position in the evaluated sequence.
    pub index: usize,

    /// Image file name.
    pub filename: String,

    /// Summed absolute error.
    pub error: f64,
}

/// The result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    /// Which images were scored.
    pub source: EvaluationSource,

    /// Decision threshold.
    pub threshold: f32,

    /// Number of images scored.
    pub image_count: usize,

    /// Per-label metrics, in label-set order.
    pub labels: Vec<LabelMetrics>,

    /// `1 - hamming loss`.
    pub hamming_accuracy: f64,

    /// Fraction of images whose whole label vector is right.
    pub exact_match_accuracy: f64,

    /// Fraction of all-negative predictions that are all-negative in truth.
    pub none_of_the_above_precision: f64,

    /// Fraction of all-negative images predicted all-negative.
    pub none_of_the_above_recall: f64,

    /// Lowest-error images, best first.
    pub best: Vec<RankedExample>,

    /// Highest-error images, worst first.
    pub worst: Vec<RankedExample>,

    /// Images that could not be scored.
    pub skipped: Vec<SkippedImage>,
}

fn ratio(
    num: usize,
    den: usize,
    what: &str,
) -> f64 {
    if den == 0 {
        tracing::warn!("{what} is undefined (no samples); reporting 0");
        return 0.0;
    }
    num as f64 / den as f64
}

fn rank(
    examples: &[ScoredExample],
    worst: bool,
) -> Vec<RankedExample> {
    let mut ranked: Vec<RankedExample> = examples
        .iter()
        .enumerate()
        .map(|(index, e)| RankedExample {
            index,
            filename: e.filename.clone(),
            error: e.absolute_error(),
        })
        .collect();
    // Stable: ties keep their original order.
    if worst {
        ranked.sort_by(|a, b| b.error.total_cmp(&a.error));
    } else {
        ranked.sort_by(|a, b| a.error.total_cmp(&b.error));
    }
    ranked.truncate(TOP_K);
    ranked
}

/// Compute the metrics for a scored sequence.
///
/// # Errors
///
/// [`EyeballError::EmptyDataset`] if `examples` is empty.
pub fn compute_report(
    label_set: &[String],
    examples: &[ScoredExample],
    threshold: f32,
    source: EvaluationSource,
) -> Result<EvaluationReport> {
    if examples.is_empty() {
        return Err(EyeballError::EmptyDataset {
            what: format!("{source}"),
        });
    }

    let n_labels = label_set.len();
    let mut tp = vec![0usize; n_labels];
    let mut fp = vec![0usize; n_labels];
    let mut fn_ = vec![0usize; n_labels];
    let mut mismatches = 0;
    let mut exact = 0;
    let (mut nota_truth, mut nota_pred, mut nota_both) = (0, 0, 0);

    for example in examples {
        let predicted = example.predicted(threshold);
        let mut all_right = true;
        for k in 0..n_labels {
            match (example.truth[k], predicted[k]) {
                (true, true) => tp[k] += 1,
                (false, true) => fp[k] += 1,
                (true, false) => fn_[k] += 1,
                (false, false) => {}
            }
            if example.truth[k] != predicted[k] {
                mismatches += 1;
                all_right = false;
            }
        }
        if all_right {
            exact += 1;
        }

        let truth_none = !example.truth.iter().any(|&t| t);
        let pred_none = !predicted.iter().any(|&p| p);
        nota_truth += truth_none as usize;
        nota_pred += pred_none as usize;
        nota_both += (truth_none && pred_none) as usize;
    }

    let labels = label_set
        .iter()
        .enumerate()
        .map(|(k, label)| {
            let precision = ratio(tp[k], tp[k] + fp[k], &format!("precision of '{label}'"));
            let recall = ratio(tp[k], tp[k] + fn_[k], &format!("recall of '{label}'"));
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            LabelMetrics {
                label: label.clone(),
                precision,
                recall,
                f1,
                support: tp[k] + fn_[k],
            }
        })
        .collect();

    let n = examples.len();
    Ok(EvaluationReport {
        source,
        threshold,
        image_count: n,
        labels,
        hamming_accuracy: 1.0 - mismatches as f64 / (n * n_labels).max(1) as f64,
        exact_match_accuracy: exact as f64 / n as f64,
        none_of_the_above_precision: ratio(nota_both, nota_pred, "'none of the above' precision"),
        none_of_the_above_recall: ratio(nota_both, nota_truth, "'none of the above' recall"),
        best: rank(examples, false),
        worst: rank(examples, true),
        skipped: Vec::new(),
    })
}

/// Render a report for humans.
pub fn pretty_print(report: &EvaluationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Evaluated {} images from the {} at threshold {:.2}",
        report.image_count, report.source, report.threshold
    );
    if !report.skipped.is_empty() {
        let _ = writeln!(out, "Skipped {} unreadable images", report.skipped.len());
    }
    let _ = writeln!(
        out,
        "{:<14} {:>10} {:>10} {:>10} {:>8}",
        "label", "precision", "recall", "f1", "support"
    );
    for m in &report.labels {
        let _ = writeln!(
            out,
            "{:<14} {:>9.2}% {:>9.2}% {:>10.3} {:>8}",
            m.label,
            m.precision * 100.0,
            m.recall * 100.0,
            m.f1,
            m.support
        );
    }
    let _ = writeln!(
        out,
        "'None of the above' Precision: {:.2}%",
        report.none_of_the_above_precision * 100.0
    );
    let _ = writeln!(
        out,
        "'None of the above' Recall: {:.2}%",
        report.none_of_the_above_recall * 100.0
    );
    let _ = writeln!(
        out,
        "All or nothing Accuracy: {:.2}%",
        report.exact_match_accuracy * 100.0
    );
    let _ = writeln!(
        out,
        "Overall Binary Accuracy: {:.2}%",
        report.hamming_accuracy * 100.0
    );
    let worst: Vec<&str> = report.worst.iter().map(|r| r.filename.as_str()).collect();
    let _ = writeln!(out, "Top {TOP_K} worst predictions: {}", worst.join(", "));
    out
}

/// Scores a label table partition and reports metrics.
#[derive(Debug, Clone)]
pub struct Evaluator<B: Backend> {
    config: EyeballerConfig,
    predictor: Predictor<B>,
}

impl<B: Backend> Evaluator<B> {
    /// New evaluator.
    pub fn new(
        config: EyeballerConfig,
        predictor: Predictor<B>,
    ) -> Self {
        Self { config, predictor }
    }

    /// The records `source` selects.
    pub fn select_records(
        &self,
        store: &LabelStore,
        source: EvaluationSource,
    ) -> Vec<LabelRecord> {
        match source {
            EvaluationSource::HeldOut => store.partition().1.records,
            EvaluationSource::Validation { seed } => {
                store
                    .validation_split(&SeedStream::new(seed), self.config.validation_fraction)
                    .1
            }
        }
    }

    /// Score `source` at `threshold`.
    ///
    /// Also writes `evaluation_histograms.svg` (per-label score
    /// distribution) into `graphs_dir`.
    ///
    /// # Errors
    ///
    /// * label table failures;
    /// * [`EyeballError::EmptyDataset`] if no image of the source could be
    ///   scored.
    pub fn evaluate(
        &self,
        threshold: f32,
        source: EvaluationSource,
    ) -> Result<EvaluationReport> {
        let store = LabelStore::load(&self.config.labels_file, &self.config.label_set)?;
        let records = self.select_records(&store, source);
        tracing::info!(%source, images = records.len(), "evaluating");

        let files: Vec<_> = records
            .iter()
            .map(|r| self.config.image_path(&r.filename))
            .collect();
        let batch = self.predictor.predict_files(&files);

        // Results come back in order, minus the skipped files.
        let mut results = batch.results.into_iter().peekable();
        let mut examples = Vec::with_capacity(records.len());
        for (record, file) in records.iter().zip(&files) {
            if batch.skipped.iter().any(|s| &s.path == file) {
                continue;
            }
            if let Some(result) = results.next() {
                examples.push(ScoredExample {
                    filename: record.filename.clone(),
                    truth: record.labels.clone(),
                    scores: result.score_vector(),
                });
            }
        }

        let mut report = compute_report(&self.config.label_set, &examples, threshold, source)?;
        report.skipped = batch.skipped;
        self.write_histograms(&examples)?;
        Ok(report)
    }

    fn write_histograms(
        &self,
        examples: &[ScoredExample],
    ) -> Result<()> {
        let panels: Vec<(String, Vec<usize>)> = self
            .config
            .label_set
            .iter()
            .enumerate()
            .map(|(k, label)| {
                let column: Vec<f32> = examples.iter().map(|e| e.scores[k]).collect();
                (label.clone(), bucket_counts(&column, HISTOGRAM_BUCKETS))
            })
            .collect();
        write_svg(
            self.config.graphs_dir.join("evaluation_histograms.svg"),
            &histogram_panels("Evaluation score distribution", &panels),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestBackend, constant_output, tiny_model, tiny_run_config, write_dataset};
    use hamcrest::prelude::*;

    fn labels() -> Vec<String> {
        ["custom404", "login", "webapp", "oldlooking"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn example(
        name: &str,
        truth: [bool; 4],
        scores: [f32; 4],
    ) -> ScoredExample {
        ScoredExample {
            filename: name.to_string(),
            truth: truth.to_vec(),
            scores: scores.to_vec(),
        }
    }

    #[test]
    fn test_perfect_predictions() {
        let examples = vec![
            example("a", [true, false, false, false], [0.9, 0.1, 0.2, 0.0]),
            example("b", [false, true, true, false], [0.2, 0.8, 0.7, 0.1]),
            example("c", [false, false, false, true], [0.1, 0.1, 0.3, 0.6]),
            example("d", [false, false, false, false], [0.1, 0.2, 0.3, 0.4]),
            example("e", [true, true, true, true], [0.6, 0.9, 0.9, 0.99]),
        ];
        let report = compute_report(&labels(), &examples, 0.5, EvaluationSource::HeldOut).unwrap();

        assert_that!(report.image_count, equal_to(5));
        for m in &report.labels {
            assert_that!(m.precision, equal_to(1.0));
            assert_that!(m.recall, equal_to(1.0));
            assert_that!(m.f1, equal_to(1.0));
        }
        assert_eq!(report.labels[0].support, 2);
        assert_that!(report.hamming_accuracy, equal_to(1.0));
        assert_that!(report.exact_match_accuracy, equal_to(1.0));
        assert_that!(report.none_of_the_above_precision, equal_to(1.0));
        assert_that!(report.none_of_the_above_recall, equal_to(1.0));
        assert_eq!(report.source, EvaluationSource::HeldOut);
    }

    #[test]
    fn test_no_all_negative_images() {
        let examples = vec![
            example("a", [true, false, false, false], [0.9, 0.6, 0.2, 0.0]),
            example("b", [false, true, false, false], [0.2, 0.8, 0.7, 0.1]),
        ];
        let report = compute_report(&labels(), &examples, 0.5, EvaluationSource::HeldOut).unwrap();

        assert_that!(report.none_of_the_above_precision, equal_to(0.0));
        assert_that!(report.none_of_the_above_recall, equal_to(0.0));
        // 2 wrong label-instances out of 8.
        assert_that!(report.hamming_accuracy, close_to(0.75, 1e-9));
        assert_that!(report.exact_match_accuracy, equal_to(0.0));

        // "oldlooking" never appears: zero denominators report 0.
        assert_that!(report.labels[3].precision, equal_to(0.0));
        assert_that!(report.labels[3].recall, equal_to(0.0));
        assert_that!(report.labels[3].support, equal_to(0));

        // login: TP=1, FP=1.
        assert_that!(report.labels[1].precision, close_to(0.5, 1e-9));
        assert_that!(report.labels[1].recall, equal_to(1.0));
    }

    #[test]
    fn test_none_of_the_above_partial() {
        let examples = vec![
            // all-negative, predicted all-negative
            example("a", [false; 4], [0.1; 4]),
            // all-negative, predicted positive
            example("b", [false; 4], [0.9, 0.1, 0.1, 0.1]),
            // positive, predicted all-negative
            example("c", [true, false, false, false], [0.1; 4]),
        ];
        let report = compute_report(&labels(), &examples, 0.5, EvaluationSource::HeldOut).unwrap();
        assert_that!(report.none_of_the_above_recall, close_to(0.5, 1e-9));
        assert_that!(report.none_of_the_above_precision, close_to(0.5, 1e-9));
    }

    #[test]
    fn test_worst_ten_of_twelve() {
        // Absolute error sums, by index:
        // 0:0.4 1:2.0 2:1.0 3:2.0 4:0.0 5:3.0 6:1.0 7:0.5 8:2.0 9:0.25 10:4.0 11:1.0
        let errors = [0.4, 2.0, 1.0, 2.0, 0.0, 3.0, 1.0, 0.5, 2.0, 0.25, 4.0, 1.0];
        let examples: Vec<ScoredExample> = errors
            .iter()
            .enumerate()
            .map(|(i, &e)| {
                // One label carries the whole error.
                let whole = (e as f32).floor();
                let frac = e as f32 - whole;
                let mut scores = [0.0f32; 4];
                for s in scores.iter_mut().take(whole as usize) {
                    *s = 1.0;
                }
                if frac > 0.0 {
                    scores[whole as usize] = frac;
                }
                example(&format!("img{i}"), [false; 4], scores)
            })
            .collect();
        for (e, &expected) in examples.iter().zip(&errors) {
            assert_that!(e.absolute_error(), close_to(expected, 1e-6));
        }

        let report = compute_report(&labels(), &examples, 0.5, EvaluationSource::HeldOut).unwrap();

        let worst: Vec<usize> = report.worst.iter().map(|r| r.index).collect();
        assert_eq!(worst, vec![10, 5, 1, 3, 8, 2, 6, 11, 7, 0]);
        assert_eq!(report.worst[0].filename, "img10");

        let best: Vec<usize> = report.best.iter().map(|r| r.index).collect();
        assert_eq!(best, vec![4, 9, 0, 7, 2, 6, 11, 1, 3, 8]);
    }

    #[test]
    fn test_empty_examples() {
        let err = compute_report(&labels(), &[], 0.5, EvaluationSource::HeldOut).unwrap_err();
        assert!(matches!(err, EyeballError::EmptyDataset { .. }), "{err}");
    }

    #[test]
    fn test_pretty_print() {
        let examples = vec![example("a", [true, false, false, false], [0.9, 0.1, 0.2, 0.0])];
        let report = compute_report(
            &labels(),
            &examples,
            0.5,
            EvaluationSource::Validation { seed: 12 },
        )
        .unwrap();
        let text = pretty_print(&report);
        assert!(text.contains("validation split (seed 12)"));
        assert!(text.contains("custom404"));
        assert!(text.contains("Overall Binary Accuracy: 100.00%"));
        assert!(text.contains("Top 10 worst predictions: a"));
    }

    #[test]
    fn test_evaluator_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let labels = labels();
        write_dataset(
            dir.path(),
            &labels,
            &[
                ("t0.png", false, vec![true, false, false, false]),
                ("t1.png", false, vec![false, true, false, false]),
                ("t2.png", false, vec![false, false, false, false]),
                ("t3.png", false, vec![false, false, true, false]),
                ("t4.png", false, vec![false, false, false, true]),
                ("e0.png", true, vec![false, false, false, false]),
                ("e1.png", true, vec![false, false, false, false]),
                ("e2.png", true, vec![true, false, false, false]),
            ],
        );
        std::fs::write(dir.path().join("images").join("e1.png"), b"garbage").unwrap();

        let config = tiny_run_config(dir.path());
        let device = Default::default();
        // Every score is sigmoid(-4): all predictions negative.
        let model = constant_output(tiny_model::<TestBackend>(4, &device), -4.0);
        let evaluator = Evaluator::new(config.clone(), Predictor::new(model, &config, device));

        let report = evaluator.evaluate(0.5, EvaluationSource::HeldOut).unwrap();
        assert_that!(report.image_count, equal_to(2));
        assert_that!(report.skipped.len(), equal_to(1));
        assert_that!(report.none_of_the_above_recall, equal_to(1.0));
        assert_that!(report.none_of_the_above_precision, close_to(0.5, 1e-9));
        assert_that!(report.exact_match_accuracy, close_to(0.5, 1e-9));
        assert_eq!(report.worst[0].filename, "e2.png");
        assert!(config.graphs_dir.join("evaluation_histograms.svg").exists());

        let report = evaluator
            .evaluate(0.5, EvaluationSource::Validation { seed: 3 })
            .unwrap();
        // floor(5 * 0.2) = 1 validation image from the training partition.
        assert_that!(report.image_count, equal_to(1));
        assert_eq!(report.source, EvaluationSource::Validation { seed: 3 });
    }
}
