//! Classification metrics over stored predictions.
//!
//! Definitions follow the usual conventions: per-class precision, recall and
//! F1 with zero when a denominator is zero; macro averages are unweighted
//! means over classes, weighted averages use true-label support.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::domain::Category;

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Precision/recall/F1 for one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of rows whose true label is this class
    pub support: usize,
}

impl ClassMetrics {
    fn from_counts(label: impl Into<String>, tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        Self {
            label: label.into(),
            precision,
            recall,
            f1: f1(precision, recall),
            support: tp + fn_,
        }
    }
}

fn macro_mean(classes: &[ClassMetrics], pick: impl Fn(&ClassMetrics) -> f64) -> f64 {
    if classes.is_empty() {
        0.0
    } else {
        classes.iter().map(pick).sum::<f64>() / classes.len() as f64
    }
}

fn weighted_f1(classes: &[ClassMetrics]) -> f64 {
    let support: usize = classes.iter().map(|c| c.support).sum();
    if support == 0 {
        0.0
    } else {
        classes.iter().map(|c| c.f1 * c.support as f64).sum::<f64>() / support as f64
    }
}

/// Single-label report (detection, multiple choice)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub total: usize,
    pub accuracy: f64,
    /// Sorted union of true and predicted labels
    pub classes: Vec<ClassMetrics>,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub micro_f1: f64,
    pub weighted_f1: f64,
    /// `confusion[i][j]`: rows with true label `classes[i]` predicted as `classes[j]`
    pub confusion: Vec<Vec<usize>>,
}

impl ClassificationReport {
    /// Build from (truth, prediction) pairs; `None` when there are none
    pub fn from_pairs<T, P>(pairs: &[(T, P)]) -> Option<Self>
    where
        T: AsRef<str>,
        P: AsRef<str>,
    {
        if pairs.is_empty() {
            return None;
        }

        let labels: Vec<&str> = pairs
            .iter()
            .flat_map(|(t, p)| [t.as_ref(), p.as_ref()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<&str, usize> =
            labels.iter().enumerate().map(|(i, l)| (*l, i)).collect();

        let mut confusion = vec![vec![0usize; labels.len()]; labels.len()];
        for (t, p) in pairs {
            confusion[index[t.as_ref()]][index[p.as_ref()]] += 1;
        }

        let correct: usize = (0..labels.len()).map(|i| confusion[i][i]).sum();
        let classes: Vec<ClassMetrics> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let tp = confusion[i][i];
                let predicted: usize = (0..labels.len()).map(|r| confusion[r][i]).sum();
                let actual: usize = confusion[i].iter().sum();
                ClassMetrics::from_counts(*label, tp, predicted - tp, actual - tp)
            })
            .collect();

        let total = pairs.len();
        let accuracy = ratio(correct, total);

        Some(Self {
            total,
            accuracy,
            macro_precision: macro_mean(&classes, |c| c.precision),
            macro_recall: macro_mean(&classes, |c| c.recall),
            macro_f1: macro_mean(&classes, |c| c.f1),
            // Every row carries exactly one label on each side
            micro_f1: accuracy,
            weighted_f1: weighted_f1(&classes),
            classes,
            confusion,
        })
    }

    pub fn class(&self, label: &str) -> Option<&ClassMetrics> {
        self.classes.iter().find(|c| c.label == label)
    }
}

fn write_class_table(f: &mut fmt::Formatter<'_>, classes: &[ClassMetrics]) -> fmt::Result {
    let width = classes.iter().map(|c| c.label.len()).max().unwrap_or(5).max(12);
    writeln!(
        f,
        "{:>width$} {:>10} {:>10} {:>10} {:>10}",
        "", "precision", "recall", "f1-score", "support"
    )?;
    for c in classes {
        writeln!(
            f,
            "{:>width$} {:>10.4} {:>10.4} {:>10.4} {:>10}",
            c.label, c.precision, c.recall, c.f1, c.support
        )?;
    }
    Ok(())
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total samples evaluated: {}", self.total)?;
        writeln!(f, "Accuracy:           {:.6}", self.accuracy)?;
        writeln!(f, "Precision (macro):  {:.6}", self.macro_precision)?;
        writeln!(f, "Recall (macro):     {:.6}", self.macro_recall)?;
        writeln!(f, "F1 (macro):         {:.6}", self.macro_f1)?;
        writeln!(f, "F1 (micro):         {:.6}", self.micro_f1)?;
        writeln!(f, "F1 (weighted):      {:.6}", self.weighted_f1)?;
        writeln!(f)?;
        write_class_table(f, &self.classes)?;
        writeln!(f)?;
        writeln!(f, "Confusion matrix (rows = truth):")?;
        for (label, row) in self.classes.iter().zip(&self.confusion) {
            let cells: Vec<String> = row.iter().map(|n| format!("{:>5}", n)).collect();
            writeln!(f, "{:>16} {}", label.label, cells.join(""))?;
        }
        Ok(())
    }
}

/// Multi-label report over the fixed category vocabulary (tagging)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiLabelReport {
    pub total: usize,
    /// Fraction of (row, category) cells predicted wrongly
    pub hamming_loss: f64,
    /// Unweighted mean of per-category TP / (TP + FP + FN)
    pub jaccard_macro: f64,
    pub f1_macro: f64,
    pub f1_micro: f64,
    pub f1_weighted: f64,
    /// One entry per category, in vocabulary order
    pub categories: Vec<ClassMetrics>,
}

impl MultiLabelReport {
    /// Build from (truth, prediction) category sets; `None` when empty
    pub fn from_sets(rows: &[(BTreeSet<Category>, BTreeSet<Category>)]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }

        let mut categories = Vec::with_capacity(Category::ALL.len());
        let mut jaccards = Vec::with_capacity(Category::ALL.len());
        let (mut tp_all, mut fp_all, mut fn_all) = (0usize, 0usize, 0usize);

        for category in Category::ALL {
            let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
            for (truth, pred) in rows {
                match (truth.contains(&category), pred.contains(&category)) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            tp_all += tp;
            fp_all += fp;
            fn_all += fn_;
            jaccards.push(ratio(tp, tp + fp + fn_));
            categories.push(ClassMetrics::from_counts(category.as_str(), tp, fp, fn_));
        }

        let cells = rows.len() * Category::ALL.len();
        let micro_p = ratio(tp_all, tp_all + fp_all);
        let micro_r = ratio(tp_all, tp_all + fn_all);

        Some(Self {
            total: rows.len(),
            hamming_loss: ratio(fp_all + fn_all, cells),
            jaccard_macro: jaccards.iter().sum::<f64>() / jaccards.len() as f64,
            f1_macro: macro_mean(&categories, |c| c.f1),
            f1_micro: f1(micro_p, micro_r),
            f1_weighted: weighted_f1(&categories),
            categories,
        })
    }
}

impl fmt::Display for MultiLabelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total samples evaluated: {}", self.total)?;
        writeln!(f, "Hamming Loss:          {:.6}", self.hamming_loss)?;
        writeln!(f, "Jaccard Score (macro): {:.6}", self.jaccard_macro)?;
        writeln!(f, "F1 Score (macro):      {:.6}", self.f1_macro)?;
        writeln!(f, "F1 Score (micro):      {:.6}", self.f1_micro)?;
        writeln!(f, "F1 Score (weighted):   {:.6}", self.f1_weighted)?;
        writeln!(f)?;
        write_class_table(f, &self.categories)
    }
}

/// Count/mean/median/max/min of a score column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    /// Upper median (element at `len / 2` of the sorted values)
    pub median: f64,
    pub max: f64,
    pub min: f64,
}

impl SummaryStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            count: sorted.len(),
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            median: sorted[sorted.len() / 2],
            max: sorted[sorted.len() - 1],
            min: sorted[0],
        })
    }
}

/// Narrative run statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeReport {
    pub total: usize,
    pub judge: Option<SummaryStats>,
    pub similarity_f1: Option<SummaryStats>,
    pub similarity_recall: Option<SummaryStats>,
}

fn write_stats(f: &mut fmt::Formatter<'_>, title: &str, stats: &Option<SummaryStats>) -> fmt::Result {
    match stats {
        Some(s) => {
            writeln!(f, "{}:", title)?;
            writeln!(f, "  Mean:   {:.6}", s.mean)?;
            writeln!(f, "  Median: {}", s.median)?;
            writeln!(f, "  Max:    {:.6}", s.max)?;
            writeln!(f, "  Min:    {:.6}", s.min)?;
            writeln!(f, "  Count:  {}", s.count)
        }
        None => writeln!(f, "{}: no scores available", title),
    }
}

impl fmt::Display for NarrativeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total processed samples: {}", self.total)?;
        write_stats(f, "Judge score", &self.judge)?;
        write_stats(f, "Similarity F1", &self.similarity_f1)?;
        write_stats(f, "Similarity recall", &self.similarity_recall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_report() {
        let pairs = [
            ("Drivelology", "Drivelology"),
            ("non-Drivelology", "Drivelology"),
        ];
        let report = ClassificationReport::from_pairs(&pairs).unwrap();

        assert_eq!(report.accuracy, 0.5);
        let driv = report.class("Drivelology").unwrap();
        assert_eq!(driv.precision, 0.5);
        assert_eq!(driv.recall, 1.0);
        assert_eq!(driv.support, 1);

        let non = report.class("non-Drivelology").unwrap();
        assert_eq!(non.precision, 0.0);
        assert_eq!(non.recall, 0.0);
        assert_eq!(non.f1, 0.0);

        assert_eq!(report.confusion, vec![vec![1, 0], vec![1, 0]]);
    }

    #[test]
    fn test_empty_input() {
        let pairs: [(&str, &str); 0] = [];
        assert!(ClassificationReport::from_pairs(&pairs).is_none());
        assert!(MultiLabelReport::from_sets(&[]).is_none());
        assert!(SummaryStats::from_values(&[]).is_none());
    }

    #[test]
    fn test_multilabel_report() {
        let set = |cats: &[Category]| cats.iter().copied().collect::<BTreeSet<_>>();
        let rows = vec![
            (
                set(&[Category::Inversion, Category::Wordplay]),
                set(&[Category::Inversion]),
            ),
            (set(&[Category::Paradox]), set(&[Category::Paradox, Category::Switchbait])),
        ];
        let report = MultiLabelReport::from_sets(&rows).unwrap();

        // 2 wrong cells (wordplay missed, switchbait extra) out of 10
        assert!((report.hamming_loss - 0.2).abs() < 1e-12);

        // tp=2, fp=1, fn=1
        assert!((report.f1_micro - 2.0 / 3.0).abs() < 1e-12);

        // inversion and paradox perfect, the rest zero
        assert!((report.jaccard_macro - 0.4).abs() < 1e-12);
        assert!((report.f1_macro - 0.4).abs() < 1e-12);

        // weighted by support: inversion 1, paradox 1, wordplay 1
        assert!((report.f1_weighted - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_summary_stats_upper_median() {
        let stats = SummaryStats::from_values(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.min, 1.0);
    }
}
