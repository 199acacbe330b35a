//! Lightweight per-step timing instrumentation.
//!
//! The scan orchestrator brackets every sub-step (motion, capture,
//! reconstruction, save) with begin/end marks. At the end of a session the
//! marks are paired into elapsed-time samples and condensed into
//! per-category statistics for the session report. Categories with
//! unmatched marks are flagged and logged, never fatal.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a mark opens or closes an activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkKind {
    /// Activity started.
    Begin,
    /// Activity finished.
    End,
}

/// One raw timestamped mark.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingMark {
    /// Step index the activity belongs to.
    pub step: usize,
    /// Begin or end.
    pub kind: MarkKind,
    /// UTC timestamp of the mark.
    pub at: DateTime<Utc>,
}

/// A paired begin/end sample for one step of one category.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingSample {
    /// Step index.
    pub step: usize,
    /// Begin timestamp.
    pub begin: DateTime<Utc>,
    /// End timestamp.
    pub end: DateTime<Utc>,
}

impl TimingSample {
    /// Elapsed time of this sample in seconds.
    pub fn elapsed_s(&self) -> f64 {
        (self.end - self.begin).num_microseconds().unwrap_or(0) as f64 / 1e6
    }
}

/// Derived statistics for one activity category.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryStats {
    /// Paired samples, in acquisition order.
    pub samples: Vec<TimingSample>,
    /// Total elapsed time across samples, seconds.
    pub total_s: f64,
    /// Mean elapsed time per sample, seconds.
    pub mean_s: f64,
    /// Population standard deviation of elapsed times, seconds.
    pub std_dev_s: f64,
    /// Total elapsed as a percentage of the whole run duration.
    pub percent_of_run: f64,
    /// `(step, elapsed_s)` time series.
    pub series: Vec<(usize, f64)>,
    /// Number of begin/end marks that could not be paired.
    pub unmatched_marks: usize,
}

/// Finalized timing report for one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingReport {
    /// Session start time.
    pub started: Option<DateTime<Utc>>,
    /// Session end time.
    pub finished: Option<DateTime<Utc>>,
    /// Whole-run duration in seconds.
    pub total_duration_s: f64,
    /// Statistics per activity category.
    pub categories: BTreeMap<String, CategoryStats>,
}

/// Records begin/end marks per category and produces the session report.
#[derive(Default)]
pub struct TimingMonitor {
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    marks: BTreeMap<String, Vec<TimingMark>>,
}

impl TimingMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all marks and brackets the start of a session.
    pub fn start(&mut self) {
        self.marks.clear();
        self.finished = None;
        self.started = Some(Utc::now());
    }

    /// Brackets the end of a session, establishing the total run duration.
    pub fn finish(&mut self) {
        self.finished = Some(Utc::now());
    }

    /// Appends a timestamped mark for `category` at `step`.
    pub fn mark(&mut self, category: &str, step: usize, kind: MarkKind) {
        self.marks
            .entry(category.to_string())
            .or_default()
            .push(TimingMark {
                step,
                kind,
                at: Utc::now(),
            });
    }

    /// Pairs marks into samples and computes per-category statistics.
    pub fn build_report(&self) -> TimingReport {
        let total_duration_s = match (self.started, self.finished) {
            (Some(t0), Some(t1)) => {
                (t1 - t0).num_microseconds().unwrap_or(0).max(0) as f64 / 1e6
            }
            _ => 0.0,
        };

        let mut categories = BTreeMap::new();
        for (category, marks) in &self.marks {
            let stats = Self::category_stats(category, marks, total_duration_s);
            categories.insert(category.clone(), stats);
        }

        TimingReport {
            started: self.started,
            finished: self.finished,
            total_duration_s,
            categories,
        }
    }

    fn category_stats(category: &str, marks: &[TimingMark], run_s: f64) -> CategoryStats {
        let mut samples = Vec::new();
        let mut unmatched = 0usize;
        let mut open: Option<&TimingMark> = None;

        for mark in marks {
            match (mark.kind, open) {
                (MarkKind::Begin, None) => open = Some(mark),
                (MarkKind::Begin, Some(_)) => {
                    // Previous begin never closed.
                    unmatched += 1;
                    open = Some(mark);
                }
                (MarkKind::End, Some(begin)) if begin.step == mark.step => {
                    samples.push(TimingSample {
                        step: mark.step,
                        begin: begin.at,
                        end: mark.at,
                    });
                    open = None;
                }
                (MarkKind::End, _) => unmatched += 1,
            }
        }
        if open.is_some() {
            unmatched += 1;
        }
        if unmatched > 0 {
            warn!(
                "Timing category '{}' has {} unmatched mark(s); statistics cover paired samples only",
                category, unmatched
            );
        }

        let series: Vec<(usize, f64)> =
            samples.iter().map(|s| (s.step, s.elapsed_s())).collect();
        let total_s: f64 = series.iter().map(|(_, e)| e).sum();
        let n = series.len();
        let mean_s = if n > 0 { total_s / n as f64 } else { 0.0 };
        let variance = if n > 0 {
            series
                .iter()
                .map(|(_, e)| (e - mean_s).powi(2))
                .sum::<f64>()
                / n as f64
        } else {
            0.0
        };
        let percent_of_run = if run_s > 0.0 {
            100.0 * total_s / run_s
        } else {
            0.0
        };

        CategoryStats {
            samples,
            total_s,
            mean_s,
            std_dev_s: variance.sqrt(),
            percent_of_run,
            series,
            unmatched_marks: unmatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_and_stats() {
        let mut monitor = TimingMonitor::new();
        monitor.start();
        for step in 0..3 {
            monitor.mark("capture", step, MarkKind::Begin);
            monitor.mark("capture", step, MarkKind::End);
        }
        monitor.finish();

        let report = monitor.build_report();
        let stats = &report.categories["capture"];
        assert_eq!(stats.samples.len(), 3);
        assert_eq!(stats.unmatched_marks, 0);
        assert_eq!(stats.series.len(), 3);
        assert_eq!(stats.series[2].0, 2);
        assert!(stats.total_s >= 0.0);
        assert!(stats.mean_s >= 0.0);
    }

    #[test]
    fn test_unmatched_marks_are_flagged_not_dropped_silently() {
        let mut monitor = TimingMonitor::new();
        monitor.start();
        monitor.mark("motion", 0, MarkKind::Begin);
        monitor.mark("motion", 0, MarkKind::End);
        // A dangling begin with no end.
        monitor.mark("motion", 1, MarkKind::Begin);
        // An end with no begin.
        monitor.mark("save", 0, MarkKind::End);
        monitor.finish();

        let report = monitor.build_report();
        assert_eq!(report.categories["motion"].samples.len(), 1);
        assert_eq!(report.categories["motion"].unmatched_marks, 1);
        assert_eq!(report.categories["save"].samples.len(), 0);
        assert_eq!(report.categories["save"].unmatched_marks, 1);
    }

    #[test]
    fn test_start_clears_previous_session() {
        let mut monitor = TimingMonitor::new();
        monitor.start();
        monitor.mark("capture", 0, MarkKind::Begin);
        monitor.mark("capture", 0, MarkKind::End);
        monitor.finish();

        monitor.start();
        monitor.finish();
        let report = monitor.build_report();
        assert!(report.categories.is_empty());
    }

    #[test]
    fn test_end_with_mismatched_step_is_unmatched() {
        let mut monitor = TimingMonitor::new();
        monitor.start();
        monitor.mark("capture", 0, MarkKind::Begin);
        monitor.mark("capture", 1, MarkKind::End);
        monitor.finish();

        let report = monitor.build_report();
        let stats = &report.categories["capture"];
        assert_eq!(stats.samples.len(), 0);
        // Both the stray end and the dangling begin are counted.
        assert_eq!(stats.unmatched_marks, 2);
    }
}
