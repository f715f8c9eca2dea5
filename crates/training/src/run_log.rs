//! Plain-text epoch log and optional JSONL metrics stream.

use crate::metrics::EpochStats;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Text log of epoch summaries and checkpoint errors.
///
/// The file is truncated when the log is created; every later write reopens it in append mode.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    /// Appends `[ERROR] {message}`. A failing write is reported but never propagated.
    pub fn error(&self, message: &str) {
        if let Err(e) = self.append(&format!("[ERROR] {message}")) {
            tracing::warn!(path = %self.path.display(), "failed to append error line: {e}");
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EpochMetrics<'a> {
    pub epoch: usize,
    pub lr: f64,
    pub train: PhaseMetrics,
    pub val: PhaseMetrics,
    pub checkpoint: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
pub struct PhaseMetrics {
    pub accuracy: f64,
    pub loss: f64,
    pub correct: usize,
    pub total: usize,
}

impl From<&EpochStats> for PhaseMetrics {
    fn from(stats: &EpochStats) -> Self {
        Self {
            accuracy: stats.accuracy(),
            loss: stats.mean_loss(),
            correct: stats.correct,
            total: stats.total,
        }
    }
}

/// Appends one JSON object per epoch.
#[derive(Debug, Clone)]
pub struct MetricsWriter {
    path: PathBuf,
}

impl MetricsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write(&self, record: &EpochMetrics<'_>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_truncates_then_appends_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("train.txt");
        fs::write(&path, "stale\n").unwrap();

        let log = RunLog::create(&path).unwrap();
        log.append("[train-0/2] [acc-0.5000, loss-1.0000] [1/2]").unwrap();
        log.error("disk full");
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "[train-0/2] [acc-0.5000, loss-1.0000] [1/2]\n[ERROR] disk full\n"
        );
    }

    #[test]
    fn metrics_lines_are_json_objects() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("logs/metrics.jsonl");
        let writer = MetricsWriter::new(&path);
        let mut stats = EpochStats::default();
        stats.record(3, 4, 0.5);
        for epoch in 0..2 {
            writer
                .write(&EpochMetrics {
                    epoch,
                    lr: 1e-4,
                    train: (&stats).into(),
                    val: (&stats).into(),
                    checkpoint: None,
                })
                .unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["epoch"], 1);
        assert_eq!(lines[0]["val"]["correct"], 3);
        assert!(lines[0]["checkpoint"].is_null());
    }
}
