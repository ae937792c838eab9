// src/metrics.rs
//
// Training metric stream.
//
// One JSONL file per run under <root>/<mdp_identifier>/train_logs/: a
// header line describing the run, then one line per epoch. Append-only,
// flushed per line so a crashed run still leaves a readable stream.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths::DataRoot;

/// First line of a metric stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHeader {
    pub kind: String,
    pub run_name: String,
    pub mdp_identifier: String,
    /// FNV-1a hash of the effective configuration, for quick "same setup?"
    /// comparisons across runs.
    pub config_hash: String,
    pub seed: u64,
}

impl RunHeader {
    pub fn new(run_name: &str, mdp_identifier: &str, config_hash: u64, seed: u64) -> Self {
        Self {
            kind: "header".to_string(),
            run_name: run_name.to_string(),
            mdp_identifier: mdp_identifier.to_string(),
            config_hash: format!("{config_hash:016x}"),
            seed,
        }
    }
}

/// One line per training epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub kind: String,
    pub epoch: u64,
    pub lr: f64,
    pub steps_collected: usize,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    pub train_reward_mean: f64,
    pub eval_reward_mean: Option<f64>,
    pub best_eval_reward: Option<f64>,
}

impl EpochRecord {
    pub fn new(epoch: u64) -> Self {
        Self {
            kind: "epoch".to_string(),
            epoch,
            lr: 0.0,
            steps_collected: 0,
            policy_loss: 0.0,
            value_loss: 0.0,
            entropy: 0.0,
            approx_kl: 0.0,
            train_reward_mean: 0.0,
            eval_reward_mean: None,
            best_eval_reward: None,
        }
    }
}

/// Destination for metric records.
pub trait MetricsSink: Send {
    fn record_header(&mut self, header: &RunHeader) -> io::Result<()>;
    fn record_epoch(&mut self, record: &EpochRecord) -> io::Result<()>;
}

/// Sink that drops everything (library embedding, tests).
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_header(&mut self, _header: &RunHeader) -> io::Result<()> {
        Ok(())
    }

    fn record_epoch(&mut self, _record: &EpochRecord) -> io::Result<()> {
        Ok(())
    }
}

/// JSONL file sink.
#[derive(Debug)]
pub struct MetricsWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl MetricsWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        DataRoot::ensure_parent(path)?;
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let line = serde_json::to_string(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}

impl MetricsSink for MetricsWriter {
    fn record_header(&mut self, header: &RunHeader) -> io::Result<()> {
        self.write_line(header)
    }

    fn record_epoch(&mut self, record: &EpochRecord) -> io::Result<()> {
        self.write_line(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_is_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mdp/train_logs/run.jsonl");
        let mut sink = MetricsWriter::create(&path).unwrap();

        sink.record_header(&RunHeader::new("run", "mdp", 0xdead_beef, 7))
            .unwrap();
        let mut epoch = EpochRecord::new(1);
        epoch.lr = 1e-3;
        epoch.eval_reward_mean = Some(-3.5);
        sink.record_epoch(&epoch).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let header: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header["kind"], "header");
        assert_eq!(header["seed"], 7);

        let record: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(record["kind"], "epoch");
        assert_eq!(record["epoch"], 1);
        assert_eq!(record["eval_reward_mean"], -3.5);
    }
}
