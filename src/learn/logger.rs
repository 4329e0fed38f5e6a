use std::path::{Path, PathBuf};

use tensorboard_rs::summary_writer::SummaryWriter;

use crate::estimate;
use crate::estimate::{Evaluation, LossEstimates, Split};
use crate::learn::ProgressReporter;

/// Reporter for Tensorboard
///
/// Every training run gets its own log directory named after the run and the
/// time it started.
pub struct TensorboardReporter {
    writer: Option<SummaryWriter>,
    base_dir: PathBuf,
    logdir: Option<PathBuf>,
}

impl TensorboardReporter {
    /// Create a new TensorboardReporter
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            writer: None,
            base_dir: base_dir.as_ref().to_path_buf(),
            logdir: None,
        }
    }

    /// Directory of the current (or last) run, once training has started.
    pub fn logdir(&self) -> Option<&Path> {
        self.logdir.as_deref()
    }
}

impl estimate::ProgressReporter for TensorboardReporter {}

impl ProgressReporter for TensorboardReporter {
    fn epoch_start(&mut self, run_name: String, n_epochs: usize, batches_per_epochs: usize) {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let run_name = format!(
            "{}_{}_{}x{}",
            run_name, timestamp, n_epochs, batches_per_epochs
        );
        let logdir = self.base_dir.join(run_name);
        // create a new writer
        self.writer = Some(SummaryWriter::new(&logdir));
        self.logdir = Some(logdir);
    }

    fn epoch_end(&mut self) {
        // close the writer
        self.writer = None;
    }

    fn estimate_end(&mut self, loss_estimates: LossEstimates) {
        if let Some(writer) = &mut self.writer {
            let step = loss_estimates.epoch;
            writer.add_scalar("train_loss", loss_estimates.train.loss as f32, step);
            writer.add_scalar(
                "train_accuracy",
                loss_estimates.train.accuracy as f32,
                step,
            );
            if let Some(valid) = loss_estimates.valid {
                writer.add_scalar("valid_loss", valid.loss as f32, step);
                writer.add_scalar("valid_accuracy", valid.accuracy as f32, step);
            }
        }
    }
}

/// Reporter that emits one `tracing` event per epoch.
#[derive(Default)]
pub struct TracingReporter {
    n_epochs: usize,
}

impl estimate::ProgressReporter for TracingReporter {
    fn loss_end(&mut self, split: Split, evaluation: &Evaluation) {
        tracing::debug!(
            ?split,
            loss = evaluation.loss,
            accuracy = evaluation.accuracy,
            samples = evaluation.n_samples,
            "loss estimated"
        );
    }
}

impl ProgressReporter for TracingReporter {
    fn epoch_start(&mut self, run_name: String, n_epochs: usize, batches_per_epochs: usize) {
        self.n_epochs = n_epochs;
        tracing::info!(run = %run_name, n_epochs, batches_per_epochs, "training started");
    }

    fn estimate_end(&mut self, loss_estimates: LossEstimates) {
        let LossEstimates {
            epoch,
            train,
            valid,
        } = loss_estimates;
        match valid {
            Some(valid) => tracing::info!(
                "Epoch {}/{}: loss={:.4}, acc={:.4}, val_loss={:.4}, val_acc={:.4}",
                epoch,
                self.n_epochs,
                train.loss,
                train.accuracy,
                valid.loss,
                valid.accuracy
            ),
            None => tracing::info!(
                "Epoch {}/{}: loss={:.4}, acc={:.4}",
                epoch,
                self.n_epochs,
                train.loss,
                train.accuracy
            ),
        }
    }

    fn interrupted(&mut self, completed_batches: usize) {
        tracing::warn!(
            completed_batches,
            "training time limit reached, stopping early"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimates(epoch: usize) -> LossEstimates {
        LossEstimates {
            epoch,
            train: Evaluation {
                loss: 1.5,
                accuracy: 0.25,
                n_samples: 90,
            },
            valid: Some(Evaluation {
                loss: 1.75,
                accuracy: 0.2,
                n_samples: 10,
            }),
        }
    }

    #[test]
    fn test_tensorboard_reporter_creates_run_dir() {
        let base_dir = std::env::temp_dir().join(format!("charseq-tb-{}", std::process::id()));
        let mut reporter = TensorboardReporter::new(&base_dir);
        assert!(reporter.logdir().is_none());

        reporter.epoch_start("corpus".to_string(), 2, 5);
        reporter.estimate_end(estimates(1));
        reporter.estimate_end(estimates(2));
        reporter.epoch_end();

        let logdir = reporter.logdir().unwrap().to_path_buf();
        assert!(logdir.starts_with(&base_dir));
        let name = logdir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("corpus_"), "{}", name);
        assert!(name.ends_with("_2x5"), "{}", name);
        assert!(logdir.exists());

        let _ = std::fs::remove_dir_all(&base_dir);
    }

    #[test]
    fn test_tracing_reporter_without_subscriber() {
        let mut reporter = TracingReporter::default();
        reporter.epoch_start("run".to_string(), 3, 1);
        reporter.estimate_end(estimates(1));
        reporter.estimate_end(LossEstimates {
            valid: None,
            ..estimates(2)
        });
        reporter.interrupted(7);
        assert_eq!(reporter.n_epochs, 3);
    }
}
