/// Logger for training.
pub mod logger;

use std::fmt::Write;
use std::time::Instant;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};
use rand::SeedableRng;
use tch::nn::OptimizerConfig;

use crate::config::LearnConfig;
use crate::data::Loader;
use crate::error::Result;
use crate::estimate;
use crate::estimate::{Evaluation, LossEstimates, LossEstimator, Split};
use crate::model::{loss, SequenceModel};

/// A trait for reporting progress during training.
#[allow(unused_variables)]
pub trait ProgressReporter: estimate::ProgressReporter {
    /// Called before epoch starts.
    fn epoch_start(&mut self, run_name: String, n_epochs: usize, batches_per_epochs: usize) {}
    /// Called when some batches have been processed.
    fn epoch_progress(&mut self, current_batch: usize) {}
    /// Called when all epochs have been processed.
    fn epoch_end(&mut self) {}

    /// Called when the training of an epoch starts.
    fn train_start(&mut self, n_train_batches: usize) {}
    /// Called when some batches have been processed.
    fn train_progress(&mut self, current_train_batches: usize) {}
    /// Called when the training of an epoch ends.
    fn train_end(&mut self) {}

    /// Called when the loss estimation starts.
    fn estimate_start(&mut self) {}
    /// Called when the loss estimation ends.
    fn estimate_end(&mut self, loss_estimates: LossEstimates) {}

    /// Called when training stops before the last epoch.
    fn interrupted(&mut self, completed_batches: usize) {}
}

/// Training observer.
#[derive(Default)]
pub struct Observer {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl Observer {
    /// Add a reporter to the observer.
    pub fn with(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl ProgressReporter for Observer {
    fn epoch_start(&mut self, run_name: String, n_epochs: usize, batches_per_epochs: usize) {
        for reporter in &mut self.reporters {
            reporter.epoch_start(run_name.clone(), n_epochs, batches_per_epochs);
        }
    }

    fn epoch_progress(&mut self, current_batch: usize) {
        for reporter in &mut self.reporters {
            reporter.epoch_progress(current_batch);
        }
    }

    fn epoch_end(&mut self) {
        for reporter in &mut self.reporters {
            reporter.epoch_end();
        }
    }

    fn train_start(&mut self, n_train_batches: usize) {
        for reporter in &mut self.reporters {
            reporter.train_start(n_train_batches);
        }
    }

    fn train_progress(&mut self, current_train_batches: usize) {
        for reporter in &mut self.reporters {
            reporter.train_progress(current_train_batches);
        }
    }

    fn train_end(&mut self) {
        for reporter in &mut self.reporters {
            reporter.train_end();
        }
    }

    fn estimate_start(&mut self) {
        for reporter in &mut self.reporters {
            reporter.estimate_start();
        }
    }

    fn estimate_end(&mut self, loss_estimates: LossEstimates) {
        for reporter in &mut self.reporters {
            reporter.estimate_end(loss_estimates.clone());
        }
    }

    fn interrupted(&mut self, completed_batches: usize) {
        for reporter in &mut self.reporters {
            reporter.interrupted(completed_batches);
        }
    }
}

impl estimate::ProgressReporter for Observer {
    fn loss_start(&mut self, split: Split, total_batches: usize) {
        for reporter in &mut self.reporters {
            reporter.loss_start(split, total_batches);
        }
    }

    fn loss_progress(&mut self, split: Split, current_batches: usize) {
        for reporter in &mut self.reporters {
            reporter.loss_progress(split, current_batches);
        }
    }

    fn loss_end(&mut self, split: Split, evaluation: &Evaluation) {
        for reporter in &mut self.reporters {
            reporter.loss_end(split, evaluation);
        }
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key(
            "per_sec_short",
            |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "{:>7.1}/s", state.per_sec());
            },
        )
        .progress_chars("##-")
}

/// Progress reporter that uses the `indicatif` crate to display progress bars.
///
/// We want progress bar like: ```[198/200 35:16 < 00:21, 0.09/s]```
pub struct PbProgressReporter {
    mb: MultiProgress,
    epoch_bar: Option<ProgressBar>,
    train_bar: Option<ProgressBar>,
    estimate_bar: Option<ProgressBar>,
    loss_bar: Option<ProgressBar>,
    current_epoch: usize,
    batches_per_epoch: usize,
    train_loss: f64,
}

impl Default for PbProgressReporter {
    fn default() -> Self {
        let mb = MultiProgress::new();
        PbProgressReporter {
            mb,
            epoch_bar: None,
            train_bar: None,
            estimate_bar: None,
            loss_bar: None,
            current_epoch: 0,
            batches_per_epoch: 0,
            train_loss: 0.0,
        }
    }
}

impl ProgressReporter for PbProgressReporter {
    fn epoch_start(&mut self, _run_name: String, n_epochs: usize, batches_per_epochs: usize) {
        let epoch_bar = self
            .mb
            .add(ProgressBar::new((n_epochs * batches_per_epochs) as u64));
        let batches = batches_per_epochs.max(1);
        epoch_bar.set_style(
            bar_style("{spinner:.green} MASTER   {bar:20.cyan/blue} [{pos:>7}/{len:7} {elapsed_precise} < {eta_precise}, {per_sec_short:.2}, Epoch {epoch_progress}] {msg}")
                .with_key("epoch_progress",
                          move |state: &ProgressState, w: &mut dyn Write| {
                              let _ = write!(w, "{:>4.1}/{}", state.pos() as f32 / batches as f32, n_epochs);
                          }),
        );

        epoch_bar.tick();
        self.epoch_bar = Some(epoch_bar);
        self.current_epoch = 0;
        self.batches_per_epoch = batches;
    }

    fn epoch_progress(&mut self, current_batch: usize) {
        if let Some(epoch_bar) = &self.epoch_bar {
            epoch_bar.set_position(current_batch as u64);
        }

        self.current_epoch = current_batch / self.batches_per_epoch.max(1);
    }

    fn epoch_end(&mut self) {
        if let Some(epoch_bar) = &self.epoch_bar {
            epoch_bar.finish_and_clear();
        }
        self.epoch_bar = None;
    }

    fn train_start(&mut self, n_train_batches: usize) {
        let train_bar = self.mb.add(ProgressBar::new(n_train_batches as u64));
        train_bar.set_style(bar_style(
            "{spinner:.green} TRAINING {bar:20.green/blue} [{pos:>7}/{len:7} {elapsed_precise} < {eta_precise}, {per_sec_short:.2}] {msg}",
        ));
        train_bar.tick();
        self.train_bar = Some(train_bar);
    }

    fn train_progress(&mut self, current_train_batches: usize) {
        if let Some(train_bar) = &self.train_bar {
            train_bar.set_position(current_train_batches as u64);
        }
    }

    fn train_end(&mut self) {
        if let Some(train_bar) = &self.train_bar {
            train_bar.finish_and_clear();
        }
        self.train_bar = None;
    }

    fn estimate_start(&mut self) {
        let estimate_bar = self.mb.add(ProgressBar::new(2));
        estimate_bar.set_style(bar_style(
            "{spinner:.green} EVAL     {bar:20.magenta/blue} [{pos:>7}/{len:7} {elapsed_precise} < {eta_precise}, {per_sec_short:.2}] {msg}",
        ));
        estimate_bar.tick();
        self.estimate_bar = Some(estimate_bar);
    }

    fn estimate_end(&mut self, loss_estimates: LossEstimates) {
        if let Some(estimate_bar) = &self.estimate_bar {
            let valid = loss_estimates
                .valid
                .map(|valid| {
                    format!(
                        ", Valid loss: {:.4}, Valid acc: {:.4}",
                        valid.loss, valid.accuracy
                    )
                })
                .unwrap_or_default();
            estimate_bar.set_message(format!(
                "Epoch {}, Train loss: {:.4}, Train acc: {:.4}{}",
                loss_estimates.epoch,
                loss_estimates.train.loss,
                loss_estimates.train.accuracy,
                valid
            ));
            estimate_bar.finish(); // keep the bar
        }
        self.estimate_bar = None;
    }
}

impl estimate::ProgressReporter for PbProgressReporter {
    fn loss_start(&mut self, split: Split, total_batches: usize) {
        let template = match split {
            Split::Train => "{spinner:.green}        T {bar:20.yellow/blue} [{pos:>7}/{len:7} {elapsed_precise} < {eta_precise}, {per_sec_short:.2}] {msg}",
            Split::Valid | Split::Eval => "{spinner:.green}        E {bar:20.yellow/blue} [{pos:>7}/{len:7} {elapsed_precise} < {eta_precise}, {per_sec_short:.2}] {msg}",
        };
        let loss_bar = self.mb.add(ProgressBar::new(total_batches as u64));
        loss_bar.set_style(bar_style(template));
        self.loss_bar = Some(loss_bar);
    }

    fn loss_progress(&mut self, _split: Split, current_batches: usize) {
        if let Some(loss_bar) = &self.loss_bar {
            loss_bar.set_position(current_batches as u64);
        }
    }

    fn loss_end(&mut self, split: Split, evaluation: &Evaluation) {
        if let Some(loss_bar) = &self.loss_bar {
            loss_bar.finish_and_clear();
        }
        self.loss_bar = None;

        if let Some(estimate_bar) = &self.estimate_bar {
            match split {
                Split::Train => {
                    self.train_loss = evaluation.loss;
                    estimate_bar.set_message(format!(
                        "Epoch {}, Train loss: {:.4}",
                        self.current_epoch, evaluation.loss
                    ));
                }
                Split::Valid | Split::Eval => {
                    estimate_bar.set_message(format!(
                        "Epoch {}, Train loss: {:.4}, Valid loss: {:.4}",
                        self.current_epoch, self.train_loss, evaluation.loss
                    ));
                }
            }
            // progress on the estimate bar
            estimate_bar.inc(1);
        }
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// Number of epochs run to completion.
    pub epochs_completed: usize,
    /// Number of optimizer steps.
    pub steps: usize,
    /// True if the deadline stopped the training.
    pub interrupted: bool,
    /// The estimates computed at the end of the last epoch.
    pub last_estimates: Option<LossEstimates>,
}

/// Train the model
///
/// Every epoch visits the training set once in a new random order, then
/// estimates the loss and accuracy on the training and validation sets.
/// When `max_duration` is set, training stops after the batch during which
/// the deadline passes; the partial epoch is still estimated.
pub fn learn(
    learn_config: &LearnConfig,
    train_dataloader: &mut Loader,
    valid_dataloader: &mut Loader,
    model: &SequenceModel,
    observer: &mut Observer,
) -> Result<TrainingSummary> {
    let LearnConfig {
        n_epochs,
        lr,
        seed,
        ref run_name,
        max_duration,
        ..
    } = *learn_config;

    let deadline = max_duration.map(|d| Instant::now() + d);
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);

    // clones the dataloaders for the loss estimation
    let mut train_dataloader_loss = train_dataloader.clone();
    let mut valid_dataloader_loss = valid_dataloader.clone();

    let batches_per_epoch = train_dataloader.n_batches();

    let mut opt = tch::nn::Adam::default().build(model.var_store(), lr)?;

    observer.epoch_start(run_name.clone(), n_epochs, batches_per_epoch);

    let mut summary = TrainingSummary {
        epochs_completed: 0,
        steps: 0,
        interrupted: false,
        last_estimates: None,
    };

    for epoch in 1..=n_epochs {
        observer.train_start(batches_per_epoch);
        train_dataloader.shuffle(&mut rng);

        let mut n_batches = 0;
        while let Some((xs, ys)) = train_dataloader.next_batch() {
            let logits = model.forward_t(&xs, true);
            let loss_value = loss(&logits, &ys);

            opt.zero_grad();
            loss_value.backward();
            opt.step();

            n_batches += 1;
            summary.steps += 1;

            if n_batches % 10 == 0 {
                observer.train_progress(n_batches);
                observer.epoch_progress(summary.steps);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                summary.interrupted = true;
                break;
            }
        }
        observer.train_end();
        observer.epoch_progress(summary.steps);

        observer.estimate_start();
        let loss_estimates =
            LossEstimator::new(&mut train_dataloader_loss, &mut valid_dataloader_loss)
                .estimate_loss(model, epoch, observer)?;
        observer.estimate_end(loss_estimates.clone());
        summary.last_estimates = Some(loss_estimates);

        if summary.interrupted {
            observer.interrupted(summary.steps);
            break;
        }
        summary.epochs_completed = epoch;
    }

    observer.epoch_end();

    Ok(summary)
}
