use crate::data::Loader;
use crate::error::{Error, Result};
use crate::model::{correct, loss, SequenceModel};

/// Loss and accuracy of a model on a set of windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean cross-entropy loss.
    pub loss: f64,
    /// Fraction of the windows whose target got the highest score.
    pub accuracy: f64,
    /// Number of windows.
    pub n_samples: usize,
}

/// Estimates of the loss on the training and validation sets.
#[derive(Debug, Clone, PartialEq)]
pub struct LossEstimates {
    /// Epoch at the end of which the estimates were computed (1-based).
    pub epoch: usize,
    /// Estimate on the training set.
    pub train: Evaluation,
    /// Estimate on the validation set, if there is one.
    pub valid: Option<Evaluation>,
}

/// Which set a loss estimation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// The training set.
    Train,
    /// The held-out validation set.
    Valid,
    /// Data outside of training, e.g. an interactive query.
    Eval,
}

/// Interface for a progress reporter.
#[allow(unused_variables)]
pub trait ProgressReporter {
    /// Called at the start of a loss estimation.
    fn loss_start(&mut self, split: Split, total_batches: usize) {}
    /// Called to update the progress of a loss estimation.
    fn loss_progress(&mut self, split: Split, current_batches: usize) {}
    /// Called at the end of a loss estimation.
    fn loss_end(&mut self, split: Split, evaluation: &Evaluation) {}
}

/// A progress reporter that does nothing.
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Loss estimator over every sample of a loader.
pub struct Estimator<'a> {
    loader: &'a mut Loader,
    split: Split,
}

impl<'a> Estimator<'a> {
    /// Create a new estimator.
    pub fn new(loader: &'a mut Loader) -> Self {
        Self {
            loader,
            split: Split::Eval,
        }
    }

    /// Set the split reported to the progress reporter.
    pub fn with_split(mut self, split: Split) -> Self {
        self.split = split;
        self
    }

    /// Estimate the loss and accuracy of a model, in eval mode and without
    /// tracking gradients.
    pub fn estimate(
        &mut self,
        model: &SequenceModel,
        progress_callback: &mut impl ProgressReporter,
    ) -> Result<Evaluation> {
        let split = self.split;
        self.loader.rewind();

        progress_callback.loss_start(split, self.loader.n_batches());

        let mut loss_sum = 0.0;
        let mut n_correct = 0;
        let mut n_samples = 0;
        let mut n_batches = 0;

        tch::no_grad(|| -> Result<()> {
            while let Some((xs, ys)) = self.loader.next_batch() {
                let batch_len = xs.size()[0] as usize;
                let logits = model.forward_t(&xs, false);
                loss_sum += f64::try_from(loss(&logits, &ys))? * batch_len as f64;
                n_correct += i64::try_from(correct(&logits, &ys))?;
                n_samples += batch_len;
                n_batches += 1;

                if n_batches % 10 == 0 {
                    progress_callback.loss_progress(split, n_batches);
                }
            }
            Ok(())
        })?;

        if n_samples == 0 {
            return Err(Error::NoWindows);
        }

        let evaluation = Evaluation {
            loss: loss_sum / n_samples as f64,
            accuracy: n_correct as f64 / n_samples as f64,
            n_samples,
        };

        progress_callback.loss_end(split, &evaluation);

        Ok(evaluation)
    }
}

/// Estimates the loss on the training and validation sets.
pub struct LossEstimator<'a> {
    train_dataloader: &'a mut Loader,
    valid_dataloader: &'a mut Loader,
}

impl<'a> LossEstimator<'a> {
    /// Create a new loss estimator.
    pub fn new(train_dataloader: &'a mut Loader, valid_dataloader: &'a mut Loader) -> Self {
        Self {
            train_dataloader,
            valid_dataloader,
        }
    }

    /// Estimate the loss of a model on the training and validation sets.
    /// The validation estimate is skipped when the validation set is empty.
    pub fn estimate_loss(
        &mut self,
        model: &SequenceModel,
        epoch: usize,
        progress_callback: &mut impl ProgressReporter,
    ) -> Result<LossEstimates> {
        let train = Estimator::new(self.train_dataloader)
            .with_split(Split::Train)
            .estimate(model, progress_callback)?;

        let valid = if self.valid_dataloader.is_empty() {
            None
        } else {
            Some(
                Estimator::new(self.valid_dataloader)
                    .with_split(Split::Valid)
                    .estimate(model, progress_callback)?,
            )
        };

        Ok(LossEstimates {
            epoch,
            train,
            valid,
        })
    }
}
