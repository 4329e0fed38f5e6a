use std::path::Path;

use crate::config::RunConfig;
use crate::data::{window_count, windows, Alphabet};
use crate::encode::encode;
use crate::error::{Error, Result};
use crate::learn::Observer;
use crate::model::SequenceModel;

/// How the model gets its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Train from scratch, then write the checkpoint.
    Fresh,
    /// Read the parameters from an existing checkpoint.
    Restored,
}

impl Mode {
    /// `Restored` if a checkpoint exists at `checkpoint`, `Fresh` otherwise.
    pub fn detect<P: AsRef<Path>>(checkpoint: P) -> Self {
        if checkpoint.as_ref().exists() {
            Mode::Restored
        } else {
            Mode::Fresh
        }
    }
}

/// Build a model ready for evaluation.
///
/// # Arguments
/// * `run_config` - The resolved configuration of the run.
/// * `alphabet` - The alphabet of `corpus`.
/// * `corpus` - The training text.
/// * `mode` - Whether to train or to restore the parameters.
/// * `observer` - Receives the training progress.
///
/// # Returns
/// The trained (and saved) or restored model.
pub fn prepare_model(
    run_config: &RunConfig,
    alphabet: &Alphabet,
    corpus: &str,
    mode: Mode,
    observer: &mut Observer,
) -> Result<SequenceModel> {
    tch::manual_seed(run_config.seed as i64);

    let model_config = run_config.model_config(alphabet);
    let mut model = SequenceModel::new(model_config, run_config.device)?;
    tracing::info!(
        parameters = model.n_parameters(),
        hidden_layers = model_config.hidden_layers,
        hidden_size = model_config.hidden_size,
        device = ?run_config.device,
        "model built"
    );

    let model_file = &run_config.model_file;
    match mode {
        Mode::Fresh => {
            let seq_len = run_config.seq_len;
            let n_chars = corpus.chars().count();
            tracing::info!(
                windows = window_count(n_chars, seq_len, run_config.step),
                seq_len,
                "windowing the corpus"
            );

            let pairs = match encode(
                windows(corpus, seq_len, run_config.step),
                alphabet,
                seq_len,
                run_config.device,
            ) {
                Err(Error::NoWindows) => return Err(Error::NoTrainingExamples),
                pairs => pairs?,
            };
            tracing::info!(
                windows = pairs.len(),
                elements = pairs.numel(),
                "training set encoded"
            );

            tracing::info!("Training model...");
            let summary = model.train(
                &pairs.inputs,
                &pairs.targets,
                &run_config.learn_config(),
                observer,
            )?;
            tracing::info!(
                epochs = summary.epochs_completed,
                steps = summary.steps,
                interrupted = summary.interrupted,
                "training done"
            );

            tracing::info!("Saving trained model to file {}", model_file.display());
            model.save(model_file)?;
        }
        Mode::Restored => {
            tracing::info!("Loading model from file {}", model_file.display());
            model.load(model_file)?;
        }
    }

    Ok(model)
}
