//! charseq: train a character LSTM on a text file, then score lines read from
//! stdin.
use std::io;

use anyhow::Context;
use charseq::actions::{prepare_model, Mode};
use charseq::config::{Args, RunConfig};
use charseq::data::{load_file, Alphabet};
use charseq::interactive::{Evaluator, PromptedLines};
use charseq::learn::logger::{TensorboardReporter, TracingReporter};
use charseq::learn::{Observer, PbProgressReporter};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("charseq=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let corpus = load_file(&args.dataset)
        .with_context(|| format!("failed to read dataset {}", args.dataset.display()))?;
    let run_config = RunConfig::from_args(&args, &corpus).context("invalid configuration")?;
    let alphabet = Alphabet::new(&corpus)?;
    tracing::info!(
        dataset = %run_config.dataset.display(),
        chars = corpus.chars().count(),
        alphabet = alphabet.size(),
        "corpus loaded"
    );
    tracing::info!("MaxLen = {}", run_config.seq_len);

    let mode = Mode::detect(&run_config.model_file);
    tracing::info!(?mode, checkpoint = %run_config.model_file.display(), "mode selected");

    let mut observer = Observer::default()
        .with(Box::new(PbProgressReporter::default()))
        .with(Box::new(TracingReporter::default()));
    if let Some(tensorboard_dir) = &run_config.tensorboard_dir {
        observer = observer.with(Box::new(TensorboardReporter::new(tensorboard_dir)));
    }

    let model = prepare_model(&run_config, &alphabet, &corpus, mode, &mut observer)
        .with_context(|| format!("failed to prepare the model in {:?} mode", mode))?;

    let evaluator = Evaluator::new(&model, &alphabet, &run_config);
    let mut lines = PromptedLines::new(io::stdin().lock(), io::stdout());
    let n_lines = evaluator.run(&mut lines, &mut io::stdout())?;
    tracing::debug!(n_lines, "input exhausted");

    Ok(())
}
