use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::data::{longest_line, Alphabet, REDUNDANCY_STEP};
use crate::error::{Error, Result};
use crate::model::{ModelConfig, DROPOUT};

/// Fraction of the training windows held out for validation.
pub const VALIDATION_FRACTION: f64 = 0.1;

/// Learning rate of the Adam optimizer.
pub const LEARNING_RATE: f64 = 0.001;

/// Torch device to use.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
    /// CPU
    #[default]
    Cpu,
    /// CUDA if available
    Cuda,
    /// MPS
    #[cfg(target_arch = "aarch64")]
    Mps,
}

impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => tch::Device::Cpu,
            Device::Cuda => tch::Device::cuda_if_available(),
            #[cfg(target_arch = "aarch64")]
            Device::Mps => tch::Device::Mps,
        }
    }
}

/// Simple parametrized LSTM network for sequence evaluation.
///
/// Trains a model on the dataset unless a checkpoint exists at `model_file`,
/// in which case the checkpoint is loaded. Then evaluates lines read from the
/// standard input.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the dataset file
    #[arg(long)]
    pub dataset: PathBuf,

    /// How many sequences to train on at a time
    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    /// How many epochs to train
    #[arg(long, default_value_t = 1)]
    pub epochs: usize,

    /// Path to save the model file, will be loaded if present or created
    #[arg(long, default_value = "model.tfl")]
    pub model_file: PathBuf,

    /// Number of hidden LSTM layers
    #[arg(long, default_value_t = 1)]
    pub hidden_layer_size: usize,

    /// Number of nodes in each LSTM layer
    #[arg(long, default_value_t = 256)]
    pub lstm_node_size: usize,

    /// Max length of a sequence sample. If 0, it is set to the length of the
    /// longest line of the dataset (Warning: requires a serious amount of
    /// memory)
    #[arg(long, default_value_t = 0)]
    pub max_sequence_length: usize,

    /// The device to use
    #[arg(short, long, default_value = "cpu")]
    pub device: Device,

    /// Seed for the weights initialization and the batch shuffling
    #[arg(long, default_value_t = 142)]
    pub seed: u64,

    /// Name of the run - defaults to the file name of the dataset
    #[arg(long)]
    pub run_name: Option<String>,

    /// Path to the tensorboard directory.
    /// If not provided, no tensorboard logging will be done.
    #[arg(long)]
    pub tensorboard_dir: Option<String>,

    /// Stop training after this many seconds (the model is still saved)
    #[arg(long)]
    pub max_train_secs: Option<u64>,
}

/// The configuration for the learning process
#[derive(Debug, Clone)]
pub struct LearnConfig {
    /// The number of epochs to train
    pub n_epochs: usize,
    /// The batch size
    pub batch_size: usize,
    /// The fraction of the examples used for validation
    pub validation_fraction: f64,
    /// The learning rate
    pub lr: f64,
    /// Seed of the batch shuffler
    pub seed: u64,
    /// Name of the run
    pub run_name: String,
    /// Training stops once this much time has elapsed
    pub max_duration: Option<Duration>,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            n_epochs: 1,
            batch_size: 128,
            validation_fraction: VALIDATION_FRACTION,
            lr: LEARNING_RATE,
            seed: 142,
            run_name: "run".to_string(),
            max_duration: None,
        }
    }
}

/// Immutable configuration of a run, resolved once from the command line and
/// the corpus.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Path to the dataset file
    pub dataset: PathBuf,
    /// Path to the checkpoint
    pub model_file: PathBuf,
    /// Batch size
    pub batch_size: usize,
    /// Number of epochs
    pub epochs: usize,
    /// Number of sequence-returning LSTM layers
    pub hidden_layers: usize,
    /// Width of every LSTM layer
    pub hidden_size: usize,
    /// Window length
    pub seq_len: usize,
    /// Offset between two consecutive windows
    pub step: usize,
    /// Device holding the model and the tensors
    pub device: tch::Device,
    /// Seed
    pub seed: u64,
    /// Name of the run
    pub run_name: String,
    /// Tensorboard directory
    pub tensorboard_dir: Option<String>,
    /// Training deadline
    pub max_train_duration: Option<Duration>,
}

fn positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        Err(Error::InvalidConfig(format!("{name} must be positive")))
    } else {
        Ok(value)
    }
}

fn default_run_name(dataset: &Path) -> String {
    dataset
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "run".to_string())
}

impl RunConfig {
    /// Resolve the configuration of a run.
    ///
    /// A `max_sequence_length` of 0 is replaced by the length of the longest
    /// line of `corpus`.
    pub fn from_args(args: &Args, corpus: &str) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let seq_len = if args.max_sequence_length == 0 {
            longest_line(corpus)
        } else {
            args.max_sequence_length
        };
        if seq_len == 0 {
            return Err(Error::InvalidSequenceLength);
        }

        Ok(Self {
            dataset: args.dataset.clone(),
            model_file: args.model_file.clone(),
            batch_size: positive("batch size", args.batch_size)?,
            epochs: positive("epochs", args.epochs)?,
            hidden_layers: positive("hidden layer size", args.hidden_layer_size)?,
            hidden_size: positive("lstm node size", args.lstm_node_size)?,
            seq_len,
            step: REDUNDANCY_STEP,
            device: args.device.into(),
            seed: args.seed,
            run_name: args
                .run_name
                .clone()
                .unwrap_or_else(|| default_run_name(&args.dataset)),
            tensorboard_dir: args.tensorboard_dir.clone(),
            max_train_duration: args.max_train_secs.map(Duration::from_secs),
        })
    }

    /// The architecture of the model for `alphabet`.
    pub fn model_config(&self, alphabet: &Alphabet) -> ModelConfig {
        ModelConfig {
            alphabet_size: alphabet.size() as i64,
            seq_len: self.seq_len as i64,
            hidden_layers: self.hidden_layers as i64,
            hidden_size: self.hidden_size as i64,
            dropout: DROPOUT,
        }
    }

    /// The configuration of the training loop.
    pub fn learn_config(&self) -> LearnConfig {
        LearnConfig {
            n_epochs: self.epochs,
            batch_size: self.batch_size,
            validation_fraction: VALIDATION_FRACTION,
            lr: LEARNING_RATE,
            seed: self.seed,
            run_name: self.run_name.clone(),
            max_duration: self.max_train_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["charseq", "--dataset", "data/input.txt"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_command() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.dataset, PathBuf::from("data/input.txt"));
        assert_eq!(args.batch_size, 128);
        assert_eq!(args.epochs, 1);
        assert_eq!(args.model_file, PathBuf::from("model.tfl"));
        assert_eq!(args.hidden_layer_size, 1);
        assert_eq!(args.lstm_node_size, 256);
        assert_eq!(args.max_sequence_length, 0);
        assert_eq!(args.device, Device::Cpu);
        assert!(args.run_name.is_none());
        assert!(args.max_train_secs.is_none());
    }

    #[test]
    fn test_dataset_is_required() {
        assert!(Args::try_parse_from(["charseq"]).is_err());
    }

    #[test]
    fn test_derived_sequence_length() {
        let args = parse(&[]);
        let config = RunConfig::from_args(&args, "abc\nabcdef\nab").unwrap();
        assert_eq!(config.seq_len, 7);
        assert_eq!(config.step, REDUNDANCY_STEP);
        assert_eq!(config.run_name, "input.txt");
        assert_eq!(config.hidden_size, 256);

        let args = parse(&["--max-sequence-length", "4", "--run-name", "shakespeare"]);
        let config = RunConfig::from_args(&args, "abc\nabcdef\nab").unwrap();
        assert_eq!(config.seq_len, 4);
        assert_eq!(config.run_name, "shakespeare");
    }

    #[test]
    fn test_invalid() {
        let args = parse(&[]);
        assert!(matches!(
            RunConfig::from_args(&args, ""),
            Err(Error::EmptyCorpus)
        ));

        let args = parse(&["--batch-size", "0"]);
        assert!(matches!(
            RunConfig::from_args(&args, "abc"),
            Err(Error::InvalidConfig(_))
        ));

        let args = parse(&["--hidden-layer-size", "0"]);
        assert!(matches!(
            RunConfig::from_args(&args, "abc"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_model_config() {
        let args = parse(&["--lstm-node-size", "32", "--hidden-layer-size", "2"]);
        let corpus = "hello world\n";
        let config = RunConfig::from_args(&args, corpus).unwrap();
        let alphabet = Alphabet::new(corpus).unwrap();
        let model_config = config.model_config(&alphabet);
        assert_eq!(model_config.alphabet_size, 9);
        assert_eq!(model_config.seq_len, 12);
        assert_eq!(model_config.hidden_layers, 2);
        assert_eq!(model_config.hidden_size, 32);
        assert_eq!(model_config.dropout, DROPOUT);

        let learn_config = config.learn_config();
        assert_eq!(learn_config.batch_size, 128);
        assert_eq!(learn_config.lr, LEARNING_RATE);
        assert_eq!(learn_config.validation_fraction, VALIDATION_FRACTION);
    }
}
