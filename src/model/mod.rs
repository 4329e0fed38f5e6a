/// LSTM network.
pub mod lstm;

use std::collections::HashMap;
use std::path::Path;

use lstm::CharLstm;
use tch::nn::ModuleT;
use tch::{nn, Device, Kind, Tensor};

use crate::config::LearnConfig;
use crate::data::Loader;
use crate::error::{Error, Result};
use crate::estimate::{Estimator, Evaluation, NullProgressReporter};
use crate::learn::{learn, Observer, TrainingSummary};

/// Dropout probability applied after every recurrent layer while training.
pub const DROPOUT: f64 = 0.5;

/// Name of the checkpoint tensor recording the architecture dimensions.
const DIMS_VAR: &str = "meta.dims";

/// Model configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    /// The alphabet size.
    pub alphabet_size: i64,
    /// The window length.
    pub seq_len: i64,
    /// The number of sequence-returning LSTM layers.
    pub hidden_layers: i64,
    /// The width of every LSTM layer.
    pub hidden_size: i64,
    /// The dropout probability.
    pub dropout: f64,
}

impl ModelConfig {
    /// The dimensions recorded in checkpoints.
    fn dims(&self) -> [i64; 4] {
        [
            self.alphabet_size,
            self.seq_len,
            self.hidden_layers,
            self.hidden_size,
        ]
    }

    fn validate(&self) -> Result<()> {
        if self.alphabet_size < 1 {
            return Err(Error::EmptyCorpus);
        }
        if self.seq_len < 1 {
            return Err(Error::InvalidSequenceLength);
        }
        if self.hidden_layers < 1 || self.hidden_size < 1 {
            return Err(Error::InvalidConfig(
                "the model needs at least one hidden layer of at least one unit".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

fn describe(dims: &[i64]) -> String {
    match dims {
        [alphabet_size, seq_len, hidden_layers, hidden_size] => format!(
            "alphabet size {alphabet_size}, window length {seq_len}, \
             {hidden_layers} hidden layer(s) of {hidden_size} units"
        ),
        _ => format!("{dims:?}"),
    }
}

/// Compute the loss
///
/// Use cross entropy loss on `[batch, alphabet_size]` logits. `targets` holds
/// either class ids (`[batch]`) or one-hot rows (`[batch, alphabet_size]`).
pub fn loss(logits: &Tensor, targets: &Tensor) -> Tensor {
    let logits = logits.to_kind(Kind::Float);
    logits.cross_entropy_for_logits(&class_ids(targets))
}

/// Number of rows whose highest logit is the target class, as a scalar
/// tensor.
pub fn correct(logits: &Tensor, targets: &Tensor) -> Tensor {
    let predicted = logits.argmax(-1, false);
    predicted
        .eq_tensor(&class_ids(targets))
        .to_kind(Kind::Int64)
        .sum(Kind::Int64)
}

fn class_ids(targets: &Tensor) -> Tensor {
    if targets.dim() == 2 {
        targets.to_kind(Kind::Float).argmax(-1, false)
    } else {
        targets.to_kind(Kind::Int64)
    }
}

/// A character LSTM with its parameters.
///
/// The parameters live in a [`nn::VarStore`] which also records the
/// architecture dimensions so that [`SequenceModel::load`] can reject a
/// checkpoint built for another alphabet, window length or layer layout.
#[derive(Debug)]
pub struct SequenceModel {
    vs: nn::VarStore,
    net: CharLstm,
    config: ModelConfig,
}

impl SequenceModel {
    /// Create a freshly initialized model on `device`.
    pub fn new(config: ModelConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let vs = nn::VarStore::new(device);
        let net = CharLstm::new(&vs.root(), &config);

        let dims = Tensor::from_slice(&config.dims()).to_kind(Kind::Float);
        let mut record = vs.root().sub("meta").zeros_no_train("dims", &[4]);
        tch::no_grad(|| record.copy_(&dims));

        Ok(Self { vs, net, config })
    }

    /// The configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The variable store holding the parameters.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// The device of the parameters.
    pub fn device(&self) -> Device {
        self.vs.device()
    }

    /// Number of trainable parameters.
    pub fn n_parameters(&self) -> i64 {
        self.vs
            .trainable_variables()
            .iter()
            .map(|t| t.size().iter().product::<i64>())
            .sum::<i64>()
    }

    /// Logits for one-hot `[batch, seq_len, alphabet_size]` inputs.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs.to_kind(Kind::Float).to(self.device());
        self.net.forward_t(&xs, train)
    }

    /// Probabilities of the next character, `[batch, alphabet_size]`.
    pub fn probabilities(&self, xs: &Tensor) -> Tensor {
        tch::no_grad(|| self.forward_t(xs, false).softmax(-1, Kind::Float))
    }

    fn check_shapes(&self, inputs: &Tensor, targets: &Tensor) -> Result<()> {
        let ModelConfig {
            alphabet_size,
            seq_len,
            ..
        } = self.config;
        let n = inputs.size().first().copied().unwrap_or(0);
        if inputs.size() != [n, seq_len, alphabet_size] {
            return Err(Error::ShapeMismatch {
                what: "inputs".to_string(),
                expected: vec![n, seq_len, alphabet_size],
                actual: inputs.size(),
            });
        }
        if targets.size() != [n, alphabet_size] {
            return Err(Error::ShapeMismatch {
                what: "targets".to_string(),
                expected: vec![n, alphabet_size],
                actual: targets.size(),
            });
        }
        Ok(())
    }

    /// Train the model in place on one-hot `inputs` and `targets`.
    ///
    /// The last `validation_fraction` of the examples are held out and
    /// evaluated after every epoch.
    pub fn train(
        &mut self,
        inputs: &Tensor,
        targets: &Tensor,
        learn_config: &LearnConfig,
        observer: &mut Observer,
    ) -> Result<TrainingSummary> {
        self.check_shapes(inputs, targets)?;
        if inputs.size()[0] == 0 {
            return Err(Error::NoTrainingExamples);
        }
        let loader = Loader::new(inputs, targets, learn_config.batch_size);
        let (mut train_loader, mut valid_loader) =
            loader.split(learn_config.validation_fraction);
        if train_loader.n_samples() == 0 {
            return Err(Error::NoTrainingExamples);
        }
        learn(
            learn_config,
            &mut train_loader,
            &mut valid_loader,
            self,
            observer,
        )
    }

    /// Loss and accuracy on `inputs` and `targets`, in batches of
    /// `batch_size`. The parameters are left untouched.
    pub fn evaluate(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        batch_size: usize,
    ) -> Result<Evaluation> {
        self.check_shapes(inputs, targets)?;
        if inputs.size()[0] == 0 {
            return Err(Error::NoWindows);
        }
        let mut loader = Loader::new(inputs, targets, batch_size.max(1));
        Estimator::new(&mut loader).estimate(self, &mut NullProgressReporter)
    }

    /// Write every parameter, and the architecture record, to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vs.save(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "checkpoint written");
        Ok(())
    }

    /// Replace every parameter with the ones stored at `path`.
    ///
    /// The checkpoint must hold exactly the variables of this model with the
    /// same shapes, and must have been written for the same architecture.
    /// Nothing is modified when a check fails.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let stored: HashMap<String, Tensor> = read_checkpoint(path, self.device())?
            .into_iter()
            .collect();

        let stored_dims = stored.get(DIMS_VAR).ok_or_else(|| {
            Error::CheckpointMismatch(format!(
                "{} has no architecture record",
                path.display()
            ))
        })?;
        let stored_dims: Vec<f64> = stored_dims
            .to_kind(Kind::Double)
            .to(Device::Cpu)
            .reshape(-1)
            .try_into()?;
        let stored_dims: Vec<i64> = stored_dims.into_iter().map(|d| d as i64).collect();
        let dims = self.config.dims();
        if stored_dims != dims {
            return Err(Error::CheckpointMismatch(format!(
                "{} was written for {}, the model is configured for {}",
                path.display(),
                describe(&stored_dims),
                describe(&dims)
            )));
        }

        let mut variables = self.vs.variables();
        for (name, variable) in &variables {
            match stored.get(name) {
                None => {
                    return Err(Error::CheckpointMismatch(format!(
                        "{} has no variable {name}",
                        path.display()
                    )))
                }
                Some(tensor) if tensor.size() != variable.size() => {
                    return Err(Error::CheckpointMismatch(format!(
                        "{name}: expected shape {:?}, {} holds {:?}",
                        variable.size(),
                        path.display(),
                        tensor.size()
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(name) = stored.keys().find(|name| !variables.contains_key(*name)) {
            return Err(Error::CheckpointMismatch(format!(
                "{} holds the unexpected variable {name}",
                path.display()
            )));
        }

        tch::no_grad(|| -> Result<()> {
            for (name, variable) in variables.iter_mut() {
                variable.f_copy_(&stored[name])?;
            }
            Ok(())
        })?;
        tracing::debug!(path = %path.display(), "checkpoint loaded");
        Ok(())
    }
}

/// Read every named tensor of a checkpoint written by [`nn::VarStore::save`].
fn read_checkpoint(path: &Path, device: Device) -> Result<Vec<(String, Tensor)>> {
    if !path.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no checkpoint at {}", path.display()),
        )));
    }
    let tensors = match path.extension().and_then(|x| x.to_str()) {
        Some("safetensors") => Tensor::read_safetensors(path)?
            .into_iter()
            .map(|(name, tensor)| (name, tensor.to(device)))
            .collect(),
        _ => Tensor::load_multi_with_device(path, device)?,
    };
    Ok(tensors)
}
