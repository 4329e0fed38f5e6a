use tch::nn::RNN;
use tch::{nn, Tensor};

use crate::model::ModelConfig;

/// CharLstm is a stack of LSTM layers topped by a linear classification head.
///
/// - `hidden_layers` LSTM layers return their whole output sequence, each
///   followed by dropout.
/// - A last LSTM layer only hands its final time step to dropout and to the
///   head.
/// - The head produces one logit per character of the alphabet.
#[derive(Debug)]
pub struct CharLstm {
    /// Sequence-returning layers
    hidden: Vec<nn::LSTM>,
    /// Last recurrent layer
    last: nn::LSTM,
    /// Classification head
    head: nn::Linear,
    /// Dropout probability
    dropout: f64,
    /// The alphabet size
    alphabet_size: i64,
    /// The LSTM width
    hidden_size: i64,
}

impl CharLstm {
    /// Create a new CharLstm
    /// # Arguments
    /// * `vs` - The path to the module.
    /// * `config` - The model configuration. See [ModelConfig].
    /// # Returns
    /// A new CharLstm.
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let ModelConfig {
            alphabet_size,
            hidden_layers,
            hidden_size,
            dropout,
            ..
        } = *config;

        let mut in_dim = alphabet_size;
        let mut hidden = Vec::with_capacity(hidden_layers as usize);
        for i in 0..hidden_layers {
            hidden.push(nn::lstm(
                vs / "lstm" / i,
                in_dim,
                hidden_size,
                Default::default(),
            ));
            in_dim = hidden_size;
        }

        let last = nn::lstm(
            vs / "lstm" / hidden_layers,
            in_dim,
            hidden_size,
            Default::default(),
        );

        let head = nn::linear(vs / "head", hidden_size, alphabet_size, Default::default());

        Self {
            hidden,
            last,
            head,
            dropout,
            alphabet_size,
            hidden_size,
        }
    }
}

impl nn::ModuleT for CharLstm {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let (b, t, _) = xs.size3().unwrap();

        let mut xs = xs.shallow_clone();
        for layer in &self.hidden {
            let (ys, _) = layer.seq(&xs); // [b, t, hidden_size]
            xs = ys.dropout(self.dropout, train);
        }
        assert_eq!(xs.size()[..2], [b, t]);

        let (ys, _) = self.last.seq(&xs);
        let ys = ys.select(1, -1); // [b, hidden_size]
        assert_eq!(ys.size(), &[b, self.hidden_size]);

        let logits = ys.dropout(self.dropout, train).apply(&self.head);
        assert_eq!(logits.size(), &[b, self.alphabet_size]);
        logits
    }
}
