use std::io::{BufRead, Write};

use tch::Device;

use crate::config::RunConfig;
use crate::data::{windows, Alphabet};
use crate::encode::encode;
use crate::error::Result;
use crate::estimate::Evaluation;
use crate::model::SequenceModel;

/// Prompt written before every read.
pub const PROMPT: &str = "Insert sequence to Evaluate >";

/// A source of lines to evaluate.
pub trait LineSource {
    /// The next line, with its terminator if it had one. `None` at the end of
    /// the input.
    fn next_line(&mut self) -> Result<Option<String>>;
}

/// Lines read from `reader`, each one preceded by [`PROMPT`] on `prompt_out`.
pub struct PromptedLines<R, W> {
    reader: R,
    prompt_out: W,
}

impl<R: BufRead, W: Write> PromptedLines<R, W> {
    /// Create a new PromptedLines
    pub fn new(reader: R, prompt_out: W) -> Self {
        Self { reader, prompt_out }
    }
}

impl<R: BufRead, W: Write> LineSource for PromptedLines<R, W> {
    fn next_line(&mut self) -> Result<Option<String>> {
        write!(self.prompt_out, "{}", PROMPT)?;
        self.prompt_out.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

/// Result of the evaluation of one line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// The line held at least one window.
    Scored(Evaluation),
    /// The line is too short to hold a window.
    NothingToEvaluate {
        /// Characters in the line.
        chars: usize,
        /// Characters needed for one window.
        needed: usize,
    },
}

/// Scores lines of text against a trained model, using the same windowing
/// as the training set.
pub struct Evaluator<'a> {
    model: &'a SequenceModel,
    alphabet: &'a Alphabet,
    seq_len: usize,
    step: usize,
    batch_size: usize,
    device: Device,
}

impl<'a> Evaluator<'a> {
    /// Create a new Evaluator
    pub fn new(model: &'a SequenceModel, alphabet: &'a Alphabet, run_config: &RunConfig) -> Self {
        Self {
            model,
            alphabet,
            seq_len: run_config.seq_len,
            step: run_config.step,
            batch_size: run_config.batch_size,
            device: run_config.device,
        }
    }

    /// Evaluate one line, without its trailing terminator.
    pub fn evaluate_line(&self, line: &str) -> Result<Outcome> {
        let line = line
            .strip_suffix('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .unwrap_or(line);

        let chars = line.chars().count();
        let needed = self.seq_len + 1;
        if chars < needed {
            return Ok(Outcome::NothingToEvaluate { chars, needed });
        }
        // trailing characters may not be reached by any window
        self.alphabet.encode(line)?;

        let pairs = encode(
            windows(line, self.seq_len, self.step),
            self.alphabet,
            self.seq_len,
            self.device,
        )?;
        let evaluation = self
            .model
            .evaluate(&pairs.inputs, &pairs.targets, self.batch_size)?;
        Ok(Outcome::Scored(evaluation))
    }

    /// Evaluate every line of `source`, writing one response per line to
    /// `out`, until the end of the input.
    ///
    /// Returns the number of lines handled. An unknown character is reported
    /// on `out` and then returned as the error.
    pub fn run<S: LineSource, W: Write>(&self, source: &mut S, out: &mut W) -> Result<usize> {
        let mut n_lines = 0;
        while let Some(line) = source.next_line()? {
            n_lines += 1;
            match self.evaluate_line(&line) {
                Ok(Outcome::Scored(evaluation)) => writeln!(
                    out,
                    "Evaluation: loss={:.4}, accuracy={:.4}",
                    evaluation.loss, evaluation.accuracy
                )?,
                Ok(Outcome::NothingToEvaluate { chars, needed }) => writeln!(
                    out,
                    "Nothing to evaluate: {} characters, at least {} needed",
                    chars, needed
                )?,
                Err(e) => {
                    writeln!(out, "Error: {}", e)?;
                    return Err(e);
                }
            }
        }
        writeln!(out)?;
        writeln!(out, "Bye!")?;
        Ok(n_lines)
    }
}
