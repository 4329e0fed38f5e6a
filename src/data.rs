use std::collections::HashMap;
use std::path::Path;

use itertools::Itertools;
use rand::prelude::*;
use tch::Tensor;

use crate::error::{Error, Result};

/// Offset between two consecutive windows.
pub const REDUNDANCY_STEP: usize = 3;

/// Load a text file and return its content
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Length, in characters, of the longest line of `text`.
///
/// The line terminator counts as a character of the line since newlines are
/// part of the alphabet and of the windows.
pub fn longest_line(text: &str) -> usize {
    text.split_inclusive('\n')
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0)
}

/// Alphabet of a corpus: each distinct character gets a dense id.
///
/// Ids follow the sorted order of the characters so the same corpus always
/// gives the same mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alphabet {
    chars: Vec<char>,
    index: HashMap<char, usize>,
}

impl Alphabet {
    /// Create a new alphabet from a string
    pub fn new(data: &str) -> Result<Self> {
        let chars: Vec<char> = data.chars().sorted().dedup().collect();
        if chars.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let index = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Ok(Self { chars, index })
    }

    /// Encode a character
    pub fn encode_char(&self, c: char) -> Result<usize> {
        self.index.get(&c).copied().ok_or(Error::UnknownChar(c))
    }

    /// Decode a character
    pub fn decode_char(&self, i: i64) -> Result<char> {
        usize::try_from(i)
            .ok()
            .and_then(|i| self.chars.get(i).copied())
            .ok_or(Error::InvalidId(i))
    }

    /// Encode a string
    pub fn encode(&self, s: &str) -> Result<Vec<i64>> {
        s.chars()
            .map(|c| self.encode_char(c).map(|i| i as i64))
            .collect()
    }

    /// Decode a string
    pub fn decode(&self, v: &[i64]) -> Result<String> {
        v.iter().map(|&i| self.decode_char(i)).collect()
    }

    /// Return the size of the alphabet
    pub fn size(&self) -> usize {
        self.chars.len()
    }

    /// Return a reference to the characters
    pub fn chars(&self) -> &[char] {
        &self.chars
    }
}

/// A context of fixed length and the character that follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window {
    /// The context, exactly `seq_len` characters.
    pub context: String,
    /// The character to predict.
    pub target: char,
}

/// Number of windows [`windows`] produces for a text of `len` characters.
pub fn window_count(len: usize, seq_len: usize, step: usize) -> usize {
    if len <= seq_len || step == 0 {
        0
    } else {
        (len - seq_len).div_ceil(step)
    }
}

/// Lazy iterator over the windows of a text. See [`windows`].
#[derive(Clone, Debug)]
pub struct Windows {
    chars: Vec<char>,
    seq_len: usize,
    step: usize,
    pos: usize,
    remaining: usize,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let start = self.pos;
        let end = start + self.seq_len;
        let window = Window {
            context: self.chars[start..end].iter().collect(),
            target: self.chars[end],
        };
        self.pos += self.step;
        self.remaining -= 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Windows {}

/// Slide a window of `seq_len` characters with stride `step` over `text`.
///
/// A window starts at every offset `i` in `0, step, 2 * step, ...` below
/// `len - seq_len`, so the last character of the text can only be a target.
/// Texts of `seq_len` characters or fewer produce no window.
///
/// For example, with `text = "abcdefg"`, `seq_len = 3` and `step = 2`:
/// - `("abc", 'd')`
/// - `("cde", 'f')`
pub fn windows(text: &str, seq_len: usize, step: usize) -> Windows {
    let chars: Vec<char> = text.chars().collect();
    let remaining = window_count(chars.len(), seq_len, step);
    Windows {
        chars,
        seq_len,
        step,
        pos: 0,
        remaining,
    }
}

type Batch = (Tensor, Tensor);

/// Dataloader for encoded windows
/// Samples are tuples of the form (input, target).
/// The input is a tensor of size `batch_size x seq_len x alphabet_size`.
/// The target is a tensor of size `batch_size x alphabet_size`.
///
/// Every sample is visited once per pass; the last batch of a pass holds the
/// leftover samples and can be smaller than `batch_size`.
///
/// For example, with 5 samples and `batch_size` 2, a pass in order returns
/// samples `[0, 1]`, `[2, 3]` and `[4]`.
#[derive(Debug)]
pub struct Loader {
    inputs: Tensor,
    targets: Tensor,
    batch_size: usize,
    /// The number of samples
    n_samples: usize,
    /// The order of the samples
    order: Option<Vec<i64>>,
    /// The current position in the order
    pos: usize,
}

impl Clone for Loader {
    fn clone(&self) -> Self {
        Self {
            inputs: self.inputs.shallow_clone(),
            targets: self.targets.shallow_clone(),
            batch_size: self.batch_size,
            n_samples: self.n_samples,
            order: self.order.clone(),
            pos: self.pos,
        }
    }
}

impl Loader {
    /// Create a new data loader over `inputs` and `targets`, which share
    /// their first dimension.
    pub fn new(inputs: &Tensor, targets: &Tensor, batch_size: usize) -> Self {
        let n_samples = inputs.size().first().copied().unwrap_or(0) as usize;
        Self {
            inputs: inputs.shallow_clone(),
            targets: targets.shallow_clone(),
            batch_size: batch_size.max(1),
            n_samples,
            order: None,
            pos: 0,
        }
    }

    /// Split off the last `fraction` of the samples.
    ///
    /// Returns `(head, tail)`; the tail has `floor(n_samples * fraction)`
    /// samples, but at least one when `fraction` is positive and there are
    /// two samples or more.
    pub fn split(self, fraction: f64) -> (Loader, Loader) {
        let fraction = fraction.clamp(0., 1.);
        let mut n_tail = ((self.n_samples as f64) * fraction).floor() as usize;
        if n_tail == 0 && fraction > 0. && self.n_samples >= 2 {
            n_tail = 1;
        }
        let n_head = self.n_samples - n_tail;
        let part = |start: usize, len: usize| Loader {
            inputs: self.inputs.narrow(0, start as i64, len as i64),
            targets: self.targets.narrow(0, start as i64, len as i64),
            batch_size: self.batch_size,
            n_samples: len,
            order: None,
            pos: 0,
        };
        (part(0, n_head), part(n_head, n_tail))
    }

    /// Return the batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Return the number of batches in a pass, the last one possibly partial
    pub fn n_batches(&self) -> usize {
        self.n_samples.div_ceil(self.batch_size)
    }

    /// Return the number of samples
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// True if there is no sample
    pub fn is_empty(&self) -> bool {
        self.n_samples == 0
    }

    /// Pick a random order for the samples and start a new pass
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut order: Vec<i64> = (0..self.n_samples as i64).collect();
        order.shuffle(rng);
        self.order = Some(order);
        self.pos = 0;
    }

    /// Go back to the data order and start a new pass
    pub fn rewind(&mut self) {
        self.order = None;
        self.pos = 0;
    }

    /// Returns the next batch
    /// If `shuffle` has been called, the order of the samples is random.
    /// Otherwise, the samples are returned in the order of the data.
    pub fn next_batch(&mut self) -> Option<Batch> {
        if self.pos >= self.n_samples {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.n_samples);

        let batch = if let Some(order) = &self.order {
            let index = Tensor::from_slice(&order[self.pos..end]).to(self.inputs.device());
            (
                self.inputs.index_select(0, &index),
                self.targets.index_select(0, &index),
            )
        } else {
            let len = (end - self.pos) as i64;
            (
                self.inputs.narrow(0, self.pos as i64, len),
                self.targets.narrow(0, self.pos as i64, len),
            )
        };

        self.pos = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(context: &str, target: char) -> Window {
        Window {
            context: context.to_string(),
            target,
        }
    }

    fn ids(xs: &Tensor) -> Vec<i64> {
        xs.reshape(-1).try_into().unwrap()
    }

    fn loader(n: i64, batch_size: usize) -> Loader {
        let inputs = Tensor::arange(n, (tch::Kind::Int64, tch::Device::Cpu)).view([n, 1]);
        let targets =
            Tensor::arange_start(100, 100 + n, (tch::Kind::Int64, tch::Device::Cpu)).view([n, 1]);
        Loader::new(&inputs, &targets, batch_size)
    }

    #[test]
    fn test_data_loader() {
        let mut loader = loader(5, 2);

        assert_eq!(loader.n_samples(), 5);
        assert_eq!(loader.n_batches(), 3);

        let (samples, targets) = loader.next_batch().unwrap();
        assert_eq!(ids(&samples), vec![0, 1]);
        assert_eq!(ids(&targets), vec![100, 101]);
        let (samples, _) = loader.next_batch().unwrap();
        assert_eq!(ids(&samples), vec![2, 3]);
        let (samples, targets) = loader.next_batch().unwrap();
        assert_eq!(ids(&samples), vec![4]);
        assert_eq!(ids(&targets), vec![104]);
        assert!(loader.next_batch().is_none());

        loader.rewind();
        assert_eq!(ids(&loader.next_batch().unwrap().0), vec![0, 1]);
    }

    #[test]
    fn test_data_loader_shuffle() {
        let mut loader = loader(7, 3);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(123);

        loader.shuffle(&mut rng);

        let mut seen = vec![];
        while let Some((samples, targets)) = loader.next_batch() {
            let samples = ids(&samples);
            let targets = ids(&targets);
            assert!(samples.len() <= 3);
            // inputs and targets stay paired
            assert!(samples.iter().zip(&targets).all(|(x, y)| x + 100 == *y));
            seen.extend(samples);
        }
        seen.sort();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_data_loader_split() {
        let (mut head, mut tail) = loader(20, 8).split(0.1);
        assert_eq!(head.n_samples(), 18);
        assert_eq!(tail.n_samples(), 2);
        assert_eq!(head.n_batches(), 3);
        assert_eq!(ids(&tail.next_batch().unwrap().0), vec![18, 19]);
        assert_eq!(ids(&head.next_batch().unwrap().0), (0..8).collect::<Vec<_>>());

        // small sets still hold out one sample
        let (head, mut tail) = loader(5, 8).split(0.1);
        assert_eq!(head.n_samples(), 4);
        assert_eq!(tail.n_samples(), 1);
        assert_eq!(ids(&tail.next_batch().unwrap().0), vec![4]);

        let (head, tail) = loader(1, 8).split(0.1);
        assert_eq!(head.n_samples(), 1);
        assert!(tail.is_empty());
        assert_eq!(tail.n_batches(), 0);

        let (head, tail) = loader(5, 8).split(0.);
        assert_eq!(head.n_samples(), 5);
        assert!(tail.is_empty());
    }

    #[test]
    fn test_alphabet() {
        let alphabet = Alphabet::new("hello\nworld").unwrap();
        assert_eq!(
            alphabet.chars(),
            &['\n', 'd', 'e', 'h', 'l', 'o', 'r', 'w']
        );
        assert_eq!(alphabet.size(), 8);

        let encoded = alphabet.encode("hello").unwrap();
        assert_eq!(encoded, vec![3, 2, 4, 4, 5]);
        assert_eq!(alphabet.decode(&encoded).unwrap(), "hello");
    }

    #[test]
    fn test_alphabet_is_deterministic() {
        let corpus = "the quick brown fox\njumps over the lazy dog\n";
        assert_eq!(Alphabet::new(corpus).unwrap(), Alphabet::new(corpus).unwrap());
    }

    #[test]
    fn test_alphabet_empty_corpus() {
        assert!(matches!(Alphabet::new(""), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn test_alphabet_unknown() {
        let alphabet = Alphabet::new("abc").unwrap();
        assert!(matches!(alphabet.encode("abz"), Err(Error::UnknownChar('z'))));
        assert!(matches!(alphabet.decode(&[0, 3]), Err(Error::InvalidId(3))));
        assert!(matches!(alphabet.decode(&[-1]), Err(Error::InvalidId(-1))));
    }

    #[test]
    fn test_longest_line() {
        assert_eq!(longest_line("ab\nabcd\nabc"), 5);
        assert_eq!(longest_line("abc"), 3);
        assert_eq!(longest_line("été\n"), 4);
        assert_eq!(longest_line(""), 0);
    }

    #[test]
    fn test_windows() {
        let ws: Vec<Window> = windows("abcdefg", 3, 2).collect();
        assert_eq!(ws, vec![window("abc", 'd'), window("cde", 'f')]);
    }

    #[test]
    fn test_windows_repeated_corpus() {
        let ws: Vec<Window> = windows("abcabcabc", 3, 3).collect();
        assert_eq!(ws, vec![window("abc", 'a'), window("abc", 'a')]);
        assert_eq!(Alphabet::new("abcabcabc").unwrap().size(), 3);
    }

    #[test]
    fn test_windows_boundaries() {
        // exactly one more character than the window
        let ws: Vec<Window> = windows("abcd", 3, REDUNDANCY_STEP).collect();
        assert_eq!(ws, vec![window("abc", 'd')]);

        assert_eq!(windows("abc", 3, REDUNDANCY_STEP).count(), 0);
        assert_eq!(windows("ab", 3, REDUNDANCY_STEP).count(), 0);
        assert_eq!(windows("", 3, REDUNDANCY_STEP).count(), 0);
    }

    #[test]
    fn test_window_count() {
        let text = "It was the best of times, it was the worst of times.\n";
        let len = text.chars().count();
        for seq_len in 1..12 {
            for step in 1..5 {
                let ws: Vec<Window> = windows(text, seq_len, step).collect();
                let expected = if len > seq_len {
                    (len - seq_len + step - 1) / step
                } else {
                    0
                };
                assert_eq!(ws.len(), expected);
                assert_eq!(window_count(len, seq_len, step), expected);
                assert!(ws.iter().all(|w| w.context.chars().count() == seq_len));
            }
        }
    }

    #[test]
    fn test_windows_multibyte() {
        let ws: Vec<Window> = windows("héllo", 2, 1).collect();
        assert_eq!(
            ws,
            vec![window("hé", 'l'), window("él", 'l'), window("ll", 'o')]
        );
        assert_eq!(ws.len(), windows("héllo", 2, 1).len());
    }
}
