use itertools::Itertools;
use rayon::prelude::*;
use tch::{Device, Kind, Tensor};

use crate::data::{Alphabet, Window};
use crate::error::{Error, Result};

/// One-hot encoded windows.
///
/// - `inputs` is `[n, seq_len, alphabet_size]`.
/// - `targets` is `[n, alphabet_size]`.
///
/// Both are `Kind::Bool` with exactly one element set per row.
#[derive(Debug)]
pub struct EncodedPairs {
    /// The contexts.
    pub inputs: Tensor,
    /// The characters following each context.
    pub targets: Tensor,
}

impl EncodedPairs {
    /// Number of encoded windows.
    pub fn len(&self) -> usize {
        self.inputs.size()[0] as usize
    }

    /// True if there is no window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements held by the two tensors.
    pub fn numel(&self) -> usize {
        self.inputs.numel() + self.targets.numel()
    }
}

/// Encode windows into one-hot tensors on `device`.
///
/// Fails on a character missing from `alphabet` rather than leaving its row
/// empty, and on an empty set of windows.
pub fn encode<I>(
    windows: I,
    alphabet: &Alphabet,
    seq_len: usize,
    device: Device,
) -> Result<EncodedPairs>
where
    I: IntoIterator<Item = Window>,
{
    let windows: Vec<Window> = windows.into_iter().collect();
    if windows.is_empty() {
        return Err(Error::NoWindows);
    }

    let rows = windows
        .par_iter()
        .map(|window| {
            let context = alphabet.encode(&window.context)?;
            if context.len() != seq_len {
                return Err(Error::ShapeMismatch {
                    what: "window context".to_string(),
                    expected: vec![seq_len as i64],
                    actual: vec![context.len() as i64],
                });
            }
            let target = alphabet.encode_char(window.target)? as i64;
            Ok((context, target))
        })
        .collect::<Vec<Result<_>>>()
        // first failure in window order
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let n = rows.len() as i64;
    let n_chars = alphabet.size() as i64;
    let (contexts, targets): (Vec<Vec<i64>>, Vec<i64>) = rows.into_iter().unzip();
    let contexts = contexts.concat();

    let inputs = Tensor::from_slice(&contexts)
        .view([n, seq_len as i64])
        .one_hot(n_chars)
        .to_kind(Kind::Bool)
        .to(device);
    let targets = Tensor::from_slice(&targets)
        .one_hot(n_chars)
        .to_kind(Kind::Bool)
        .to(device);

    Ok(EncodedPairs { inputs, targets })
}

/// Ids of the set element of each row of a one-hot tensor whose last
/// dimension is `width`.
fn one_hot_ids(xs: &Tensor, width: usize) -> Result<Vec<i64>> {
    let flat: Vec<i64> = xs.to_kind(Kind::Int64).reshape(-1).try_into()?;
    flat.chunks(width)
        .enumerate()
        .map(|(row, values)| {
            let mut set = values.iter().positions(|&v| v != 0);
            match (set.next(), set.next()) {
                (Some(id), None) => Ok(id as i64),
                _ => Err(Error::NotOneHot {
                    row,
                    count: values.iter().filter(|&&v| v != 0).count(),
                }),
            }
        })
        .collect()
}

fn check_width(xs: &Tensor, alphabet: &Alphabet, what: &str) -> Result<usize> {
    let size = xs.size();
    let width = alphabet.size();
    match size.last() {
        Some(&last) if last == width as i64 => Ok(width),
        _ => Err(Error::ShapeMismatch {
            what: what.to_string(),
            expected: vec![-1, width as i64],
            actual: size,
        }),
    }
}

/// Decode a `[n, seq_len, alphabet_size]` one-hot tensor back into its
/// contexts.
pub fn decode(inputs: &Tensor, alphabet: &Alphabet) -> Result<Vec<String>> {
    let size = inputs.size();
    if size.len() != 3 {
        return Err(Error::ShapeMismatch {
            what: "encoded inputs".to_string(),
            expected: vec![-1, -1, alphabet.size() as i64],
            actual: size,
        });
    }
    let width = check_width(inputs, alphabet, "encoded inputs")?;
    let seq_len = size[1] as usize;
    let ids = one_hot_ids(inputs, width)?;
    if seq_len == 0 {
        return Ok(vec![String::new(); size[0] as usize]);
    }
    ids.chunks(seq_len).map(|ids| alphabet.decode(ids)).collect()
}

/// Decode a `[n, alphabet_size]` one-hot tensor back into its characters.
pub fn decode_targets(targets: &Tensor, alphabet: &Alphabet) -> Result<String> {
    let width = check_width(targets, alphabet, "encoded targets")?;
    alphabet.decode(&one_hot_ids(targets, width)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{windows, REDUNDANCY_STEP};

    #[test]
    fn test_encode_reports_first_unknown_char() {
        let alphabet = Alphabet::new("abc").unwrap();
        // 'y' is the target of the last window
        let text = format!("abx{}yab", "abc".repeat(12));
        for _ in 0..20 {
            let result = encode(windows(&text, 3, 3), &alphabet, 3, Device::Cpu);
            assert!(matches!(result, Err(Error::UnknownChar('x'))));
        }
    }

    #[test]
    fn test_encode_shapes() {
        let corpus = "abcabcabc";
        let alphabet = Alphabet::new(corpus).unwrap();
        let pairs = encode(windows(corpus, 3, 3), &alphabet, 3, Device::Cpu).unwrap();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.inputs.size(), [2, 3, 3]);
        assert_eq!(pairs.targets.size(), [2, 3]);
        assert_eq!(pairs.inputs.kind(), Kind::Bool);
        assert_eq!(pairs.targets.kind(), Kind::Bool);
        assert_eq!(pairs.numel(), 2 * 3 * 3 + 2 * 3);

        // exactly one element set per row
        assert_eq!(one_hot_ids(&pairs.inputs, 3).unwrap().len(), 2 * 3);
        assert_eq!(one_hot_ids(&pairs.targets, 3).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_encode_values() {
        let alphabet = Alphabet::new("abc").unwrap();
        let ws = vec![Window {
            context: "cab".to_string(),
            target: 'b',
        }];
        let pairs = encode(ws, &alphabet, 3, Device::Cpu).unwrap();

        let inputs: Vec<i64> = pairs
            .inputs
            .to_kind(Kind::Int64)
            .reshape(-1)
            .try_into()
            .unwrap();
        assert_eq!(inputs, vec![0, 0, 1, 1, 0, 0, 0, 1, 0]);
        let targets: Vec<i64> = pairs
            .targets
            .to_kind(Kind::Int64)
            .reshape(-1)
            .try_into()
            .unwrap();
        assert_eq!(targets, vec![0, 1, 0]);
    }

    #[test]
    fn test_encode_decode() {
        let corpus = "To be, or not to be, that is the question:\n";
        let alphabet = Alphabet::new(corpus).unwrap();
        let ws: Vec<Window> = windows(corpus, 7, REDUNDANCY_STEP).collect();
        let pairs = encode(ws.clone(), &alphabet, 7, Device::Cpu).unwrap();

        let contexts = decode(&pairs.inputs, &alphabet).unwrap();
        let targets = decode_targets(&pairs.targets, &alphabet).unwrap();

        let expected_contexts: Vec<String> = ws.iter().map(|w| w.context.clone()).collect();
        let expected_targets: String = ws.iter().map(|w| w.target).collect();
        assert_eq!(contexts, expected_contexts);
        assert_eq!(targets, expected_targets);
    }

    #[test]
    fn test_encode_unknown_char() {
        let alphabet = Alphabet::new("abc").unwrap();
        let result = encode(windows("abcd", 3, 3), &alphabet, 3, Device::Cpu);
        assert!(matches!(result, Err(Error::UnknownChar('d'))));

        let result = encode(windows("xbca", 3, 3), &alphabet, 3, Device::Cpu);
        assert!(matches!(result, Err(Error::UnknownChar('x'))));
    }

    #[test]
    fn test_encode_empty() {
        let alphabet = Alphabet::new("abc").unwrap();
        let result = encode(windows("ab", 3, 3), &alphabet, 3, Device::Cpu);
        assert!(matches!(result, Err(Error::NoWindows)));
    }

    #[test]
    fn test_encode_wrong_context_length() {
        let alphabet = Alphabet::new("abc").unwrap();
        let ws = vec![Window {
            context: "ab".to_string(),
            target: 'c',
        }];
        let result = encode(ws, &alphabet, 3, Device::Cpu);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_decode_not_one_hot() {
        let alphabet = Alphabet::new("abc").unwrap();
        let targets = Tensor::from_slice(&[1i64, 0, 0, 0, 1, 1])
            .view([2, 3])
            .to_kind(Kind::Bool);
        let result = decode_targets(&targets, &alphabet);
        assert!(matches!(result, Err(Error::NotOneHot { row: 1, count: 2 })));

        let targets = Tensor::zeros([1, 4], (Kind::Bool, Device::Cpu));
        let result = decode_targets(&targets, &alphabet);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
