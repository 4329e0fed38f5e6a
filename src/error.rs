use std::fmt;

/// Errors produced by the charseq pipeline.
///
/// Every variant is terminal for the current run except [`Error::NoWindows`],
/// which the interactive evaluator turns into a "nothing to evaluate" answer.
#[derive(Debug)]
pub enum Error {
    /// I/O error while reading the corpus or writing/reading a checkpoint.
    Io(std::io::Error),
    /// A run option is out of range.
    InvalidConfig(String),
    /// The (possibly derived) maximum sequence length is not positive.
    InvalidSequenceLength,
    /// The corpus has no characters, so no alphabet can be built.
    EmptyCorpus,
    /// There is no window to encode.
    NoWindows,
    /// A row of a one-hot tensor does not hold exactly one set element.
    NotOneHot {
        /// Index of the offending row.
        row: usize,
        /// Number of set elements found in it.
        count: usize,
    },
    /// Training was requested on an empty training set.
    NoTrainingExamples,
    /// A character is not part of the alphabet.
    UnknownChar(char),
    /// An id is outside `[0, alphabet_size)`.
    InvalidId(i64),
    /// A tensor or window does not have the expected shape.
    ShapeMismatch {
        /// What was being checked.
        what: String,
        /// Expected shape.
        expected: Vec<i64>,
        /// Actual shape.
        actual: Vec<i64>,
    },
    /// The checkpoint does not match the configured architecture.
    CheckpointMismatch(String),
    /// Error raised by libtorch.
    Torch(tch::TchError),
}

/// Result alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io: {e}"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::InvalidSequenceLength => {
                write!(f, "invalid configuration: max sequence length must be positive")
            }
            Error::EmptyCorpus => write!(f, "the corpus is empty"),
            Error::NoWindows => write!(f, "no window to encode"),
            Error::NotOneHot { row, count } => {
                write!(f, "row {row} has {count} set elements, expected exactly one")
            }
            Error::NoTrainingExamples => write!(f, "no training examples"),
            Error::UnknownChar(c) => write!(f, "character {c:?} is not in the alphabet"),
            Error::InvalidId(id) => write!(f, "id {id} is not in the alphabet"),
            Error::ShapeMismatch {
                what,
                expected,
                actual,
            } => write!(f, "{what}: expected shape {expected:?}, got {actual:?}"),
            Error::CheckpointMismatch(msg) => write!(f, "checkpoint mismatch: {msg}"),
            Error::Torch(e) => write!(f, "torch: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Torch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tch::TchError> for Error {
    fn from(e: tch::TchError) -> Self {
        Error::Torch(e)
    }
}
