use thiserror::Error;

/// Error taxonomy for the library. Variants are kinds, not necessarily
/// distinct failure modes internally, but every public entry point commits to
/// one of these so callers can match on `kind` without inspecting strings.
#[derive(Error, Debug)]
pub enum SinglePpError {
    /// Reference matrices, labels, or markers disagree on row/column counts.
    #[error("shape mismatch: {detail}")]
    ShapeMismatch { detail: String },

    /// Zero references, zero profiles, or a label with zero profiles.
    #[error("empty input: {detail}")]
    EmptyInput { detail: String },

    /// A marker gene index or label id exceeds its advertised bound.
    #[error("index out of range: {detail}")]
    OutOfRange { detail: String },

    /// A loader encountered a file that does not match its fixed format.
    #[error("malformed input: {detail}")]
    Malformed { detail: String },

    /// Propagated I/O failure from a loader.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SinglePpError>;

impl SinglePpError {
    pub fn shape_mismatch(detail: impl Into<String>) -> Self {
        SinglePpError::ShapeMismatch { detail: detail.into() }
    }

    pub fn empty_input(detail: impl Into<String>) -> Self {
        SinglePpError::EmptyInput { detail: detail.into() }
    }

    pub fn out_of_range(detail: impl Into<String>) -> Self {
        SinglePpError::OutOfRange { detail: detail.into() }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        SinglePpError::Malformed { detail: detail.into() }
    }
}
