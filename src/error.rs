//! Common errors across the freedompp crate
use std::path::PathBuf;

/// The error taxonomy shared by every stage of post-processing.
///
/// Callers are expected to match on the variant rather than the message.
/// Functions that touch the filesystem return an [`error_stack::Report`]
/// wrapping one of these, with the [`PpError::Context`] variant used to
/// attach what was being attempted.
#[derive(Debug, thiserror::Error)]
pub enum PpError {
    /// An input was empty or inconsistent, e.g. an empty base name or
    /// file and archive lists of different lengths.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The last year of a segment comes before the first.
    #[error("Last year ({end}) cannot be less than first year ({start})")]
    InvalidRange { start: i32, end: i32 },

    /// The frequency could not be resolved, or does not support the
    /// requested product.
    #[error("Unsupported frequency: {0}")]
    UnsupportedFrequency(String),

    /// A directory that must already exist does not.
    #[error("{} does not exist", .0.display())]
    MissingPath(PathBuf),

    /// A reduction needs interval bookkeeping variables that the dataset
    /// does not have.
    #[error("Missing auxiliary variable '{name}' needed for {needed_for}")]
    MissingAuxiliaryData { name: String, needed_for: String },

    /// A requested variable is not in the dataset.
    #[error("Variable '{0}' not found in dataset")]
    MissingVariable(String),

    /// Time units or calendar attributes could not be interpreted.
    #[error("Calendar error: {0}")]
    Calendar(String),

    /// Wrapper used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl PpError {
    pub fn invalid_argument<S: ToString>(msg: S) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    pub fn unsupported_frequency<S: ToString>(msg: S) -> Self {
        Self::UnsupportedFrequency(msg.to_string())
    }

    pub fn missing_aux<S: ToString, T: ToString>(name: S, needed_for: T) -> Self {
        Self::MissingAuxiliaryData {
            name: name.to_string(),
            needed_for: needed_for.to_string(),
        }
    }

    pub fn missing_variable<S: ToString>(name: S) -> Self {
        Self::MissingVariable(name.to_string())
    }

    pub fn calendar<S: ToString>(msg: S) -> Self {
        Self::Calendar(msg.to_string())
    }

    pub fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

pub type PpResult<T> = Result<T, PpError>;
