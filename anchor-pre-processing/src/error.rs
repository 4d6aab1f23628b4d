/// Error taxonomy for anchor conversion
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Missing or malformed container field, wrong arity or unreadable container.
    #[error("format error in `{field}`: {reason}")]
    Format { field: String, reason: String },

    /// Zero distance to the camera or a zero-norm rotation vector.
    #[error("degenerate geometry at anchor {anchor}: {reason}")]
    DegenerateGeometry { anchor: usize, reason: String },

    /// Failure at the numeric model boundary.
    #[error("model evaluation failed for {model}: {reason}")]
    ModelEvaluation { model: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    pub fn format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn degenerate(anchor: usize, reason: impl Into<String>) -> Self {
        Self::DegenerateGeometry {
            anchor,
            reason: reason.into(),
        }
    }

    pub fn model(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelEvaluation {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
