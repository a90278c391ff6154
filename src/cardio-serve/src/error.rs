use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model file not found at: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("model has not been loaded yet, call load_once() first")]
    ModelNotLoaded,

    /// Failure reported by the TensorFlow runtime
    #[error("model failure: {0}")]
    Model(String),

    #[error("unexpected model output: {0}")]
    ModelOutput(String),

    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("could not decode {}: {source}", path.display())]
    DecodeFile {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("malformed archive: {0}")]
    MalformedArchive(#[from] zip::result::ZipError),

    #[error("no images found under any of the class folders: {0}")]
    EmptyDataset(String),

    #[error("metric computation failed: {0}")]
    Metrics(String),

    #[error("plot rendering failed: {0}")]
    Plot(String),

    #[error("unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable category name, reported to clients next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ModelNotFound(_) => "model_not_found",
            Error::ModelNotLoaded => "model_not_loaded",
            Error::Model(_) => "model_failure",
            Error::ModelOutput(_) => "unexpected_model_output",
            Error::Decode(_) | Error::DecodeFile { .. } => "decode_failure",
            Error::MalformedArchive(_) => "malformed_archive",
            Error::EmptyDataset(_) => "empty_dataset",
            Error::Metrics(_) => "metric_computation_failure",
            Error::Plot(_) => "plot_failure",
            Error::UnknownArtifact(_) => "unknown_artifact",
            Error::Io(_) => "io",
        }
    }

    /// True when the request itself was at fault rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Decode(_)
                | Error::DecodeFile { .. }
                | Error::MalformedArchive(_)
                | Error::EmptyDataset(_)
                | Error::Metrics(_)
                | Error::UnknownArtifact(_)
        )
    }
}

impl From<tensorflow::Status> for Error {
    fn from(status: tensorflow::Status) -> Self {
        Error::Model(status.to_string())
    }
}
