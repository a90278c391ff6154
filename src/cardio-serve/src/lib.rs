//! Cardiomegaly detection on chest X-rays.
//!
//! The crate wraps a pretrained binary ResNet-18, exported as a TensorFlow
//! SavedModel, and everything needed to serve it: preprocessing, dataset
//! scanning, batched inference, classification metrics, diagnostic plots and
//! a per-run artifact store.

pub mod artifacts;
pub mod batch;
pub mod classifier;
pub mod dataset;
pub mod error;
pub mod label;
pub mod metrics;
pub mod model;
pub mod plots;
pub mod preprocess;
mod timer;

pub use artifacts::{ArtifactKind, ArtifactStore, RunId, DEFAULT_ARTIFACTS_DIR, DEFAULT_KEEP_RUNS};
pub use batch::{evaluate_archive, evaluate_directory, BatchOptions, BatchReport};
pub use classifier::{Classifier, Outcome, Prediction, Timings};
pub use dataset::{ClassMap, Dataset, Sample};
pub use error::{Error, Result};
pub use label::Label;
pub use model::{Model, ModelSlot, SavedModel, SavedModelOptions, TensorLayout, DEFAULT_MODEL_DIR};
pub use preprocess::{preprocess, ImageTensor};
pub use timer::Timer;
