use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, info};
use tensorflow::{Graph, SavedModelBundle, Session, SessionOptions, SessionRunArgs, Tensor};

use crate::error::{Error, Result};
use crate::preprocess::{ImageTensor, CHANNELS, INPUT_SIZE};
use crate::timer::Timer;

/// Default location of the exported ResNet-18 with its single-logit head.
pub const DEFAULT_MODEL_DIR: &str = "static/model/resnet18_binary_cardiomegaly";

/// A network mapping a batch of images to one raw logit per image.
pub trait Model: Send + Sync {
    fn forward(&self, batch: &[ImageTensor]) -> Result<Vec<f32>>;
}

/// Memory layout of the input tensor fed to the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[batch, 3, 224, 224]`, what a PyTorch export expects
    Nchw,
    /// `[batch, 224, 224, 3]`
    Nhwc,
}

#[derive(Clone, Debug)]
pub struct SavedModelOptions {
    pub tags: Vec<String>,
    pub input_op: String,
    pub output_op: String,
    pub layout: TensorLayout,
}

impl Default for SavedModelOptions {
    fn default() -> Self {
        SavedModelOptions {
            tags: vec!["serve".to_owned()],
            input_op: "serving_default_input".to_owned(),
            output_op: "StatefulPartitionedCall".to_owned(),
            layout: TensorLayout::Nchw,
        }
    }
}

pub struct SavedModel {
    /// TensorFlow model graph
    graph: Graph,

    /// TensorFlow session
    session: Session,

    options: SavedModelOptions,
}

impl SavedModel {
    pub fn load(export_dir: &Path, options: SavedModelOptions) -> Result<Self> {
        let mut t = Timer::new_start("Loading session");

        let mut graph = Graph::new();
        let session =
            SavedModelBundle::load(&SessionOptions::new(), &options.tags, &mut graph, export_dir)?
                .session;

        // Placement is up to the runtime, an accelerator is used when one is visible.
        for device in session.device_list()? {
            info!("Session device: {} ({})", device.name, device.device_type);
        }

        // Fail early rather than on the first request.
        graph.operation_by_name_required(&options.input_op)?;
        graph.operation_by_name_required(&options.output_op)?;

        t.stop();

        Ok(SavedModel {
            graph,
            session,
            options,
        })
    }

    fn input_tensor(&self, batch: &[ImageTensor]) -> Result<Tensor<f32>> {
        let n = batch.len() as u64;
        let side = INPUT_SIZE as u64;
        let channels = CHANNELS as u64;

        let mut values = Vec::with_capacity(batch.len() * ImageTensor::SHAPE.iter().product::<usize>());
        let dims = match self.options.layout {
            TensorLayout::Nchw => {
                for image in batch {
                    values.extend_from_slice(image.as_slice());
                }
                [n, channels, side, side]
            }
            TensorLayout::Nhwc => {
                for image in batch {
                    values.extend(image.to_channels_last());
                }
                [n, side, side, channels]
            }
        };

        Ok(Tensor::new(&dims).with_values(&values)?)
    }
}

impl Model for SavedModel {
    fn forward(&self, batch: &[ImageTensor]) -> Result<Vec<f32>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut t = Timer::new_start("Running session");

        let input = self.input_tensor(batch)?;
        let mut args = SessionRunArgs::new();
        args.add_feed(
            &self
                .graph
                .operation_by_name_required(&self.options.input_op)?,
            0,
            &input,
        );
        let result = args.request_fetch(
            &self
                .graph
                .operation_by_name_required(&self.options.output_op)?,
            0,
        );

        self.session.run(&mut args)?;
        let output: Tensor<f32> = args.fetch(result)?;

        t.stop();

        // one logit per image, whatever the trailing dims
        if output.len() != batch.len() {
            return Err(Error::ModelOutput(format!(
                "expected {} logits, got tensor of shape {:?}",
                batch.len(),
                output.dims()
            )));
        }

        check_logits(batch.len(), output.to_vec())
    }
}

/// Exactly `expected` logits, all finite.
pub(crate) fn check_logits(expected: usize, logits: Vec<f32>) -> Result<Vec<f32>> {
    if logits.len() != expected {
        return Err(Error::ModelOutput(format!(
            "expected {} logits, got {}",
            expected,
            logits.len()
        )));
    }
    if let Some(position) = logits.iter().position(|l| !l.is_finite()) {
        return Err(Error::ModelOutput(format!(
            "logit {} is {}",
            position, logits[position]
        )));
    }

    Ok(logits)
}

/// Holds the process' model once it has been loaded.
///
/// The slot is created empty at startup and handed to whoever needs the
/// model; the first successful `load_once` fills it for the process lifetime.
pub struct ModelSlot<M: ?Sized> {
    path: PathBuf,
    model: OnceLock<Arc<M>>,
    loading: Mutex<()>,
}

impl<M: ?Sized> ModelSlot<M> {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        ModelSlot {
            path: path.into(),
            model: OnceLock::new(),
            loading: Mutex::new(()),
        }
    }

    /// Slot that is already filled, bypassing the filesystem.
    pub fn with_model<P: Into<PathBuf>>(path: P, model: Arc<M>) -> Self {
        let slot = ModelSlot::new(path);
        let _ = slot.model.set(model);
        slot
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Load the model with `load` unless that already happened.
    ///
    /// Every call returns the same handle. `load` is never invoked when the
    /// model location does not exist.
    pub fn load_once_with<F>(&self, load: F) -> Result<Arc<M>>
    where
        F: FnOnce(&Path) -> Result<Arc<M>>,
    {
        if let Some(model) = self.model.get() {
            debug!("Model is already loaded, skipping load");
            return Ok(Arc::clone(model));
        }

        let _guard = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(model) = self.model.get() {
            return Ok(Arc::clone(model));
        }

        if !self.path.exists() {
            return Err(Error::ModelNotFound(self.path.clone()));
        }

        info!("Loading model from {}", self.path.display());
        let model = load(&self.path)?;
        let _ = self.model.set(Arc::clone(&model));
        info!("Model loaded and ready");

        Ok(model)
    }

    pub fn get(&self) -> Result<Arc<M>> {
        self.model.get().cloned().ok_or(Error::ModelNotLoaded)
    }
}

impl ModelSlot<dyn Model> {
    /// Load the SavedModel found at the slot's path.
    pub fn load_once(&self, options: &SavedModelOptions) -> Result<Arc<dyn Model>> {
        self.load_once_with(|path| {
            let model: Arc<dyn Model> = Arc::new(SavedModel::load(path, options.clone())?);
            Ok(model)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Constant(f32);

    impl Model for Constant {
        fn forward(&self, batch: &[ImageTensor]) -> Result<Vec<f32>> {
            Ok(vec![self.0; batch.len()])
        }
    }

    fn constant(_: &Path) -> Result<Arc<dyn Model>> {
        Ok(Arc::new(Constant(1.0)))
    }

    #[test]
    fn get_before_load_fails() {
        let slot: ModelSlot<dyn Model> = ModelSlot::new("does/not/matter");
        assert!(!slot.is_loaded());
        assert!(matches!(slot.get(), Err(Error::ModelNotLoaded)));
    }

    #[test]
    fn missing_model_location_is_reported() {
        let calls = AtomicUsize::new(0);
        let slot: ModelSlot<dyn Model> = ModelSlot::new("static/model/nowhere");

        let err = slot
            .load_once_with(|p| {
                calls.fetch_add(1, Ordering::SeqCst);
                constant(p)
            })
            .err()
            .unwrap();

        assert!(matches!(err, Error::ModelNotFound(ref p) if p.ends_with("nowhere")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!slot.is_loaded());
    }

    #[test]
    fn loading_twice_keeps_the_same_handle() {
        let dir = tempfile::tempdir().unwrap();
        let calls = AtomicUsize::new(0);
        let slot: ModelSlot<dyn Model> = ModelSlot::new(dir.path());

        let load = |p: &Path| {
            calls.fetch_add(1, Ordering::SeqCst);
            constant(p)
        };
        let first = slot.load_once_with(load).unwrap();
        let second = slot.load_once_with(load).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &slot.get().unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_loads_share_one_model() {
        let dir = tempfile::tempdir().unwrap();
        let calls = AtomicUsize::new(0);
        let slot: ModelSlot<dyn Model> = ModelSlot::new(dir.path());

        let (slot, calls) = (&slot, &calls);
        let handles: Vec<Arc<dyn Model>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(move |_| {
                    s.spawn(move || {
                        slot.load_once_with(|p| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(50));
                            constant(p)
                        })
                        .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        assert!(Arc::ptr_eq(&handles[0], &slot.get().unwrap()));
    }

    #[test]
    fn logits_must_match_the_batch_and_be_finite() {
        assert_eq!(check_logits(2, vec![0.5, -1.0]).unwrap(), vec![0.5, -1.0]);

        for bad in &[vec![0.5], vec![0.5, f32::NAN], vec![f32::NEG_INFINITY, 0.0]] {
            let err = check_logits(2, bad.clone()).unwrap_err();
            assert_eq!(err.kind(), "unexpected_model_output");
        }
    }

    #[test]
    fn prefilled_slot_is_loaded() {
        let model: Arc<dyn Model> = Arc::new(Constant(-2.0));
        let slot = ModelSlot::with_model("unused", Arc::clone(&model));
        assert!(slot.is_loaded());
        assert!(Arc::ptr_eq(&slot.get().unwrap(), &model));
    }
}
