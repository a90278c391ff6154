use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use zip::ZipArchive;

use crate::artifacts::{ArtifactKind, ArtifactStore, RunId};
use crate::classifier::{Classifier, Outcome, BATCH_SIZE};
use crate::dataset::{ClassMap, Dataset};
use crate::error::{Error, Result};
use crate::label::Label;
use crate::metrics::{ClassificationReport, ConfusionMatrix, RocCurve};
use crate::model::Model;
use crate::plots::{self, SamplePanel, GRID_COLS, GRID_ROWS};
use crate::timer::Timer;

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub classes: ClassMap,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            batch_size: BATCH_SIZE,
            classes: ClassMap::default(),
        }
    }
}

/// Summary returned for a batch run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchReport {
    pub run_id: RunId,
    pub total_images: usize,
    pub positive_cases: usize,
    pub negative_cases: usize,
    pub confusion_matrix_path: Option<String>,
    pub roc_curve_path: Option<String>,
    pub sample_predictions_path: Option<String>,
    pub classification_report: String,
    /// `None` when the batch holds a single class and the curve is undefined
    pub roc_auc: Option<f64>,
}

/// Extract a zip of `<class>/<image>` entries and evaluate it.
pub fn evaluate_archive(
    model: Arc<dyn Model>,
    archive: &[u8],
    store: &ArtifactStore,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let workdir = tempfile::tempdir()?;
    let zip_path = workdir.path().join("images.zip");
    fs::write(&zip_path, archive)?;
    info!("Read {} bytes from uploaded archive", archive.len());

    let extract_dir = workdir.path().join("images");
    let mut t = Timer::new_start("Extracting archive");
    let mut zip = ZipArchive::new(File::open(&zip_path)?)?;
    info!("Archive holds {} entries", zip.len());
    zip.extract(&extract_dir)?;
    t.stop();

    evaluate_directory(model, &extract_dir, store, options)
}

/// Evaluate the images found under `root` and write the plots of the run.
///
/// Nothing is published when any step fails.
pub fn evaluate_directory(
    model: Arc<dyn Model>,
    root: &Path,
    store: &ArtifactStore,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let dataset = Dataset::scan(root, &options.classes)?;
    if dataset.is_empty() {
        return Err(Error::EmptyDataset(options.classes.names().join(", ")));
    }

    let classifier = Classifier::new(model);
    let outcomes = classifier.classify_dataset(&dataset, options.batch_size)?;

    let truth: Vec<Label> = outcomes.iter().map(|o| o.label).collect();
    let predicted: Vec<Label> = outcomes.iter().map(|o| o.predicted).collect();
    let scores: Vec<f32> = outcomes.iter().map(|o| o.probability).collect();

    let cm = ConfusionMatrix::new(&truth, &predicted)?;
    let report = ClassificationReport::new(&cm);
    let roc = if cm.has_both_classes() {
        Some(RocCurve::compute(&truth, &scores)?)
    } else {
        warn!("Batch holds a single class, ROC curve and AUC are unavailable");
        None
    };

    let (run, run_dir) = store.begin_run()?;
    if let Err(err) = render_run(&dataset, &outcomes, &cm, roc.as_ref(), &run_dir) {
        store.discard(&run);
        return Err(err);
    }
    store.publish(&run);

    let artifact = |kind| {
        store
            .find(&run, kind)
            .map(|path: PathBuf| path.display().to_string())
    };
    let positive_cases = cm.predicted(Label::Cardiomegaly);

    Ok(BatchReport {
        total_images: cm.total(),
        positive_cases,
        negative_cases: cm.total() - positive_cases,
        confusion_matrix_path: artifact(ArtifactKind::ConfusionMatrix),
        roc_curve_path: artifact(ArtifactKind::RocCurve),
        sample_predictions_path: artifact(ArtifactKind::SamplePredictions),
        classification_report: report.to_string(),
        roc_auc: roc.map(|r| (r.auc() * 10_000.0).round() / 10_000.0),
        run_id: run,
    })
}

fn render_run(
    dataset: &Dataset,
    outcomes: &[Outcome],
    cm: &ConfusionMatrix,
    roc: Option<&RocCurve>,
    dir: &Path,
) -> Result<()> {
    let mut t = Timer::new_start("Rendering plots");

    plots::render_confusion_matrix(&dir.join(ArtifactKind::ConfusionMatrix.file_name()), cm)?;
    if let Some(roc) = roc {
        plots::render_roc_curve(&dir.join(ArtifactKind::RocCurve.file_name()), roc)?;
    }

    let mut panels = Vec::with_capacity(GRID_ROWS * GRID_COLS);
    for (index, outcome) in outcomes.iter().enumerate().take(GRID_ROWS * GRID_COLS) {
        let (tensor, truth, _) = dataset.get(index)?;
        panels.push(SamplePanel {
            image: tensor.to_rgb_image(),
            truth,
            predicted: outcome.predicted,
            probability: outcome.probability,
        });
    }
    plots::render_sample_grid(
        &dir.join(ArtifactKind::SamplePredictions.file_name()),
        &panels,
    )?;

    t.stop();
    Ok(())
}
