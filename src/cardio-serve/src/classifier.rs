use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use log::debug;
use serde::Serialize;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::label::Label;
use crate::model::{check_logits, Model};
use crate::preprocess::preprocess;
use crate::timer::Timer;

/// Default number of images per forward pass.
pub const BATCH_SIZE: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Prediction {
    /// Classification label of the image
    pub prediction: Label,

    /// Probability of cardiomegaly, rounded to four decimals
    pub confidence: f64,

    #[serde(skip)]
    pub timings: Timings,
}

/// Milliseconds spent in each stage of a single prediction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Timings {
    pub image_load: i64,
    pub preprocess: i64,
    pub inference: i64,
}

/// Result of classifying one dataset sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub path: PathBuf,
    pub label: Label,
    pub predicted: Label,
    pub probability: f32,
}

pub struct Classifier {
    model: Arc<dyn Model>,
}

pub fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

fn round4(value: f32) -> f64 {
    (value as f64 * 10_000.0).round() / 10_000.0
}

impl Classifier {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Classifier { model }
    }

    /// The label is taken from the rounded confidence, so it is
    /// Cardiomegaly exactly when the reported confidence exceeds 0.5.
    pub fn classify(&self, image: &DynamicImage) -> Result<Prediction> {
        let mut timings = Timings::default();

        let mut t = Timer::new_start("Preprocessing image");
        let tensor = preprocess(image);
        t.stop();
        timings.preprocess = t.duration();

        let mut t = Timer::new_start("Inference");
        let logits = check_logits(1, self.model.forward(std::slice::from_ref(&tensor))?)?;
        t.stop();
        timings.inference = t.duration();

        let confidence = round4(sigmoid(logits[0]));
        Ok(Prediction {
            prediction: Label::from_probability(confidence as f32),
            confidence,
            timings,
        })
    }

    pub fn classify_from_raw(&self, data: &[u8]) -> Result<Prediction> {
        let mut t = Timer::new_start("Load image from memory");
        let image = image::load_from_memory(data)?;
        t.stop();

        let mut prediction = self.classify(&image)?;
        prediction.timings.image_load = t.duration();
        Ok(prediction)
    }

    /// Run the whole dataset through the model in order, `batch_size`
    /// images at a time.
    pub fn classify_dataset(&self, dataset: &Dataset, batch_size: usize) -> Result<Vec<Outcome>> {
        let batch_size = batch_size.max(1);
        let mut t = Timer::new_start(&format!("Classifying {} images", dataset.len()));

        let mut outcomes = Vec::with_capacity(dataset.len());
        let mut start = 0;
        while start < dataset.len() {
            let end = (start + batch_size).min(dataset.len());

            let mut tensors = Vec::with_capacity(end - start);
            for index in start..end {
                let (tensor, _, _) = dataset.get(index)?;
                tensors.push(tensor);
            }

            let logits = check_logits(tensors.len(), self.model.forward(&tensors)?)?;

            for (sample, logit) in dataset.samples()[start..end].iter().zip(logits) {
                let probability = sigmoid(logit);
                outcomes.push(Outcome {
                    path: sample.path.clone(),
                    label: sample.label,
                    predicted: Label::from_probability(probability),
                    probability,
                });
            }

            debug!("Classified images {}..{}", start, end);
            start = end;
        }

        t.stop();
        Ok(outcomes)
    }
}
