use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::label::Label;
use crate::preprocess::{preprocess, ImageTensor};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Which sub-directory names map to which label.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassMap {
    classes: Vec<(String, Label)>,
}

impl ClassMap {
    pub fn new(classes: Vec<(String, Label)>) -> Self {
        ClassMap { classes }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Label)> {
        self.classes.iter().map(|(name, label)| (name.as_str(), *label))
    }

    pub fn names(&self) -> Vec<&str> {
        self.classes.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        ClassMap::new(vec![
            (Label::Cardiomegaly.name().to_owned(), Label::Cardiomegaly),
            (Label::NoFinding.name().to_owned(), Label::NoFinding),
        ])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: Label,
}

/// Labelled images found under a root directory laid out as
/// `<root>/<class name>/<image>`.
#[derive(Clone, Debug)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    /// Enumerate every png/jpg/jpeg file under the known class folders.
    ///
    /// Class folders that do not exist are skipped, so the result may be
    /// empty.
    pub fn scan(root: &Path, classes: &ClassMap) -> Result<Self> {
        let mut samples = Vec::new();

        for (name, label) in classes.iter() {
            let class_dir = root.join(name);
            if !class_dir.is_dir() {
                debug!("{}: no such class folder, skipping", class_dir.display());
                continue;
            }

            let mut files = Vec::new();
            for entry in fs::read_dir(&class_dir)? {
                let path = entry?.path();
                if path.is_file() && has_image_extension(&path) {
                    files.push(path);
                }
            }
            files.sort();

            debug!("{}: {} images", class_dir.display(), files.len());
            samples.extend(files.into_iter().map(|path| Sample { path, label }));
        }

        info!("Found {} images under {}", samples.len(), root.display());

        Ok(Dataset { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Decode and preprocess the sample at `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Result<(ImageTensor, Label, &Path)> {
        let sample = &self.samples[index];
        // content wins over the file extension
        let image = image::io::Reader::open(&sample.path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| Error::DecodeFile {
                path: sample.path.clone(),
                source,
            })?;

        Ok((preprocess(&image), sample.label, sample.path.as_path()))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_image(path: &Path) {
        RgbImage::from_pixel(16, 12, Rgb([90, 90, 90]))
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    fn layout() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let positive = dir.path().join("Cardiomegaly");
        let negative = dir.path().join("No Finding");
        let other = dir.path().join("Effusion");
        for d in &[&positive, &negative, &other] {
            fs::create_dir(d).unwrap();
        }

        write_image(&positive.join("b.png"));
        write_image(&positive.join("a.JPG"));
        write_image(&negative.join("c.jpeg"));
        write_image(&negative.join("d.PnG"));
        write_image(&negative.join("e.png"));

        // not counted
        write_image(&other.join("f.png"));
        write_image(&negative.join("g.bmp"));
        fs::write(negative.join("notes.txt"), "ignored").unwrap();
        fs::create_dir(negative.join("nested.png")).unwrap();
        write_image(&dir.path().join("root.png"));

        dir
    }

    #[test]
    fn enumerates_only_known_classes_and_extensions() {
        let dir = layout();
        let dataset = Dataset::scan(dir.path(), &ClassMap::default()).unwrap();

        assert_eq!(dataset.len(), 5);
        let positives = dataset
            .samples()
            .iter()
            .filter(|s| s.label == Label::Cardiomegaly)
            .count();
        assert_eq!(positives, 2);

        // class order first, then file name order
        let names: Vec<_> = dataset
            .samples()
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpeg", "d.PnG", "e.png"]);
    }

    #[test]
    fn missing_class_folders_yield_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::scan(dir.path(), &ClassMap::default()).unwrap();
        assert!(dataset.is_empty());
    }

    #[test]
    fn custom_class_map_is_honoured() {
        let dir = layout();
        let classes = ClassMap::new(vec![("Effusion".to_owned(), Label::Cardiomegaly)]);
        let dataset = Dataset::scan(dir.path(), &classes).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(classes.names(), vec!["Effusion"]);
    }

    #[test]
    fn get_returns_preprocessed_tensor() {
        let dir = layout();
        let dataset = Dataset::scan(dir.path(), &ClassMap::default()).unwrap();

        let (tensor, label, path) = dataset.get(0).unwrap();
        assert_eq!(tensor.shape(), [3, 224, 224]);
        assert_eq!(label, Label::Cardiomegaly);
        assert!(path.ends_with("Cardiomegaly/a.JPG"));
    }

    #[test]
    fn undecodable_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let class_dir = dir.path().join("No Finding");
        fs::create_dir(&class_dir).unwrap();
        fs::write(class_dir.join("broken.png"), b"not a png").unwrap();

        let dataset = Dataset::scan(dir.path(), &ClassMap::default()).unwrap();
        match dataset.get(0) {
            Err(Error::DecodeFile { path, .. }) => assert!(path.ends_with("broken.png")),
            other => panic!("unexpected result: {:?}", other.map(|(_, l, _)| l)),
        }
    }
}
