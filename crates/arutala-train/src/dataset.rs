//! Image-folder datasets and mini-batch loading
//!
//! A dataset root holds one sub-directory per class; every image file inside
//! a class directory is a sample of that class. Class indices follow the
//! sorted directory names.

use arutala_core::{Error, Result};
use arutala_vision::Transform;
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif"];

/// Labeled image files discovered under a root directory
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<(PathBuf, u32)>,
}

impl ImageFolder {
    /// Scan `root`, deriving the class list from its sub-directories
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let classes = class_dirs(root)?;
        if classes.is_empty() {
            return Err(Error::dataset(format!(
                "No class directories found in {}",
                root.display()
            )));
        }
        Self::with_classes(root, &classes)
    }

    /// Scan `root` against an existing class list.
    ///
    /// Every sub-directory must name a known class; classes absent from `root`
    /// simply contribute no samples.
    pub fn open_with_classes(root: impl AsRef<Path>, classes: &[String]) -> Result<Self> {
        let root = root.as_ref();
        for name in class_dirs(root)? {
            if !classes.contains(&name) {
                return Err(Error::dataset(format!(
                    "Class '{}' in {} is not one of the training classes",
                    name,
                    root.display()
                )));
            }
        }
        Self::with_classes(root, classes)
    }

    fn with_classes(root: &Path, classes: &[String]) -> Result<Self> {
        let mut samples = Vec::new();
        for (idx, class) in classes.iter().enumerate() {
            let dir = root.join(class);
            if !dir.is_dir() {
                continue;
            }

            let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && has_image_extension(path))
                .collect();
            files.sort();

            samples.extend(files.into_iter().map(|path| (path, idx as u32)));
        }

        if samples.is_empty() {
            return Err(Error::dataset(format!("No images found in {}", root.display())));
        }

        debug!(
            root = %root.display(),
            classes = classes.len(),
            samples = samples.len(),
            "Opened image folder"
        );

        Ok(Self {
            root: root.to_path_buf(),
            classes: classes.to_vec(),
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Class names, index-aligned with the labels
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Path and class index of one sample
    pub fn sample(&self, index: usize) -> Option<(&Path, u32)> {
        self.samples.get(index).map(|(path, label)| (path.as_path(), *label))
    }
}

/// Sorted names of the sub-directories of `root`
fn class_dirs(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(Error::dataset(format!(
            "Dataset directory not found: {}",
            root.display()
        )));
    }

    let mut names: Vec<String> = fs::read_dir(root)?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(|s| s.to_owned()))
        .collect();
    names.sort();
    Ok(names)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// How a loader orders samples and which transform it applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderMode {
    /// Shuffled order, augmented transform
    Train,
    /// Fixed order, eval transform
    Eval,
}

/// One stacked mini-batch
#[derive(Debug)]
pub struct Batch {
    /// `[B, 3, H, W]` images
    pub images: Tensor,
    /// `[B]` class indices
    pub labels: Tensor,
}

/// Groups dataset samples into transformed mini-batches
pub struct DataLoader<'a> {
    dataset: &'a ImageFolder,
    transform: &'a Transform,
    batch_size: usize,
    mode: LoaderMode,
    device: Device,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a ImageFolder,
        transform: &'a Transform,
        batch_size: usize,
        mode: LoaderMode,
        device: &Device,
    ) -> Self {
        Self {
            dataset,
            transform,
            batch_size: batch_size.max(1),
            mode,
            device: device.clone(),
        }
    }

    pub fn dataset(&self) -> &ImageFolder {
        self.dataset
    }

    pub fn mode(&self) -> LoaderMode {
        self.mode
    }

    /// Batches per pass; the last batch may be short
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Sample indices for one pass, grouped into batches
    pub fn batch_indices<R: Rng>(&self, rng: &mut R) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.mode == LoaderMode::Train {
            order.shuffle(rng);
        }
        order.chunks(self.batch_size).map(|c| c.to_vec()).collect()
    }

    /// Decode, transform and stack the given samples
    pub fn load_batch<R: Rng>(&self, indices: &[usize], rng: &mut R) -> Result<Batch> {
        let mut images = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());

        for &index in indices {
            let (path, label) = self.dataset.sample(index).ok_or_else(|| {
                Error::dataset(format!("Sample index {} out of range", index))
            })?;

            let image = image::open(path).map_err(|e| {
                Error::dataset(format!("Failed to read {}: {}", path.display(), e))
            })?;

            let tensor = match self.mode {
                LoaderMode::Train => self.transform.apply_augmented(&image, rng, &self.device)?,
                LoaderMode::Eval => self.transform.apply(&image, &self.device)?,
            };
            images.push(tensor);
            labels.push(label);
        }

        let count = labels.len();
        Ok(Batch {
            images: Tensor::stack(&images, 0)?,
            labels: Tensor::from_vec(labels, count, &self.device)?,
        })
    }
}
