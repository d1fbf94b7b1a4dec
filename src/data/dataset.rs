//! Character dataset: images grouped by character class
//!
//! The store is immutable after construction and is shared with the data
//! loading workers through an `Arc`.

use crate::error::{Result, SiameseError};
use image::imageops::FilterType;
use ndarray::Array3;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info, warn};

/// Shape of a single image: (channels, height, width)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of values in one image
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape as a tensor dimension array for a batch of `batch` images
    pub fn batch_dims(&self, batch: usize) -> [usize; 4] {
        [batch, self.channels, self.height, self.width]
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

/// Reference to one image: (class index, item index within the class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub class: usize,
    pub item: usize,
}

impl ItemRef {
    pub fn new(class: usize, item: usize) -> Self {
        Self { class, item }
    }
}

/// All drawings of one character
#[derive(Debug, Clone)]
pub struct CharacterClass {
    /// Human readable name, e.g. `Latin/character01`
    pub name: String,
    /// Images, each an array of shape (channels, height, width) with values in [0, 1]
    pub images: Vec<Array3<f32>>,
}

/// On-disk representation of a dataset file
#[derive(Debug, Serialize, Deserialize)]
struct DatasetFile {
    shape: ImageShape,
    classes: Vec<ClassRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClassRecord {
    name: String,
    /// Row-major (channels, height, width) pixels, 0..=255
    images: Vec<Vec<u8>>,
}

/// Dataset of handwritten characters grouped by class
#[derive(Debug, Clone)]
pub struct CharacterDataset {
    shape: ImageShape,
    classes: Vec<CharacterClass>,
}

impl CharacterDataset {
    /// Create a dataset, checking that every image matches `shape` and holds
    /// pixel values in [0, 1]
    pub fn new(shape: ImageShape, classes: Vec<CharacterClass>) -> Result<Self> {
        if shape.is_empty() {
            return Err(SiameseError::Data(format!("empty image shape {shape}")));
        }
        let expected = [shape.channels, shape.height, shape.width];
        for class in &classes {
            if let Some(image) = class.images.iter().find(|img| img.shape() != expected) {
                return Err(SiameseError::Data(format!(
                    "class '{}' has an image of shape {:?}, expected {}",
                    class.name,
                    image.shape(),
                    shape
                )));
            }
            let bad_pixel = class
                .images
                .iter()
                .flat_map(|img| img.iter())
                .find(|v| !(0.0..=1.0).contains(*v));
            if let Some(value) = bad_pixel {
                return Err(SiameseError::Data(format!(
                    "class '{}' has pixel value {}, expected [0, 1]",
                    class.name, value
                )));
            }
        }
        Ok(Self { shape, classes })
    }

    /// Image shape shared by all items
    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Number of classes
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Total number of images
    pub fn len(&self) -> usize {
        self.classes.iter().map(|c| c.images.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item counts of every class, in class order
    pub fn class_sizes(&self) -> Vec<usize> {
        self.classes.iter().map(|c| c.images.len()).collect()
    }

    /// Get a class by index
    pub fn class(&self, class: usize) -> Option<&CharacterClass> {
        self.classes.get(class)
    }

    /// Get an image by reference
    pub fn image(&self, item: ItemRef) -> Option<&Array3<f32>> {
        self.classes.get(item.class)?.images.get(item.item)
    }

    /// Copy an image into a flat row-major vector
    pub fn image_values(&self, item: ItemRef) -> Result<Vec<f32>> {
        self.image(item)
            .map(|img| img.iter().copied().collect())
            .ok_or_else(|| {
                SiameseError::Data(format!(
                    "no image at class {} item {}",
                    item.class, item.item
                ))
            })
    }

    /// Load a dataset file written by [`CharacterDataset::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading dataset from {}", path.display());

        let reader = BufReader::new(File::open(path)?);
        let file: DatasetFile = serde_json::from_reader(reader)?;
        let shape = file.shape;

        let classes = file
            .classes
            .into_iter()
            .map(|record| {
                let images = record
                    .images
                    .into_iter()
                    .map(|pixels| pixels_to_array(&pixels, shape, &record.name))
                    .collect::<Result<Vec<_>>>()?;
                Ok(CharacterClass {
                    name: record.name,
                    images,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let dataset = Self::new(shape, classes)?;
        info!(
            "Loaded {} classes, {} images of shape {}",
            dataset.num_classes(),
            dataset.len(),
            shape
        );
        Ok(dataset)
    }

    /// Write the dataset as a JSON dataset file (pixels quantized to u8)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = DatasetFile {
            shape: self.shape,
            classes: self
                .classes
                .iter()
                .map(|class| ClassRecord {
                    name: class.name.clone(),
                    images: class
                        .images
                        .iter()
                        .map(|img| {
                            img.iter()
                                .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                                .collect()
                        })
                        .collect(),
                })
                .collect(),
        };

        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, &file)?;
        info!("Saved dataset to {}", path.as_ref().display());
        Ok(())
    }

    /// Import an Omniglot-style image tree: `root/<alphabet>/<character>/*.png`
    ///
    /// Images are converted to grayscale, resized to `height x width` and
    /// scaled to [0, 1]. Only single-channel shapes are supported.
    pub fn from_image_dir<P: AsRef<Path>>(root: P, shape: ImageShape) -> Result<Self> {
        let root = root.as_ref();
        if shape.channels != 1 {
            return Err(SiameseError::Config(format!(
                "image import produces grayscale images, got {} channels",
                shape.channels
            )));
        }
        info!("Importing characters from {}", root.display());

        let mut classes = Vec::new();
        for alphabet in sorted_entries(root)? {
            if !alphabet.is_dir() {
                continue;
            }
            let alphabet_name = file_name(&alphabet);
            for character in sorted_entries(&alphabet)? {
                if !character.is_dir() {
                    continue;
                }
                let mut images = Vec::new();
                for file in sorted_entries(&character)? {
                    if !is_image_file(&file) {
                        continue;
                    }
                    let gray = image::open(&file)?.to_luma8();
                    let resized = image::imageops::resize(
                        &gray,
                        shape.width as u32,
                        shape.height as u32,
                        FilterType::Triangle,
                    );
                    let name = format!("{}/{}", alphabet_name, file_name(&character));
                    images.push(pixels_to_array(resized.as_raw(), shape, &name)?);
                }

                if images.is_empty() {
                    warn!("Skipping {} (no images)", character.display());
                    continue;
                }
                debug!("{}: {} images", character.display(), images.len());
                classes.push(CharacterClass {
                    name: format!("{}/{}", alphabet_name, file_name(&character)),
                    images,
                });
            }
        }

        if classes.is_empty() {
            return Err(SiameseError::Data(format!(
                "no character directories found under {}",
                root.display()
            )));
        }

        let dataset = Self::new(shape, classes)?;
        info!(
            "Imported {} classes, {} images",
            dataset.num_classes(),
            dataset.len()
        );
        Ok(dataset)
    }

    /// Generate a synthetic dataset of stroke-like glyphs
    ///
    /// Each class has a fixed set of strokes; every item redraws them with
    /// jitter and pixel noise, so items of one class look alike while
    /// different classes do not.
    pub fn synthetic(
        num_classes: usize,
        per_class: usize,
        shape: ImageShape,
        seed: u64,
    ) -> Result<Self> {
        if shape.is_empty() {
            return Err(SiameseError::Data(format!("empty image shape {shape}")));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let (h, w) = (shape.height as f32, shape.width as f32);

        let classes = (0..num_classes)
            .map(|class_idx| {
                let n_strokes = rng.gen_range(2..=4);
                let strokes: Vec<[f32; 4]> = (0..n_strokes)
                    .map(|_| {
                        [
                            rng.gen_range(0.0..h),
                            rng.gen_range(0.0..w),
                            rng.gen_range(0.0..h),
                            rng.gen_range(0.0..w),
                        ]
                    })
                    .collect();

                let images = (0..per_class)
                    .map(|_| {
                        let mut img =
                            Array3::<f32>::zeros((shape.channels, shape.height, shape.width));
                        let dy = rng.gen_range(-1.0..1.0);
                        let dx = rng.gen_range(-1.0..1.0);
                        for stroke in &strokes {
                            draw_line(
                                &mut img,
                                (stroke[0] + dy, stroke[1] + dx),
                                (stroke[2] + dy, stroke[3] + dx),
                            );
                        }
                        img.mapv_inplace(|v| (v + rng.gen_range(0.0..0.1)).min(1.0));
                        img
                    })
                    .collect();

                CharacterClass {
                    name: format!("synthetic/character{:03}", class_idx + 1),
                    images,
                }
            })
            .collect();

        Self::new(shape, classes)
    }
}

fn pixels_to_array(pixels: &[u8], shape: ImageShape, name: &str) -> Result<Array3<f32>> {
    let values: Vec<f32> = pixels.iter().map(|&p| p as f32 / 255.0).collect();
    Array3::from_shape_vec((shape.channels, shape.height, shape.width), values).map_err(|_| {
        SiameseError::Data(format!(
            "class '{}' has an image of {} values, expected {}",
            name,
            pixels.len(),
            shape.len()
        ))
    })
}

/// Rasterize a line segment onto every channel
fn draw_line(img: &mut Array3<f32>, from: (f32, f32), to: (f32, f32)) {
    let (_, h, w) = img.dim();
    let steps = ((to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil() as usize).max(1);
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let y = (from.0 + (to.0 - from.0) * t).round();
        let x = (from.1 + (to.1 - from.1) * t).round();
        if y < 0.0 || x < 0.0 || y >= h as f32 || x >= w as f32 {
            continue;
        }
        for mut channel in img.outer_iter_mut() {
            channel[[y as usize, x as usize]] = 1.0;
        }
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "bmp")
            })
            .unwrap_or(false)
}
