//! MNIST reader for the raw IDX files.
//!
//! Header fields are big-endian `i32`s: magic, item count, then rows and
//! columns for image files. Pixels and labels follow as bytes.

use super::Dataset;
use crate::error::{NnError, Result};
use crate::tensor::Shape;
use byteorder::{BigEndian, ReadBytesExt};
use log::debug;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const IMAGE_MAGIC: i32 = 2_051;
pub const LABEL_MAGIC: i32 = 2_049;

/// Pixel mean of the MNIST training set, after scaling to `[0, 1]`.
pub const MNIST_MEAN: f32 = 0.130_660_48;
/// Pixel standard deviation of the MNIST training set, after scaling to `[0, 1]`.
pub const MNIST_STD: f32 = 0.308_107_8;

/// Which half of MNIST to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnistSplit {
    Train,
    Test,
}

impl MnistSplit {
    /// Candidate file names (`images`, `labels`); both the dotted and the
    /// hyphenated spellings are in circulation.
    fn file_names(&self) -> [(&'static str, &'static str); 2] {
        match self {
            MnistSplit::Train => [
                ("train-images.idx3-ubyte", "train-labels.idx1-ubyte"),
                ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            ],
            MnistSplit::Test => [
                ("t10k-images.idx3-ubyte", "t10k-labels.idx1-ubyte"),
                ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
            ],
        }
    }
}

/// Mapping from raw bytes to network inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `[-0.1, 1.175]`, the range of the original LeNet-5 experiments.
    Affine,
    /// `[0, 1]`
    Unit,
    /// `(x / 255 - MNIST_MEAN) / MNIST_STD`
    #[default]
    ZScore,
}

impl Normalization {
    pub fn apply(&self, pixel: u8) -> f32 {
        let x = pixel as f32 / 255.0;
        match self {
            Normalization::Affine => x * 1.275 - 0.1,
            Normalization::Unit => x,
            Normalization::ZScore => (x - MNIST_MEAN) / MNIST_STD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Normalization::Affine => "affine",
            Normalization::Unit => "unit",
            Normalization::ZScore => "z_score",
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Normalization {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "affine" => Ok(Normalization::Affine),
            "unit" => Ok(Normalization::Unit),
            "z_score" | "zscore" => Ok(Normalization::ZScore),
            other => Err(NnError::config(format!(
                "unknown normalization '{}' (expected affine, unit or z_score)",
                other
            ))),
        }
    }
}

fn invalid_data(msg: String) -> NnError {
    NnError::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// Raw IDX image block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxImages {
    pub count: usize,
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<u8>,
}

/// Reads an IDX3 image file, keeping at most `limit` images.
pub fn read_idx_images<R: Read>(mut reader: R, limit: Option<usize>) -> Result<IdxImages> {
    let magic = reader.read_i32::<BigEndian>()?;
    if magic != IMAGE_MAGIC {
        return Err(invalid_data(format!(
            "bad image file magic {} (expected {})",
            magic, IMAGE_MAGIC
        )));
    }
    let stored = reader.read_i32::<BigEndian>()?.max(0) as usize;
    let rows = reader.read_i32::<BigEndian>()?.max(0) as usize;
    let cols = reader.read_i32::<BigEndian>()?.max(0) as usize;
    let count = limit.map_or(stored, |l| l.min(stored));

    let mut pixels = vec![0u8; count * rows * cols];
    reader.read_exact(&mut pixels)?;
    Ok(IdxImages {
        count,
        rows,
        cols,
        pixels,
    })
}

/// Reads an IDX1 label file, keeping at most `limit` labels.
pub fn read_idx_labels<R: Read>(mut reader: R, limit: Option<usize>) -> Result<Vec<u8>> {
    let magic = reader.read_i32::<BigEndian>()?;
    if magic != LABEL_MAGIC {
        return Err(invalid_data(format!(
            "bad label file magic {} (expected {})",
            magic, LABEL_MAGIC
        )));
    }
    let stored = reader.read_i32::<BigEndian>()?.max(0) as usize;
    let count = limit.map_or(stored, |l| l.min(stored));
    let mut labels = vec![0u8; count];
    reader.read_exact(&mut labels)?;
    Ok(labels)
}

fn locate(dir: &Path, split: MnistSplit) -> Result<(PathBuf, PathBuf)> {
    let names = split.file_names();
    for (images, labels) in names {
        let (images, labels) = (dir.join(images), dir.join(labels));
        if images.is_file() && labels.is_file() {
            return Ok((images, labels));
        }
    }
    Err(NnError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!(
            "MNIST files {} / {} not found in {}",
            names[0].0,
            names[0].1,
            dir.display()
        ),
    )))
}

/// Loads one MNIST split from `dir` as `1 × rows × cols` images.
pub fn load_mnist(
    dir: impl AsRef<Path>,
    split: MnistSplit,
    normalization: Normalization,
    limit: Option<usize>,
) -> Result<Dataset> {
    let (image_path, label_path) = locate(dir.as_ref(), split)?;
    let images = read_idx_images(BufReader::new(File::open(&image_path)?), limit)?;
    let labels = read_idx_labels(BufReader::new(File::open(&label_path)?), limit)?;
    if labels.len() != images.count {
        return Err(invalid_data(format!(
            "{} holds {} images but {} holds {} labels",
            image_path.display(),
            images.count,
            label_path.display(),
            labels.len()
        )));
    }
    debug!(
        "loaded {} {}x{} images from {}",
        images.count,
        images.rows,
        images.cols,
        image_path.display()
    );

    let pixels = images
        .pixels
        .iter()
        .map(|&p| normalization.apply(p))
        .collect();
    Dataset::new(
        pixels,
        labels.into_iter().map(usize::from).collect(),
        Shape::image(1, images.rows, images.cols),
    )
}
