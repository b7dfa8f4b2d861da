use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use ndarray::{s, Array2};
use walkdir::WalkDir;

use crate::errors::{Result, SafetyError};
use crate::labels::LabelMap;

/// One dataset record.
#[derive(Debug, Clone)]
pub struct Sample {
    /// File name of the image, extension included.
    pub name: String,
    pub image: RgbImage,
    pub labels: Option<LabelMap>,
    /// `N x 3` xyz coordinates.
    pub point_cloud: Option<Array2<f32>>,
}

impl Sample {
    /// Name without its extension, used for every per-sample output file.
    pub fn stem(&self) -> &str {
        file_stem(&self.name)
    }

    /// `(height, width)` of the image.
    pub fn dims(&self) -> (usize, usize) {
        (self.image.height() as usize, self.image.width() as usize)
    }
}

pub fn file_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Random access to the samples of a dataset, in name order.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sample(&self, index: usize) -> Result<Sample>;
}

/// Dataset stored on disk as
///
/// ```text
/// <root>/images/<name>.{png,jpg}
/// <root>/labels/<stem>.png      (optional, 8-bit class ids)
/// <root>/pcs/<stem>.bin         (optional, f32 x y z intensity records)
/// ```
pub struct LocalDataset {
    root: PathBuf,
    image_paths: Vec<PathBuf>,
}

impl LocalDataset {
    pub fn open(root: &Path) -> Result<Self> {
        let images_dir = root.join("images");
        if !images_dir.is_dir() {
            return Err(SafetyError::file_system(
                &images_dir,
                "dataset directory check",
                std::io::Error::new(std::io::ErrorKind::NotFound, "images directory does not exist"),
            ));
        }

        let mut image_paths: Vec<PathBuf> = WalkDir::new(&images_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| ImageFormat::from_path(e.path()).is_ok())
            .map(|e| e.into_path())
            .collect();
        image_paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(Self {
            root: root.to_path_buf(),
            image_paths,
        })
    }

    /// Resolves a dataset identifier: an existing path is used as-is,
    /// anything else is looked up under `<repo_root>/datasets/`.
    pub fn resolve(repo_root: &Path, identifier: &str) -> PathBuf {
        let direct = PathBuf::from(identifier);
        if direct.is_dir() {
            direct
        } else {
            repo_root.join("datasets").join(identifier)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Dataset for LocalDataset {
    fn len(&self) -> usize {
        self.image_paths.len()
    }

    fn sample(&self, index: usize) -> Result<Sample> {
        let path = self.image_paths.get(index).ok_or_else(|| SafetyError::Validation {
            field: "sample index".to_string(),
            reason: format!("{index} is out of range for {} samples", self.image_paths.len()),
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SafetyError::Validation {
                field: path.display().to_string(),
                reason: "is not a valid UTF-8 file name".to_string(),
            })?
            .to_string();

        let image = load_rgb(path)?;
        let stem = file_stem(&name);

        let label_path = self.root.join("labels").join(format!("{stem}.png"));
        let labels = if label_path.exists() {
            let labels = load_label_image(&label_path)?;
            if labels.dim() != (image.height() as usize, image.width() as usize) {
                return Err(SafetyError::Validation {
                    field: label_path.display().to_string(),
                    reason: "does not match the image dimensions".to_string(),
                });
            }
            Some(labels)
        } else {
            None
        };

        let pc_path = self.root.join("pcs").join(format!("{stem}.bin"));
        let point_cloud = if pc_path.exists() {
            Some(read_point_cloud(&pc_path)?)
        } else {
            None
        };

        Ok(Sample {
            name,
            image,
            labels,
            point_cloud,
        })
    }
}

pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .map_err(|e| SafetyError::ImageProcessing {
            path: path.display().to_string(),
            operation: "image loading".to_string(),
            source: Box::new(e),
        })?
        .into_rgb8())
}

/// Loads an 8-bit single-channel image as a `[row, column]` label map.
pub fn load_label_image(path: &Path) -> Result<LabelMap> {
    let gray = image::open(path)
        .map_err(|e| SafetyError::ImageProcessing {
            path: path.display().to_string(),
            operation: "label image loading".to_string(),
            source: Box::new(e),
        })?
        .into_luma8();
    let (width, height) = gray.dimensions();
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        gray.into_raw(),
    )?)
}

/// Reads a point cloud of little-endian `f32` records `x y z intensity` and
/// keeps the xyz columns.
pub fn read_point_cloud(path: &Path) -> Result<Array2<f32>> {
    let bytes = fs::read(path).map_err(|e| SafetyError::file_system(path, "point cloud read", e))?;
    if bytes.len() % 16 != 0 {
        return Err(SafetyError::Validation {
            field: path.display().to_string(),
            reason: format!("length {} is not a multiple of 4 f32 values", bytes.len()),
        });
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let records = Array2::from_shape_vec((values.len() / 4, 4), values)?;
    Ok(records.slice(s![.., ..3]).to_owned())
}
