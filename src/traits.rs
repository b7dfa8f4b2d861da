use std::path::Path;

use image::{GrayImage, RgbImage};
use ndarray::Array2;

use crate::errors::Result;
use crate::labels::LabelMap;

/// A pixel location as `(x, y)`: column first, then row.
pub type Pixel = (usize, usize);

/// Semantic segmentation network producing one class id per pixel.
pub trait SegmentationModel: Send + Sync {
    /// Returns an `H x W` label map for `image`.
    fn predict(&self, image: &RgbImage) -> Result<LabelMap>;

    /// Same as [`predict`](Self::predict) for networks conditioned on an
    /// aligned depth image.
    fn predict_with_depth(&self, image: &RgbImage, depth: &GrayImage) -> Result<LabelMap>;
}

/// Per-image state handed to a [`SceneQueries`] backend.
pub struct SceneState<'a> {
    /// Per-method scratch directory (`fi_data`).
    pub data_dir: &'a Path,
    pub stem: &'a str,
    pub image: &'a RgbImage,
    /// `N x 3` xyz.
    pub point_cloud: &'a Array2<f32>,
}

/// The perception queries a neuro-symbolic safety program may call.
///
/// `set_state` is called once per image before any query; queries may then be
/// issued concurrently from several threads.
pub trait SceneQueries: Send + Sync {
    fn set_state(&mut self, state: SceneState<'_>) -> Result<()>;

    /// Terrain class id at `pixel`.
    fn terrain(&self, pixel: Pixel) -> Result<f64>;

    /// Whether `pixel` lies in the way of the robot's path.
    fn in_the_way(&self, pixel: Pixel) -> Result<bool>;

    fn slope(&self, pixel: Pixel) -> Result<f64>;

    /// Metric distance from `pixel` to the nearest instance of `object`.
    fn distance_to(&self, object: &str, pixel: Pixel) -> Result<f64>;

    /// Distance to `object` measured along the robot's forward axis.
    fn frontal_distance(&self, object: &str, pixel: Pixel) -> Result<f64>;
}

/// Remote vision-language model answering a prompt about one image.
pub trait VisionLanguageClient: Send + Sync {
    fn respond(&self, preprompt: &str, prompt: &str, image_url: &str) -> Result<String>;
}

/// One object selected by a synthesized visual program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMask {
    /// `H x W`, non-zero where the object is.
    pub mask: Array2<u8>,
}

/// Visual program synthesis engine: turns an instruction into a program,
/// runs it on the image and returns the objects it selected.
pub trait ProgramSynthesisEngine: Send + Sync {
    fn execute(&self, image: &RgbImage, instruction: &str) -> Result<Vec<ObjectMask>>;
}
