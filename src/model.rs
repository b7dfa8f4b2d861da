use std::path::Path;

use image::{imageops, imageops::FilterType, GrayImage, Luma, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    errors::{Result, SafetyError},
    labels::LabelMap,
    traits::SegmentationModel,
};

/// Input resolution used when the exported graph has dynamic spatial axes.
pub const DEFAULT_INPUT_SIZE: u32 = 512;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// SegFormer-style terrain segmentation network exported to ONNX.
///
/// The graph takes `pixel_values` (`1 x C x H x W`, C = 3, or 4 for depth
/// conditioned models) and returns `logits` (`1 x classes x h x w`).
pub struct SegFormerModel {
    /// Network input as `(height, width)`.
    pub input_size: (u32, u32),
    session: Mutex<Session>,
}

impl SegFormerModel {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| SafetyError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| SafetyError::Model {
                operation: "execution provider setup".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| SafetyError::Model {
                operation: "memory pattern setup".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| SafetyError::Model {
                operation: format!("model load: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let shape = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape());
        let spatial_dim = |axis: usize| {
            shape
                .and_then(|shape| shape.get(axis).copied())
                .filter(|&dim| dim > 0)
                .map_or(DEFAULT_INPUT_SIZE, |dim| dim as u32)
        };
        let input_size = (spatial_dim(2), spatial_dim(3));
        debug!(
            model = %model_path.display(),
            height = input_size.0,
            width = input_size.1,
            "loaded segmentation model"
        );

        Ok(Self {
            input_size,
            session: Mutex::new(session),
        })
    }

    fn run(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(
            ort::inputs!["pixel_values" => TensorRef::from_array_view(&tensor.as_standard_layout())?],
        )?;
        Ok(outputs["logits"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

impl SegmentationModel for SegFormerModel {
    fn predict(&self, image: &RgbImage) -> Result<LabelMap> {
        let tensor = preprocess(image, None, self.input_size);
        let logits = self.run(tensor.view())?;
        postprocess(logits.view(), image.width(), image.height())
    }

    fn predict_with_depth(&self, image: &RgbImage, depth: &GrayImage) -> Result<LabelMap> {
        let tensor = preprocess(image, Some(depth), self.input_size);
        let logits = self.run(tensor.view())?;
        postprocess(logits.view(), image.width(), image.height())
    }
}

/// Resizes to the `(height, width)` network input, normalizes with ImageNet
/// statistics and lays the result out as NCHW. A depth image becomes a fourth
/// channel in `[0, 1]`.
pub fn preprocess(
    image: &RgbImage,
    depth: Option<&GrayImage>,
    (height, width): (u32, u32),
) -> Array4<f32> {
    let channels = if depth.is_some() { 4 } else { 3 };
    let mut tensor = Array4::<f32>::zeros((1, channels, height as usize, width as usize));

    let resized = imageops::resize(image, width, height, FilterType::Lanczos3);
    let pixels = resized.as_ndarray3();
    for c in 0..3 {
        let (mean, std) = (IMAGENET_MEAN[c], IMAGENET_STD[c]);
        tensor
            .slice_mut(s![0, c, .., ..])
            .assign(&pixels.slice(s![c, .., ..]).mapv(|v| (f32::from(v) / 255.0 - mean) / std));
    }

    if let Some(depth) = depth {
        let resized = imageops::resize(depth, width, height, FilterType::Lanczos3);
        for (x, y, Luma([v])) in resized.enumerate_pixels() {
            tensor[[0, 3, y as usize, x as usize]] = f32::from(*v) / 255.0;
        }
    }

    tensor
}

/// Takes the per-pixel argmax over class logits and scales the class map
/// back to `width x height` with nearest-neighbour sampling.
pub fn postprocess(logits: ArrayView4<f32>, width: u32, height: u32) -> Result<LabelMap> {
    let (_, classes, h, w) = logits.dim();
    if classes == 0 || h == 0 || w == 0 {
        return Err(SafetyError::Validation {
            field: "logits".to_string(),
            reason: format!("has empty shape {:?}", logits.shape()),
        });
    }

    let class_map = Array2::from_shape_fn((h, w), |(y, x)| argmax(logits.slice(s![0, .., y, x])));
    let (height, width) = (height as usize, width as usize);
    Ok(Array2::from_shape_fn((height, width), |(y, x)| {
        class_map[[y * h / height, x * w / width]]
    }))
}

fn argmax(scores: ArrayView1<f32>) -> u8 {
    scores
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |(best, best_score), (i, &score)| {
            if score > best_score {
                (i, score)
            } else {
                (best, best_score)
            }
        })
        .0 as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shapes_and_normalization() {
        let image = RgbImage::from_pixel(40, 30, Rgb([255, 0, 128]));
        let tensor = preprocess(&image, None, (16, 16));
        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);

        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((tensor[[0, 0, 5, 5]] - red).abs() < 0.02);
        assert!((tensor[[0, 1, 5, 5]] - green).abs() < 0.02);
    }

    #[test]
    fn test_preprocess_depth_channel() {
        let image = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        let depth = GrayImage::from_pixel(8, 8, Luma([255]));
        let tensor = preprocess(&image, Some(&depth), (8, 8));
        assert_eq!(tensor.shape(), &[1, 4, 8, 8]);
        assert!((tensor[[0, 3, 2, 2]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_preprocess_non_square_input() {
        // left half white, right half black
        let image = RgbImage::from_fn(64, 32, |x, _| {
            if x < 32 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let depth = GrayImage::from_fn(64, 32, |_, y| Luma([if y < 16 { 0 } else { 255 }]));
        let tensor = preprocess(&image, Some(&depth), (8, 16));
        assert_eq!(tensor.shape(), &[1, 4, 8, 16]);

        let white = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let black = (0.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((tensor[[0, 0, 4, 1]] - white).abs() < 0.02);
        assert!((tensor[[0, 0, 4, 14]] - black).abs() < 0.02);
        assert!(tensor[[0, 3, 1, 8]].abs() < 0.01);
        assert!((tensor[[0, 3, 6, 8]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_postprocess_argmax_and_resize() -> Result<()> {
        // 3 classes on a 2x2 logit grid
        let mut logits = Array4::<f32>::zeros((1, 3, 2, 2));
        logits[[0, 1, 0, 0]] = 5.0;
        logits[[0, 2, 0, 1]] = 5.0;
        logits[[0, 2, 1, 0]] = 1.0;
        logits[[0, 1, 1, 1]] = 0.5;
        logits[[0, 2, 1, 1]] = 0.7;

        let labels = postprocess(logits.view(), 4, 6)?;
        assert_eq!(labels.dim(), (6, 4));
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[0, 3]], 2);
        assert_eq!(labels[[5, 0]], 2);
        assert_eq!(labels[[5, 3]], 2);
        Ok(())
    }

    #[test]
    fn test_argmax_ties_keep_first() {
        let scores = array![0.2, 0.9, 0.9, 0.1];
        assert_eq!(argmax(scores.view()), 1);
    }
}
