use image::{GrayImage, RgbImage};
use ndarray::Array2;
use parking_lot::Mutex;

use crate::errors::{Result, SafetyError};
use crate::labels::LabelMap;
use crate::traits::{
    ObjectMask, Pixel, ProgramSynthesisEngine, SceneQueries, SceneState, SegmentationModel,
    VisionLanguageClient,
};

/// Segmentation model that labels every pixel with a fixed class, and a
/// different one when a depth image is supplied.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    pub label: u8,
    pub depth_label: u8,
}

impl MockSegmentationModel {
    pub const fn new(label: u8, depth_label: u8) -> Self {
        Self { label, depth_label }
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn predict(&self, image: &RgbImage) -> Result<LabelMap> {
        Ok(Array2::from_elem(
            (image.height() as usize, image.width() as usize),
            self.label,
        ))
    }

    fn predict_with_depth(&self, image: &RgbImage, depth: &GrayImage) -> Result<LabelMap> {
        if depth.dimensions() != image.dimensions() {
            return Err(SafetyError::Validation {
                field: "depth".to_string(),
                reason: "does not match the image dimensions".to_string(),
            });
        }
        Ok(Array2::from_elem(
            (image.height() as usize, image.width() as usize),
            self.depth_label,
        ))
    }
}

type QueryFn = dyn Fn(&str, Pixel) -> Result<f64> + Send + Sync;

/// Scene whose every query is answered by one closure taking the query name
/// (`terrain`, `in_the_way`, `slope`, `distance_to_<obj>`,
/// `frontal_distance_<obj>`) and the pixel. `in_the_way` is true for any
/// non-zero answer.
pub struct FnScene {
    answer: Box<QueryFn>,
    pub states_seen: Vec<String>,
    /// Point count of each cloud handed to `set_state`.
    pub points_seen: Vec<usize>,
}

impl FnScene {
    pub fn new<F>(answer: F) -> Self
    where
        F: Fn(&str, Pixel) -> Result<f64> + Send + Sync + 'static,
    {
        Self {
            answer: Box::new(answer),
            states_seen: Vec::new(),
            points_seen: Vec::new(),
        }
    }
}

impl SceneQueries for FnScene {
    fn set_state(&mut self, state: SceneState<'_>) -> Result<()> {
        self.states_seen.push(state.stem.to_string());
        self.points_seen.push(state.point_cloud.nrows());
        Ok(())
    }

    fn terrain(&self, pixel: Pixel) -> Result<f64> {
        (self.answer)("terrain", pixel)
    }

    fn in_the_way(&self, pixel: Pixel) -> Result<bool> {
        (self.answer)("in_the_way", pixel).map(|v| v != 0.0)
    }

    fn slope(&self, pixel: Pixel) -> Result<f64> {
        (self.answer)("slope", pixel)
    }

    fn distance_to(&self, object: &str, pixel: Pixel) -> Result<f64> {
        (self.answer)(&format!("distance_to_{object}"), pixel)
    }

    fn frontal_distance(&self, object: &str, pixel: Pixel) -> Result<f64> {
        (self.answer)(&format!("frontal_distance_{object}"), pixel)
    }
}

/// Vision-language client replaying canned replies in order. Once the replies
/// run out every call fails with a service error.
#[derive(Debug, Default)]
pub struct MockVisionClient {
    replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl MockVisionClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl VisionLanguageClient for MockVisionClient {
    fn respond(&self, preprompt: &str, prompt: &str, image_url: &str) -> Result<String> {
        self.prompts.lock().push(format!("{preprompt}|{prompt}"));
        if !image_url.starts_with("data:image/png;base64,") && !image_url.starts_with("http") {
            return Err(SafetyError::Service {
                service: "mock-vlm".to_string(),
                message: "unsupported image url".to_string(),
            });
        }
        self.replies.lock().pop().ok_or_else(|| SafetyError::Service {
            service: "mock-vlm".to_string(),
            message: "no more replies".to_string(),
        })
    }
}

/// Program synthesis engine returning fixed masks, or failing for images of a
/// given width.
#[derive(Debug, Clone, Default)]
pub struct MockProgramEngine {
    pub masks: Vec<Array2<u8>>,
    pub fail_on_width: Option<u32>,
}

impl ProgramSynthesisEngine for MockProgramEngine {
    fn execute(&self, image: &RgbImage, _instruction: &str) -> Result<Vec<ObjectMask>> {
        if self.fail_on_width == Some(image.width()) {
            return Err(SafetyError::Service {
                service: "mock-visprog".to_string(),
                message: "program execution failed".to_string(),
            });
        }
        Ok(self
            .masks
            .iter()
            .cloned()
            .map(|mask| ObjectMask { mask })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_model_shapes() -> Result<()> {
        let model = MockSegmentationModel::new(1, 2);
        let image = RgbImage::new(5, 3);
        assert_eq!(model.predict(&image)?.dim(), (3, 5));
        assert!(model.predict_with_depth(&image, &GrayImage::new(5, 3))?.iter().all(|&v| v == 2));
        assert!(model.predict_with_depth(&image, &GrayImage::new(3, 5)).is_err());
        Ok(())
    }

    #[test]
    fn test_mock_vision_client_replays_in_order() -> Result<()> {
        let client = MockVisionClient::new(["first", "second"]);
        let url = "data:image/png;base64,AAAA";
        assert_eq!(client.respond("pre", "p", url)?, "first");
        assert_eq!(client.respond("pre", "p", url)?, "second");
        assert!(client.respond("pre", "p", url).is_err());
        assert_eq!(client.prompts.lock().len(), 3);
        Ok(())
    }
}
