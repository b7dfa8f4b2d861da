use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use ndarray::{Array2, Zip};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, SafetyError};
use crate::labels::{BACKGROUND, SAFE};
use crate::traits::{ObjectMask, ProgramSynthesisEngine};
use crate::vlm::image_data_url;

pub const PROMPTED_INSTRUCTION: &str =
    "Safe location = sidewalk or concrete, and far away from objects. Replace safe location with snow.";
pub const PLAIN_INSTRUCTION: &str = "Replace safe location for a robot to pull over to with snow.";

/// Program synthesis requests run an LLM and then a chain of vision models.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub const fn instruction(prompted: bool) -> &'static str {
    if prompted {
        PROMPTED_INSTRUCTION
    } else {
        PLAIN_INSTRUCTION
    }
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    image: String,
    instruction: &'a str,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    objects: Vec<WireObject>,
}

#[derive(Deserialize)]
struct WireObject {
    mask: WireMask,
}

/// `data` is the base64 of `height * width` row-major bytes.
#[derive(Deserialize)]
struct WireMask {
    width: usize,
    height: usize,
    data: String,
}

impl WireMask {
    fn decode(self) -> Result<Array2<u8>> {
        let bytes = STANDARD.decode(self.data.as_bytes()).map_err(|e| SafetyError::Service {
            service: "program-synthesis".to_string(),
            message: format!("mask is not valid base64: {e}"),
        })?;
        if bytes.len() != self.width * self.height {
            return Err(SafetyError::Service {
                service: "program-synthesis".to_string(),
                message: format!(
                    "mask has {} bytes, expected {}x{}",
                    bytes.len(),
                    self.height,
                    self.width
                ),
            });
        }
        Ok(Array2::from_shape_vec((self.height, self.width), bytes)?)
    }
}

/// Client for a visual program synthesis service exposing
/// `POST <endpoint>` with `{image, instruction}` and answering with the
/// masks of the objects the synthesized program selected.
pub struct HttpProgramEngine {
    client: Client,
    endpoint: String,
}

impl HttpProgramEngine {
    pub fn new(endpoint: &str) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(SafetyError::configuration("program synthesis endpoint is empty"));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl ProgramSynthesisEngine for HttpProgramEngine {
    fn execute(&self, image: &RgbImage, instruction: &str) -> Result<Vec<ObjectMask>> {
        debug!(endpoint = %self.endpoint, instruction, "running visual program");
        let request = ExecuteRequest {
            image: image_data_url(image)?,
            instruction,
        };
        let response = self.client.post(&self.endpoint).json(&request).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SafetyError::Service {
                service: "program-synthesis".to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let body: ExecuteResponse = response.json()?;
        body.objects
            .into_iter()
            .map(|object| object.mask.decode().map(|mask| ObjectMask { mask }))
            .collect()
    }
}

/// Logical OR of every object mask: [`SAFE`] where any mask is non-zero,
/// [`BACKGROUND`] elsewhere. All masks must be `height x width`.
pub fn union_masks(objects: &[ObjectMask], height: usize, width: usize) -> Result<Array2<u8>> {
    let mut union = Array2::from_elem((height, width), BACKGROUND);
    for object in objects {
        if object.mask.dim() != (height, width) {
            return Err(SafetyError::Validation {
                field: "object mask".to_string(),
                reason: format!(
                    "is {:?}, expected ({height}, {width})",
                    object.mask.dim()
                ),
            });
        }
        Zip::from(&mut union).and(&object.mask).for_each(|out, &m| {
            if m != 0 {
                *out = SAFE;
            }
        });
    }
    Ok(union)
}
