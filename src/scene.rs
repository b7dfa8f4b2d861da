use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SafetyError};
use crate::registry::SceneFlavor;
use crate::traits::{Pixel, SceneQueries, SceneState};

/// Objects and terrain classes of a deployment scenario.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Domain {
    pub objects: Vec<String>,
    #[serde(default)]
    pub terrains: Vec<String>,
}

#[derive(Deserialize)]
struct LlmState {
    domain: Domain,
}

impl Domain {
    /// Reads the `domain` field of the program-synthesis state file.
    pub fn load(state_path: &Path) -> Result<Self> {
        let text = fs::read_to_string(state_path)
            .map_err(|e| SafetyError::file_system(state_path, "domain state read", e))?;
        let state: LlmState = serde_json::from_str(&text)?;
        Ok(state.domain)
    }
}

/// Reads `key` from a JSON object of sketch texts.
pub fn load_sketch_text(table_path: &Path, key: &str) -> Result<String> {
    let text = fs::read_to_string(table_path)
        .map_err(|e| SafetyError::file_system(table_path, "sketch table read", e))?;
    let mut table: HashMap<String, Value> = serde_json::from_str(&text)?;
    match table.remove(key) {
        Some(Value::String(sketch)) => Ok(sketch),
        Some(_) => Err(SafetyError::configuration(format!(
            "sketch {key} in {} is not a string",
            table_path.display()
        ))),
        None => Err(SafetyError::configuration(format!(
            "sketch {key} not found in {}",
            table_path.display()
        ))),
    }
}

/// Scene queries answered from per-image rasters computed ahead of time by
/// the perception stack.
///
/// For image `<stem>` the rasters live in `<data_dir>/<stem>/<query>.bin`
/// (code-as-policies scenes under a sibling `<data_dir>_cap`), each holding
/// `H x W` little-endian `f32` values. Query names are `terrain`,
/// `in_the_way`, `slope`, `distance_to_<obj>` and `frontal_distance_<obj>`.
pub struct CachedScene {
    flavor: SceneFlavor,
    rasters: HashMap<String, Array2<f32>>,
    dims: (usize, usize),
}

impl CachedScene {
    pub fn new(flavor: SceneFlavor) -> Self {
        Self {
            flavor,
            rasters: HashMap::new(),
            dims: (0, 0),
        }
    }

    fn raster_dir(&self, data_dir: &Path, stem: &str) -> PathBuf {
        match self.flavor {
            SceneFlavor::Standard => data_dir.join(stem),
            SceneFlavor::CodeAsPolicies => {
                let mut cap_dir = data_dir.as_os_str().to_owned();
                cap_dir.push("_cap");
                PathBuf::from(cap_dir).join(stem)
            }
        }
    }

    fn lookup(&self, query: &str, (x, y): Pixel) -> Result<f64> {
        let raster = self.rasters.get(query).ok_or_else(|| SafetyError::Query {
            query: query.to_string(),
            x,
            y,
            reason: "no raster for this image".to_string(),
        })?;
        raster
            .get([y, x])
            .map(|&v| f64::from(v))
            .ok_or_else(|| SafetyError::Query {
                query: query.to_string(),
                x,
                y,
                reason: format!("outside the {}x{} raster", self.dims.1, self.dims.0),
            })
    }
}

impl SceneQueries for CachedScene {
    fn set_state(&mut self, state: SceneState<'_>) -> Result<()> {
        let dir = self.raster_dir(state.data_dir, state.stem);
        let (height, width) = (
            state.image.height() as usize,
            state.image.width() as usize,
        );

        let entries =
            fs::read_dir(&dir).map_err(|e| SafetyError::file_system(&dir, "scene raster listing", e))?;
        let mut rasters = HashMap::new();
        for entry in entries {
            let path = entry.map_err(|e| SafetyError::file_system(&dir, "scene raster listing", e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            rasters.insert(name.to_string(), read_raster(&path, height, width)?);
        }

        debug!(
            stem = state.stem,
            rasters = rasters.len(),
            points = state.point_cloud.nrows(),
            "scene state loaded"
        );
        self.rasters = rasters;
        self.dims = (height, width);
        Ok(())
    }

    fn terrain(&self, pixel: Pixel) -> Result<f64> {
        self.lookup("terrain", pixel)
    }

    fn in_the_way(&self, pixel: Pixel) -> Result<bool> {
        self.lookup("in_the_way", pixel).map(|v| v != 0.0)
    }

    fn slope(&self, pixel: Pixel) -> Result<f64> {
        self.lookup("slope", pixel)
    }

    fn distance_to(&self, object: &str, pixel: Pixel) -> Result<f64> {
        self.lookup(&format!("distance_to_{object}"), pixel)
    }

    fn frontal_distance(&self, object: &str, pixel: Pixel) -> Result<f64> {
        self.lookup(&format!("frontal_distance_{object}"), pixel)
    }
}

/// Reads an `H x W` little-endian `f32` raster.
pub fn read_raster(path: &Path, height: usize, width: usize) -> Result<Array2<f32>> {
    let bytes = fs::read(path).map_err(|e| SafetyError::file_system(path, "scene raster read", e))?;
    if bytes.len() != height * width * 4 {
        return Err(SafetyError::Validation {
            field: path.display().to_string(),
            reason: format!(
                "has {} bytes, expected {}x{} f32 values",
                bytes.len(),
                height,
                width
            ),
        });
    }
    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Array2::from_shape_vec((height, width), values)?)
}

/// Writes a raster in the layout [`read_raster`] expects.
pub fn write_raster(path: &Path, raster: &Array2<f32>) -> Result<()> {
    let bytes: Vec<u8> = raster
        .as_standard_layout()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    fs::write(path, bytes).map_err(|e| SafetyError::file_system(path, "scene raster write", e))
}
