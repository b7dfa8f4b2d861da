use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::dataset::{read_point_cloud, Dataset, Sample};
use crate::errors::{Result, SafetyError};
use crate::grid::{self, GRID_SIZE};
use crate::labels::{finalize_prediction, label_for, LabelMap, UNSAFE};
use crate::progress::sample_bar;
use crate::serializer::write_label_file;
use crate::sketch::Sketch;
use crate::traits::{ProgramSynthesisEngine, SceneQueries, SceneState, SegmentationModel, VisionLanguageClient};
use crate::visprog::{instruction, union_masks};
use crate::vlm::{image_data_url, parse_grid_or_default, GRID_PROMPT};

/// Produces a safety mask for one sample.
///
/// The returned map is `H x W` and may still hold background (0); the
/// runner finalizes it before writing.
pub trait Predictor {
    fn name(&self) -> &str;

    fn predict(&mut self, sample: &Sample) -> Result<LabelMap>;
}

/// Runs `predictor` over samples `start, start + step, ...` of `dataset` and
/// writes `<out_dir>/<stem>.bin` for each. Returns the number of files
/// written.
pub fn run_predictor<D, P>(
    dataset: &D,
    predictor: &mut P,
    out_dir: &Path,
    start: usize,
    step: usize,
) -> Result<usize>
where
    D: Dataset + ?Sized,
    P: Predictor + ?Sized,
{
    if step == 0 {
        return Err(SafetyError::Validation {
            field: "step size".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    fs::create_dir_all(out_dir)
        .map_err(|e| SafetyError::file_system(out_dir, "prediction directory creation", e))?;

    let indices: Vec<usize> = (start..dataset.len()).step_by(step).collect();
    info!(
        method = predictor.name(),
        samples = indices.len(),
        total = dataset.len(),
        out_dir = %out_dir.display(),
        "generating predictions"
    );

    let progress_bar = sample_bar(indices.len(), predictor.name());
    for &index in &indices {
        let sample = dataset.sample(index)?;
        debug!(index, name = %sample.name, "predicting");

        let mask = predictor.predict(&sample)?;
        if mask.dim() != sample.dims() {
            return Err(SafetyError::Validation {
                field: format!("prediction for {}", sample.name),
                reason: format!("is {:?}, expected {:?}", mask.dim(), sample.dims()),
            });
        }

        let path = out_dir.join(format!("{}.bin", sample.stem()));
        write_label_file(&path, &finalize_prediction(mask))?;
        progress_bar.inc(1);
    }
    progress_bar.finish();

    Ok(indices.len())
}

/// Segmentation network predictions, optionally conditioned on
/// `<eval_root>/depth/<stem>.png`.
pub struct NeuralNetPredictor<M> {
    model: M,
    depth_dir: Option<PathBuf>,
}

impl<M: SegmentationModel> NeuralNetPredictor<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            depth_dir: None,
        }
    }

    pub fn with_depth(model: M, eval_root: &Path) -> Self {
        Self {
            model,
            depth_dir: Some(eval_root.join("depth")),
        }
    }

    fn load_depth(dir: &Path, stem: &str) -> Result<GrayImage> {
        let path = dir.join(format!("{stem}.png"));
        Ok(image::open(&path)
            .map_err(|e| SafetyError::ImageProcessing {
                path: path.display().to_string(),
                operation: "depth image loading".to_string(),
                source: Box::new(e),
            })?
            .into_luma8())
    }
}

impl<M: SegmentationModel> Predictor for NeuralNetPredictor<M> {
    fn name(&self) -> &str {
        if self.depth_dir.is_some() {
            "nn-depth"
        } else {
            "nn"
        }
    }

    fn predict(&mut self, sample: &Sample) -> Result<LabelMap> {
        match &self.depth_dir {
            Some(dir) => {
                let depth = Self::load_depth(dir, sample.stem())?;
                self.model.predict_with_depth(&sample.image, &depth)
            }
            None => self.model.predict(&sample.image),
        }
    }
}

/// Evaluates a compiled safety program at every pixel.
pub struct NeuroSymbolicPredictor<S> {
    sketch: Sketch,
    scene: S,
    eval_root: PathBuf,
}

impl<S: SceneQueries> NeuroSymbolicPredictor<S> {
    pub fn new(sketch: Sketch, scene: S, eval_root: &Path) -> Self {
        Self {
            sketch,
            scene,
            eval_root: eval_root.to_path_buf(),
        }
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }
}

impl<S: SceneQueries> Predictor for NeuroSymbolicPredictor<S> {
    fn name(&self) -> &str {
        "ns"
    }

    fn predict(&mut self, sample: &Sample) -> Result<LabelMap> {
        let stem = sample.stem();
        let loaded;
        let point_cloud = match &sample.point_cloud {
            Some(cloud) => cloud,
            None => {
                loaded = read_point_cloud(&self.eval_root.join("pcs").join(format!("{stem}.bin")))?;
                &loaded
            }
        };

        let data_dir = self.eval_root.join("fi_data");
        fs::create_dir_all(&data_dir)
            .map_err(|e| SafetyError::file_system(&data_dir, "scene data directory creation", e))?;
        self.scene.set_state(SceneState {
            data_dir: &data_dir,
            stem,
            image: &sample.image,
            point_cloud,
        })?;

        let (height, width) = sample.dims();
        let sketch = &self.sketch;
        let scene: &dyn SceneQueries = &self.scene;

        let rows: Vec<Vec<u8>> = (0..height)
            .into_par_iter()
            .map(|y| {
                (0..width)
                    .map(|x| match sketch.is_safe(scene, (x, y)) {
                        Ok(is_safe) => label_for(is_safe),
                        Err(e) => {
                            warn!(x, y, stem, error = %e, "pixel evaluation failed, marking unsafe");
                            UNSAFE
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Array2::from_shape_vec((height, width), rows.concat())?)
    }
}

/// Asks a vision-language model for a coarse grid of safe cells.
pub struct VlmGridPredictor<C> {
    client: C,
    preprompt: String,
}

impl<C: VisionLanguageClient> VlmGridPredictor<C> {
    pub fn new(client: C, preprompt: String) -> Self {
        Self { client, preprompt }
    }
}

impl<C: VisionLanguageClient> Predictor for VlmGridPredictor<C> {
    fn name(&self) -> &str {
        "vlm-grid"
    }

    fn predict(&mut self, sample: &Sample) -> Result<LabelMap> {
        let image_url = image_data_url(&sample.image)?;
        let grid = match self.client.respond(&self.preprompt, GRID_PROMPT, &image_url) {
            Ok(text) => {
                let (grid, error) = parse_grid_or_default(&text);
                if let Some(e) = error {
                    warn!(name = %sample.name, error = %e, response = %text, "could not parse grid response");
                }
                grid
            }
            Err(e) => {
                warn!(name = %sample.name, error = %e, "vision-language request failed");
                Array2::zeros((GRID_SIZE, GRID_SIZE))
            }
        };

        let (height, width) = sample.dims();
        Ok(grid::project(&grid, height, width))
    }
}

/// Unions the objects a synthesized visual program selects.
pub struct VisprogPredictor<E> {
    engine: E,
    prompted: bool,
}

impl<E: ProgramSynthesisEngine> VisprogPredictor<E> {
    pub fn new(engine: E, prompted: bool) -> Self {
        Self { engine, prompted }
    }
}

impl<E: ProgramSynthesisEngine> Predictor for VisprogPredictor<E> {
    fn name(&self) -> &str {
        if self.prompted {
            "visprog-prompted"
        } else {
            "visprog"
        }
    }

    fn predict(&mut self, sample: &Sample) -> Result<LabelMap> {
        let (height, width) = sample.dims();
        let result = self
            .engine
            .execute(&sample.image, instruction(self.prompted))
            .and_then(|objects| union_masks(&objects, height, width));

        Ok(result.unwrap_or_else(|e| {
            warn!(name = %sample.name, error = %e, "visual program failed");
            Array2::zeros((height, width))
        }))
    }
}
