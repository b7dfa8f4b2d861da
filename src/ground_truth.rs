use std::fs;
use std::path::Path;

use tracing::info;

use crate::dataset::Dataset;
use crate::errors::{Result, SafetyError};
use crate::progress::sample_bar;
use crate::serializer::write_label_file;

pub const GROUND_TRUTH_DIR: &str = "gt_preds";

/// Writes `<eval_root>/gt_preds/<stem>.bin` for every sample, labels as-is.
///
/// Does nothing and returns `false` when `gt_preds` already exists. Files are
/// written to a staging directory that is renamed into place once complete,
/// so an interrupted export is redone on the next run.
pub fn export_ground_truth<D: Dataset + ?Sized>(dataset: &D, eval_root: &Path) -> Result<bool> {
    let gt_dir = eval_root.join(GROUND_TRUTH_DIR);
    if gt_dir.exists() {
        info!(dir = %gt_dir.display(), "ground truth already exported");
        return Ok(false);
    }

    let staging = eval_root.join(format!("{GROUND_TRUTH_DIR}.partial"));
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .map_err(|e| SafetyError::file_system(&staging, "stale ground truth removal", e))?;
    }
    fs::create_dir_all(&staging)
        .map_err(|e| SafetyError::file_system(&staging, "ground truth directory creation", e))?;

    info!(samples = dataset.len(), dir = %gt_dir.display(), "exporting ground truth");
    let progress_bar = sample_bar(dataset.len(), GROUND_TRUTH_DIR);
    for index in 0..dataset.len() {
        let sample = dataset.sample(index)?;
        let labels = sample.labels.as_ref().ok_or_else(|| SafetyError::Validation {
            field: sample.name.clone(),
            reason: "has no ground-truth labels".to_string(),
        })?;
        write_label_file(&staging.join(format!("{}.bin", sample.stem())), labels)?;
        progress_bar.inc(1);
    }
    progress_bar.finish();

    fs::rename(&staging, &gt_dir)
        .map_err(|e| SafetyError::file_system(&gt_dir, "ground truth directory rename", e))?;
    Ok(true)
}
