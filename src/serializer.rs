use std::fs;
use std::path::Path;

use ndarray::Array2;

use crate::errors::{Result, SafetyError};
use crate::labels::LabelMap;

/// Writes `labels` as raw row-major `u8` bytes, exactly `height * width` of
/// them.
pub fn write_label_file(path: &Path, labels: &LabelMap) -> Result<()> {
    let bytes: Vec<u8> = labels.as_standard_layout().iter().copied().collect();
    fs::write(path, bytes).map_err(|e| SafetyError::file_system(path, "label file write", e))
}

/// Reads a label file written by [`write_label_file`].
pub fn read_label_file(path: &Path, height: usize, width: usize) -> Result<LabelMap> {
    let bytes = fs::read(path).map_err(|e| SafetyError::file_system(path, "label file read", e))?;
    if bytes.len() != height * width {
        return Err(SafetyError::Validation {
            field: path.display().to_string(),
            reason: format!(
                "has {} bytes, expected {}x{} = {}",
                bytes.len(),
                height,
                width,
                height * width
            ),
        });
    }
    Ok(Array2::from_shape_vec((height, width), bytes)?)
}
