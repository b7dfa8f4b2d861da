use ndarray::Array2;

/// Per-pixel label grid, indexed `[row, column]`.
pub type LabelMap = Array2<u8>;

/// Label used while a prediction is being computed for "no decision".
pub const BACKGROUND: u8 = 0;
/// Pixel is safe for the robot.
pub const SAFE: u8 = 1;
/// Pixel is unsafe. Background is written out as unsafe.
pub const UNSAFE: u8 = 2;

/// Rewrites the computation-time background label to [`UNSAFE`].
///
/// Every prediction passes through this step right before it is serialized,
/// so files on disk only ever contain [`SAFE`] and [`UNSAFE`] for binary
/// methods. Ground truth does not go through here.
pub fn finalize_prediction(mut mask: LabelMap) -> LabelMap {
    mask.mapv_inplace(|v| if v == BACKGROUND { UNSAFE } else { v });
    mask
}

/// Maps a boolean safety decision to its output label.
pub const fn label_for(is_safe: bool) -> u8 {
    if is_safe {
        SAFE
    } else {
        UNSAFE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_finalize_rewrites_background_only() {
        let mask = array![[0, 1], [2, 0]];
        let finalized = finalize_prediction(mask);
        assert_eq!(finalized, array![[2, 1], [2, 2]]);
    }

    #[test]
    fn test_label_for() {
        assert_eq!(label_for(true), SAFE);
        assert_eq!(label_for(false), UNSAFE);
    }
}
