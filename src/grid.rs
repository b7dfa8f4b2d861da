//! Coarse grid representation of full-resolution masks.
//!
//! Both directions compute the block size with floor division, so the
//! remainder rows and columns at the bottom/right of a mask never belong to a
//! cell: `reduce` ignores them and `project` leaves them at background.

use ndarray::{s, Array2};

use crate::labels::{LabelMap, BACKGROUND};

/// Side length of the grid used for vision-language grid prompting.
pub const GRID_SIZE: usize = 20;

/// Downsamples `mask` to a `grid_size` × `grid_size` grid.
///
/// A cell is 1 when the number of non-zero pixels in its block is strictly
/// greater than 1% of the block area, otherwise 0.
pub fn reduce(mask: &LabelMap, grid_size: usize) -> Array2<u8> {
    let mut reduced = Array2::<u8>::zeros((grid_size, grid_size));
    if grid_size == 0 {
        return reduced;
    }

    let (height, width) = mask.dim();
    let (block_height, block_width) = (height / grid_size, width / grid_size);
    let block_area = block_height * block_width;

    for ((i, j), cell) in reduced.indexed_iter_mut() {
        let block = mask.slice(s![
            i * block_height..(i + 1) * block_height,
            j * block_width..(j + 1) * block_width
        ]);
        let positives = block.iter().filter(|&&v| v != 0).count();
        // positives > area / 100, kept in integers
        *cell = u8::from(positives * 100 > block_area);
    }

    reduced
}

/// Broadcasts each grid cell over its block of a `height` × `width` mask.
pub fn project(grid: &Array2<u8>, height: usize, width: usize) -> LabelMap {
    let mut projected = Array2::<u8>::from_elem((height, width), BACKGROUND);
    let (rows, cols) = grid.dim();
    if rows == 0 || cols == 0 {
        return projected;
    }

    let (block_height, block_width) = (height / rows, width / cols);
    for ((i, j), &value) in grid.indexed_iter() {
        projected
            .slice_mut(s![
                i * block_height..(i + 1) * block_height,
                j * block_width..(j + 1) * block_width
            ])
            .fill(value);
    }

    projected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_threshold_is_strictly_above_one_percent() {
        // 20x20 grid over 200x200 gives 10x10 blocks (area 100, 1% = 1 pixel)
        let mut mask = Array2::<u8>::zeros((200, 200));
        // block (0, 0): exactly one pixel, not above 1%
        mask[[3, 4]] = 1;
        // block (0, 1): two pixels
        mask[[0, 10]] = 1;
        mask[[9, 19]] = 1;
        // block (5, 7): fully set
        mask.slice_mut(s![50..60, 70..80]).fill(1);

        let grid = reduce(&mask, GRID_SIZE);
        assert_eq!(grid.dim(), (GRID_SIZE, GRID_SIZE));
        assert_eq!(grid[[0, 0]], 0);
        assert_eq!(grid[[0, 1]], 1);
        assert_eq!(grid[[5, 7]], 1);
        assert_eq!(grid.iter().filter(|&&v| v == 1).count(), 2);
    }

    #[test]
    fn test_reduce_matches_block_counts() {
        let (height, width) = (45, 62);
        let mask = Array2::from_shape_fn((height, width), |(y, x)| u8::from((x * 7 + y * 3) % 11 == 0));
        let grid = reduce(&mask, 4);

        let (bh, bw) = (height / 4, width / 4);
        for ((i, j), &cell) in grid.indexed_iter() {
            let count = mask
                .slice(s![i * bh..(i + 1) * bh, j * bw..(j + 1) * bw])
                .iter()
                .filter(|&&v| v != 0)
                .count();
            let expected = count as f64 > (bh * bw) as f64 / 100.0;
            assert_eq!(cell == 1, expected, "cell ({i}, {j})");
        }
    }

    #[test]
    fn test_reduce_drops_remainder() {
        // 21 rows: the last row falls outside every block
        let mut mask = Array2::<u8>::zeros((21, 20));
        mask.row_mut(20).fill(1);
        let grid = reduce(&mask, GRID_SIZE);
        assert!(grid.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_reduce_smaller_than_grid() {
        let mask = Array2::<u8>::ones((5, 5));
        let grid = reduce(&mask, GRID_SIZE);
        assert!(grid.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_project_broadcasts_blocks() {
        let mut grid = Array2::<u8>::zeros((2, 2));
        grid[[0, 1]] = 1;
        grid[[1, 0]] = 1;

        let projected = project(&grid, 4, 6);
        assert_eq!(projected.dim(), (4, 6));
        assert_eq!(projected[[0, 0]], 0);
        assert_eq!(projected[[0, 3]], 1);
        assert_eq!(projected[[1, 5]], 1);
        assert_eq!(projected[[2, 0]], 1);
        assert_eq!(projected[[3, 2]], 1);
        assert_eq!(projected[[3, 3]], 0);
    }

    #[test]
    fn test_project_leaves_remainder_at_background() {
        let grid = Array2::<u8>::ones((GRID_SIZE, GRID_SIZE));
        let projected = project(&grid, 545, 967);
        // blocks are 27x48, covering 540 rows and 960 columns
        assert_eq!(projected[[539, 959]], 1);
        assert!(projected.slice(s![540.., ..]).iter().all(|&v| v == BACKGROUND));
        assert!(projected.slice(s![.., 960..]).iter().all(|&v| v == BACKGROUND));
    }

    #[test]
    fn test_reduce_then_project_keeps_block_decisions() {
        let mut mask = Array2::<u8>::zeros((540, 960));
        mask.slice_mut(s![0..27, 0..48]).fill(1);
        mask.slice_mut(s![270..297, 480..528]).fill(1);

        let projected = project(&reduce(&mask, GRID_SIZE), 540, 960);
        assert_eq!(projected, mask);
    }
}
