use serde::{Deserialize, Serialize};

use crate::unit::{CropCode, UNSET};

/// A 2D raster tile of crop codes, row-major. `0` marks an unset cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropGrid {
    /// Row-major cell codes.
    pub data: Vec<CropCode>,
    pub width: usize,
    pub height: usize,
}

impl CropGrid {
    /// Create a new grid filled with the given code.
    pub fn new(width: usize, height: usize, fill: CropCode) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
        }
    }

    pub fn unset(width: usize, height: usize) -> Self {
        Self::new(width, height, UNSET)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> CropCode {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: CropCode) {
        self.data[row * self.width + col] = val;
    }

    /// Cell by flat index. Out-of-range reads as unset.
    #[inline]
    pub fn cell(&self, idx: usize) -> CropCode {
        self.data.get(idx).copied().unwrap_or(UNSET)
    }

    /// Whether the backing buffer agrees with the declared shape.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.width * self.height
    }

    pub fn same_shape(&self, other: &CropGrid) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn count_set(&self) -> usize {
        self.data.iter().filter(|&&c| c != UNSET).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_row_major() {
        let mut g = CropGrid::unset(3, 2);
        g.set(1, 2, 47);
        assert_eq!(g.get(1, 2), 47);
        assert_eq!(g.cell(5), 47);
        assert_eq!(g.cell(99), UNSET);
        assert_eq!(g.count_set(), 1);
    }

    #[test]
    fn json_shape_is_checked_by_caller() {
        let g: CropGrid = serde_json::from_str(r#"{"data":[1,2,3],"width":2,"height":2}"#).unwrap();
        assert!(!g.is_consistent());
        assert!(g.same_shape(&CropGrid::unset(2, 2)));
    }
}
