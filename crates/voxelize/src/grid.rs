//! The common grid every layer is rasterized onto, and the flat 2D storage
//! used for layer grids.

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::Limits;
use crate::crs::{CrsChoice, GeoCrs};
use crate::error::{Result, VoxError};
use crate::region::BoundingRegion;

/// A fully-resolved grid: projected origin, uniform cell size and shape.
///
/// Row 0 lies on the southern edge of the grid; northing grows with the row
/// index, easting with the column index. Created once per run and immutable
/// afterwards; every downstream 2D grid must have exactly this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Easting of the grid's south-west corner in `crs` units (meters).
    pub origin_x: f64,
    /// Northing of the grid's south-west corner in `crs` units (meters).
    pub origin_y: f64,
    /// Cell edge length in meters, uniform in x and y.
    pub cell_size: f64,
    pub n_rows: usize,
    pub n_cols: usize,
    pub crs: GeoCrs,
}

impl GridSpec {
    /// Derive the grid covering `region` at `cell_size` meters per cell.
    ///
    /// The region is reprojected into the chosen CRS, its axis-aligned
    /// bounding box is taken, and the box's lower-left corner is snapped
    /// *down* to a multiple of `cell_size` so that reruns over the same area
    /// and resolution reproduce the same grid alignment. Extents round up,
    /// so the grid always covers the whole box.
    pub fn derive(
        region: &BoundingRegion,
        cell_size: f64,
        crs_choice: CrsChoice,
        limits: &Limits,
    ) -> Result<GridSpec> {
        region.validate()?;

        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(VoxError::InvalidResolution {
                reason: format!("cell_size must be positive, got {cell_size}"),
            });
        }

        let crs = match crs_choice {
            CrsChoice::Fixed(crs) => crs,
            CrsChoice::Auto => {
                let [lon, lat] = region.centroid();
                GeoCrs::utm_for(lon, lat)
            }
        };

        let projected = region.project(crs)?;

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &[x, y] in &projected {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }

        let origin_x = (min_x / cell_size).floor() * cell_size;
        let origin_y = (min_y / cell_size).floor() * cell_size;

        let n_cols = (((max_x - origin_x) / cell_size).ceil() as usize).max(1);
        let n_rows = (((max_y - origin_y) / cell_size).ceil() as usize).max(1);

        let cells = n_rows.checked_mul(n_cols).unwrap_or(usize::MAX);
        if cells > limits.max_grid_cells {
            return Err(VoxError::InvalidResolution {
                reason: format!(
                    "{n_rows}x{n_cols} = {cells} cells exceeds the limit of {}",
                    limits.max_grid_cells
                ),
            });
        }

        let spec = GridSpec {
            origin_x,
            origin_y,
            cell_size,
            n_rows,
            n_cols,
            crs,
        };

        info!(
            "Grid: {}x{} cells of {:.2} m in {} (origin {:.2}, {:.2})",
            spec.n_rows, spec.n_cols, spec.cell_size, spec.crs, spec.origin_x, spec.origin_y
        );

        Ok(spec)
    }

    /// Construct a grid directly from projected coordinates, bypassing
    /// region reprojection. Useful when the caller already works in the
    /// output CRS.
    pub fn from_origin(
        origin_x: f64,
        origin_y: f64,
        cell_size: f64,
        n_rows: usize,
        n_cols: usize,
        crs: GeoCrs,
    ) -> Result<GridSpec> {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(VoxError::InvalidResolution {
                reason: format!("cell_size must be positive, got {cell_size}"),
            });
        }
        if n_rows == 0 || n_cols == 0 {
            return Err(VoxError::InvalidResolution {
                reason: "grid must have at least one row and one column".to_string(),
            });
        }

        Ok(GridSpec {
            origin_x,
            origin_y,
            cell_size,
            n_rows,
            n_cols,
            crs,
        })
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.n_rows * self.n_cols
    }

    /// Projected coordinates of a cell's center.
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y + (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Fractional (col, row) cell coordinates of a projected point.
    #[inline]
    pub fn world_to_cell(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.cell_size,
            (y - self.origin_y) / self.cell_size,
        )
    }
}

/// Flat row-major 2D storage aligned to a [`GridSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Grid2d<T> {
    n_rows: usize,
    n_cols: usize,
    data: Vec<T>,
}

impl<T: Copy> Grid2d<T> {
    pub fn filled(n_rows: usize, n_cols: usize, fill: T) -> Self {
        Self {
            n_rows,
            n_cols,
            data: vec![fill; n_rows * n_cols],
        }
    }

    pub fn from_vec(n_rows: usize, n_cols: usize, data: Vec<T>) -> Self {
        assert_eq!(data.len(), n_rows * n_cols, "shape/data mismatch");
        Self {
            n_rows,
            n_cols,
            data,
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.n_cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.n_cols + col] = value;
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// (row, col, value) iterator in row-major order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        let n_cols = self.n_cols;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i / n_cols, i % n_cols, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn derive_snaps_origin_down_and_covers_the_region() {
        let region = BoundingRegion::rect(139.760, 35.680, 139.764, 35.683);
        let spec = GridSpec::derive(&region, 5.0, CrsChoice::Auto, &limits()).unwrap();

        assert_eq!(spec.crs, GeoCrs::Utm { zone: 54, south: false });
        assert_eq!(spec.origin_x % 5.0, 0.0);
        assert_eq!(spec.origin_y % 5.0, 0.0);

        // The snapped grid must cover the projected bounding box, and one
        // cell fewer on either axis must not.
        let projected = region.project(spec.crs).unwrap();
        let max_x = projected.iter().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max);
        let max_y = projected.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max);
        let min_x = projected.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
        let min_y = projected.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);

        assert!(spec.origin_x <= min_x && spec.origin_y <= min_y);
        assert!(spec.origin_x + spec.n_cols as f64 * spec.cell_size >= max_x);
        assert!(spec.origin_y + spec.n_rows as f64 * spec.cell_size >= max_y);
        assert!(spec.origin_x + (spec.n_cols - 1) as f64 * spec.cell_size < max_x);
        assert!(spec.origin_y + (spec.n_rows - 1) as f64 * spec.cell_size < max_y);
    }

    #[test]
    fn derive_is_reproducible_across_shifted_regions() {
        // Two overlapping queries at the same resolution must land on the
        // same lattice, even though their bounding boxes differ.
        let a = BoundingRegion::rect(139.760, 35.680, 139.764, 35.683);
        let b = BoundingRegion::rect(139.761, 35.681, 139.765, 35.684);

        let spec_a = GridSpec::derive(&a, 5.0, CrsChoice::Auto, &limits()).unwrap();
        let spec_b = GridSpec::derive(&b, 5.0, CrsChoice::Auto, &limits()).unwrap();

        let dx = (spec_a.origin_x - spec_b.origin_x) / spec_a.cell_size;
        let dy = (spec_a.origin_y - spec_b.origin_y) / spec_a.cell_size;
        assert_eq!(dx, dx.round());
        assert_eq!(dy, dy.round());
    }

    #[test]
    fn non_positive_cell_size_is_rejected() {
        let region = BoundingRegion::rect(139.76, 35.68, 139.77, 35.69);
        for bad in [0.0, -2.0, f64::NAN] {
            assert!(matches!(
                GridSpec::derive(&region, bad, CrsChoice::Auto, &limits()),
                Err(VoxError::InvalidResolution { .. })
            ));
        }
    }

    #[test]
    fn oversized_grids_are_rejected_before_allocation() {
        let region = BoundingRegion::rect(139.0, 35.0, 140.0, 36.0);
        let tight = Limits {
            max_grid_cells: 10_000,
            ..Limits::default()
        };
        assert!(matches!(
            GridSpec::derive(&region, 1.0, CrsChoice::Auto, &tight),
            Err(VoxError::InvalidResolution { .. })
        ));
    }

    #[test]
    fn cell_center_and_world_to_cell_are_inverse() {
        let spec = GridSpec::from_origin(1000.0, 2000.0, 2.5, 10, 20, GeoCrs::WebMercator).unwrap();
        let (x, y) = spec.cell_center(3, 7);
        let (col, row) = spec.world_to_cell(x, y);
        assert_eq!(col, 7.5);
        assert_eq!(row, 3.5);
    }
}
