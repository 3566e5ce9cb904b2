//! Input layer descriptions and the aligned 2D grids they rasterize into.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crs::GeoCrs;
use crate::error::{Result, VoxError};
use crate::grid::Grid2d;

/// No-data sentinel for categorical grids. Distinct from every valid class
/// code; a missing land-cover sample is not class 0.
pub const NO_DATA_CLASS: u16 = u16::MAX;

/// The semantic role a layer plays during vertical resolution. The resolver
/// consumes roles through an ordered precedence list, so adding a role is a
/// configuration change rather than a new conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerRole {
    /// Terrain elevation in meters. The only mandatory role.
    Terrain,
    /// Ground-surface classification codes.
    LandCover,
    /// Tree canopy top height in meters above ground.
    CanopyHeight,
    /// Building top-of-roof height in meters above ground.
    BuildingHeight,
    /// Building base height in meters above ground (elevated structures).
    BuildingBase,
    /// Per-cell building identifier (footprint index), for downstream
    /// exports that number buildings.
    BuildingId,
}

/// Whether a layer's values are measurements or class codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Continuous,
    Categorical,
}

/// Interpolation policy for raster resampling. Categorical rasters always
/// sample nearest-neighbor regardless of the configured policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resampling {
    Nearest,
    Bilinear,
    /// Catmull-Rom bicubic.
    Cubic,
}

/// One polygon with the attribute used for burning.
#[derive(Debug, Clone)]
pub struct VectorGeometry {
    /// Exterior ring in the layer's CRS, open form.
    pub ring: Arc<Vec<[f64; 2]>>,
    /// Height/elevation for continuous layers, class code for categorical
    /// ones.
    pub value: f64,
}

/// A vector source layer: geometries plus the attribute they carry.
#[derive(Debug, Clone)]
pub struct VectorLayer {
    pub name: String,
    pub crs: GeoCrs,
    pub kind: LayerKind,
    pub geometries: Vec<VectorGeometry>,
}

/// Row-major affine pixel-to-world transform:
/// `x = a*col + b*row + c`, `y = d*col + e*row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    /// North-up transform from the raster's top-left corner and pixel size.
    pub fn north_up(left: f64, top: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: left,
            d: 0.0,
            e: -pixel_height,
            f: top,
        }
    }

    /// World coordinates of a (col, row) pixel position.
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Fractional (col, row) pixel position of a world coordinate, `None`
    /// for a singular transform.
    #[inline]
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.a * self.e - self.b * self.d;
        if det.abs() < f64::EPSILON {
            return None;
        }

        let dx = x - self.c;
        let dy = y - self.f;
        Some((
            (self.e * dx - self.b * dy) / det,
            (self.a * dy - self.d * dx) / det,
        ))
    }
}

/// A raster source layer already in memory; acquisition is the caller's
/// concern.
#[derive(Debug, Clone)]
pub struct RasterLayer {
    pub name: String,
    pub crs: GeoCrs,
    pub transform: AffineTransform,
    pub data: Grid2d<f32>,
    /// Value marking missing samples, in addition to NaN.
    pub nodata: Option<f32>,
    pub kind: LayerKind,
    pub resampling: Resampling,
}

impl RasterLayer {
    #[inline]
    pub fn is_nodata(&self, v: f32) -> bool {
        v.is_nan() || self.nodata.is_some_and(|nd| v == nd)
    }
}

/// A named source bound to the role it plays in resolution.
#[derive(Debug, Clone)]
pub struct SourceLayer {
    pub role: LayerRole,
    pub source: LayerSource,
}

#[derive(Debug, Clone)]
pub enum LayerSource {
    Vector(VectorLayer),
    Raster(RasterLayer),
}

impl LayerSource {
    pub fn name(&self) -> &str {
        match self {
            LayerSource::Vector(v) => &v.name,
            LayerSource::Raster(r) => &r.name,
        }
    }
}

/// A rasterized layer aligned to the common grid: one value per cell,
/// either a measurement (NaN = no data) or a class code
/// ([`NO_DATA_CLASS`] = no data).
#[derive(Debug, Clone, PartialEq)]
pub enum LayerGrid {
    Continuous(Grid2d<f32>),
    Categorical(Grid2d<u16>),
}

impl LayerGrid {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            LayerGrid::Continuous(g) => (g.n_rows(), g.n_cols()),
            LayerGrid::Categorical(g) => (g.n_rows(), g.n_cols()),
        }
    }

    pub fn is_all_nodata(&self) -> bool {
        match self {
            LayerGrid::Continuous(g) => g.as_slice().iter().all(|v| v.is_nan()),
            LayerGrid::Categorical(g) => g.as_slice().iter().all(|&v| v == NO_DATA_CLASS),
        }
    }

    pub fn continuous(&self) -> Option<&Grid2d<f32>> {
        match self {
            LayerGrid::Continuous(g) => Some(g),
            LayerGrid::Categorical(_) => None,
        }
    }

    pub fn categorical(&self) -> Option<&Grid2d<u16>> {
        match self {
            LayerGrid::Categorical(g) => Some(g),
            LayerGrid::Continuous(_) => None,
        }
    }
}

/// The rasterized layers of one run, keyed by role. Ordered map so that
/// iteration (and everything derived from it) is deterministic.
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    grids: BTreeMap<LayerRole, LayerGrid>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: LayerRole, grid: LayerGrid) {
        self.grids.insert(role, grid);
    }

    pub fn get(&self, role: LayerRole) -> Option<&LayerGrid> {
        self.grids.get(&role)
    }

    pub fn roles(&self) -> impl Iterator<Item = LayerRole> + '_ {
        self.grids.keys().copied()
    }

    /// The mandatory terrain elevation grid.
    pub fn terrain(&self) -> Result<&Grid2d<f32>> {
        self.grids
            .get(&LayerRole::Terrain)
            .and_then(|g| g.continuous())
            .ok_or(VoxError::MissingRequiredLayer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_invert_round_trips() {
        let t = AffineTransform::north_up(500_000.0, 4_000_000.0, 10.0, 10.0);
        let (x, y) = t.apply(12.0, 34.0);
        let (col, row) = t.invert(x, y).unwrap();
        assert_eq!((col, row), (12.0, 34.0));
    }

    #[test]
    fn nodata_matches_nan_and_sentinel() {
        let layer = RasterLayer {
            name: "dem".to_string(),
            crs: GeoCrs::Geographic,
            transform: AffineTransform::north_up(0.0, 1.0, 0.1, 0.1),
            data: Grid2d::filled(2, 2, 0.0f32),
            nodata: Some(-9999.0),
            kind: LayerKind::Continuous,
            resampling: Resampling::Bilinear,
        };

        assert!(layer.is_nodata(f32::NAN));
        assert!(layer.is_nodata(-9999.0));
        assert!(!layer.is_nodata(0.0));
    }

    #[test]
    fn missing_terrain_is_a_typed_error() {
        let stack = LayerStack::new();
        assert!(matches!(
            stack.terrain(),
            Err(VoxError::MissingRequiredLayer)
        ));
    }
}
